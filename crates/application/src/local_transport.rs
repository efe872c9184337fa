// 进程内的通道中心，单节点部署使用
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::ParticipantId;
use tokio::sync::{mpsc, RwLock};

use crate::events::ServerEvent;
use crate::transport::{Channel, ConnectionId, EventStream, Transport, TransportError};

struct ConnectionEntry {
    participant: ParticipantId,
    sender: mpsc::UnboundedSender<ServerEvent>,
    channels: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    fn drop_connection(&mut self, connection: ConnectionId) {
        let Some(entry) = self.connections.remove(&connection) else {
            return;
        };
        for key in entry.channels {
            if let Some(members) = self.channels.get_mut(&key) {
                members.remove(&connection);
                if members.is_empty() {
                    self.channels.remove(&key);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct LocalTransport {
    registry: RwLock<Registry>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 频道当前的订阅连接数
    pub async fn subscriber_count(&self, channel: Channel) -> usize {
        self.registry
            .read()
            .await
            .channels
            .get(&channel.key())
            .map_or(0, HashSet::len)
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn attach(&self, connection: ConnectionId, participant: ParticipantId) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut registry = self.registry.write().await;
        registry.drop_connection(connection);
        registry.connections.insert(
            connection,
            ConnectionEntry {
                participant,
                sender,
                channels: HashSet::new(),
            },
        );
        receiver
    }

    async fn subscribe(&self, connection: ConnectionId, channel: Channel) -> bool {
        let key = channel.key();
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.connections.get_mut(&connection) else {
            return false;
        };
        if !entry.channels.insert(key.clone()) {
            return false;
        }
        registry.channels.entry(key).or_default().insert(connection);
        true
    }

    async fn unsubscribe(&self, connection: ConnectionId, channel: Channel) -> bool {
        let key = channel.key();
        let mut registry = self.registry.write().await;
        let removed = registry
            .connections
            .get_mut(&connection)
            .is_some_and(|entry| entry.channels.remove(&key));
        if let Some(members) = registry.channels.get_mut(&key) {
            members.remove(&connection);
            if members.is_empty() {
                registry.channels.remove(&key);
            }
        }
        removed
    }

    async fn detach(&self, connection: ConnectionId) {
        self.registry.write().await.drop_connection(connection);
    }

    async fn publish(
        &self,
        channel: Channel,
        event: &ServerEvent,
        exclude: &[ParticipantId],
    ) -> Result<usize, TransportError> {
        let key = channel.key();
        let registry = self.registry.read().await;
        let Some(members) = registry.channels.get(&key) else {
            return Ok(0);
        };

        let mut delivered = 0;
        for connection in members {
            let Some(entry) = registry.connections.get(connection) else {
                continue;
            };
            if exclude.contains(&entry.participant) {
                continue;
            }
            // 接收端已关闭说明连接正在断开，丢弃即可
            if entry.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(channel = %key, connection = %connection, "连接已关闭，丢弃推送");
            }
        }
        Ok(delivered)
    }

    async fn send_to(
        &self,
        connection: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), TransportError> {
        let registry = self.registry.read().await;
        let entry = registry
            .connections
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        entry
            .sender
            .send(event)
            .map_err(|err| TransportError::Delivery {
                channel: format!("connection:{connection}"),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{GuestId, RoomId, UserId};
    use uuid::Uuid;

    fn member() -> ParticipantId {
        ParticipantId::Member(UserId::from(Uuid::new_v4()))
    }

    fn pong() -> ServerEvent {
        ServerEvent::Pong
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_except_excluded() {
        let transport = LocalTransport::new();
        let room = Channel::Room(RoomId::from(Uuid::new_v4()));
        let (a, b) = (member(), ParticipantId::Guest(GuestId::generate()));
        let (ca, cb) = (ConnectionId::new(), ConnectionId::new());

        let mut stream_a = transport.attach(ca, a.clone()).await;
        let mut stream_b = transport.attach(cb, b.clone()).await;
        assert!(transport.subscribe(ca, room).await);
        assert!(transport.subscribe(cb, room).await);
        assert!(!transport.subscribe(cb, room).await);

        let delivered = transport.publish(room, &pong(), &[a]).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(stream_b.recv().await, Some(ServerEvent::Pong));
        assert!(stream_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn detach_releases_subscriptions() {
        let transport = LocalTransport::new();
        let room = Channel::Room(RoomId::from(Uuid::new_v4()));
        let connection = ConnectionId::new();
        let _stream = transport.attach(connection, member()).await;
        transport.subscribe(connection, room).await;
        assert_eq!(transport.subscriber_count(room).await, 1);

        transport.detach(connection).await;
        assert_eq!(transport.subscriber_count(room).await, 0);
        assert_eq!(transport.connection_count().await, 0);
        assert!(!transport.subscribe(connection, room).await);
        assert_eq!(transport.publish(room, &pong(), &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_to_replies_on_the_connection_stream() {
        let transport = LocalTransport::new();
        let room = Channel::Room(RoomId::from(Uuid::new_v4()));
        let connection = ConnectionId::new();
        let mut stream = transport.attach(connection, member()).await;
        transport.subscribe(connection, room).await;

        let left = ServerEvent::RoomLeft {
            room_id: RoomId::from(Uuid::nil()),
        };
        transport.publish(room, &pong(), &[]).await.unwrap();
        transport.send_to(connection, left).await.unwrap();
        assert_eq!(stream.recv().await, Some(ServerEvent::Pong));
        assert!(matches!(stream.recv().await, Some(ServerEvent::RoomLeft { .. })));

        transport.detach(connection).await;
        assert!(matches!(
            transport.send_to(connection, pong()).await,
            Err(TransportError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn dropped_receiver_is_skipped() {
        let transport = LocalTransport::new();
        let channel = Channel::User(UserId::from(Uuid::new_v4()));
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        let stream = transport.attach(c1, member()).await;
        let mut alive = transport.attach(c2, member()).await;
        transport.subscribe(c1, channel).await;
        transport.subscribe(c2, channel).await;
        drop(stream);

        assert_eq!(transport.publish(channel, &pong(), &[]).await.unwrap(), 1);
        assert_eq!(alive.recv().await, Some(ServerEvent::Pong));
    }
}
