//! 在线状态与会话管理。
//!
//! 每个连接的生命周期：`Connecting -> Authenticated -> {InRoom}* -> Disconnected`。
//! 会话表由一把异步互斥锁保护，锁只在不会挂起的代码段内持有。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{ParticipantId, Principal, Room, RoomId};
use tokio::sync::Mutex;

use crate::alias::AliasResolver;
use crate::error::ApplicationError;
use crate::events::{ParticipantView, ServerEvent};
use crate::identity::{Credentials, IdentityResolver};
use crate::repository::RoomRepository;
use crate::transport::{Channel, ConnectionId, EventStream, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    InRoom,
}

/// 单个实时连接的会话
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub principal: Principal,
    pub rooms: HashSet<RoomId>,
    // 正在加入中的房间，用来拦截重入
    pending: HashSet<RoomId>,
}

impl Session {
    fn new(connection_id: ConnectionId, principal: Principal) -> Self {
        Self {
            connection_id,
            principal,
            rooms: HashSet::new(),
            pending: HashSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.rooms.is_empty() {
            SessionState::Authenticated
        } else {
            SessionState::InRoom
        }
    }

    pub fn is_in_room(&self, room_id: RoomId) -> bool {
        self.rooms.contains(&room_id)
    }
}

/// 已认证的连接句柄，`events` 由连接驱动方消费
pub struct Connection {
    pub id: ConnectionId,
    pub principal: Principal,
    pub events: EventStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    Joined,
    AlreadyJoined,
}

pub struct PresenceDependencies {
    pub identity: Arc<IdentityResolver>,
    pub rooms: Arc<dyn RoomRepository>,
    pub aliases: Arc<AliasResolver>,
    pub transport: Arc<dyn Transport>,
}

pub struct PresenceManager {
    deps: PresenceDependencies,
    sessions: Mutex<HashMap<ConnectionId, Session>>,
}

impl PresenceManager {
    pub fn new(deps: PresenceDependencies) -> Self {
        Self {
            deps,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 解析凭据并注册连接
    pub async fn connect(&self, credentials: &Credentials) -> Result<Connection, ApplicationError> {
        let principal = self.deps.identity.resolve(credentials).await?;
        Ok(self.register(principal).await)
    }

    /// 为已经解析好的身份注册连接；成员同时订阅自己的私有频道。
    pub async fn register(&self, principal: Principal) -> Connection {
        let id = ConnectionId::new();
        let events = self
            .deps
            .transport
            .attach(id, principal.participant_id())
            .await;
        if let Some(user_id) = principal.member_id() {
            self.deps.transport.subscribe(id, Channel::User(user_id)).await;
        }
        self.sessions
            .lock()
            .await
            .insert(id, Session::new(id, principal.clone()));

        tracing::info!(
            connection = %id,
            participant = %principal.participant_id(),
            is_guest = principal.is_guest(),
            "连接已建立"
        );
        Connection {
            id,
            principal,
            events,
        }
    }

    pub async fn session(&self, connection: ConnectionId) -> Option<Session> {
        self.sessions.lock().await.get(&connection).cloned()
    }

    pub async fn join_room(
        &self,
        connection: ConnectionId,
        room_id: RoomId,
    ) -> Result<JoinStatus, ApplicationError> {
        // 在任何挂起点之前标记 pending，同一连接的重入调用直接返回
        let principal = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&connection)
                .ok_or(ApplicationError::not_found("session"))?;
            if session.rooms.contains(&room_id) || !session.pending.insert(room_id) {
                return Ok(JoinStatus::AlreadyJoined);
            }
            session.principal.clone()
        };

        let result = self.enter_room(connection, &principal, room_id).await;

        let disconnected = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(&connection) {
                Some(session) => {
                    session.pending.remove(&room_id);
                    if result.is_ok() {
                        session.rooms.insert(room_id);
                    }
                    false
                }
                None => true,
            }
        };
        if disconnected && result.is_ok() {
            // 加入过程中连接已断开
            self.deps
                .transport
                .unsubscribe(connection, Channel::Room(room_id))
                .await;
        }
        result.map(|()| JoinStatus::Joined)
    }

    async fn enter_room(
        &self,
        connection: ConnectionId,
        principal: &Principal,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        let room = self
            .deps
            .rooms
            .find_by_id(room_id)
            .await?
            .ok_or(ApplicationError::not_found("room"))?;

        let allowed = match principal {
            Principal::Member(member) => room.has_member(member.user_id),
            Principal::Guest(guest) => room.has_guest(&guest.guest_id),
        };
        if !allowed {
            return Err(ApplicationError::forbidden("join this room"));
        }

        self.deps
            .transport
            .subscribe(connection, Channel::Room(room_id))
            .await;
        tracing::info!(
            connection = %connection,
            room_id = %room_id,
            participant = %principal.participant_id(),
            "加入房间"
        );

        self.announce_online(&room, principal).await;
        Ok(())
    }

    /// 上线广播：有备注的成员从私有频道收到个性化事件，其余人从房间频道收到通用事件。
    async fn announce_online(&self, room: &Room, principal: &Principal) {
        let joiner = principal.participant_id();
        let generic = ParticipantView::from_principal(principal);
        let mut exclude = vec![joiner.clone()];

        if let Some(joiner_id) = principal.member_id() {
            let others: Vec<_> = room
                .member_ids
                .iter()
                .copied()
                .filter(|id| *id != joiner_id)
                .collect();
            let aliases = match self.deps.aliases.aliases_for_viewers(joiner_id, &others).await {
                Ok(aliases) => aliases,
                Err(err) => {
                    tracing::warn!(room_id = %room.id, error = %err, "备注查询失败，使用基础名称");
                    HashMap::new()
                }
            };

            for (viewer, alias) in aliases {
                let event = ServerEvent::PresenceOnline {
                    room_id: room.id,
                    user: generic.clone().aliased(&alias),
                };
                if let Err(err) = self
                    .deps
                    .transport
                    .publish(Channel::User(viewer), &event, &[])
                    .await
                {
                    tracing::warn!(room_id = %room.id, viewer = %viewer, error = %err, "个性化上线事件推送失败");
                }
                exclude.push(ParticipantId::Member(viewer));
            }
        }

        let event = ServerEvent::PresenceOnline {
            room_id: room.id,
            user: generic,
        };
        if let Err(err) = self
            .deps
            .transport
            .publish(Channel::Room(room.id), &event, &exclude)
            .await
        {
            tracing::warn!(room_id = %room.id, error = %err, "上线事件推送失败");
        }
    }

    /// 离开房间；从未加入过的房间直接返回 `false`
    pub async fn leave_room(
        &self,
        connection: ConnectionId,
        room_id: RoomId,
    ) -> Result<bool, ApplicationError> {
        let principal = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&connection)
                .ok_or(ApplicationError::not_found("session"))?;
            if !session.rooms.remove(&room_id) {
                return Ok(false);
            }
            session.principal.clone()
        };

        self.deps
            .transport
            .unsubscribe(connection, Channel::Room(room_id))
            .await;
        self.announce_offline(room_id, &principal).await;
        tracing::info!(connection = %connection, room_id = %room_id, "离开房间");
        Ok(true)
    }

    pub async fn typing(
        &self,
        connection: ConnectionId,
        room_id: RoomId,
        is_typing: bool,
    ) -> Result<(), ApplicationError> {
        let principal = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&connection)
                .ok_or(ApplicationError::not_found("session"))?;
            if !session.is_in_room(room_id) {
                return Err(ApplicationError::forbidden("type in a room that was not joined"));
            }
            session.principal.clone()
        };

        let participant = principal.participant_id();
        let event = ServerEvent::Typing {
            room_id,
            user_id: participant.to_string(),
            username: principal.display_name().to_owned(),
            is_typing,
        };
        if let Err(err) = self
            .deps
            .transport
            .publish(Channel::Room(room_id), &event, &[participant])
            .await
        {
            tracing::warn!(room_id = %room_id, error = %err, "输入状态推送失败");
        }
        Ok(())
    }

    /// 断开连接：向所在房间广播下线并释放全部订阅
    pub async fn disconnect(&self, connection: ConnectionId) {
        let session = self.sessions.lock().await.remove(&connection);
        let Some(session) = session else {
            return;
        };

        // 先释放订阅，避免把自己的下线事件推给自己
        self.deps.transport.detach(connection).await;
        for room_id in &session.rooms {
            self.announce_offline(*room_id, &session.principal).await;
        }
        tracing::info!(
            connection = %connection,
            participant = %session.principal.participant_id(),
            rooms = session.rooms.len(),
            "连接已断开"
        );
    }

    async fn announce_offline(&self, room_id: RoomId, principal: &Principal) {
        let participant = principal.participant_id();
        let event = ServerEvent::PresenceOffline {
            room_id,
            user_id: participant.to_string(),
            is_guest: participant.is_guest(),
        };
        if let Err(err) = self
            .deps
            .transport
            .publish(Channel::Room(room_id), &event, &[])
            .await
        {
            tracing::warn!(room_id = %room_id, error = %err, "下线事件推送失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MockIdentityProvider;
    use crate::local_transport::LocalTransport;
    use crate::memory::{InMemoryAliasRepository, InMemoryRoomRepository};
    use domain::{GuestProfile, MemberProfile, NewRoom, UserId};
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct Harness {
        presence: PresenceManager,
        rooms: Arc<InMemoryRoomRepository>,
        transport: Arc<LocalTransport>,
    }

    fn harness() -> Harness {
        let rooms = Arc::new(InMemoryRoomRepository::new());
        let transport = Arc::new(LocalTransport::new());
        let mut provider = MockIdentityProvider::new();
        provider.expect_validate_token().never();
        let presence = PresenceManager::new(PresenceDependencies {
            identity: Arc::new(IdentityResolver::new(Arc::new(provider), rooms.clone())),
            rooms: rooms.clone(),
            aliases: Arc::new(AliasResolver::new(Arc::new(InMemoryAliasRepository::new()))),
            transport: transport.clone(),
        });
        Harness {
            presence,
            rooms,
            transport,
        }
    }

    fn member(name: &str) -> MemberProfile {
        MemberProfile {
            user_id: UserId::from(Uuid::new_v4()),
            username: name.into(),
            avatar: None,
        }
    }

    async fn room_with(rooms: &InMemoryRoomRepository, members: &[UserId]) -> Room {
        let room = Room::create(
            RoomId::from(Uuid::new_v4()),
            members[0],
            NewRoom {
                name: Some("presence".into()),
                member_ids: members.to_vec(),
                ..NewRoom::default()
            },
            None,
            10,
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        rooms.insert(room).await.unwrap()
    }

    #[tokio::test]
    async fn register_subscribes_member_private_channel() {
        let h = harness();
        let alice = member("alice");
        let connection = h.presence.register(Principal::Member(alice.clone())).await;

        assert_eq!(
            h.transport.subscriber_count(Channel::User(alice.user_id)).await,
            1
        );
        let session = h.presence.session(connection.id).await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let h = harness();
        let (alice, bob) = (member("alice"), member("bob"));
        let room = room_with(&h.rooms, &[alice.user_id, bob.user_id]).await;

        let mut bob_conn = h.presence.register(Principal::Member(bob)).await;
        h.presence.join_room(bob_conn.id, room.id).await.unwrap();
        // 加入者自己收不到自己的上线事件
        assert!(bob_conn.events.try_recv().is_err());

        let alice_conn = h.presence.register(Principal::Member(alice)).await;
        assert_eq!(
            h.presence.join_room(alice_conn.id, room.id).await.unwrap(),
            JoinStatus::Joined
        );
        assert_eq!(
            h.presence.join_room(alice_conn.id, room.id).await.unwrap(),
            JoinStatus::AlreadyJoined
        );

        let event = bob_conn.events.recv().await.unwrap();
        assert_eq!(event.name(), "presence:online");
        assert!(bob_conn.events.try_recv().is_err());
        assert_eq!(h.transport.subscriber_count(Channel::Room(room.id)).await, 2);
    }

    #[tokio::test]
    async fn join_requires_membership() {
        let h = harness();
        let (alice, mallory) = (member("alice"), member("mallory"));
        let room = room_with(&h.rooms, &[alice.user_id]).await;

        let conn = h.presence.register(Principal::Member(mallory)).await;
        let err = h.presence.join_room(conn.id, room.id).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Forbidden { .. }));

        let err = h
            .presence
            .join_room(conn.id, RoomId::from(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound { .. }));

        // 失败后 pending 已清理，会话仍处于 Authenticated
        let session = h.presence.session(conn.id).await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn typing_requires_joined_room_and_skips_typist() {
        let h = harness();
        let (alice, bob) = (member("alice"), member("bob"));
        let room = room_with(&h.rooms, &[alice.user_id, bob.user_id]).await;

        let mut alice_conn = h.presence.register(Principal::Member(alice)).await;
        let mut bob_conn = h.presence.register(Principal::Member(bob)).await;

        let err = h.presence.typing(alice_conn.id, room.id, true).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Forbidden { .. }));

        h.presence.join_room(alice_conn.id, room.id).await.unwrap();
        h.presence.join_room(bob_conn.id, room.id).await.unwrap();
        // 清掉 bob 加入时 alice 收到的上线事件
        let _ = alice_conn.events.recv().await;

        h.presence.typing(alice_conn.id, room.id, true).await.unwrap();
        match bob_conn.events.recv().await.unwrap() {
            ServerEvent::Typing {
                username, is_typing, ..
            } => {
                assert_eq!(username, "alice");
                assert!(is_typing);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(alice_conn.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_broadcasts_offline_and_releases_channels() {
        let h = harness();
        let alice = member("alice");
        let mut room = room_with(&h.rooms, &[alice.user_id]).await;
        let guest = domain::Guest::admit("visitor", None, OffsetDateTime::now_utc()).unwrap();
        room.guests.push(guest.clone());
        let version = room.version;
        h.rooms.update(room.clone(), version).await.unwrap();

        let mut alice_conn = h.presence.register(Principal::Member(alice)).await;
        h.presence.join_room(alice_conn.id, room.id).await.unwrap();

        let guest_conn = h
            .presence
            .register(Principal::Guest(GuestProfile {
                guest_id: guest.guest_id.clone(),
                display_name: guest.display_name.clone(),
                avatar: None,
            }))
            .await;
        h.presence.join_room(guest_conn.id, room.id).await.unwrap();
        assert_eq!(alice_conn.events.recv().await.unwrap().name(), "presence:online");

        h.presence.disconnect(guest_conn.id).await;
        match alice_conn.events.recv().await.unwrap() {
            ServerEvent::PresenceOffline {
                user_id, is_guest, ..
            } => {
                assert_eq!(user_id, guest.guest_id.to_string());
                assert!(is_guest);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(h.presence.session(guest_conn.id).await.is_none());
        assert_eq!(h.transport.subscriber_count(Channel::Room(room.id)).await, 1);
    }

    #[tokio::test]
    async fn leave_unjoined_room_is_noop() {
        let h = harness();
        let conn = h.presence.register(Principal::Member(member("alice"))).await;
        assert!(!h
            .presence
            .leave_room(conn.id, RoomId::from(Uuid::new_v4()))
            .await
            .unwrap());
    }
}
