//! 实时通道抽象。
//!
//! 频道以字符串为键，区分大小写：`user:<memberId>` 是成员的私有频道，
//! 只有该成员自己的连接订阅；`<roomId>` 是房间共享频道。

use std::fmt;

use async_trait::async_trait;
use domain::{ParticipantId, RoomId, UserId};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::ServerEvent;

/// 单个实时连接的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Room(RoomId),
    User(UserId),
}

impl Channel {
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(room_id) => write!(f, "{room_id}"),
            Self::User(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is not attached")]
    UnknownConnection(ConnectionId),
    #[error("push to {channel} failed: {message}")]
    Delivery { channel: String, message: String },
}

/// 连接收到的事件流
pub type EventStream = mpsc::UnboundedReceiver<ServerEvent>;

/// 推送是尽力而为、至多一次的；不做重放，也没有离线信箱。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 注册连接并返回它的事件流
    async fn attach(&self, connection: ConnectionId, participant: ParticipantId) -> EventStream;

    /// 返回 `true` 表示这是一次新的订阅
    async fn subscribe(&self, connection: ConnectionId, channel: Channel) -> bool;

    async fn unsubscribe(&self, connection: ConnectionId, channel: Channel) -> bool;

    /// 注销连接并释放它的全部订阅
    async fn detach(&self, connection: ConnectionId);

    /// 向频道推送事件，跳过 `exclude` 中参与者的连接。返回送达的连接数。
    async fn publish(
        &self,
        channel: Channel,
        event: &ServerEvent,
        exclude: &[ParticipantId],
    ) -> Result<usize, TransportError>;

    /// 直接回复单个连接
    async fn send_to(
        &self,
        connection: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), TransportError>;
}
