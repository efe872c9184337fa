//! 聊天室核心领域模型
//!
//! 包含房间、参与者身份（成员 / 访客）、消息、好友备注等纯数据实体，
//! 以及它们自身携带的不变式校验。这里不做任何 I/O。

pub mod alias;
pub mod errors;
pub mod message;
pub mod principal;
pub mod room;
pub mod value_objects;

// 重新导出常用类型
pub use alias::FriendAlias;
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Message, MessageBody, MAX_TEXT_LEN};
pub use principal::{GuestProfile, MemberProfile, ParticipantId, Principal};
pub use room::{Guest, NewRoom, Room, RoomKind, RoomPatch};
pub use value_objects::{GuestId, MessageId, PasswordHash, RoomId, Timestamp, UserId};
