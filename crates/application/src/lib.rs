//! 应用层实现。
//!
//! 这里是实时房间引擎的核心：身份解析、房间写入、好友备注解析、
//! 在线状态与会话管理，以及消息的个性化扇出。所有外部依赖
//! （文档存储、身份提供方、密码哈希、实时通道）都以 trait 的形式注入。

pub mod alias;
pub mod chat;
pub mod clock;
pub mod error;
pub mod events;
pub mod identity;
pub mod local_transport;
pub mod memory;
pub mod password;
pub mod presence;
pub mod repository;
pub mod rooms;
pub mod transport;

pub use alias::AliasResolver;
pub use chat::{
    ChatService, ChatServiceDependencies, DeliveryReport, FanOut, MessagePolicy,
    SendMessageRequest,
};
pub use clock::{Clock, SystemClock};
pub use error::{ApplicationError, ErrorKind};
pub use events::{MessageView, ParticipantView, ServerEvent};
pub use identity::{AuthError, Credentials, IdentityError, IdentityProvider, IdentityResolver};
pub use local_transport::LocalTransport;
pub use memory::{InMemoryAliasRepository, InMemoryMessageRepository, InMemoryRoomRepository};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::{
    Connection, JoinStatus, PresenceDependencies, PresenceManager, Session, SessionState,
};
pub use repository::{AliasRepository, MessageRepository, RoomRepository};
pub use rooms::{
    CreateRoomRequest, JoinOutcome, Joiner, RoomPolicy, RoomService, RoomServiceDependencies,
    UpdateRoomRequest,
};
pub use transport::{Channel, ConnectionId, EventStream, Transport, TransportError};
