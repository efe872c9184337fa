//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的房间引擎。

mod auth;
mod dto;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{credentials_from_headers, MemberAuth, PrincipalAuth};
pub use dto::{GuestJoinResponse, RoomView};
pub use error::{ApiError, ErrorBody};
pub use routes::{cors_from_origins, router, router_with_cors};
pub use state::{AppState, Collaborators};
