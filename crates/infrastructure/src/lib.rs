//! 基础设施层实现。
//!
//! 提供 PostgreSQL 文档存储、bcrypt 密码哈希与 JWT 身份校验等适配器，
//! 实现应用层定义的协作者接口。

pub mod builder;
pub mod identity;
pub mod password;
pub mod pg;

pub use builder::{Infrastructure, InfrastructureError};
pub use identity::JwtIdentityProvider;
pub use password::BcryptPasswordHasher;
pub use pg::{
    create_pg_pool, PgAliasRepository, PgMessageRepository, PgRoomRepository, PgStorage, MIGRATOR,
};
