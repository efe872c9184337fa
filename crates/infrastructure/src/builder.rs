use std::sync::Arc;

use application::{
    AliasRepository, InMemoryAliasRepository, InMemoryMessageRepository, InMemoryRoomRepository,
    MessageRepository, PasswordHasher, RoomRepository,
};
use config::{AppConfig, StorageBackend};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    identity::JwtIdentityProvider,
    password::BcryptPasswordHasher,
    pg::{create_pg_pool, PgStorage, MIGRATOR},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("storage misconfigured: {0}")]
    Misconfigured(String),
}

/// 按配置装配好的外部协作者
#[derive(Clone)]
pub struct Infrastructure {
    pub rooms: Arc<dyn RoomRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub aliases: Arc<dyn AliasRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub identity: Arc<JwtIdentityProvider>,
    /// 仅 postgres 后端存在
    pub pool: Option<PgPool>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let password_hasher: Arc<dyn PasswordHasher> =
            Arc::new(BcryptPasswordHasher::from_config(&config.security));
        let identity = Arc::new(JwtIdentityProvider::from_config(&config.jwt));

        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("using in-memory document store");
                Ok(Self::in_memory(password_hasher, identity))
            }
            StorageBackend::Postgres => {
                let url = config.storage.database_url.as_deref().ok_or_else(|| {
                    InfrastructureError::Misconfigured("missing database_url".into())
                })?;
                let pool = create_pg_pool(url, config.storage.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(
                    max_connections = config.storage.max_connections,
                    "connected to postgres document store"
                );

                let storage = PgStorage::new(pool);
                Ok(Self {
                    rooms: storage.room_repository,
                    messages: storage.message_repository,
                    aliases: storage.alias_repository,
                    password_hasher,
                    identity,
                    pool: Some(storage.pool),
                })
            }
        }
    }

    pub fn in_memory(
        password_hasher: Arc<dyn PasswordHasher>,
        identity: Arc<JwtIdentityProvider>,
    ) -> Self {
        Self {
            rooms: Arc::new(InMemoryRoomRepository::new()),
            messages: Arc::new(InMemoryMessageRepository::new()),
            aliases: Arc::new(InMemoryAliasRepository::new()),
            password_hasher,
            identity,
            pool: None,
        }
    }
}
