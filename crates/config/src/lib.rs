//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - HTTP 服务
//! - JWT 认证
//! - 存储后端
//! - 房间规则
//!
//! 加载顺序：内置默认值 -> `APP_CONFIG_FILE` 指定的文件 -> `APP_` 前缀环境变量。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

const DEV_JWT_SECRET: &str = "roomcast-development-secret-change-before-deploying";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[serde(default)]
    #[validate(nested)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    #[validate(nested)]
    pub security: SecurityConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    #[validate(length(min = 32))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
}

impl JwtConfig {
    /// 是否仍在使用内置的开发密钥
    pub fn is_development_secret(&self) -> bool {
        self.secret == DEV_JWT_SECRET
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[validate(url)]
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

/// 房间规则配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoomsConfig {
    /// 群聊未指定人数上限时使用的默认值
    #[validate(range(min = 2))]
    pub default_group_limit: u32,
    /// 乐观并发写冲突时的最大重试次数
    #[validate(range(min = 1, max = 64))]
    pub max_write_retries: u32,
    #[validate(range(min = 1))]
    pub default_page_size: u32,
    #[validate(range(min = 1, max = 1000))]
    pub max_page_size: u32,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_group_limit: 10,
            max_write_retries: 8,
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SecurityConfig {
    #[validate(range(min = 4, max = 31))]
    pub bcrypt_cost: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.into(),
                expiration_hours: 24,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                max_connections: 10,
            },
            rooms: RoomsConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        Self::from_figment(figment.merge(Env::prefixed("APP_").split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        config.check_semantics()?;
        Ok(config)
    }

    /// derive 校验之外的跨字段规则
    fn check_semantics(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Postgres
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::InvalidStorage(
                "postgres backend requires storage.database_url".to_string(),
            ));
        }

        if self.rooms.default_page_size > self.rooms.max_page_size {
            return Err(ConfigError::InvalidRooms(
                "default_page_size cannot exceed max_page_size".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServer(
                "port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// 供日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.jwt.secret = "[REDACTED]".into();
        if redacted.storage.database_url.is_some() {
            redacted.storage.database_url = Some("postgres://[REDACTED]".into());
        }
        format!("{redacted:?}")
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("invalid storage configuration: {0}")]
    InvalidStorage(String),
    #[error("invalid rooms configuration: {0}")]
    InvalidRooms(String),
    #[error("invalid server configuration: {0}")]
    InvalidServer(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn base() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::from_figment(base()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.rooms.default_group_limit, 10);
        assert_eq!(config.rooms.max_write_retries, 8);
        assert!(config.jwt.is_development_secret());
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let figment = base().merge(Serialized::default("jwt.secret", "short"));
        let err = AppConfig::from_figment(figment).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn postgres_backend_requires_url() {
        let figment = base().merge(Serialized::default("storage.backend", "postgres"));
        let err = AppConfig::from_figment(figment).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStorage(_)));
    }

    #[test]
    fn page_sizes_must_be_consistent() {
        let figment = base()
            .merge(Serialized::default("rooms.default_page_size", 200))
            .merge(Serialized::default("rooms.max_page_size", 100));
        let err = AppConfig::from_figment(figment).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRooms(_)));
    }

    #[test]
    fn bcrypt_cost_range_is_enforced() {
        let figment = base().merge(Serialized::default("security.bcrypt_cost", 40));
        assert!(AppConfig::from_figment(figment).is_err());
    }

    #[test]
    fn env_and_file_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "roomcast.toml",
                r#"
                [server]
                host = "0.0.0.0"
                port = 9000

                [rooms]
                default_group_limit = 25
                max_write_retries = 4
                default_page_size = 20
                max_page_size = 50
                "#,
            )?;
            jail.set_env("APP_CONFIG_FILE", "roomcast.toml");
            jail.set_env("APP_SERVER__PORT", "9100");
            jail.set_env("APP_STORAGE__BACKEND", "postgres");
            jail.set_env("APP_STORAGE__DATABASE_URL", "postgres://db.internal/roomcast");

            let config = AppConfig::load().map_err(|err| err.to_string())?;
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.rooms.default_group_limit, 25);
            assert_eq!(config.storage.backend, StorageBackend::Postgres);
            Ok(())
        });
    }

    #[test]
    fn sanitize_hides_secrets() {
        let mut config = AppConfig::default();
        config.storage.database_url = Some("postgres://user:hunter2@db/roomcast".into());
        let text = config.sanitize();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains(DEV_JWT_SECRET));
    }
}
