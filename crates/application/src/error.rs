use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::identity::AuthError;
use crate::password::PasswordHasherError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("not allowed to {action}")]
    Forbidden { action: &'static str },
    #[error("{resource} not found")]
    NotFound { resource: &'static str },
    /// 文档存储或身份服务等外部依赖失败
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

/// 对外暴露的错误分类，决定 HTTP 状态码与 WebSocket 错误帧。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Forbidden,
    NotFound,
    Conflict,
    Upstream,
}

impl ApplicationError {
    pub fn forbidden(action: &'static str) -> Self {
        Self::Forbidden { action }
    }

    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(DomainError::InvalidArgument { .. }) => ErrorKind::Validation,
            Self::Domain(_) => ErrorKind::Conflict,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Upstream { .. } => ErrorKind::Upstream,
        }
    }

    /// 稳定的机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::InvalidArgument { .. }) => "VALIDATION_ERROR",
            Self::Domain(DomainError::RoomFull) => "ROOM_FULL",
            Self::Domain(DomainError::AlreadyMember) => "ALREADY_MEMBER",
            Self::Domain(DomainError::PasswordRequired) => "PASSWORD_REQUIRED",
            Self::Domain(DomainError::InvalidPassword) => "INVALID_PASSWORD",
            Self::Auth(AuthError::NoCredential) => "NO_CREDENTIAL",
            Self::Auth(AuthError::InvalidToken) => "INVALID_TOKEN",
            Self::Auth(AuthError::GuestNotFound) => "GUEST_NOT_FOUND",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::not_found("document"),
            RepositoryError::Conflict => Self::upstream("concurrent write conflict"),
            RepositoryError::Storage { message } => Self::Upstream { message },
        }
    }
}

impl From<PasswordHasherError> for ApplicationError {
    fn from(value: PasswordHasherError) -> Self {
        Self::upstream(value.to_string())
    }
}
