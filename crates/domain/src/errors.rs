//! 领域模型错误定义

use thiserror::Error;

/// 领域规则被违反时返回的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 输入格式不合法（可由用户修正）
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// 房间人数已达上限（成员 + 访客）
    #[error("room is full")]
    RoomFull,

    /// 用户已经是房间成员
    #[error("user is already a member of this room")]
    AlreadyMember,

    /// 房间受密码保护但未提供密码
    #[error("password is required to join this room")]
    PasswordRequired,

    /// 房间密码错误
    #[error("invalid room password")]
    InvalidPassword,
}

impl DomainError {
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 文档存储返回的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("document not found")]
    NotFound,
    /// 乐观并发写入时版本号不匹配
    #[error("document version conflict")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
