//! 身份解析：把一次连接或请求携带的凭据归类为注册成员或房间访客。
//!
//! 令牌优先；令牌一旦出现就只走令牌校验，失败即拒绝，绝不回退到访客路径。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{GuestId, GuestProfile, MemberProfile, Principal};
use thiserror::Error;

use crate::error::ApplicationError;
use crate::repository::RoomRepository;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token rejected: {0}")]
    InvalidToken(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// 外部身份提供方，负责令牌的签名与过期校验。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<MemberProfile, IdentityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credential supplied")]
    NoCredential,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("guest not found")]
    GuestNotFound,
}

/// 入站凭据。空白字符串等同于未提供。
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
    pub guest_id: Option<String>,
}

impl Credentials {
    pub fn token(&self) -> Option<&str> {
        non_blank(self.token.as_deref())
    }

    pub fn guest_id(&self) -> Option<&str> {
        non_blank(self.guest_id.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    rooms: Arc<dyn RoomRepository>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>, rooms: Arc<dyn RoomRepository>) -> Self {
        Self { provider, rooms }
    }

    /// 套接字握手与允许访客的 HTTP 操作使用的策略：成员或访客皆可。
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Principal, ApplicationError> {
        if let Some(token) = credentials.token() {
            return self.validate_token(token).await.map(Principal::Member);
        }
        if let Some(guest_id) = credentials.guest_id() {
            return self.resolve_guest(guest_id).await.map(Principal::Guest);
        }
        Err(AuthError::NoCredential.into())
    }

    /// 仅限注册成员的操作；单独的访客 id 视为没有凭据。
    pub async fn resolve_member(
        &self,
        credentials: &Credentials,
    ) -> Result<MemberProfile, ApplicationError> {
        match credentials.token() {
            Some(token) => self.validate_token(token).await,
            None => Err(AuthError::NoCredential.into()),
        }
    }

    async fn validate_token(&self, token: &str) -> Result<MemberProfile, ApplicationError> {
        self.provider
            .validate_token(token)
            .await
            .map_err(|err| match err {
                IdentityError::InvalidToken(reason) => {
                    tracing::debug!(reason = %reason, "令牌校验失败");
                    AuthError::InvalidToken.into()
                }
                IdentityError::Unavailable(message) => {
                    tracing::error!(error = %message, "身份服务不可用");
                    ApplicationError::upstream(message)
                }
            })
    }

    async fn resolve_guest(&self, raw: &str) -> Result<GuestProfile, ApplicationError> {
        let guest_id = GuestId::parse(raw).map_err(|_| AuthError::GuestNotFound)?;
        let room = self
            .rooms
            .find_by_guest(&guest_id)
            .await?
            .ok_or(AuthError::GuestNotFound)?;
        let guest = room.guest(&guest_id).ok_or(AuthError::GuestNotFound)?;
        Ok(GuestProfile {
            guest_id: guest.guest_id.clone(),
            display_name: guest.display_name.clone(),
            avatar: guest.avatar.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRoomRepository;
    use domain::{Guest, NewRoom, Room, RoomId, UserId};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn member(name: &str) -> MemberProfile {
        MemberProfile {
            user_id: UserId::from(Uuid::new_v4()),
            username: name.into(),
            avatar: None,
        }
    }

    async fn room_with_guest(rooms: &InMemoryRoomRepository) -> GuestId {
        let now = OffsetDateTime::now_utc();
        let mut room = Room::create(
            RoomId::from(Uuid::new_v4()),
            UserId::from(Uuid::new_v4()),
            NewRoom {
                name: Some("lobby".into()),
                ..NewRoom::default()
            },
            None,
            10,
            now,
        )
        .unwrap();
        let guest = Guest::admit("visitor", None, now).unwrap();
        let guest_id = guest.guest_id.clone();
        room.add_guest(guest, now).unwrap();
        rooms.insert(room).await.unwrap();
        guest_id
    }

    fn resolver(
        provider: MockIdentityProvider,
        rooms: Arc<InMemoryRoomRepository>,
    ) -> IdentityResolver {
        IdentityResolver::new(Arc::new(provider), rooms)
    }

    #[tokio::test]
    async fn valid_token_yields_member() {
        let alice = member("alice");
        let expected = alice.clone();
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_validate_token()
            .withf(|token: &str| token == "good")
            .times(1)
            .returning(move |_| Ok(alice.clone()));

        let resolver = resolver(provider, Arc::new(InMemoryRoomRepository::new()));
        let principal = resolver
            .resolve(&Credentials {
                token: Some("good".into()),
                guest_id: None,
            })
            .await
            .unwrap();
        assert_eq!(principal, Principal::Member(expected));
    }

    #[tokio::test]
    async fn rejected_token_never_falls_back_to_guest() {
        let rooms = Arc::new(InMemoryRoomRepository::new());
        let guest_id = room_with_guest(&rooms).await;

        let mut provider = MockIdentityProvider::new();
        provider
            .expect_validate_token()
            .returning(|_| Err(IdentityError::InvalidToken("expired".into())));

        let err = resolver(provider, rooms)
            .resolve(&Credentials {
                token: Some("stale".into()),
                guest_id: Some(guest_id.to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Auth(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn provider_outage_is_upstream() {
        let mut provider = MockIdentityProvider::new();
        provider
            .expect_validate_token()
            .returning(|_| Err(IdentityError::Unavailable("timeout".into())));

        let err = resolver(provider, Arc::new(InMemoryRoomRepository::new()))
            .resolve_member(&Credentials {
                token: Some("any".into()),
                guest_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Upstream { .. }));
    }

    #[tokio::test]
    async fn guest_id_resolves_from_room_guest_list() {
        let rooms = Arc::new(InMemoryRoomRepository::new());
        let guest_id = room_with_guest(&rooms).await;
        let mut provider = MockIdentityProvider::new();
        provider.expect_validate_token().never();

        let principal = resolver(provider, rooms)
            .resolve(&Credentials {
                token: Some("   ".into()),
                guest_id: Some(guest_id.to_string()),
            })
            .await
            .unwrap();
        assert!(principal.is_guest());
        assert_eq!(principal.display_name(), "visitor");
    }

    #[tokio::test]
    async fn unknown_guest_and_missing_credentials_are_rejected() {
        let rooms = Arc::new(InMemoryRoomRepository::new());
        let mut provider = MockIdentityProvider::new();
        provider.expect_validate_token().never();
        let resolver = resolver(provider, rooms);

        let err = resolver
            .resolve(&Credentials {
                token: None,
                guest_id: Some("guest_missing".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Auth(AuthError::GuestNotFound)));

        let err = resolver.resolve(&Credentials::default()).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Auth(AuthError::NoCredential)));
    }

    #[tokio::test]
    async fn member_policy_ignores_guest_id() {
        let rooms = Arc::new(InMemoryRoomRepository::new());
        let guest_id = room_with_guest(&rooms).await;
        let mut provider = MockIdentityProvider::new();
        provider.expect_validate_token().never();

        let err = resolver(provider, rooms)
            .resolve_member(&Credentials {
                token: None,
                guest_id: Some(guest_id.to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Auth(AuthError::NoCredential)));
    }
}
