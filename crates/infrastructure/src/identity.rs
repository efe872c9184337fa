//! JWT 身份提供方
//!
//! HS256 签名，载荷携带 `sub`（用户 id）、`username`、`pic` 与 `exp`。

use application::{IdentityError, IdentityProvider};
use async_trait::async_trait;
use domain::{MemberProfile, UserId};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pic: Option<String>,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct JwtIdentityProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str, expiration_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(expiration_hours),
        }
    }

    pub fn from_config(jwt: &config::JwtConfig) -> Self {
        Self::new(&jwt.secret, jwt.expiration_hours)
    }

    /// 为成员签发令牌（资料服务与测试工具使用）
    pub fn issue_token(
        &self,
        member: &MemberProfile,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_token_at(member, OffsetDateTime::now_utc())
    }

    pub fn issue_token_at(
        &self,
        member: &MemberProfile,
        issued_at: OffsetDateTime,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: member.user_id.to_string(),
            username: member.username.clone(),
            pic: member.avatar.clone(),
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + self.ttl).unix_timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn validate_token(&self, token: &str) -> Result<MemberProfile, IdentityError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|err| IdentityError::InvalidToken(err.to_string()))?;
        let claims = data.claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .map(UserId::from)
            .map_err(|_| IdentityError::InvalidToken("subject is not a user id".into()))?;
        if claims.username.trim().is_empty() {
            return Err(IdentityError::InvalidToken("username claim is empty".into()));
        }

        Ok(MemberProfile {
            user_id,
            username: claims.username,
            avatar: claims.pic,
        })
    }
}
