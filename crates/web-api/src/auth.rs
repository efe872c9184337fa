//! 请求身份提取
//!
//! 成员凭据：`Authorization: Bearer <token>` 或 `x-auth-token`；
//! 访客凭据：`x-guest-id`。

use application::Credentials;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use domain::{MemberProfile, Principal};

use crate::{error::ApiError, state::AppState};

const AUTH_TOKEN_HEADER: &str = "x-auth-token";
const GUEST_ID_HEADER: &str = "x-guest-id";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

pub fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let bearer = header_value(headers, header::AUTHORIZATION.as_str()).and_then(|value| {
        value
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_owned())
    });
    Credentials {
        token: bearer
            .filter(|token| !token.is_empty())
            .or_else(|| header_value(headers, AUTH_TOKEN_HEADER)),
        guest_id: header_value(headers, GUEST_ID_HEADER),
    }
}

/// 仅限注册成员的接口
#[derive(Debug, Clone)]
pub struct MemberAuth(pub MemberProfile);

impl FromRequestParts<AppState> for MemberAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = credentials_from_headers(&parts.headers);
        let member = state.identity.resolve_member(&credentials).await?;
        Ok(Self(member))
    }
}

/// 成员或访客皆可的接口
#[derive(Debug, Clone)]
pub struct PrincipalAuth(pub Principal);

impl FromRequestParts<AppState> for PrincipalAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = credentials_from_headers(&parts.headers);
        let principal = state.identity.resolve(&credentials).await?;
        Ok(Self(principal))
    }
}
