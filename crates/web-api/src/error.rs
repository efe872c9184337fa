use application::{ApplicationError, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_owned(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
    }
}

/// 返回给客户端的错误描述；上游失败不透出存储细节
pub(crate) fn client_message(error: &ApplicationError) -> String {
    match error.kind() {
        ErrorKind::Upstream => "upstream dependency failed".to_owned(),
        _ => error.to_string(),
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        if error.kind() == ErrorKind::Upstream {
            tracing::error!(error = %error, "上游依赖失败");
        }
        Self::new(status_for(error.kind()), error.code(), client_message(&error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::AuthError;
    use domain::DomainError;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (
                ApplicationError::from(DomainError::invalid_argument("name", "too short")),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                ApplicationError::from(AuthError::InvalidToken),
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
            ),
            (
                ApplicationError::forbidden("update this room"),
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                ApplicationError::not_found("room"),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                ApplicationError::from(DomainError::RoomFull),
                StatusCode::CONFLICT,
                "ROOM_FULL",
            ),
            (
                ApplicationError::upstream("connection reset"),
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_ERROR",
            ),
        ];

        for (error, status, code) in cases {
            let api = ApiError::from(error);
            assert_eq!(api.status, status);
            assert_eq!(api.body.code, code);
        }
    }

    #[test]
    fn upstream_details_are_hidden() {
        let api = ApiError::from(ApplicationError::upstream("password=hunter2"));
        assert!(!api.body.message.contains("hunter2"));
    }
}
