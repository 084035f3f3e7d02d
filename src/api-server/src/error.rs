use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use warden_authz::{AccessError, DenyReason};

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{message}")]
    Denied { reason: &'static str, status: u16, message: String },

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<DenyReason> for ApiError {
    fn from(reason: DenyReason) -> Self {
        ApiError::Denied {
            reason: reason.code(),
            status: reason.status_code(),
            message: reason.message(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

/// HTTP status for a domain error
pub fn status_for(error: &AccessError) -> StatusCode {
    match error {
        AccessError::Validation(_) | AccessError::UnconfiguredResourceType { .. } => {
            StatusCode::BAD_REQUEST
        }
        AccessError::NotFound { .. } => StatusCode::NOT_FOUND,
        AccessError::DuplicateName(_)
        | AccessError::DuplicateCode(_)
        | AccessError::GroupInUse { .. } => StatusCode::CONFLICT,
        AccessError::Authentication(_) => StatusCode::UNAUTHORIZED,
        AccessError::Store(_) | AccessError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Access(e) => (status_for(&e), e.kind(), e.to_string()),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation", msg),
            ApiError::Denied {
                reason,
                status,
                message,
            } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN),
                reason,
                message,
            ),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_authz::EntityKind;

    #[test]
    fn test_domain_status_mapping() {
        assert_eq!(
            status_for(&AccessError::not_found(EntityKind::AccessGroup, 4)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&AccessError::DuplicateName("Editors".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&AccessError::Store("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_denial_response_status() {
        let response = ApiError::from(DenyReason::MissingToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::from(DenyReason::Forbidden { required: vec![] }).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
