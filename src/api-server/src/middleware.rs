//! Middleware layer for the API server
//!
//! This module provides middleware components for:
//! - Route authorization through the decision engine
//! - Request logging and tracing
//! - CORS configuration
//! - Request ID tracking
//! - Error logging

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_authz::Decision;

use crate::{error::ApiError, state::AppState};

/// Request ID header name
pub const X_REQUEST_ID: &str = "x-request-id";

/// Configure CORS middleware
///
/// Allows cross-origin requests from any origin; put a proxy in front to
/// restrict origins.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::HeaderName::from_static(X_REQUEST_ID),
        ])
        .expose_headers([header::HeaderName::from_static(X_REQUEST_ID)])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Request ID middleware
///
/// Generates or extracts a unique request ID. The ID is stored in the request
/// extensions and echoed in the response headers.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;

    response.headers_mut().insert(
        X_REQUEST_ID,
        HeaderValue::from_str(&request_id.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("invalid-uuid")),
    );

    response
}

/// Request logging middleware
///
/// Logs every request with method, URI and response status, tagged with the
/// request ID.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request_id(&request);

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed();

    let status = response.status();
    let level = match status.as_u16() {
        500..=599 => tracing::Level::ERROR,
        400..=499 => tracing::Level::WARN,
        _ => tracing::Level::INFO,
    };

    // tracing::event! needs a const level
    match level {
        tracing::Level::ERROR => error!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        ),
        tracing::Level::WARN => warn!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        ),
        _ => info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        ),
    }

    response
}

/// Route authorization middleware
///
/// Asks the decision engine about the request. Unprotected routes pass
/// through untouched, allowed requests carry the [`warden_authz::Principal`]
/// in their extensions, and denials are answered with 401 or 403.
pub async fn authorization_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request_id(&request);
    let path = request.uri().path().to_string();
    let method = request.method().as_str().to_string();
    // A header that is not valid UTF-8 counts as malformed, not missing
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().to_string());

    match state
        .access
        .engine()
        .decide(&path, &method, authorization.as_deref())
        .await
    {
        Ok(Decision::PassThrough) => next.run(request).await,
        Ok(Decision::Allow(principal)) => {
            debug!(
                request_id = %request_id,
                user_id = principal.user_id,
                "Request authorized"
            );
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(Decision::Deny(reason)) => {
            warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                reason = reason.code(),
                "Request denied"
            );
            ApiError::from(reason).into_response()
        }
        Err(e) => {
            error!(
                request_id = %request_id,
                error = %e,
                "Authorization check failed"
            );
            ApiError::from(e).into_response()
        }
    }
}

/// Error logging middleware
///
/// Logs every 5xx response with its request ID.
pub async fn error_handling_middleware(request: Request, next: Next) -> Response {
    let request_id = request_id(&request);

    let response = next.run(request).await;

    if response.status().is_server_error() {
        error!(
            request_id = %request_id,
            status = %response.status().as_u16(),
            "Server error occurred"
        );
    }

    response
}

fn request_id(request: &Request) -> Uuid {
    request
        .extensions()
        .get::<Uuid>()
        .copied()
        .unwrap_or_else(Uuid::new_v4)
}
