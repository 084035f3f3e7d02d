//! HTTP front end for Warden access control
//!
//! Serves the administrative API over axum and authorizes every request
//! against the configured route rules.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, Result};
pub use routes::create_router;
pub use server::{Server, ServerConfig};
pub use state::AppState;

/// API version
pub const API_VERSION: &str = "v1";
