use std::sync::Arc;
use std::time::Instant;
use warden_authz::AccessControl;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Resolvers, administrator and decision engine
    pub access: Arc<AccessControl>,

    /// Server start time for uptime calculation
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

impl AppState {
    pub fn new(access: AccessControl) -> Self {
        Self {
            access: Arc::new(access),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
