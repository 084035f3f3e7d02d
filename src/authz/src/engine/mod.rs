//! Authorization decision engine
//!
//! Combines route matching, token verification and cached permission
//! resolution into one decision per request.
//!
//! ```text
//! Request → RouteMatcher ──(no rule)──────────────→ PassThrough
//!               ↓
//!          TokenVerifier ──(missing/invalid)──────→ Deny (401)
//!               ↓
//!       PermissionResolver ─(super_admin / ANY)───→ Allow
//!               ↓
//!                                                   Deny (403)
//! ```

pub mod decision;
pub mod metrics;

pub use decision::{Decision, DenyReason, Principal};
pub use metrics::{DecisionMetrics, MetricsCollector};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::matcher::RouteMatcher;
use crate::resolver::PermissionResolver;
use crate::token::{parse_bearer, user_id_from_claims, TokenVerifier};

/// Per-request authorization decisions
pub struct DecisionEngine {
    matcher: Arc<RouteMatcher>,
    resolver: PermissionResolver,
    verifier: Arc<dyn TokenVerifier>,
    user_id_key: String,
    metrics: Arc<MetricsCollector>,
}

impl DecisionEngine {
    pub fn new(
        matcher: RouteMatcher,
        resolver: PermissionResolver,
        verifier: Arc<dyn TokenVerifier>,
        user_id_key: impl Into<String>,
    ) -> Self {
        Self {
            matcher: Arc::new(matcher),
            resolver,
            verifier,
            user_id_key: user_id_key.into(),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Decide a request given its path, method and raw `Authorization` header
    ///
    /// Store failures are returned as errors and never turn into an allow.
    pub async fn decide(
        &self,
        path: &str,
        method: &str,
        authorization: Option<&str>,
    ) -> Result<Decision> {
        let start = Instant::now();

        let outcome = self.evaluate(path, method, authorization).await;
        match &outcome {
            Ok(decision) => self.metrics.record_decision(decision).await,
            Err(e) => {
                warn!("Authorization of {} {} failed: {}", method, path, e);
                self.metrics.record_error().await;
            }
        }
        self.metrics.record_latency(start.elapsed()).await;

        outcome
    }

    async fn evaluate(
        &self,
        path: &str,
        method: &str,
        authorization: Option<&str>,
    ) -> Result<Decision> {
        let Some(rule) = self.matcher.match_route(path, method) else {
            debug!("No route rule for {} {}", method, path);
            return Ok(Decision::PassThrough);
        };

        let Some(header) = authorization else {
            return Ok(self.deny(path, method, DenyReason::MissingToken));
        };
        let Some(token) = parse_bearer(header) else {
            return Ok(self.deny(path, method, DenyReason::MalformedAuthorization));
        };
        let claims = match self.verifier.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                return Ok(self.deny(path, method, DenyReason::InvalidToken(e.to_string())))
            }
        };
        let Some(user_id) = user_id_from_claims(&claims, &self.user_id_key) else {
            return Ok(self.deny(path, method, DenyReason::MissingUserClaim));
        };

        let permissions = self.resolver.resolve(user_id).await?;
        let principal = Principal::new(user_id, permissions);

        if principal.is_super_admin() {
            info!("Allowed {} {} for super_admin user {}", method, path, user_id);
            return Ok(Decision::Allow(principal));
        }

        if rule
            .permissions()
            .iter()
            .any(|required| principal.permissions.contains(required))
        {
            info!("Allowed {} {} for user {}", method, path, user_id);
            return Ok(Decision::Allow(principal));
        }

        Ok(self.deny(
            path,
            method,
            DenyReason::Forbidden {
                required: rule.permissions().to_vec(),
            },
        ))
    }

    fn deny(&self, path: &str, method: &str, reason: DenyReason) -> Decision {
        warn!("Denied {} {}: {}", method, path, reason.code());
        Decision::Deny(reason)
    }

    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Prometheus text for decisions and the permission cache
    pub async fn export_prometheus(&self) -> String {
        let cache_stats = self.resolver.cache().stats();
        self.metrics.export_prometheus(&cache_stats).await
    }
}
