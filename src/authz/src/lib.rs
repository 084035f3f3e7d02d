//! # Warden Authorization
//!
//! Access-group based authorization: users belong to access groups, groups
//! hold permissions, and permissions can optionally be narrowed to specific
//! resource instances.
//!
//! ## Features
//!
//! - **Permission resolution** as the union over a user's active groups
//! - **Resource-level permissions** with AND semantics over requested IDs
//! - **Atomic bulk assignment** of users, permissions and grants to a group
//! - **TTL permission cache** invalidated on every relevant mutation
//! - **Route authorization** with `:param` patterns and first-match-wins order
//! - **PostgreSQL store** via sqlx, plus an in-memory store for tests
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_authz::{AccessConfig, AccessControl, JwtVerifier, NewAccessGroup, NewPermission};
//! use warden_authz::store::InMemoryEntityStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryEntityStore::new();
//! store.register_user(7).await;
//!
//! let access = AccessControl::new(
//!     AccessConfig::default(),
//!     Arc::new(store),
//!     Arc::new(JwtVerifier::hs256("secret")),
//! )
//! .await?;
//!
//! let editors = access.admin().create_group(NewAccessGroup::new("Editors")).await?;
//! let edit = access
//!     .admin()
//!     .create_permission(NewPermission::new("edit:content", "Edit content"))
//!     .await?;
//! access.admin().assign_permission(editors.id, edit.id).await?;
//! access.admin().add_user(editors.id, 7).await?;
//!
//! assert!(access.resolver().has_permission(7, "edit:content").await?);
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod resolver;
pub mod resource;
pub mod store;
pub mod token;
pub mod types;

pub use admin::AccessGroupAdmin;
pub use cache::{CacheStats, InMemoryCache, NoopCache, PermissionCache};
pub use config::{AccessConfig, CacheMode, LoggingMode, RouteAccess};
pub use engine::{Decision, DecisionEngine, DenyReason, Principal};
pub use error::{AccessError, EntityKind, Result};
pub use matcher::{RouteMatcher, RouteRule};
pub use resolver::PermissionResolver;
pub use resource::ResourcePermissionResolver;
pub use store::{EntityStore, StoreTransaction};
pub use token::{Claims, JwtVerifier, TokenVerifier};
pub use types::*;

use std::sync::Arc;
use tracing::info;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Every component wired to one store and one cache
pub struct AccessControl {
    config: AccessConfig,
    cache: Arc<dyn PermissionCache>,
    resolver: PermissionResolver,
    resources: Option<ResourcePermissionResolver>,
    admin: AccessGroupAdmin,
    engine: Arc<DecisionEngine>,
}

impl AccessControl {
    /// Validate the configuration, check the store schema and build the components
    pub async fn new(
        config: AccessConfig,
        store: Arc<dyn EntityStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Self> {
        config.validate()?;
        store.verify_schema(config.resource_level_permissions).await?;

        let cache = build_cache(&config);
        let resolver = PermissionResolver::new(store.clone(), cache.clone());
        let resources = config.resource_level_permissions.then(|| {
            ResourcePermissionResolver::new(store.clone(), cache.clone(), resolver.clone())
        });
        let admin = AccessGroupAdmin::new(store, cache.clone(), config.resource_level_permissions);

        let matcher = RouteMatcher::from_config(&config.route_access)?;
        info!(
            "Access control ready: {} route rules, cache {:?}, resource-level permissions {}",
            matcher.rules().len(),
            config.cache,
            if config.resource_level_permissions { "on" } else { "off" }
        );
        let engine = Arc::new(DecisionEngine::new(
            matcher,
            resolver.clone(),
            verifier,
            config.user_id_key.clone(),
        ));

        Ok(Self {
            config,
            cache,
            resolver,
            resources,
            admin,
            engine,
        })
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn PermissionCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Resource-level operations; fails when the feature is disabled
    pub fn resources(&self) -> Result<&ResourcePermissionResolver> {
        self.resources.as_ref().ok_or_else(|| {
            AccessError::Validation("resource-level permissions are disabled".to_string())
        })
    }

    pub fn admin(&self) -> &AccessGroupAdmin {
        &self.admin
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }
}

/// HS256 verifier from the `[jwt]` section
pub fn verifier_from_config(config: &AccessConfig) -> Result<Arc<dyn TokenVerifier>> {
    let jwt = config
        .jwt
        .as_ref()
        .ok_or_else(|| AccessError::Config("missing [jwt] section".to_string()))?;
    Ok(Arc::new(JwtVerifier::hs256(&jwt.secret)))
}

fn build_cache(config: &AccessConfig) -> Arc<dyn PermissionCache> {
    match config.cache {
        CacheMode::Disabled => Arc::new(NoopCache),
        CacheMode::InMemory => {
            let cache = Arc::new(InMemoryCache::new(config.cache_config.ttl()));
            InMemoryCache::spawn_sweeper(&cache, config.cache_config.sweep_interval());
            cache
        }
    }
}
