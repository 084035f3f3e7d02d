//! Flat permission resolution
//!
//! A user's permission set is the union of the permissions of every
//! non-deleted group the user belongs to.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::cache::{CacheKey, CacheValue, PermissionCache};
use crate::error::Result;
use crate::store::EntityStore;
use crate::types::{validate_id, UserId, SUPER_ADMIN};

/// Resolves and caches the permission codes held by a user
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn PermissionCache>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn EntityStore>, cache: Arc<dyn PermissionCache>) -> Self {
        Self { store, cache }
    }

    /// All permission codes reachable through the user's active groups
    ///
    /// An unknown user, or a user without memberships, resolves to an empty set.
    #[instrument(skip(self))]
    pub async fn resolve(&self, user_id: UserId) -> Result<BTreeSet<String>> {
        validate_id("user_id", user_id)?;

        let key = CacheKey::Permissions(user_id).to_string();
        if let Some(CacheValue::Permissions(codes)) = self.cache.get(&key).await {
            debug!("Permission cache hit for user {}", user_id);
            return Ok(codes);
        }

        let mut tx = self.store.begin().await?;
        let codes = tx.permission_codes_for_user(user_id).await?;
        tx.commit().await?;

        let codes: BTreeSet<String> = codes.into_iter().collect();
        debug!("Resolved {} permissions for user {}", codes.len(), user_id);

        self.cache
            .set(&key, CacheValue::Permissions(codes.clone()))
            .await;
        Ok(codes)
    }

    /// Whether the user holds `code` (or `super_admin`)
    pub async fn has_permission(&self, user_id: UserId, code: &str) -> Result<bool> {
        let codes = self.resolve(user_id).await?;
        Ok(codes.contains(SUPER_ADMIN) || codes.contains(code))
    }

    /// Whether the user holds at least one of `codes` (or `super_admin`)
    pub async fn has_any_permission(&self, user_id: UserId, codes: &[String]) -> Result<bool> {
        let held = self.resolve(user_id).await?;
        Ok(held.contains(SUPER_ADMIN) || codes.iter().any(|code| held.contains(code)))
    }

    /// Whether the user holds `super_admin`
    pub async fn is_super_admin(&self, user_id: UserId) -> Result<bool> {
        Ok(self.resolve(user_id).await?.contains(SUPER_ADMIN))
    }

    pub fn cache(&self) -> &Arc<dyn PermissionCache> {
        &self.cache
    }
}
