//! Resource-level permissions
//!
//! A permission can be narrowed to instances of a named resource type. Once a
//! type is declared for a permission, groups are granted individual resource
//! IDs, and a user may act on the union of the IDs granted to their groups.
//! `super_admin` holders may act on everything.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::cache::{self, CacheKey, CacheValue, PermissionCache};
use crate::error::{AccessError, Result};
use crate::resolver::PermissionResolver;
use crate::store::{require_group, require_permission, EntityStore, GrantFilter, GrantKey, StoreTransaction};
use crate::types::{
    validate_id, validate_name, GroupId, GroupPermissionsView, PermissionId, PermissionView,
    ResourceGrant, ResourceId, ResourceType, ResourceTypeId, UserId,
};

/// Resolves, checks and administers resource-level grants
#[derive(Clone)]
pub struct ResourcePermissionResolver {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn PermissionCache>,
    permissions: PermissionResolver,
}

impl std::fmt::Debug for ResourcePermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePermissionResolver").finish_non_exhaustive()
    }
}

impl ResourcePermissionResolver {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn PermissionCache>,
        permissions: PermissionResolver,
    ) -> Self {
        Self {
            store,
            cache,
            permissions,
        }
    }

    /// Resource IDs of `resource_type` the user may act on through `permission_id`
    ///
    /// Fails with [`AccessError::UnconfiguredResourceType`] when the type was
    /// never declared for the permission.
    #[instrument(skip(self))]
    pub async fn resource_ids_for(
        &self,
        resource_type: &str,
        permission_id: PermissionId,
        user_id: UserId,
    ) -> Result<BTreeSet<ResourceId>> {
        validate_name("resource type", resource_type)?;
        validate_id("permission_id", permission_id)?;
        validate_id("user_id", user_id)?;

        let key = CacheKey::Resources {
            user_id,
            permission_id,
            resource_type,
        }
        .to_string();
        if let Some(CacheValue::Resources(ids)) = self.cache.get(&key).await {
            debug!("Resource cache hit for {}", key);
            return Ok(ids);
        }

        let mut tx = self.store.begin().await?;
        let declared = declared_type(tx.as_mut(), permission_id, resource_type).await?;
        let group_ids = tx.user_group_ids(user_id).await?;

        let ids: BTreeSet<ResourceId> = if group_ids.is_empty() {
            BTreeSet::new()
        } else {
            let filter = GrantFilter {
                group_ids: Some(group_ids),
                permission_id: Some(permission_id),
                resource_type_id: Some(declared.id),
                resource_ids: None,
            };
            tx.grants(&filter)
                .await?
                .into_iter()
                .map(|g| g.resource_id)
                .collect()
        };
        tx.commit().await?;

        debug!(
            "Resolved {} {} resources for user {} (permission {})",
            ids.len(),
            resource_type,
            user_id,
            permission_id
        );
        self.cache.set(&key, CacheValue::Resources(ids.clone())).await;
        Ok(ids)
    }

    /// Whether the user may act on every one of `resource_ids`
    ///
    /// `super_admin` holders are always allowed. An empty request is allowed
    /// once the type is known to be declared.
    #[instrument(skip(self, resource_ids))]
    pub async fn has_access(
        &self,
        resource_type: &str,
        permission_id: PermissionId,
        resource_ids: &[ResourceId],
        user_id: UserId,
    ) -> Result<bool> {
        for resource_id in resource_ids {
            validate_id("resource_id", *resource_id)?;
        }

        if self.permissions.is_super_admin(user_id).await? {
            debug!("super_admin bypass for user {}", user_id);
            return Ok(true);
        }

        let allowed = self
            .resource_ids_for(resource_type, permission_id, user_id)
            .await?;
        Ok(resource_ids.iter().all(|id| allowed.contains(id)))
    }

    /// Declare that `permission_id` is scoped to `type_name`; returns the existing row if any
    #[instrument(skip(self))]
    pub async fn declare_resource_type(
        &self,
        permission_id: PermissionId,
        type_name: &str,
    ) -> Result<ResourceType> {
        validate_id("permission_id", permission_id)?;
        validate_name("resource type", type_name)?;

        let mut tx = self.store.begin().await?;
        require_permission(tx.as_mut(), permission_id).await?;
        let (declared, created) = ensure_resource_type(tx.as_mut(), permission_id, type_name).await?;
        tx.commit().await?;

        if created {
            info!(
                "Declared resource type '{}' for permission {}",
                type_name, permission_id
            );
        }
        Ok(declared)
    }

    /// Remove a type declaration together with its grants
    #[instrument(skip(self))]
    pub async fn revoke_resource_type(
        &self,
        permission_id: PermissionId,
        type_name: &str,
    ) -> Result<bool> {
        validate_id("permission_id", permission_id)?;
        validate_name("resource type", type_name)?;

        let mut tx = self.store.begin().await?;
        require_permission(tx.as_mut(), permission_id).await?;

        let Some(declared) = tx.resource_type(permission_id, type_name).await? else {
            tx.rollback().await?;
            return Ok(false);
        };

        let filter = GrantFilter::for_type(declared.id);
        let group_ids: BTreeSet<GroupId> = tx
            .grants(&filter)
            .await?
            .into_iter()
            .map(|g| g.access_group_id)
            .collect();
        let affected = members_of(tx.as_mut(), group_ids).await?;

        let revoked_grants = tx.delete_grants(&filter).await?;
        let removed = tx.delete_resource_type(declared.id).await?;
        tx.commit().await?;

        cache::invalidate_resource_entries(self.cache.as_ref(), &affected, permission_id, type_name)
            .await;
        info!(
            "Revoked resource type '{}' for permission {} ({} grants removed)",
            type_name, permission_id, revoked_grants
        );
        Ok(removed)
    }

    /// Grant `group_id` access to `resource_ids`; returns the grants now present for them
    #[instrument(skip(self, resource_ids))]
    pub async fn grant(
        &self,
        permission_id: PermissionId,
        resource_ids: &[ResourceId],
        type_name: &str,
        group_id: GroupId,
    ) -> Result<Vec<ResourceGrant>> {
        validate_grant_input(permission_id, resource_ids, type_name, group_id)?;

        let mut tx = self.store.begin().await?;
        require_permission(tx.as_mut(), permission_id).await?;
        require_group(tx.as_mut(), group_id).await?;
        let declared = declared_type(tx.as_mut(), permission_id, type_name).await?;

        let (grants, added) =
            insert_grants(tx.as_mut(), permission_id, declared.id, group_id, resource_ids).await?;
        let affected = tx.group_user_ids(group_id).await?;
        tx.commit().await?;

        cache::invalidate_resource_entries(self.cache.as_ref(), &affected, permission_id, type_name)
            .await;
        info!(
            "Granted group {} {} new '{}' resources for permission {}",
            group_id, added, type_name, permission_id
        );
        Ok(grants)
    }

    /// Revoke `group_id`'s grants on `resource_ids`; returns how many were removed
    #[instrument(skip(self, resource_ids))]
    pub async fn revoke(
        &self,
        permission_id: PermissionId,
        resource_ids: &[ResourceId],
        type_name: &str,
        group_id: GroupId,
    ) -> Result<usize> {
        validate_grant_input(permission_id, resource_ids, type_name, group_id)?;

        let mut tx = self.store.begin().await?;
        require_permission(tx.as_mut(), permission_id).await?;
        require_group(tx.as_mut(), group_id).await?;
        let declared = declared_type(tx.as_mut(), permission_id, type_name).await?;

        let filter = GrantFilter {
            group_ids: Some(vec![group_id]),
            permission_id: Some(permission_id),
            resource_type_id: Some(declared.id),
            resource_ids: Some(resource_ids.to_vec()),
        };
        let removed = tx.delete_grants(&filter).await?;
        let affected = tx.group_user_ids(group_id).await?;
        tx.commit().await?;

        cache::invalidate_resource_entries(self.cache.as_ref(), &affected, permission_id, type_name)
            .await;
        info!(
            "Revoked {} '{}' grants of group {} for permission {}",
            removed, type_name, group_id, permission_id
        );
        Ok(removed)
    }

    /// Permissions of a group with the resources each one is narrowed to
    pub async fn group_permissions_view(
        &self,
        group_id: GroupId,
        type_filter: Option<&str>,
        permission_filter: Option<PermissionId>,
    ) -> Result<GroupPermissionsView> {
        validate_id("group_id", group_id)?;
        if let Some(permission_id) = permission_filter {
            validate_id("permission_id", permission_id)?;
        }

        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;

        let mut permissions = Vec::new();
        for permission_id in tx.group_permission_ids(group_id).await? {
            if permission_filter.is_some_and(|wanted| wanted != permission_id) {
                continue;
            }
            let Some(permission) = tx.permission(permission_id).await?.active() else {
                continue;
            };

            let mut resources = BTreeMap::new();
            for declared in tx.resource_types(permission_id).await? {
                if type_filter.is_some_and(|wanted| wanted != declared.name) {
                    continue;
                }
                let filter = GrantFilter {
                    group_ids: Some(vec![group_id]),
                    permission_id: Some(permission_id),
                    resource_type_id: Some(declared.id),
                    resource_ids: None,
                };
                let ids: BTreeSet<ResourceId> = tx
                    .grants(&filter)
                    .await?
                    .into_iter()
                    .map(|g| g.resource_id)
                    .collect();
                if !ids.is_empty() {
                    resources.insert(declared.name, ids.into_iter().collect());
                }
            }

            permissions.push(PermissionView {
                id: permission.id,
                code: permission.code,
                name: permission.name,
                resources,
            });
        }
        tx.commit().await?;

        Ok(GroupPermissionsView { permissions })
    }

    /// Resource types declared for a permission
    pub async fn list_resource_types(&self, permission_id: PermissionId) -> Result<Vec<ResourceType>> {
        validate_id("permission_id", permission_id)?;

        let mut tx = self.store.begin().await?;
        require_permission(tx.as_mut(), permission_id).await?;
        let types = tx.resource_types(permission_id).await?;
        tx.commit().await?;
        Ok(types)
    }
}

fn validate_grant_input(
    permission_id: PermissionId,
    resource_ids: &[ResourceId],
    type_name: &str,
    group_id: GroupId,
) -> Result<()> {
    validate_id("permission_id", permission_id)?;
    validate_id("group_id", group_id)?;
    validate_name("resource type", type_name)?;
    for resource_id in resource_ids {
        validate_id("resource_id", *resource_id)?;
    }
    Ok(())
}

/// Declared type or `UnconfiguredResourceType`
async fn declared_type(
    tx: &mut dyn StoreTransaction,
    permission_id: PermissionId,
    type_name: &str,
) -> Result<ResourceType> {
    tx.resource_type(permission_id, type_name)
        .await?
        .ok_or_else(|| AccessError::UnconfiguredResourceType {
            permission_id,
            type_name: type_name.to_string(),
        })
}

/// Existing declaration, or a new one; the flag tells whether it was created
pub(crate) async fn ensure_resource_type(
    tx: &mut dyn StoreTransaction,
    permission_id: PermissionId,
    type_name: &str,
) -> Result<(ResourceType, bool)> {
    if let Some(existing) = tx.resource_type(permission_id, type_name).await? {
        return Ok((existing, false));
    }
    match tx.insert_resource_type(permission_id, type_name).await? {
        Some(created) => Ok((created, true)),
        // Declared concurrently since the lookup above
        None => Ok((declared_type(tx, permission_id, type_name).await?, false)),
    }
}

/// Insert missing grants; returns the grants for `resource_ids` and how many were new
pub(crate) async fn insert_grants(
    tx: &mut dyn StoreTransaction,
    permission_id: PermissionId,
    resource_type_id: ResourceTypeId,
    group_id: GroupId,
    resource_ids: &[ResourceId],
) -> Result<(Vec<ResourceGrant>, usize)> {
    let unique: BTreeSet<ResourceId> = resource_ids.iter().copied().collect();
    let mut grants = Vec::with_capacity(unique.len());
    let mut added = 0;

    for resource_id in unique {
        let key = GrantKey {
            permission_id,
            resource_id,
            resource_type_id,
            access_group_id: group_id,
        };
        if let Some(existing) = tx.grant(&key).await? {
            grants.push(existing);
            continue;
        }
        match tx.insert_grant(&key).await? {
            Some(created) => {
                grants.push(created);
                added += 1;
            }
            None => {
                let existing = tx.grant(&key).await?.ok_or_else(|| {
                    AccessError::Store(format!(
                        "grant of resource {} vanished after a conflicting insert",
                        resource_id
                    ))
                })?;
                grants.push(existing);
            }
        }
    }
    Ok((grants, added))
}

async fn members_of(
    tx: &mut dyn StoreTransaction,
    group_ids: BTreeSet<GroupId>,
) -> Result<Vec<UserId>> {
    let mut users = BTreeSet::new();
    for group_id in group_ids {
        users.extend(tx.group_user_ids(group_id).await?);
    }
    Ok(users.into_iter().collect())
}
