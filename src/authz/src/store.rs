//! Entity store collaborator
//!
//! All reads and writes go through a [`StoreTransaction`] obtained from
//! [`EntityStore::begin`]. A transaction that is dropped without
//! [`StoreTransaction::commit`] is rolled back.

use async_trait::async_trait;

use crate::error::{AccessError, EntityKind, Result};
use crate::types::{
    AccessGroup, DeleteMode, GroupId, Lookup, NewAccessGroup, NewPermission, Permission,
    PermissionId, ResourceGrant, ResourceId, ResourceType, ResourceTypeId, UserId,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryEntityStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEntityStore;

/// Selects active resource grants; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantFilter {
    pub group_ids: Option<Vec<GroupId>>,
    pub permission_id: Option<PermissionId>,
    pub resource_type_id: Option<ResourceTypeId>,
    pub resource_ids: Option<Vec<ResourceId>>,
}

impl GrantFilter {
    pub fn for_group(group_id: GroupId) -> Self {
        Self {
            group_ids: Some(vec![group_id]),
            ..Default::default()
        }
    }

    pub fn for_type(resource_type_id: ResourceTypeId) -> Self {
        Self {
            resource_type_id: Some(resource_type_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, grant: &ResourceGrant) -> bool {
        grant.deleted_at.is_none()
            && self
                .group_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&grant.access_group_id))
            && self
                .permission_id
                .map_or(true, |id| id == grant.permission_id)
            && self
                .resource_type_id
                .map_or(true, |id| id == grant.resource_type_id)
            && self
                .resource_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&grant.resource_id))
    }
}

/// Identity of a grant row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantKey {
    pub permission_id: PermissionId,
    pub resource_id: ResourceId,
    pub resource_type_id: ResourceTypeId,
    pub access_group_id: GroupId,
}

/// Persistence backend holding the access-control tables
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Check that the tables required at startup exist
    async fn verify_schema(&self, _resource_level_permissions: bool) -> Result<()> {
        Ok(())
    }
}

/// Unit of work over the access-control tables
#[async_trait]
pub trait StoreTransaction: Send {
    // Access groups
    async fn group(&mut self, id: GroupId) -> Result<Lookup<AccessGroup>>;
    async fn active_group_by_name(&mut self, name: &str) -> Result<Option<AccessGroup>>;
    async fn insert_group(&mut self, group: &NewAccessGroup) -> Result<AccessGroup>;
    async fn update_group(&mut self, group: &AccessGroup) -> Result<()>;
    async fn delete_group(&mut self, id: GroupId, mode: DeleteMode) -> Result<bool>;

    // Permissions
    async fn permission(&mut self, id: PermissionId) -> Result<Lookup<Permission>>;
    async fn active_permission_by_code(&mut self, code: &str) -> Result<Option<Permission>>;
    async fn insert_permission(&mut self, permission: &NewPermission) -> Result<Permission>;

    // Users
    async fn user_exists(&mut self, user_id: UserId) -> Result<bool>;

    // Group <-> permission links
    async fn group_permission_ids(&mut self, group_id: GroupId) -> Result<Vec<PermissionId>>;
    async fn insert_group_permission(
        &mut self,
        group_id: GroupId,
        permission_id: PermissionId,
    ) -> Result<bool>;
    async fn delete_group_permission(
        &mut self,
        group_id: GroupId,
        permission_id: PermissionId,
    ) -> Result<bool>;
    async fn delete_group_permissions(&mut self, group_id: GroupId) -> Result<usize>;

    // Group <-> user links
    async fn group_user_ids(&mut self, group_id: GroupId) -> Result<Vec<UserId>>;
    /// Active groups the user belongs to
    async fn user_group_ids(&mut self, user_id: UserId) -> Result<Vec<GroupId>>;
    async fn insert_group_user(&mut self, group_id: GroupId, user_id: UserId) -> Result<bool>;
    async fn delete_group_user(&mut self, group_id: GroupId, user_id: UserId) -> Result<bool>;
    async fn delete_group_users(&mut self, group_id: GroupId) -> Result<usize>;

    /// Distinct codes of active permissions reachable from the user's active groups
    async fn permission_codes_for_user(&mut self, user_id: UserId) -> Result<Vec<String>>;

    // Resource type declarations
    async fn resource_type(
        &mut self,
        permission_id: PermissionId,
        name: &str,
    ) -> Result<Option<ResourceType>>;
    async fn resource_types(&mut self, permission_id: PermissionId) -> Result<Vec<ResourceType>>;
    async fn resource_type_by_id(&mut self, id: ResourceTypeId) -> Result<Lookup<ResourceType>>;
    /// Insert a declaration; `None` if an active one already exists
    async fn insert_resource_type(
        &mut self,
        permission_id: PermissionId,
        name: &str,
    ) -> Result<Option<ResourceType>>;
    async fn delete_resource_type(&mut self, id: ResourceTypeId) -> Result<bool>;

    // Resource grants
    async fn grant(&mut self, key: &GrantKey) -> Result<Option<ResourceGrant>>;
    /// Insert a grant; `None` if an active one already exists
    async fn insert_grant(&mut self, key: &GrantKey) -> Result<Option<ResourceGrant>>;
    async fn grants(&mut self, filter: &GrantFilter) -> Result<Vec<ResourceGrant>>;
    async fn delete_grants(&mut self, filter: &GrantFilter) -> Result<usize>;
    /// Physically remove a group's revoked grants ahead of a hard delete
    async fn purge_revoked_grants(&mut self, group_id: GroupId) -> Result<usize>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Active group or `NotFound`
pub(crate) async fn require_group(
    tx: &mut dyn StoreTransaction,
    id: GroupId,
) -> Result<AccessGroup> {
    tx.group(id)
        .await?
        .active()
        .ok_or_else(|| AccessError::not_found(EntityKind::AccessGroup, id))
}

/// Active permission or `NotFound`
pub(crate) async fn require_permission(
    tx: &mut dyn StoreTransaction,
    id: PermissionId,
) -> Result<Permission> {
    tx.permission(id)
        .await?
        .active()
        .ok_or_else(|| AccessError::not_found(EntityKind::Permission, id))
}

/// Known user or `NotFound`
pub(crate) async fn require_user(tx: &mut dyn StoreTransaction, id: UserId) -> Result<()> {
    if tx.user_exists(id).await? {
        Ok(())
    } else {
        Err(AccessError::not_found(EntityKind::User, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(group: GroupId, resource: ResourceId) -> ResourceGrant {
        ResourceGrant {
            id: 1,
            permission_id: 5,
            resource_id: resource,
            resource_type_id: 2,
            access_group_id: group,
            deleted_at: None,
        }
    }

    #[test]
    fn test_grant_filter_matching() {
        let filter = GrantFilter {
            group_ids: Some(vec![3, 4]),
            permission_id: Some(5),
            resource_type_id: Some(2),
            resource_ids: None,
        };
        assert!(filter.matches(&grant(3, 1)));
        assert!(!filter.matches(&grant(9, 1)));

        let mut deleted = grant(3, 1);
        deleted.deleted_at = Some(chrono::Utc::now());
        assert!(!filter.matches(&deleted));

        assert!(GrantFilter::default().matches(&grant(9, 9)));
    }
}
