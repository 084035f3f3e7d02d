//! In-memory entity store
//!
//! Transactions take an exclusive lock on the tables and work on a copy that
//! replaces the shared tables on commit. Transactions are therefore fully
//! serialized, which is enough for tests, demos and single-node setups.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{EntityStore, GrantFilter, GrantKey, StoreTransaction};
use crate::error::{AccessError, Result};
use crate::types::{
    AccessGroup, DeleteMode, GroupId, Lookup, NewAccessGroup, NewPermission, Permission,
    PermissionId, ResourceGrant, ResourceType, ResourceTypeId, UserId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    users: BTreeSet<UserId>,
    groups: BTreeMap<GroupId, AccessGroup>,
    permissions: BTreeMap<PermissionId, Permission>,
    group_permissions: BTreeSet<(GroupId, PermissionId)>,
    group_users: BTreeSet<(GroupId, UserId)>,
    resource_types: BTreeMap<ResourceTypeId, ResourceType>,
    grants: BTreeMap<i64, ResourceGrant>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn active_group_ids(&self) -> BTreeSet<GroupId> {
        self.groups
            .values()
            .filter(|g| g.deleted_at.is_none())
            .map(|g| g.id)
            .collect()
    }
}

/// Active row counts, used to observe rollbacks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub groups: usize,
    pub permissions: usize,
    pub group_permissions: usize,
    pub group_users: usize,
    pub resource_types: usize,
    pub grants: usize,
}

/// Entity store kept entirely in process memory
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    tables: Arc<Mutex<Tables>>,
    core_only: bool,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store without the resource-level tables
    ///
    /// Any access to type declarations or grants fails, as it would on a
    /// database migrated without them.
    pub fn core_only() -> Self {
        Self {
            core_only: true,
            ..Self::default()
        }
    }

    /// Make a user ID known to the store
    pub async fn register_user(&self, user_id: UserId) {
        self.tables.lock().await.users.insert(user_id);
    }

    pub async fn register_users(&self, user_ids: impl IntoIterator<Item = UserId>) {
        self.tables.lock().await.users.extend(user_ids);
    }

    pub async fn row_counts(&self) -> RowCounts {
        let tables = self.tables.lock().await;
        RowCounts {
            groups: tables.groups.values().filter(|g| g.deleted_at.is_none()).count(),
            permissions: tables
                .permissions
                .values()
                .filter(|p| p.deleted_at.is_none())
                .count(),
            group_permissions: tables.group_permissions.len(),
            group_users: tables.group_users.len(),
            resource_types: tables
                .resource_types
                .values()
                .filter(|t| t.deleted_at.is_none())
                .count(),
            grants: tables.grants.values().filter(|g| g.deleted_at.is_none()).count(),
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            core_only: self.core_only,
        }))
    }

    async fn verify_schema(&self, resource_level_permissions: bool) -> Result<()> {
        if resource_level_permissions && self.core_only {
            return Err(AccessError::Config(
                "Missing tables: resource_level_permission_types, resource_level_permissions"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    core_only: bool,
}

impl MemoryTransaction {
    fn resource_tables(&self) -> Result<()> {
        if self.core_only {
            Err(AccessError::Store(
                "resource-level tables are not installed".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn group(&mut self, id: GroupId) -> Result<Lookup<AccessGroup>> {
        let row = self.working.groups.get(&id).cloned();
        Ok(Lookup::from_row(row, |g| g.deleted_at.is_some()))
    }

    async fn active_group_by_name(&mut self, name: &str) -> Result<Option<AccessGroup>> {
        Ok(self
            .working
            .groups
            .values()
            .find(|g| g.deleted_at.is_none() && g.name == name)
            .cloned())
    }

    async fn insert_group(&mut self, group: &NewAccessGroup) -> Result<AccessGroup> {
        let row = AccessGroup {
            id: self.working.next_id(),
            name: group.name.clone(),
            description: group.description.clone(),
            deleted_at: None,
        };
        self.working.groups.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_group(&mut self, group: &AccessGroup) -> Result<()> {
        match self.working.groups.get_mut(&group.id) {
            Some(row) => {
                row.name = group.name.clone();
                row.description = group.description.clone();
                Ok(())
            }
            None => Err(AccessError::Store(format!(
                "update of missing access group {}",
                group.id
            ))),
        }
    }

    async fn delete_group(&mut self, id: GroupId, mode: DeleteMode) -> Result<bool> {
        match mode {
            DeleteMode::Hard => Ok(self.working.groups.remove(&id).is_some()),
            DeleteMode::Soft => match self.working.groups.get_mut(&id) {
                Some(row) if row.deleted_at.is_none() => {
                    row.deleted_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            },
        }
    }

    async fn permission(&mut self, id: PermissionId) -> Result<Lookup<Permission>> {
        let row = self.working.permissions.get(&id).cloned();
        Ok(Lookup::from_row(row, |p| p.deleted_at.is_some()))
    }

    async fn active_permission_by_code(&mut self, code: &str) -> Result<Option<Permission>> {
        Ok(self
            .working
            .permissions
            .values()
            .find(|p| p.deleted_at.is_none() && p.code == code)
            .cloned())
    }

    async fn insert_permission(&mut self, permission: &NewPermission) -> Result<Permission> {
        let row = Permission {
            id: self.working.next_id(),
            code: permission.code.clone(),
            name: permission.name.clone(),
            description: permission.description.clone(),
            deleted_at: None,
        };
        self.working.permissions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn user_exists(&mut self, user_id: UserId) -> Result<bool> {
        Ok(self.working.users.contains(&user_id))
    }

    async fn group_permission_ids(&mut self, group_id: GroupId) -> Result<Vec<PermissionId>> {
        Ok(self
            .working
            .group_permissions
            .iter()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, p)| *p)
            .collect())
    }

    async fn insert_group_permission(
        &mut self,
        group_id: GroupId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        Ok(self.working.group_permissions.insert((group_id, permission_id)))
    }

    async fn delete_group_permission(
        &mut self,
        group_id: GroupId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        Ok(self.working.group_permissions.remove(&(group_id, permission_id)))
    }

    async fn delete_group_permissions(&mut self, group_id: GroupId) -> Result<usize> {
        let before = self.working.group_permissions.len();
        self.working.group_permissions.retain(|(g, _)| *g != group_id);
        Ok(before - self.working.group_permissions.len())
    }

    async fn group_user_ids(&mut self, group_id: GroupId) -> Result<Vec<UserId>> {
        Ok(self
            .working
            .group_users
            .iter()
            .filter(|(g, _)| *g == group_id)
            .map(|(_, u)| *u)
            .collect())
    }

    async fn user_group_ids(&mut self, user_id: UserId) -> Result<Vec<GroupId>> {
        let active = self.working.active_group_ids();
        Ok(self
            .working
            .group_users
            .iter()
            .filter(|(g, u)| *u == user_id && active.contains(g))
            .map(|(g, _)| *g)
            .collect())
    }

    async fn insert_group_user(&mut self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.working.group_users.insert((group_id, user_id)))
    }

    async fn delete_group_user(&mut self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.working.group_users.remove(&(group_id, user_id)))
    }

    async fn delete_group_users(&mut self, group_id: GroupId) -> Result<usize> {
        let before = self.working.group_users.len();
        self.working.group_users.retain(|(g, _)| *g != group_id);
        Ok(before - self.working.group_users.len())
    }

    async fn permission_codes_for_user(&mut self, user_id: UserId) -> Result<Vec<String>> {
        let groups: BTreeSet<GroupId> = self.user_group_ids(user_id).await?.into_iter().collect();
        let codes: BTreeSet<String> = self
            .working
            .group_permissions
            .iter()
            .filter(|(g, _)| groups.contains(g))
            .filter_map(|(_, p)| self.working.permissions.get(p))
            .filter(|p| p.deleted_at.is_none())
            .map(|p| p.code.clone())
            .collect();
        Ok(codes.into_iter().collect())
    }

    async fn resource_type(
        &mut self,
        permission_id: PermissionId,
        name: &str,
    ) -> Result<Option<ResourceType>> {
        self.resource_tables()?;
        Ok(self
            .working
            .resource_types
            .values()
            .find(|t| t.deleted_at.is_none() && t.permission_id == permission_id && t.name == name)
            .cloned())
    }

    async fn resource_types(&mut self, permission_id: PermissionId) -> Result<Vec<ResourceType>> {
        self.resource_tables()?;
        Ok(self
            .working
            .resource_types
            .values()
            .filter(|t| t.deleted_at.is_none() && t.permission_id == permission_id)
            .cloned()
            .collect())
    }

    async fn resource_type_by_id(&mut self, id: ResourceTypeId) -> Result<Lookup<ResourceType>> {
        self.resource_tables()?;
        let row = self.working.resource_types.get(&id).cloned();
        Ok(Lookup::from_row(row, |t| t.deleted_at.is_some()))
    }

    async fn insert_resource_type(
        &mut self,
        permission_id: PermissionId,
        name: &str,
    ) -> Result<Option<ResourceType>> {
        if self.resource_type(permission_id, name).await?.is_some() {
            return Ok(None);
        }
        let row = ResourceType {
            id: self.working.next_id(),
            permission_id,
            name: name.to_string(),
            deleted_at: None,
        };
        self.working.resource_types.insert(row.id, row.clone());
        Ok(Some(row))
    }

    async fn delete_resource_type(&mut self, id: ResourceTypeId) -> Result<bool> {
        self.resource_tables()?;
        match self.working.resource_types.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn grant(&mut self, key: &GrantKey) -> Result<Option<ResourceGrant>> {
        self.resource_tables()?;
        Ok(self
            .working
            .grants
            .values()
            .find(|g| {
                g.deleted_at.is_none()
                    && g.permission_id == key.permission_id
                    && g.resource_id == key.resource_id
                    && g.resource_type_id == key.resource_type_id
                    && g.access_group_id == key.access_group_id
            })
            .cloned())
    }

    async fn insert_grant(&mut self, key: &GrantKey) -> Result<Option<ResourceGrant>> {
        if self.grant(key).await?.is_some() {
            return Ok(None);
        }
        let row = ResourceGrant {
            id: self.working.next_id(),
            permission_id: key.permission_id,
            resource_id: key.resource_id,
            resource_type_id: key.resource_type_id,
            access_group_id: key.access_group_id,
            deleted_at: None,
        };
        self.working.grants.insert(row.id, row.clone());
        Ok(Some(row))
    }

    async fn grants(&mut self, filter: &GrantFilter) -> Result<Vec<ResourceGrant>> {
        self.resource_tables()?;
        Ok(self
            .working
            .grants
            .values()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect())
    }

    async fn delete_grants(&mut self, filter: &GrantFilter) -> Result<usize> {
        self.resource_tables()?;
        let now = Utc::now();
        let mut deleted = 0;
        for grant in self.working.grants.values_mut() {
            if filter.matches(grant) {
                grant.deleted_at = Some(now);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn purge_revoked_grants(&mut self, group_id: GroupId) -> Result<usize> {
        self.resource_tables()?;
        let before = self.working.grants.len();
        self.working
            .grants
            .retain(|_, g| g.access_group_id != group_id || g.deleted_at.is_none());
        Ok(before - self.working.grants.len())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
