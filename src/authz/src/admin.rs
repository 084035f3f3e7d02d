//! Access group administration
//!
//! Every mutation runs in one store transaction. Users whose cached answers
//! may change are collected inside that transaction (before any destructive
//! step) and their cache entries are dropped once the transaction commits.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::cache::{self, PermissionCache};
use crate::error::{AccessError, EntityKind, Result};
use crate::resource::{ensure_resource_type, insert_grants};
use crate::store::{
    require_group, require_permission, require_user, EntityStore, GrantFilter, StoreTransaction,
};
use crate::types::{
    validate_id, validate_name, AccessGroup, AssignmentMode, AssignmentSummary, Assignments,
    DeleteMode, GroupId, GroupUpdate, Lookup, NewAccessGroup, NewPermission, Permission,
    PermissionId, UserId,
};

/// Administrative operations over groups, permissions, members and grants
#[derive(Clone)]
pub struct AccessGroupAdmin {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn PermissionCache>,
    resource_level_permissions: bool,
}

impl AccessGroupAdmin {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn PermissionCache>,
        resource_level_permissions: bool,
    ) -> Self {
        Self {
            store,
            cache,
            resource_level_permissions,
        }
    }

    /// Create an access group with a name unused by any active group
    #[instrument(skip(self, group), fields(name = %group.name))]
    pub async fn create_group(&self, group: NewAccessGroup) -> Result<AccessGroup> {
        validate_name("name", &group.name)?;

        let mut tx = self.store.begin().await?;
        ensure_name_free(tx.as_mut(), &group.name, None).await?;
        let created = tx.insert_group(&group).await?;
        tx.commit().await?;

        info!("Created access group {} ({})", created.id, created.name);
        Ok(created)
    }

    /// Change a group's name and/or description
    #[instrument(skip(self, update))]
    pub async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<AccessGroup> {
        validate_id("group_id", group_id)?;

        let mut tx = self.store.begin().await?;
        let group = apply_update(tx.as_mut(), group_id, update).await?;
        tx.commit().await?;

        info!("Updated access group {}", group_id);
        Ok(group)
    }

    /// Delete a group that owns no members, permissions or grants
    ///
    /// A soft-deleted group can still be hard-deleted.
    #[instrument(skip(self))]
    pub async fn delete_group(&self, group_id: GroupId, mode: DeleteMode) -> Result<()> {
        validate_id("group_id", group_id)?;

        let mut tx = self.store.begin().await?;
        match (tx.group(group_id).await?, mode) {
            (Lookup::Active(_), _) | (Lookup::SoftDeleted(_), DeleteMode::Hard) => {}
            _ => return Err(AccessError::not_found(EntityKind::AccessGroup, group_id)),
        }

        let users = tx.group_user_ids(group_id).await?.len();
        let permissions = tx.group_permission_ids(group_id).await?.len();
        let grants = if self.resource_level_permissions {
            tx.grants(&GrantFilter::for_group(group_id)).await?.len()
        } else {
            0
        };
        if users + permissions + grants > 0 {
            return Err(AccessError::GroupInUse {
                group_id,
                users,
                permissions,
                grants,
            });
        }

        if mode == DeleteMode::Hard && self.resource_level_permissions {
            tx.purge_revoked_grants(group_id).await?;
        }
        tx.delete_group(group_id, mode).await?;
        tx.commit().await?;

        info!("Deleted access group {} ({:?})", group_id, mode);
        Ok(())
    }

    /// Create a permission with a code unused by any active permission
    #[instrument(skip(self, permission), fields(code = %permission.code))]
    pub async fn create_permission(&self, permission: NewPermission) -> Result<Permission> {
        validate_name("code", &permission.code)?;
        validate_name("name", &permission.name)?;

        let mut tx = self.store.begin().await?;
        if tx.active_permission_by_code(&permission.code).await?.is_some() {
            return Err(AccessError::DuplicateCode(permission.code));
        }
        let created = tx.insert_permission(&permission).await?;
        tx.commit().await?;

        info!("Created permission {} ({})", created.id, created.code);
        Ok(created)
    }

    pub async fn get_group(&self, group_id: GroupId) -> Result<Option<AccessGroup>> {
        validate_id("group_id", group_id)?;
        let mut tx = self.store.begin().await?;
        let group = tx.group(group_id).await?.active();
        tx.commit().await?;
        Ok(group)
    }

    pub async fn get_group_by_name(&self, name: &str) -> Result<Option<AccessGroup>> {
        validate_name("name", name)?;
        let mut tx = self.store.begin().await?;
        let group = tx.active_group_by_name(name).await?;
        tx.commit().await?;
        Ok(group)
    }

    pub async fn get_permission(&self, permission_id: PermissionId) -> Result<Option<Permission>> {
        validate_id("permission_id", permission_id)?;
        let mut tx = self.store.begin().await?;
        let permission = tx.permission(permission_id).await?.active();
        tx.commit().await?;
        Ok(permission)
    }

    pub async fn get_permission_by_code(&self, code: &str) -> Result<Option<Permission>> {
        validate_name("code", code)?;
        let mut tx = self.store.begin().await?;
        let permission = tx.active_permission_by_code(code).await?;
        tx.commit().await?;
        Ok(permission)
    }

    /// Link a permission to a group; false if it was already linked
    #[instrument(skip(self))]
    pub async fn assign_permission(
        &self,
        group_id: GroupId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        validate_id("group_id", group_id)?;
        validate_id("permission_id", permission_id)?;

        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;
        require_permission(tx.as_mut(), permission_id).await?;
        let linked = tx.insert_group_permission(group_id, permission_id).await?;
        let affected = tx.group_user_ids(group_id).await?;
        tx.commit().await?;

        if linked {
            cache::invalidate_users(self.cache.as_ref(), &affected).await;
            info!("Assigned permission {} to group {}", permission_id, group_id);
        }
        Ok(linked)
    }

    /// Unlink a permission from a group, dropping the group's grants for it
    #[instrument(skip(self))]
    pub async fn unassign_permission(
        &self,
        group_id: GroupId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        validate_id("group_id", group_id)?;
        validate_id("permission_id", permission_id)?;

        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;
        if matches!(tx.permission(permission_id).await?, Lookup::Absent) {
            return Err(AccessError::not_found(EntityKind::Permission, permission_id));
        }

        let affected = tx.group_user_ids(group_id).await?;
        let unlinked = tx.delete_group_permission(group_id, permission_id).await?;
        let grants = if self.resource_level_permissions {
            let filter = GrantFilter {
                group_ids: Some(vec![group_id]),
                permission_id: Some(permission_id),
                ..Default::default()
            };
            tx.delete_grants(&filter).await?
        } else {
            0
        };
        tx.commit().await?;

        if unlinked || grants > 0 {
            cache::invalidate_users(self.cache.as_ref(), &affected).await;
            info!(
                "Unassigned permission {} from group {} ({} grants removed)",
                permission_id, group_id, grants
            );
        }
        Ok(unlinked)
    }

    /// Add a user to a group; false if already a member
    #[instrument(skip(self))]
    pub async fn add_user(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        validate_id("group_id", group_id)?;
        validate_id("user_id", user_id)?;

        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;
        require_user(tx.as_mut(), user_id).await?;
        let added = tx.insert_group_user(group_id, user_id).await?;
        tx.commit().await?;

        if added {
            cache::invalidate_users(self.cache.as_ref(), &[user_id]).await;
            info!("Added user {} to group {}", user_id, group_id);
        }
        Ok(added)
    }

    /// Remove a user from a group; false if not a member
    #[instrument(skip(self))]
    pub async fn remove_user(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        validate_id("group_id", group_id)?;
        validate_id("user_id", user_id)?;

        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;
        let removed = tx.delete_group_user(group_id, user_id).await?;
        tx.commit().await?;

        if removed {
            cache::invalidate_users(self.cache.as_ref(), &[user_id]).await;
            info!("Removed user {} from group {}", user_id, group_id);
        }
        Ok(removed)
    }

    pub async fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        validate_id("group_id", group_id)?;
        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;
        let members = tx.group_user_ids(group_id).await?;
        tx.commit().await?;
        Ok(members)
    }

    /// Active groups the user belongs to
    pub async fn user_groups(&self, user_id: UserId) -> Result<Vec<AccessGroup>> {
        validate_id("user_id", user_id)?;
        let mut tx = self.store.begin().await?;
        let mut groups = Vec::new();
        for group_id in tx.user_group_ids(user_id).await? {
            if let Some(group) = tx.group(group_id).await?.active() {
                groups.push(group);
            }
        }
        tx.commit().await?;
        Ok(groups)
    }

    /// Active permissions linked to a group
    pub async fn group_permissions(&self, group_id: GroupId) -> Result<Vec<Permission>> {
        validate_id("group_id", group_id)?;
        let mut tx = self.store.begin().await?;
        require_group(tx.as_mut(), group_id).await?;
        let mut permissions = Vec::new();
        for permission_id in tx.group_permission_ids(group_id).await? {
            if let Some(permission) = tx.permission(permission_id).await?.active() {
                permissions.push(permission);
            }
        }
        tx.commit().await?;
        Ok(permissions)
    }

    /// Create a group and apply its assignments atomically
    #[instrument(skip(self, group, assignments), fields(name = %group.name))]
    pub async fn create_with_assignments(
        &self,
        group: NewAccessGroup,
        assignments: Assignments,
    ) -> Result<AssignmentSummary> {
        validate_name("name", &group.name)?;
        self.validate_assignments(&assignments)?;

        let mut tx = self.store.begin().await?;
        let outcome = create_in(tx.as_mut(), &group, &assignments).await;
        let summary = self.finish(tx, outcome).await?;

        let affected = dedup(&assignments.user_ids);
        cache::invalidate_users(self.cache.as_ref(), &affected).await;
        info!(
            "Created access group {} with {} users, {} permissions, {} grants",
            summary.group.id, summary.users_added, summary.permissions_added, summary.grants_added
        );
        Ok(summary)
    }

    /// Update a group and apply its assignments atomically
    ///
    /// In [`AssignmentMode::Replace`] the group's existing members,
    /// permissions and grants are removed before the new ones are added.
    #[instrument(skip(self, update, assignments))]
    pub async fn update_with_assignments(
        &self,
        group_id: GroupId,
        update: GroupUpdate,
        assignments: Assignments,
        mode: AssignmentMode,
    ) -> Result<AssignmentSummary> {
        validate_id("group_id", group_id)?;
        self.validate_assignments(&assignments)?;

        let mut tx = self.store.begin().await?;

        // Members are read before replace mode removes them
        let previous = match tx.group_user_ids(group_id).await {
            Ok(members) => members,
            Err(e) => return self.finish(tx, Err(e)).await,
        };
        let outcome = update_in(
            tx.as_mut(),
            group_id,
            update,
            &assignments,
            mode,
            self.resource_level_permissions,
        )
        .await;
        let summary = self.finish(tx, outcome).await?;

        let mut affected: BTreeSet<UserId> = previous.into_iter().collect();
        affected.extend(assignments.user_ids.iter().copied());
        let affected: Vec<UserId> = affected.into_iter().collect();
        cache::invalidate_users(self.cache.as_ref(), &affected).await;

        info!(
            "Updated access group {} ({:?}): +{}/-{} users, +{}/-{} permissions, +{}/-{} grants",
            group_id,
            mode,
            summary.users_added,
            summary.users_removed,
            summary.permissions_added,
            summary.permissions_removed,
            summary.grants_added,
            summary.grants_removed
        );
        Ok(summary)
    }

    /// Drop every cached answer of one user
    pub async fn clear_user_cache(&self, user_id: UserId) -> Result<()> {
        validate_id("user_id", user_id)?;
        cache::invalidate_users(self.cache.as_ref(), &[user_id]).await;
        Ok(())
    }

    /// Drop every cached answer
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        info!("Permission cache cleared");
    }

    fn validate_assignments(&self, assignments: &Assignments) -> Result<()> {
        assignments.validate()?;
        if !self.resource_level_permissions && assignments.has_resources() {
            return Err(AccessError::Validation(
                "resource-level permissions are disabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(&self, tx: Box<dyn StoreTransaction>, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                warn!("Rolling back bulk assignment: {}", e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

async fn ensure_name_free(
    tx: &mut dyn StoreTransaction,
    name: &str,
    exclude: Option<GroupId>,
) -> Result<()> {
    match tx.active_group_by_name(name).await? {
        Some(existing) if Some(existing.id) != exclude => {
            Err(AccessError::DuplicateName(name.to_string()))
        }
        _ => Ok(()),
    }
}

async fn apply_update(
    tx: &mut dyn StoreTransaction,
    group_id: GroupId,
    update: GroupUpdate,
) -> Result<AccessGroup> {
    let mut group = require_group(tx, group_id).await?;

    let mut changed = false;
    if let Some(name) = update.name {
        validate_name("name", &name)?;
        if name != group.name {
            ensure_name_free(tx, &name, Some(group_id)).await?;
            group.name = name;
            changed = true;
        }
    }
    if let Some(description) = update.description {
        group.description = Some(description);
        changed = true;
    }

    if changed {
        tx.update_group(&group).await?;
    }
    Ok(group)
}

async fn create_in(
    tx: &mut dyn StoreTransaction,
    group: &NewAccessGroup,
    assignments: &Assignments,
) -> Result<AssignmentSummary> {
    ensure_name_free(tx, &group.name, None).await?;
    let created = tx.insert_group(group).await?;

    let mut summary = AssignmentSummary {
        group: created,
        users_added: 0,
        permissions_added: 0,
        grants_added: 0,
        users_removed: 0,
        permissions_removed: 0,
        grants_removed: 0,
    };
    apply_assignments(tx, assignments, &mut summary).await?;
    Ok(summary)
}

async fn update_in(
    tx: &mut dyn StoreTransaction,
    group_id: GroupId,
    update: GroupUpdate,
    assignments: &Assignments,
    mode: AssignmentMode,
    resource_level_permissions: bool,
) -> Result<AssignmentSummary> {
    let group = apply_update(tx, group_id, update).await?;

    let mut summary = AssignmentSummary {
        group,
        users_added: 0,
        permissions_added: 0,
        grants_added: 0,
        users_removed: 0,
        permissions_removed: 0,
        grants_removed: 0,
    };

    if mode == AssignmentMode::Replace {
        summary.users_removed = tx.delete_group_users(group_id).await?;
        summary.permissions_removed = tx.delete_group_permissions(group_id).await?;
        if resource_level_permissions {
            summary.grants_removed = tx.delete_grants(&GrantFilter::for_group(group_id)).await?;
        }
    }

    apply_assignments(tx, assignments, &mut summary).await?;
    Ok(summary)
}

async fn apply_assignments(
    tx: &mut dyn StoreTransaction,
    assignments: &Assignments,
    summary: &mut AssignmentSummary,
) -> Result<()> {
    let group_id = summary.group.id;

    for user_id in dedup(&assignments.user_ids) {
        require_user(tx, user_id).await?;
        if tx.insert_group_user(group_id, user_id).await? {
            summary.users_added += 1;
        }
    }

    for assignment in &assignments.permissions {
        require_permission(tx, assignment.permission_id).await?;
        if tx
            .insert_group_permission(group_id, assignment.permission_id)
            .await?
        {
            summary.permissions_added += 1;
        }

        for (type_name, resource_ids) in &assignment.resources {
            let (declared, _) = ensure_resource_type(tx, assignment.permission_id, type_name).await?;
            let (_, added) = insert_grants(
                tx,
                assignment.permission_id,
                declared.id,
                group_id,
                resource_ids,
            )
            .await?;
            summary.grants_added += added;
        }
    }
    Ok(())
}

fn dedup(user_ids: &[UserId]) -> Vec<UserId> {
    user_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;
    use crate::store::InMemoryEntityStore;
    use crate::types::PermissionAssignment;

    async fn admin() -> (InMemoryEntityStore, AccessGroupAdmin) {
        let store = InMemoryEntityStore::new();
        store.register_users([1, 2, 7]).await;
        let admin = AccessGroupAdmin::new(Arc::new(store.clone()), Arc::new(NoopCache), true);
        (store, admin)
    }

    #[tokio::test]
    async fn test_duplicate_group_name() {
        let (_store, admin) = admin().await;
        admin.create_group(NewAccessGroup::new("Editors")).await.unwrap();

        let err = admin
            .create_group(NewAccessGroup::new("Editors"))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::DuplicateName(name) if name == "Editors"));
    }

    #[tokio::test]
    async fn test_rename_excludes_self() {
        let (_store, admin) = admin().await;
        let editors = admin.create_group(NewAccessGroup::new("Editors")).await.unwrap();
        admin.create_group(NewAccessGroup::new("Viewers")).await.unwrap();

        let same = GroupUpdate {
            name: Some("Editors".into()),
            description: Some("Content editors".into()),
        };
        let updated = admin.update_group(editors.id, same).await.unwrap();
        assert_eq!(updated.description.as_deref(), Some("Content editors"));

        let clash = GroupUpdate {
            name: Some("Viewers".into()),
            description: None,
        };
        assert_eq!(
            admin.update_group(editors.id, clash).await.unwrap_err().kind(),
            "duplicate_name"
        );
    }

    #[tokio::test]
    async fn test_soft_deleted_name_can_be_reused() {
        let (_store, admin) = admin().await;
        let first = admin.create_group(NewAccessGroup::new("Editors")).await.unwrap();
        admin.delete_group(first.id, DeleteMode::Soft).await.unwrap();

        let second = admin.create_group(NewAccessGroup::new("Editors")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(admin.get_group(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hard_delete_after_soft_delete() {
        let (_store, admin) = admin().await;
        let group = admin.create_group(NewAccessGroup::new("Editors")).await.unwrap();
        admin.delete_group(group.id, DeleteMode::Soft).await.unwrap();

        assert_eq!(
            admin
                .delete_group(group.id, DeleteMode::Soft)
                .await
                .unwrap_err()
                .kind(),
            "not_found"
        );
        admin.delete_group(group.id, DeleteMode::Hard).await.unwrap();
    }

    #[tokio::test]
    async fn test_resources_rejected_when_disabled() {
        let store = InMemoryEntityStore::new();
        let admin = AccessGroupAdmin::new(Arc::new(store), Arc::new(NoopCache), false);

        let assignments = Assignments {
            user_ids: vec![],
            permissions: vec![PermissionAssignment::new(1).with_resources("location", [1])],
        };
        let err = admin
            .create_with_assignments(NewAccessGroup::new("Observers"), assignments)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_core_schema_without_resource_tables() {
        let store = InMemoryEntityStore::core_only();
        store.register_user(7).await;
        let admin = AccessGroupAdmin::new(Arc::new(store.clone()), Arc::new(NoopCache), false);

        let empty = admin.create_group(NewAccessGroup::new("Empty")).await.unwrap();
        admin.delete_group(empty.id, DeleteMode::Soft).await.unwrap();
        admin.delete_group(empty.id, DeleteMode::Hard).await.unwrap();

        let group = admin.create_group(NewAccessGroup::new("Editors")).await.unwrap();
        let perm = admin
            .create_permission(NewPermission::new("edit:content", "Edit content"))
            .await
            .unwrap();
        assert!(admin.assign_permission(group.id, perm.id).await.unwrap());
        assert!(admin.unassign_permission(group.id, perm.id).await.unwrap());

        let summary = admin
            .update_with_assignments(
                group.id,
                GroupUpdate::default(),
                Assignments {
                    user_ids: vec![7],
                    permissions: vec![PermissionAssignment::new(perm.id)],
                },
                AssignmentMode::Replace,
            )
            .await
            .unwrap();
        assert_eq!(summary.grants_removed, 0);
        assert_eq!(summary.users_added, 1);
    }

    #[tokio::test]
    async fn test_unknown_user_rolls_back() {
        let (store, admin) = admin().await;
        let assignments = Assignments {
            user_ids: vec![1, 404],
            permissions: vec![],
        };
        let err = admin
            .create_with_assignments(NewAccessGroup::new("Editors"), assignments)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::NotFound {
                entity: EntityKind::User,
                ..
            }
        ));
        assert_eq!(store.row_counts().await.groups, 0);
    }
}
