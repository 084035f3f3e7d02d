//! Resource-level permission tests

use std::sync::Arc;
use warden_authz::store::InMemoryEntityStore;
use warden_authz::{
    AccessConfig, AccessControl, AccessError, AccessGroup, JwtVerifier, NewAccessGroup,
    NewPermission, Permission, SUPER_ADMIN,
};

async fn access_control() -> AccessControl {
    let store = InMemoryEntityStore::new();
    store.register_users([9, 10, 99]).await;

    let config = AccessConfig {
        resource_level_permissions: true,
        ..Default::default()
    };
    AccessControl::new(config, Arc::new(store), Arc::new(JwtVerifier::hs256("secret")))
        .await
        .unwrap()
}

/// Group "Observers" holding `read:observations`, with user 9 as member
async fn observers(access: &AccessControl) -> (AccessGroup, Permission) {
    let group = access
        .admin()
        .create_group(NewAccessGroup::new("Observers"))
        .await
        .unwrap();
    let permission = access
        .admin()
        .create_permission(NewPermission::new("read:observations", "Read observations"))
        .await
        .unwrap();
    access
        .admin()
        .assign_permission(group.id, permission.id)
        .await
        .unwrap();
    access.admin().add_user(group.id, 9).await.unwrap();
    (group, permission)
}

// ============================================================================
// ACCESS CHECKS
// ============================================================================

#[tokio::test]
async fn test_location_scenario() {
    let access = access_control().await;
    let (group, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    resources
        .declare_resource_type(permission.id, "location")
        .await
        .unwrap();
    resources
        .grant(permission.id, &[1, 2, 3], "location", group.id)
        .await
        .unwrap();

    assert!(resources
        .has_access("location", permission.id, &[1, 2], 9)
        .await
        .unwrap());
    assert!(!resources
        .has_access("location", permission.id, &[1, 4], 9)
        .await
        .unwrap());

    let ids = resources
        .resource_ids_for("location", permission.id, 9)
        .await
        .unwrap();
    assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_empty_request_is_allowed() {
    let access = access_control().await;
    let (_group, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    resources
        .declare_resource_type(permission.id, "location")
        .await
        .unwrap();
    assert!(resources
        .has_access("location", permission.id, &[], 10)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_undeclared_type_fails_loudly() {
    let access = access_control().await;
    let (group, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    let err = resources
        .has_access("site", permission.id, &[1], 9)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::UnconfiguredResourceType { ref type_name, .. } if type_name == "site"
    ));

    let err = resources
        .grant(permission.id, &[1], "site", group.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unconfigured_resource_type");
}

#[tokio::test]
async fn test_union_over_groups() {
    let access = access_control().await;
    let (north, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    let south = access
        .admin()
        .create_group(NewAccessGroup::new("South"))
        .await
        .unwrap();
    access.admin().add_user(south.id, 9).await.unwrap();

    resources
        .declare_resource_type(permission.id, "location")
        .await
        .unwrap();
    resources
        .grant(permission.id, &[1], "location", north.id)
        .await
        .unwrap();
    resources
        .grant(permission.id, &[2], "location", south.id)
        .await
        .unwrap();

    assert!(resources
        .has_access("location", permission.id, &[1, 2], 9)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_super_admin_has_every_resource() {
    let access = access_control().await;
    let (_group, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    let root = access
        .admin()
        .create_group(NewAccessGroup::new("Root"))
        .await
        .unwrap();
    let super_admin = access
        .admin()
        .create_permission(NewPermission::new(SUPER_ADMIN, "Super admin"))
        .await
        .unwrap();
    access
        .admin()
        .assign_permission(root.id, super_admin.id)
        .await
        .unwrap();
    access.admin().add_user(root.id, 99).await.unwrap();

    // No declaration needed for the bypass
    assert!(resources
        .has_access("location", permission.id, &[1, 500, 9000], 99)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_disabled_feature() {
    let store = InMemoryEntityStore::new();
    let access = AccessControl::new(
        AccessConfig::default(),
        Arc::new(store),
        Arc::new(JwtVerifier::hs256("secret")),
    )
    .await
    .unwrap();
    assert_eq!(access.resources().unwrap_err().kind(), "validation");
}

// ============================================================================
// CACHE COHERENCE
// ============================================================================

#[tokio::test]
async fn test_grant_then_revoke_is_coherent() {
    let access = access_control().await;
    let (group, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    resources
        .declare_resource_type(permission.id, "location")
        .await
        .unwrap();

    // Cache the empty answer first
    assert!(!resources
        .has_access("location", permission.id, &[5], 9)
        .await
        .unwrap());

    resources
        .grant(permission.id, &[5], "location", group.id)
        .await
        .unwrap();
    assert!(resources
        .has_access("location", permission.id, &[5], 9)
        .await
        .unwrap());

    let removed = resources
        .revoke(permission.id, &[5], "location", group.id)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(!resources
        .has_access("location", permission.id, &[5], 9)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_leaving_group_drops_resource_access() {
    let access = access_control().await;
    let (group, permission) = observers(&access).await;
    let resources = access.resources().unwrap();

    resources
        .declare_resource_type(permission.id, "location")
        .await
        .unwrap();
    resources
        .grant(permission.id, &[1], "location", group.id)
        .await
        .unwrap();
    assert!(resources
        .has_access("location", permission.id, &[1], 9)
        .await
        .unwrap());

    access.admin().remove_user(group.id, 9).await.unwrap();
    assert!(!resources
        .has_access("location", permission.id, &[1], 9)
        .await
        .unwrap());
}
