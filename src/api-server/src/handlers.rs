use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;
use warden_authz::{AccessError, EntityKind, Principal};

use crate::{
    error::{ApiError, Result},
    models::*,
    state::AppState,
};

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Prometheus metrics endpoint
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Decision and cache metrics in Prometheus text format", body = String)
    ),
    tag = "health"
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.access.engine().export_prometheus().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Identity of the caller
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Authenticated caller", body = WhoAmIResponse),
        (status = 401, description = "No principal attached", body = ErrorResponse)
    ),
    tag = "authorization"
)]
pub async fn whoami(principal: Option<Extension<Principal>>) -> Result<Json<WhoAmIResponse>> {
    let Extension(principal) = principal.ok_or_else(|| {
        ApiError::from(AccessError::Authentication(
            "route is not protected by any rule".to_string(),
        ))
    })?;

    Ok(Json(WhoAmIResponse {
        user_id: principal.user_id,
        super_admin: principal.is_super_admin(),
        permissions: principal.permissions.into_iter().collect(),
    }))
}

/// Create an access group
#[utoipa::path(
    post,
    path = "/api/v1/groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = GroupResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 409, description = "Name already in use", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupResponse>)> {
    req.validate()?;

    let group = state.access.admin().create_group(req.into()).await?;
    Ok((StatusCode::CREATED, Json(group.into())))
}

/// Find an access group by name
#[utoipa::path(
    get,
    path = "/api/v1/groups",
    params(GroupLookupQuery),
    responses(
        (status = 200, description = "Group found", body = GroupResponse),
        (status = 404, description = "No active group with that name", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn find_group(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupLookupQuery>,
) -> Result<Json<GroupResponse>> {
    let group = state
        .access
        .admin()
        .get_group_by_name(&query.name)
        .await?
        .ok_or_else(|| {
            ApiError::from(AccessError::NotFound {
                entity: EntityKind::AccessGroup,
                id: query.name.clone(),
            })
        })?;
    Ok(Json(group.into()))
}

/// Get an access group
#[utoipa::path(
    get,
    path = "/api/v1/groups/{id}",
    params(("id" = i64, Path, description = "Group ID")),
    responses(
        (status = 200, description = "Group found", body = GroupResponse),
        (status = 404, description = "Group not found", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn get_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<GroupResponse>> {
    let group = state
        .access
        .admin()
        .get_group(id)
        .await?
        .ok_or_else(|| ApiError::from(AccessError::not_found(EntityKind::AccessGroup, id)))?;
    Ok(Json(group.into()))
}

/// Update an access group's name or description
#[utoipa::path(
    put,
    path = "/api/v1/groups/{id}",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = UpdateGroupRequest,
    responses(
        (status = 200, description = "Group updated", body = GroupResponse),
        (status = 404, description = "Group not found", body = ErrorResponse),
        (status = 409, description = "Name already in use", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn update_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<GroupResponse>> {
    req.validate()?;

    let group = state.access.admin().update_group(id, req.into()).await?;
    Ok(Json(group.into()))
}

/// Delete an access group
#[utoipa::path(
    delete,
    path = "/api/v1/groups/{id}",
    params(("id" = i64, Path, description = "Group ID"), DeleteGroupQuery),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 404, description = "Group not found", body = ErrorResponse),
        (status = 409, description = "Group still has members, permissions or grants", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteGroupQuery>,
) -> Result<StatusCode> {
    state.access.admin().delete_group(id, query.mode.into()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a group with users, permissions and grants in one transaction
#[utoipa::path(
    post,
    path = "/api/v1/bulk/groups",
    request_body = BulkCreateGroupRequest,
    responses(
        (status = 201, description = "Group created with its assignments", body = AssignmentSummaryResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Unknown user or permission; nothing was written", body = ErrorResponse)
    ),
    tag = "bulk"
)]
pub async fn bulk_create_group(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkCreateGroupRequest>,
) -> Result<(StatusCode, Json<AssignmentSummaryResponse>)> {
    req.validate()?;

    let (group, assignments) = req.into_parts();
    let summary = state
        .access
        .admin()
        .create_with_assignments(group, assignments)
        .await?;
    Ok((StatusCode::CREATED, Json(summary.into())))
}

/// Update a group and replace or extend its assignments in one transaction
#[utoipa::path(
    put,
    path = "/api/v1/bulk/groups/{id}",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = BulkUpdateGroupRequest,
    responses(
        (status = 200, description = "Group updated", body = AssignmentSummaryResponse),
        (status = 404, description = "Unknown group, user or permission; nothing was written", body = ErrorResponse)
    ),
    tag = "bulk"
)]
pub async fn bulk_update_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<BulkUpdateGroupRequest>,
) -> Result<Json<AssignmentSummaryResponse>> {
    req.validate()?;

    let (update, assignments, mode) = req.into_parts();
    let summary = state
        .access
        .admin()
        .update_with_assignments(id, update, assignments, mode)
        .await?;
    Ok(Json(summary.into()))
}

/// List group members
#[utoipa::path(
    get,
    path = "/api/v1/groups/{id}/members",
    params(("id" = i64, Path, description = "Group ID")),
    responses(
        (status = 200, description = "Members", body = MembersResponse),
        (status = 404, description = "Group not found", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MembersResponse>> {
    let user_ids = state.access.admin().group_members(id).await?;
    Ok(Json(MembersResponse {
        group_id: id,
        user_ids,
    }))
}

/// Add a user to a group
#[utoipa::path(
    post,
    path = "/api/v1/groups/{id}/members",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = AddMemberRequest,
    responses(
        (status = 200, description = "`changed` is false when already a member", body = ChangedResponse),
        (status = 404, description = "Unknown group or user", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<ChangedResponse>> {
    req.validate()?;

    let changed = state.access.admin().add_user(id, req.user_id).await?;
    Ok(Json(ChangedResponse { changed }))
}

/// Remove a user from a group
#[utoipa::path(
    delete,
    path = "/api/v1/groups/{id}/members/{user_id}",
    params(
        ("id" = i64, Path, description = "Group ID"),
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "`changed` is false when not a member", body = ChangedResponse),
        (status = 404, description = "Group not found", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<Json<ChangedResponse>> {
    let changed = state.access.admin().remove_user(id, user_id).await?;
    Ok(Json(ChangedResponse { changed }))
}

/// List the permissions linked to a group
#[utoipa::path(
    get,
    path = "/api/v1/groups/{id}/permissions",
    params(("id" = i64, Path, description = "Group ID")),
    responses(
        (status = 200, description = "Permissions", body = ListPermissionsResponse),
        (status = 404, description = "Group not found", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn list_group_permissions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ListPermissionsResponse>> {
    let permissions: Vec<PermissionResponse> = state
        .access
        .admin()
        .group_permissions(id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(ListPermissionsResponse {
        total: permissions.len(),
        permissions,
    }))
}

/// Link a permission to a group
#[utoipa::path(
    post,
    path = "/api/v1/groups/{id}/permissions",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = AssignPermissionRequest,
    responses(
        (status = 200, description = "`changed` is false when already linked", body = ChangedResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn assign_permission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AssignPermissionRequest>,
) -> Result<Json<ChangedResponse>> {
    req.validate()?;

    let changed = state
        .access
        .admin()
        .assign_permission(id, req.permission_id)
        .await?;
    Ok(Json(ChangedResponse { changed }))
}

/// Unlink a permission from a group, dropping the group's grants for it
#[utoipa::path(
    delete,
    path = "/api/v1/groups/{id}/permissions/{permission_id}",
    params(
        ("id" = i64, Path, description = "Group ID"),
        ("permission_id" = i64, Path, description = "Permission ID")
    ),
    responses(
        (status = 200, description = "`changed` is false when not linked", body = ChangedResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "groups"
)]
pub async fn unassign_permission(
    State(state): State<Arc<AppState>>,
    Path((id, permission_id)): Path<(i64, i64)>,
) -> Result<Json<ChangedResponse>> {
    let changed = state
        .access
        .admin()
        .unassign_permission(id, permission_id)
        .await?;
    Ok(Json(ChangedResponse { changed }))
}

/// A group's permissions with their resource restrictions
#[utoipa::path(
    get,
    path = "/api/v1/groups/{id}/view",
    params(("id" = i64, Path, description = "Group ID"), GroupViewQuery),
    responses(
        (status = 200, description = "Permission view", body = GroupPermissionsResponse),
        (status = 404, description = "Group not found", body = ErrorResponse)
    ),
    tag = "resources"
)]
pub async fn group_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<GroupViewQuery>,
) -> Result<Json<GroupPermissionsResponse>> {
    let view = state
        .access
        .resources()?
        .group_permissions_view(id, query.resource_type.as_deref(), query.permission_id)
        .await?;
    Ok(Json(GroupPermissionsResponse::new(id, view)))
}

/// Grant a group access to resource instances
#[utoipa::path(
    post,
    path = "/api/v1/groups/{id}/grants",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = ResourceGrantRequest,
    responses(
        (status = 200, description = "Grants now present for the requested resources", body = GrantsResponse),
        (status = 400, description = "Resource type not declared for the permission", body = ErrorResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "resources"
)]
pub async fn grant_resources(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ResourceGrantRequest>,
) -> Result<Json<GrantsResponse>> {
    req.validate()?;

    let grants = state
        .access
        .resources()?
        .grant(req.permission_id, &req.resource_ids, &req.resource_type, id)
        .await?;
    Ok(Json(GrantsResponse {
        grants: grants.into_iter().map(Into::into).collect(),
    }))
}

/// Revoke a group's access to resource instances
#[utoipa::path(
    post,
    path = "/api/v1/groups/{id}/grants/revoke",
    params(("id" = i64, Path, description = "Group ID")),
    request_body = ResourceGrantRequest,
    responses(
        (status = 200, description = "Number of grants removed", body = RevokeResponse),
        (status = 404, description = "Unknown group or permission", body = ErrorResponse)
    ),
    tag = "resources"
)]
pub async fn revoke_resources(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ResourceGrantRequest>,
) -> Result<Json<RevokeResponse>> {
    req.validate()?;

    let removed = state
        .access
        .resources()?
        .revoke(req.permission_id, &req.resource_ids, &req.resource_type, id)
        .await?;
    Ok(Json(RevokeResponse { removed }))
}

/// Create a permission
#[utoipa::path(
    post,
    path = "/api/v1/permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = PermissionResponse),
        (status = 409, description = "Code already in use", body = ErrorResponse)
    ),
    tag = "permissions"
)]
pub async fn create_permission(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePermissionRequest>,
) -> Result<(StatusCode, Json<PermissionResponse>)> {
    req.validate()?;

    let permission = state.access.admin().create_permission(req.into()).await?;
    Ok((StatusCode::CREATED, Json(permission.into())))
}

/// Find a permission by code
#[utoipa::path(
    get,
    path = "/api/v1/permissions",
    params(PermissionLookupQuery),
    responses(
        (status = 200, description = "Permission found", body = PermissionResponse),
        (status = 404, description = "No active permission with that code", body = ErrorResponse)
    ),
    tag = "permissions"
)]
pub async fn find_permission(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PermissionLookupQuery>,
) -> Result<Json<PermissionResponse>> {
    let permission = state
        .access
        .admin()
        .get_permission_by_code(&query.code)
        .await?
        .ok_or_else(|| {
            ApiError::from(AccessError::NotFound {
                entity: EntityKind::Permission,
                id: query.code.clone(),
            })
        })?;
    Ok(Json(permission.into()))
}

/// Get a permission
#[utoipa::path(
    get,
    path = "/api/v1/permissions/{id}",
    params(("id" = i64, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission found", body = PermissionResponse),
        (status = 404, description = "Permission not found", body = ErrorResponse)
    ),
    tag = "permissions"
)]
pub async fn get_permission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PermissionResponse>> {
    let permission = state
        .access
        .admin()
        .get_permission(id)
        .await?
        .ok_or_else(|| ApiError::from(AccessError::not_found(EntityKind::Permission, id)))?;
    Ok(Json(permission.into()))
}

/// Resource types declared for a permission
#[utoipa::path(
    get,
    path = "/api/v1/permissions/{id}/resource-types",
    params(("id" = i64, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Declared resource types", body = ListResourceTypesResponse),
        (status = 404, description = "Permission not found", body = ErrorResponse)
    ),
    tag = "resources"
)]
pub async fn list_resource_types(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ListResourceTypesResponse>> {
    let resource_types = state
        .access
        .resources()?
        .list_resource_types(id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(ListResourceTypesResponse { resource_types }))
}

/// Declare that a permission is scoped to a resource type
#[utoipa::path(
    post,
    path = "/api/v1/permissions/{id}/resource-types",
    params(("id" = i64, Path, description = "Permission ID")),
    request_body = DeclareResourceTypeRequest,
    responses(
        (status = 200, description = "Declaration, existing or new", body = ResourceTypeResponse),
        (status = 404, description = "Permission not found", body = ErrorResponse)
    ),
    tag = "resources"
)]
pub async fn declare_resource_type(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<DeclareResourceTypeRequest>,
) -> Result<Json<ResourceTypeResponse>> {
    req.validate()?;

    let declared = state
        .access
        .resources()?
        .declare_resource_type(id, &req.name)
        .await?;
    Ok(Json(declared.into()))
}

/// Remove a resource type declaration and its grants
#[utoipa::path(
    delete,
    path = "/api/v1/permissions/{id}/resource-types/{name}",
    params(
        ("id" = i64, Path, description = "Permission ID"),
        ("name" = String, Path, description = "Resource type name")
    ),
    responses(
        (status = 200, description = "`changed` is false when the type was not declared", body = ChangedResponse),
        (status = 404, description = "Permission not found", body = ErrorResponse)
    ),
    tag = "resources"
)]
pub async fn revoke_resource_type(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(i64, String)>,
) -> Result<Json<ChangedResponse>> {
    let changed = state
        .access
        .resources()?
        .revoke_resource_type(id, &name)
        .await?;
    Ok(Json(ChangedResponse { changed }))
}

/// Effective permission codes of a user
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/permissions",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Permission codes", body = UserPermissionsResponse)
    ),
    tag = "users"
)]
pub async fn user_permissions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<UserPermissionsResponse>> {
    let permissions = state.access.resolver().resolve(id).await?;
    Ok(Json(UserPermissionsResponse {
        user_id: id,
        permissions: permissions.into_iter().collect(),
    }))
}

/// Active groups of a user
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/groups",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Groups", body = ListGroupsResponse)
    ),
    tag = "users"
)]
pub async fn user_groups(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ListGroupsResponse>> {
    let groups: Vec<GroupResponse> = state
        .access
        .admin()
        .user_groups(id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(ListGroupsResponse {
        total: groups.len(),
        groups,
    }))
}

/// Resource IDs a user may act on through a permission
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/resources",
    params(("id" = i64, Path, description = "User ID"), ResourceQuery),
    responses(
        (status = 200, description = "Resource IDs", body = UserResourcesResponse),
        (status = 400, description = "Resource type not declared for the permission", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn user_resources(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<UserResourcesResponse>> {
    let resource_ids = state
        .access
        .resources()?
        .resource_ids_for(&query.resource_type, query.permission_id, id)
        .await?;
    Ok(Json(UserResourcesResponse {
        user_id: id,
        permission_id: query.permission_id,
        resource_type: query.resource_type,
        resource_ids: resource_ids.into_iter().collect(),
    }))
}

/// Whether a user may act on every listed resource
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/access",
    params(("id" = i64, Path, description = "User ID")),
    request_body = AccessCheckRequest,
    responses(
        (status = 200, description = "Access decision", body = AccessCheckResponse),
        (status = 400, description = "Resource type not declared for the permission", body = ErrorResponse)
    ),
    tag = "users"
)]
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AccessCheckRequest>,
) -> Result<Json<AccessCheckResponse>> {
    req.validate()?;

    let allowed = state
        .access
        .resources()?
        .has_access(&req.resource_type, req.permission_id, &req.resource_ids, id)
        .await?;
    Ok(Json(AccessCheckResponse { allowed }))
}

/// Drop every cached entry
#[utoipa::path(
    delete,
    path = "/api/v1/cache",
    responses(
        (status = 204, description = "Cache cleared")
    ),
    tag = "cache"
)]
pub async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.access.admin().clear_cache().await;
    StatusCode::NO_CONTENT
}

/// Drop one user's cached entries
#[utoipa::path(
    delete,
    path = "/api/v1/cache/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 204, description = "User cache cleared"),
        (status = 400, description = "Invalid user ID", body = ErrorResponse)
    ),
    tag = "cache"
)]
pub async fn clear_user_cache(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.access.admin().clear_user_cache(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
