use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;
use warden_authz::{
    AccessGroup, AssignmentMode, AssignmentSummary, Assignments, DeleteMode, GroupPermissionsView,
    GroupUpdate, NewAccessGroup, NewPermission, Permission, PermissionAssignment, PermissionView,
    ResourceGrant, ResourceType,
};

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-stable error kind, e.g. `not_found` or `forbidden`
    pub kind: String,
    pub status: u16,
}

/// Create access group request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

impl From<CreateGroupRequest> for NewAccessGroup {
    fn from(req: CreateGroupRequest) -> Self {
        NewAccessGroup {
            name: req.name,
            description: req.description,
        }
    }
}

/// Update access group request; omitted fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

impl From<UpdateGroupRequest> for GroupUpdate {
    fn from(req: UpdateGroupRequest) -> Self {
        GroupUpdate {
            name: req.name,
            description: req.description,
        }
    }
}

/// Access group response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl From<AccessGroup> for GroupResponse {
    fn from(group: AccessGroup) -> Self {
        Self {
            id: group.id,
            name: group.name,
            description: group.description,
        }
    }
}

/// How a group is deleted
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeleteModeParam {
    #[default]
    Soft,
    Hard,
}

impl From<DeleteModeParam> for DeleteMode {
    fn from(mode: DeleteModeParam) -> Self {
        match mode {
            DeleteModeParam::Soft => DeleteMode::Soft,
            DeleteModeParam::Hard => DeleteMode::Hard,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteGroupQuery {
    /// `soft` (default) or `hard`
    #[serde(default)]
    pub mode: DeleteModeParam,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GroupLookupQuery {
    /// Exact group name
    pub name: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionLookupQuery {
    /// Exact permission code
    pub code: String,
}

/// Create permission request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePermissionRequest {
    /// Stable code checked by route rules, e.g. `edit:content`
    #[validate(length(min = 1, max = 255))]
    pub code: String,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(max = 1024))]
    pub description: Option<String>,
}

impl From<CreatePermissionRequest> for NewPermission {
    fn from(req: CreatePermissionRequest) -> Self {
        NewPermission {
            code: req.code,
            name: req.name,
            description: req.description,
        }
    }
}

/// Permission response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionResponse {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

impl From<Permission> for PermissionResponse {
    fn from(permission: Permission) -> Self {
        Self {
            id: permission.id,
            code: permission.code,
            name: permission.name,
            description: permission.description,
        }
    }
}

/// Add a user to a group
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddMemberRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
}

/// Link a permission to a group
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AssignPermissionRequest {
    #[validate(range(min = 1))]
    pub permission_id: i64,
}

/// Whether a link operation changed anything
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChangedResponse {
    pub changed: bool,
}

/// Group members
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MembersResponse {
    pub group_id: i64,
    pub user_ids: Vec<i64>,
}

/// Groups of a user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListGroupsResponse {
    pub groups: Vec<GroupResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListPermissionsResponse {
    pub permissions: Vec<PermissionResponse>,
    pub total: usize,
}

/// One permission of a bulk request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PermissionAssignmentBody {
    #[validate(range(min = 1))]
    pub permission_id: i64,

    /// Resource type name -> resource IDs
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<i64>>,
}

impl From<PermissionAssignmentBody> for PermissionAssignment {
    fn from(body: PermissionAssignmentBody) -> Self {
        PermissionAssignment {
            permission_id: body.permission_id,
            resources: body.resources,
        }
    }
}

fn assignments(user_ids: Vec<i64>, permissions: Vec<PermissionAssignmentBody>) -> Assignments {
    Assignments {
        user_ids,
        permissions: permissions.into_iter().map(Into::into).collect(),
    }
}

/// Create a group together with its members, permissions and grants
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct BulkCreateGroupRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(max = 1024))]
    pub description: Option<String>,

    #[serde(default)]
    pub user_ids: Vec<i64>,

    #[serde(default)]
    #[validate(nested)]
    pub permissions: Vec<PermissionAssignmentBody>,
}

impl BulkCreateGroupRequest {
    pub fn into_parts(self) -> (NewAccessGroup, Assignments) {
        (
            NewAccessGroup {
                name: self.name,
                description: self.description,
            },
            assignments(self.user_ids, self.permissions),
        )
    }
}

/// Assignment mode of a bulk update
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentModeParam {
    /// Existing users, permissions and grants are removed first
    #[default]
    Replace,
    /// Only missing links are added
    Additive,
}

impl From<AssignmentModeParam> for AssignmentMode {
    fn from(mode: AssignmentModeParam) -> Self {
        match mode {
            AssignmentModeParam::Replace => AssignmentMode::Replace,
            AssignmentModeParam::Additive => AssignmentMode::Additive,
        }
    }
}

/// Update a group and its assignments in one transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct BulkUpdateGroupRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(length(max = 1024))]
    pub description: Option<String>,

    #[serde(default)]
    pub mode: AssignmentModeParam,

    #[serde(default)]
    pub user_ids: Vec<i64>,

    #[serde(default)]
    #[validate(nested)]
    pub permissions: Vec<PermissionAssignmentBody>,
}

impl BulkUpdateGroupRequest {
    pub fn into_parts(self) -> (GroupUpdate, Assignments, AssignmentMode) {
        (
            GroupUpdate {
                name: self.name,
                description: self.description,
            },
            assignments(self.user_ids, self.permissions),
            self.mode.into(),
        )
    }
}

/// What a bulk operation changed
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssignmentSummaryResponse {
    pub group: GroupResponse,
    pub users_added: usize,
    pub permissions_added: usize,
    pub grants_added: usize,
    pub users_removed: usize,
    pub permissions_removed: usize,
    pub grants_removed: usize,
}

impl From<AssignmentSummary> for AssignmentSummaryResponse {
    fn from(summary: AssignmentSummary) -> Self {
        Self {
            group: summary.group.into(),
            users_added: summary.users_added,
            permissions_added: summary.permissions_added,
            grants_added: summary.grants_added,
            users_removed: summary.users_removed,
            permissions_removed: summary.permissions_removed,
            grants_removed: summary.grants_removed,
        }
    }
}

/// Declare a resource type for a permission
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DeclareResourceTypeRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResourceTypeResponse {
    pub id: i64,
    pub permission_id: i64,
    pub name: String,
}

impl From<ResourceType> for ResourceTypeResponse {
    fn from(declared: ResourceType) -> Self {
        Self {
            id: declared.id,
            permission_id: declared.permission_id,
            name: declared.name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListResourceTypesResponse {
    pub resource_types: Vec<ResourceTypeResponse>,
}

/// Grant or revoke a group's access to resource instances
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResourceGrantRequest {
    #[validate(range(min = 1))]
    pub permission_id: i64,

    #[validate(length(min = 1, max = 255))]
    pub resource_type: String,

    #[validate(length(min = 1))]
    pub resource_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GrantResponse {
    pub id: i64,
    pub permission_id: i64,
    pub resource_id: i64,
    pub resource_type_id: i64,
    pub access_group_id: i64,
}

impl From<ResourceGrant> for GrantResponse {
    fn from(grant: ResourceGrant) -> Self {
        Self {
            id: grant.id,
            permission_id: grant.permission_id,
            resource_id: grant.resource_id,
            resource_type_id: grant.resource_type_id,
            access_group_id: grant.access_group_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GrantsResponse {
    pub grants: Vec<GrantResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeResponse {
    pub removed: usize,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GroupViewQuery {
    /// Only show this resource type
    pub resource_type: Option<String>,
    /// Only show this permission
    pub permission_id: Option<i64>,
}

/// A group's permissions with the resources each one is narrowed to
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GroupPermissionsResponse {
    pub group_id: i64,
    pub permissions: Vec<PermissionViewResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionViewResponse {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Empty when the permission is unrestricted
    pub resources: BTreeMap<String, Vec<i64>>,
}

impl From<PermissionView> for PermissionViewResponse {
    fn from(view: PermissionView) -> Self {
        Self {
            id: view.id,
            code: view.code,
            name: view.name,
            resources: view.resources,
        }
    }
}

impl GroupPermissionsResponse {
    pub fn new(group_id: i64, view: GroupPermissionsView) -> Self {
        Self {
            group_id,
            permissions: view.permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Effective permission codes of a user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserPermissionsResponse {
    pub user_id: i64,
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResourceQuery {
    pub resource_type: String,
    pub permission_id: i64,
}

/// Resource IDs a user may act on
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResourcesResponse {
    pub user_id: i64,
    pub permission_id: i64,
    pub resource_type: String,
    pub resource_ids: Vec<i64>,
}

/// Resource-level access check
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AccessCheckRequest {
    #[validate(range(min = 1))]
    pub permission_id: i64,

    #[validate(length(min = 1, max = 255))]
    pub resource_type: String,

    #[serde(default)]
    pub resource_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessCheckResponse {
    pub allowed: bool,
}

/// Caller identity attached by the authorization middleware
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmIResponse {
    pub user_id: i64,
    pub permissions: Vec<String>,
    pub super_admin: bool,
}
