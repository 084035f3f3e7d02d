//! Error types for access-group authorization

use thiserror::Error;

use crate::types::{GroupId, PermissionId};

/// Kind of entity named in a [`AccessError::NotFound`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    AccessGroup,
    Permission,
    User,
    ResourceType,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::AccessGroup => "access group",
            EntityKind::Permission => "permission",
            EntityKind::User => "user",
            EntityKind::ResourceType => "resource type",
        };
        f.write_str(name)
    }
}

/// Access control errors
#[derive(Debug, Error)]
pub enum AccessError {
    /// Missing or malformed input, raised before any store access
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Referenced entity does not exist (or is soft-deleted)
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// Another active access group already uses this name
    #[error("Access group name already exists: {0}")]
    DuplicateName(String),

    /// Another active permission already uses this code
    #[error("Permission code already exists: {0}")]
    DuplicateCode(String),

    /// Resource type was never declared for the permission
    #[error("Resource type '{type_name}' is not configured for permission {permission_id}")]
    UnconfiguredResourceType {
        permission_id: PermissionId,
        type_name: String,
    },

    /// Group still owns links or grants and cannot be deleted
    #[error(
        "Access group {group_id} is in use ({users} users, {permissions} permissions, {grants} resource grants)"
    )]
    GroupInUse {
        group_id: GroupId,
        users: usize,
        permissions: usize,
        grants: usize,
    },

    /// Missing, malformed or rejected credential
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Underlying persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AccessError {
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        AccessError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable discriminant callers can branch on without parsing messages
    pub fn kind(&self) -> &'static str {
        match self {
            AccessError::Validation(_) => "validation",
            AccessError::NotFound { .. } => "not_found",
            AccessError::DuplicateName(_) => "duplicate_name",
            AccessError::DuplicateCode(_) => "duplicate_code",
            AccessError::UnconfiguredResourceType { .. } => "unconfigured_resource_type",
            AccessError::GroupInUse { .. } => "group_in_use",
            AccessError::Authentication(_) => "authentication",
            AccessError::Store(_) => "store",
            AccessError::Config(_) => "config",
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AccessError {
    fn from(err: sqlx::Error) -> Self {
        AccessError::Store(err.to_string())
    }
}

/// Result type for access control operations
pub type Result<T> = std::result::Result<T, AccessError>;
