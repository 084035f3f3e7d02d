//! Core access-group types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AccessError, Result};

/// User identifier (owned by the external users table)
pub type UserId = i64;

/// Access group identifier
pub type GroupId = i64;

/// Permission identifier
pub type PermissionId = i64;

/// Resource instance identifier
pub type ResourceId = i64;

/// Resource type declaration identifier
pub type ResourceTypeId = i64;

/// Reserved permission code that bypasses every check
pub const SUPER_ADMIN: &str = "super_admin";

/// Named collection of users sharing a permission set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Authorizable action identified by a stable code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Declares that a permission is scoped to instances of a named resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: ResourceTypeId,
    pub permission_id: PermissionId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Group G may act on resource R of type T through permission P
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGrant {
    pub id: i64,
    pub permission_id: PermissionId,
    pub resource_id: ResourceId,
    pub resource_type_id: ResourceTypeId,
    pub access_group_id: GroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Result of a point lookup at the store boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Active(T),
    SoftDeleted(T),
    Absent,
}

impl<T> Lookup<T> {
    /// Build a lookup from an optional row and its deletion timestamp
    pub fn from_row(row: Option<T>, deleted: impl FnOnce(&T) -> bool) -> Self {
        match row {
            Some(row) if deleted(&row) => Lookup::SoftDeleted(row),
            Some(row) => Lookup::Active(row),
            None => Lookup::Absent,
        }
    }

    /// The row, if it is active
    pub fn active(self) -> Option<T> {
        match self {
            Lookup::Active(row) => Some(row),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Lookup::Active(_))
    }
}

/// How a group is removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    #[default]
    Soft,
    Hard,
}

/// How bulk updates treat existing assignments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentMode {
    /// Remove existing users, permissions and grants before adding
    #[default]
    Replace,
    /// Only add what is missing
    Additive,
}

/// New access group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccessGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewAccessGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Changes to an access group; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// New permission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPermission {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewPermission {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
        }
    }
}

/// One permission of a bulk assignment, optionally narrowed by resource type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionAssignment {
    pub permission_id: PermissionId,
    /// Resource type name -> resource IDs
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<ResourceId>>,
}

impl PermissionAssignment {
    pub fn new(permission_id: PermissionId) -> Self {
        Self {
            permission_id,
            resources: BTreeMap::new(),
        }
    }

    pub fn with_resources(
        mut self,
        type_name: impl Into<String>,
        resource_ids: impl IntoIterator<Item = ResourceId>,
    ) -> Self {
        self.resources
            .entry(type_name.into())
            .or_default()
            .extend(resource_ids);
        self
    }
}

/// Users and permissions applied to a group in one transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assignments {
    #[serde(default)]
    pub user_ids: Vec<UserId>,
    #[serde(default)]
    pub permissions: Vec<PermissionAssignment>,
}

impl Assignments {
    pub(crate) fn has_resources(&self) -> bool {
        self.permissions.iter().any(|p| !p.resources.is_empty())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for user_id in &self.user_ids {
            validate_id("user_id", *user_id)?;
        }
        for assignment in &self.permissions {
            validate_id("permission_id", assignment.permission_id)?;
            for (type_name, resource_ids) in &assignment.resources {
                validate_name("resource type", type_name)?;
                for resource_id in resource_ids {
                    validate_id("resource_id", *resource_id)?;
                }
            }
        }
        Ok(())
    }
}

/// What a bulk assignment changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub group: AccessGroup,
    pub users_added: usize,
    pub permissions_added: usize,
    pub grants_added: usize,
    pub users_removed: usize,
    pub permissions_removed: usize,
    pub grants_removed: usize,
}

/// Administrative view of a group's permissions and resource grants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermissionsView {
    pub permissions: Vec<PermissionView>,
}

/// One permission of a [`GroupPermissionsView`]; empty `resources` means unrestricted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionView {
    pub id: PermissionId,
    pub code: String,
    pub name: String,
    pub resources: BTreeMap<String, Vec<ResourceId>>,
}

pub(crate) fn validate_id(field: &str, id: i64) -> Result<()> {
    if id < 1 {
        return Err(AccessError::Validation(format!(
            "{} must be a positive identifier, got {}",
            field, id
        )));
    }
    Ok(())
}

pub(crate) fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AccessError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_from_row() {
        let active = Lookup::from_row(Some(1), |_| false);
        assert_eq!(active, Lookup::Active(1));

        let deleted = Lookup::from_row(Some(1), |_| true);
        assert!(!deleted.is_active());
        assert_eq!(deleted.active(), None);

        let absent: Lookup<i32> = Lookup::from_row(None, |_| false);
        assert_eq!(absent, Lookup::Absent);
    }

    #[test]
    fn test_assignment_validation() {
        let assignments = Assignments {
            user_ids: vec![1, 2],
            permissions: vec![PermissionAssignment::new(5).with_resources("location", [1, 2])],
        };
        assert!(assignments.validate().is_ok());
        assert!(assignments.has_resources());

        let bad = Assignments {
            user_ids: vec![0],
            permissions: vec![],
        };
        assert!(matches!(bad.validate(), Err(AccessError::Validation(_))));

        let blank_type = Assignments {
            user_ids: vec![],
            permissions: vec![PermissionAssignment::new(5).with_resources(" ", [1])],
        };
        assert!(blank_type.validate().is_err());
    }

    #[test]
    fn test_modes_deserialize() {
        let mode: AssignmentMode = serde_json::from_str("\"additive\"").unwrap();
        assert_eq!(mode, AssignmentMode::Additive);
        assert_eq!(DeleteMode::default(), DeleteMode::Soft);
    }
}
