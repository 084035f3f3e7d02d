//! Administrative subcommands

use anyhow::{anyhow, Context as _, Result};
use clap::{Args, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use warden_authz::{
    AccessGroupAdmin, AssignmentMode, Assignments, DeleteMode, EntityStore, GroupUpdate,
    NewAccessGroup, NewPermission, NoopCache, PermissionCache, PermissionResolver,
    ResourcePermissionResolver,
};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage access groups
    #[command(subcommand)]
    Group(GroupCommand),

    /// Manage permissions
    #[command(subcommand)]
    Permission(PermissionCommand),

    /// Link a permission to a group
    Assign(LinkArgs),

    /// Unlink a permission from a group and drop the group's grants for it
    Unassign(LinkArgs),

    /// Manage group membership
    #[command(subcommand)]
    Member(MemberCommand),

    /// Manage resource-level permissions
    #[command(subcommand)]
    Resource(ResourceCommand),

    /// Print the effective permission codes of a user
    Resolve {
        #[arg(long)]
        user: i64,
    },

    /// Apply pending database migrations
    Migrate,
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        #[arg(long)]
        id: i64,
        /// Remove the row instead of marking it deleted
        #[arg(long)]
        hard: bool,
    },
    Get {
        #[arg(long, conflicts_with = "name", required_unless_present = "name")]
        id: Option<i64>,
        #[arg(long)]
        name: Option<String>,
    },
    /// List the members of a group
    Members {
        #[arg(long)]
        id: i64,
    },
    /// Create a group with users, permissions and grants from a JSON file
    BulkCreate {
        #[arg(long)]
        file: PathBuf,
    },
    /// Update a group and its assignments from a JSON file
    BulkUpdate {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        file: PathBuf,
        /// Keep existing assignments and only add what is missing
        #[arg(long)]
        additive: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PermissionCommand {
    Create {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Get {
        #[arg(long, conflicts_with = "code", required_unless_present = "code")]
        id: Option<i64>,
        #[arg(long)]
        code: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    #[arg(long)]
    pub group: i64,
    #[arg(long)]
    pub permission: i64,
}

#[derive(Subcommand, Debug)]
pub enum MemberCommand {
    Add {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        user: i64,
    },
    Remove {
        #[arg(long)]
        group: i64,
        #[arg(long)]
        user: i64,
    },
}

#[derive(Args, Debug)]
pub struct GrantArgs {
    #[arg(long)]
    pub group: i64,
    #[arg(long)]
    pub permission: i64,
    #[arg(long = "type")]
    pub resource_type: String,
    /// Comma-separated resource IDs
    #[arg(long, value_delimiter = ',', required = true)]
    pub ids: Vec<i64>,
}

#[derive(Subcommand, Debug)]
pub enum ResourceCommand {
    /// Declare that a permission is scoped to a resource type
    Declare {
        #[arg(long)]
        permission: i64,
        #[arg(long = "type")]
        resource_type: String,
    },
    /// Remove a resource type declaration together with its grants
    RevokeType {
        #[arg(long)]
        permission: i64,
        #[arg(long = "type")]
        resource_type: String,
    },
    Grant(GrantArgs),
    Revoke(GrantArgs),
    /// Show a group's permissions with their resource restrictions
    View {
        #[arg(long)]
        group: i64,
        #[arg(long = "type")]
        resource_type: Option<String>,
        #[arg(long)]
        permission: Option<i64>,
    },
    /// Check whether a user may act on every listed resource
    Check {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        permission: i64,
        #[arg(long = "type")]
        resource_type: String,
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
    },
}

/// Contents of a `bulk-create` / `bulk-update` file
#[derive(Debug, Deserialize)]
pub struct BulkFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub assignments: Assignments,
}

impl BulkFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Components the commands run against
///
/// A command-line process holds no long-lived cache, so reads go straight to
/// the store; a running server picks up changes once its entries expire.
pub struct Context {
    admin: AccessGroupAdmin,
    resolver: PermissionResolver,
    resources: Option<ResourcePermissionResolver>,
}

impl Context {
    pub fn new(store: Arc<dyn EntityStore>, resource_level_permissions: bool) -> Self {
        let cache: Arc<dyn PermissionCache> = Arc::new(NoopCache);
        let resolver = PermissionResolver::new(store.clone(), cache.clone());
        let resources = resource_level_permissions.then(|| {
            ResourcePermissionResolver::new(store.clone(), cache.clone(), resolver.clone())
        });
        Self {
            admin: AccessGroupAdmin::new(store, cache, resource_level_permissions),
            resolver,
            resources,
        }
    }

    fn resources(&self) -> Result<&ResourcePermissionResolver> {
        self.resources.as_ref().ok_or_else(|| {
            anyhow!("resource-level permissions are disabled; set resource_level_permissions = true")
        })
    }
}

/// Run one command and return its JSON output
pub async fn execute(ctx: &Context, command: Command) -> Result<Value> {
    match command {
        Command::Group(command) => group(ctx, command).await,
        Command::Permission(command) => permission(ctx, command).await,
        Command::Assign(link) => {
            let changed = ctx
                .admin
                .assign_permission(link.group, link.permission)
                .await?;
            Ok(json!({ "changed": changed }))
        }
        Command::Unassign(link) => {
            let changed = ctx
                .admin
                .unassign_permission(link.group, link.permission)
                .await?;
            Ok(json!({ "changed": changed }))
        }
        Command::Member(MemberCommand::Add { group, user }) => {
            let changed = ctx.admin.add_user(group, user).await?;
            Ok(json!({ "changed": changed }))
        }
        Command::Member(MemberCommand::Remove { group, user }) => {
            let changed = ctx.admin.remove_user(group, user).await?;
            Ok(json!({ "changed": changed }))
        }
        Command::Resource(command) => resource(ctx, command).await,
        Command::Resolve { user } => {
            let permissions = ctx.resolver.resolve(user).await?;
            Ok(json!({ "user_id": user, "permissions": permissions }))
        }
        // Needs the store before schema verification; handled by the caller
        Command::Migrate => Err(anyhow!("migrate runs before the context is built")),
    }
}

async fn group(ctx: &Context, command: GroupCommand) -> Result<Value> {
    let value = match command {
        GroupCommand::Create { name, description } => {
            let group = ctx
                .admin
                .create_group(NewAccessGroup { name, description })
                .await?;
            serde_json::to_value(group)?
        }
        GroupCommand::Update {
            id,
            name,
            description,
        } => {
            let group = ctx
                .admin
                .update_group(id, GroupUpdate { name, description })
                .await?;
            serde_json::to_value(group)?
        }
        GroupCommand::Delete { id, hard } => {
            let mode = if hard { DeleteMode::Hard } else { DeleteMode::Soft };
            ctx.admin.delete_group(id, mode).await?;
            json!({ "deleted": id, "mode": mode })
        }
        GroupCommand::Get { id, name } => {
            let group = match (id, name) {
                (Some(id), _) => ctx.admin.get_group(id).await?,
                (None, Some(name)) => ctx.admin.get_group_by_name(&name).await?,
                (None, None) => return Err(anyhow!("either --id or --name is required")),
            };
            let group = group.ok_or_else(|| anyhow!("access group not found"))?;
            serde_json::to_value(group)?
        }
        GroupCommand::Members { id } => {
            let user_ids = ctx.admin.group_members(id).await?;
            json!({ "group_id": id, "user_ids": user_ids })
        }
        GroupCommand::BulkCreate { file } => {
            let bulk = BulkFile::load(&file)?;
            let name = bulk
                .name
                .ok_or_else(|| anyhow!("{} has no \"name\"", file.display()))?;
            let summary = ctx
                .admin
                .create_with_assignments(
                    NewAccessGroup {
                        name,
                        description: bulk.description,
                    },
                    bulk.assignments,
                )
                .await?;
            serde_json::to_value(summary)?
        }
        GroupCommand::BulkUpdate { id, file, additive } => {
            let bulk = BulkFile::load(&file)?;
            let mode = if additive {
                AssignmentMode::Additive
            } else {
                AssignmentMode::Replace
            };
            let summary = ctx
                .admin
                .update_with_assignments(
                    id,
                    GroupUpdate {
                        name: bulk.name,
                        description: bulk.description,
                    },
                    bulk.assignments,
                    mode,
                )
                .await?;
            serde_json::to_value(summary)?
        }
    };
    Ok(value)
}

async fn permission(ctx: &Context, command: PermissionCommand) -> Result<Value> {
    let permission = match command {
        PermissionCommand::Create {
            code,
            name,
            description,
        } => Some(
            ctx.admin
                .create_permission(NewPermission {
                    code,
                    name,
                    description,
                })
                .await?,
        ),
        PermissionCommand::Get { id, code } => match (id, code) {
            (Some(id), _) => ctx.admin.get_permission(id).await?,
            (None, Some(code)) => ctx.admin.get_permission_by_code(&code).await?,
            (None, None) => return Err(anyhow!("either --id or --code is required")),
        },
    };
    let permission = permission.ok_or_else(|| anyhow!("permission not found"))?;
    Ok(serde_json::to_value(permission)?)
}

async fn resource(ctx: &Context, command: ResourceCommand) -> Result<Value> {
    let resources = ctx.resources()?;
    let value = match command {
        ResourceCommand::Declare {
            permission,
            resource_type,
        } => serde_json::to_value(
            resources
                .declare_resource_type(permission, &resource_type)
                .await?,
        )?,
        ResourceCommand::RevokeType {
            permission,
            resource_type,
        } => {
            let changed = resources
                .revoke_resource_type(permission, &resource_type)
                .await?;
            json!({ "changed": changed })
        }
        ResourceCommand::Grant(args) => {
            let grants = resources
                .grant(args.permission, &args.ids, &args.resource_type, args.group)
                .await?;
            json!({ "grants": grants })
        }
        ResourceCommand::Revoke(args) => {
            let removed = resources
                .revoke(args.permission, &args.ids, &args.resource_type, args.group)
                .await?;
            json!({ "removed": removed })
        }
        ResourceCommand::View {
            group,
            resource_type,
            permission,
        } => serde_json::to_value(
            resources
                .group_permissions_view(group, resource_type.as_deref(), permission)
                .await?,
        )?,
        ResourceCommand::Check {
            user,
            permission,
            resource_type,
            ids,
        } => {
            let allowed = resources
                .has_access(&resource_type, permission, &ids, user)
                .await?;
            json!({ "allowed": allowed })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use warden_authz::store::InMemoryEntityStore;

    async fn context(resource_level_permissions: bool) -> Context {
        let store = InMemoryEntityStore::new();
        store.register_users([1, 2]).await;
        Context::new(Arc::new(store), resource_level_permissions)
    }

    async fn create_permission(ctx: &Context, code: &str) -> i64 {
        let value = execute(
            ctx,
            Command::Permission(PermissionCommand::Create {
                code: code.to_string(),
                name: code.to_string(),
                description: None,
            }),
        )
        .await
        .unwrap();
        value["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_group_and_member_commands() {
        let ctx = context(false).await;

        let group = execute(
            &ctx,
            Command::Group(GroupCommand::Create {
                name: "Editors".to_string(),
                description: None,
            }),
        )
        .await
        .unwrap();
        let group_id = group["id"].as_i64().unwrap();
        let permission_id = create_permission(&ctx, "edit:content").await;

        let assigned = execute(
            &ctx,
            Command::Assign(LinkArgs {
                group: group_id,
                permission: permission_id,
            }),
        )
        .await
        .unwrap();
        assert_eq!(assigned["changed"], true);

        execute(
            &ctx,
            Command::Member(MemberCommand::Add {
                group: group_id,
                user: 1,
            }),
        )
        .await
        .unwrap();

        let resolved = execute(&ctx, Command::Resolve { user: 1 }).await.unwrap();
        assert_eq!(resolved["permissions"], json!(["edit:content"]));

        let found = execute(
            &ctx,
            Command::Group(GroupCommand::Get {
                id: None,
                name: Some("Editors".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(found["id"], group_id);
    }

    #[tokio::test]
    async fn test_bulk_create_from_file() {
        let ctx = context(true).await;
        let permission_id = create_permission(&ctx, "read:observations").await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "name": "Observers",
                "user_ids": [2],
                "permissions": [
                    {{ "permission_id": {}, "resources": {{ "location": [1, 2] }} }}
                ]
            }}"#,
            permission_id
        )
        .unwrap();

        let summary = execute(
            &ctx,
            Command::Group(GroupCommand::BulkCreate {
                file: file.path().to_path_buf(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(summary["users_added"], 1);
        assert_eq!(summary["grants_added"], 2);

        let check = execute(
            &ctx,
            Command::Resource(ResourceCommand::Check {
                user: 2,
                permission: permission_id,
                resource_type: "location".to_string(),
                ids: vec![1, 2],
            }),
        )
        .await
        .unwrap();
        assert_eq!(check["allowed"], true);
    }

    #[tokio::test]
    async fn test_resource_commands_need_feature_flag() {
        let ctx = context(false).await;

        let err = execute(
            &ctx,
            Command::Resource(ResourceCommand::Declare {
                permission: 1,
                resource_type: "location".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_unknown_group_fails() {
        let ctx = context(false).await;

        let err = execute(
            &ctx,
            Command::Member(MemberCommand::Add { group: 42, user: 1 }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
