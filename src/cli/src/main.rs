//! Warden administrative command line
//!
//! Thin commands over the access-group administrator and resolvers, run
//! against the PostgreSQL store named in the configuration file. Results are
//! printed as pretty JSON on stdout; errors go to stderr with exit code 1.
//!
//! ```bash
//! warden --config config/warden.toml migrate
//! warden --config config/warden.toml group create --name Editors
//! warden --config config/warden.toml resource grant --group 1 --permission 3 --type location --ids 1,2
//! warden --config config/warden.toml resolve --user 7
//! ```

mod commands;

use anyhow::{Context as _, Result};
use clap::Parser;
use commands::{Command, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use warden_authz::logging::init_logging_to;
use warden_authz::store::PostgresEntityStore;
use warden_authz::{AccessConfig, EntityStore};

/// Administer access groups, permissions and resource grants
#[derive(Parser, Debug)]
#[command(name = "warden", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON by extension)
    #[arg(short = 'c', long, env = "WARDEN_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<String> {
    let path = cli
        .config
        .context("--config (or WARDEN_CONFIG) is required")?;
    let config = AccessConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    // stderr keeps stdout valid JSON
    init_logging_to(config.logging, "warn", std::io::stderr)?;

    let database = config
        .database
        .as_ref()
        .context("the configuration has no [database] section")?;
    let store = PostgresEntityStore::new(&database.url, database.max_connections)
        .await?
        .with_users_table(&database.users_table, &database.users_id_column)?;

    if matches!(cli.command, Command::Migrate) {
        store.run_migrations().await?;
        info!("Migrations applied");
        return Ok(serde_json::to_string_pretty(
            &serde_json::json!({ "migrated": true }),
        )?);
    }

    store
        .verify_schema(config.resource_level_permissions)
        .await
        .context("Schema check failed; run `warden migrate` first")?;

    let ctx = Context::new(Arc::new(store), config.resource_level_permissions);
    let output = commands::execute(&ctx, cli.command).await?;
    Ok(serde_json::to_string_pretty(&output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::{GroupCommand, ResourceCommand};

    #[test]
    fn test_group_create_parsing() {
        let cli = Cli::parse_from([
            "warden",
            "--config",
            "warden.toml",
            "group",
            "create",
            "--name",
            "Editors",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("warden.toml")));
        match cli.command {
            Command::Group(GroupCommand::Create { name, description }) => {
                assert_eq!(name, "Editors");
                assert!(description.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_grant_parsing() {
        let cli = Cli::parse_from([
            "warden",
            "resource",
            "grant",
            "--group",
            "1",
            "--permission",
            "3",
            "--type",
            "location",
            "--ids",
            "1,2,5",
            "-c",
            "warden.toml",
        ]);

        match cli.command {
            Command::Resource(ResourceCommand::Grant(args)) => {
                assert_eq!(args.group, 1);
                assert_eq!(args.resource_type, "location");
                assert_eq!(args.ids, vec![1, 2, 5]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_get_requires_a_key() {
        let result = Cli::try_parse_from(["warden", "group", "get"]);
        assert!(result.is_err());

        let result = Cli::try_parse_from(["warden", "group", "get", "--id", "1", "--name", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bulk_update_flags() {
        let cli = Cli::parse_from([
            "warden",
            "group",
            "bulk-update",
            "--id",
            "4",
            "--file",
            "group.json",
            "--additive",
        ]);

        match cli.command {
            Command::Group(GroupCommand::BulkUpdate { id, additive, .. }) => {
                assert_eq!(id, 4);
                assert!(additive);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
