//! Access-control configuration loading and validation

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AccessError, Result};
use crate::matcher::RouteMatcher;

/// Route pattern -> HTTP method -> permissions (any one suffices)
///
/// Declaration order is preserved; the first matching rule wins.
pub type RouteAccess = IndexMap<String, IndexMap<String, Vec<String>>>;

/// Complete access-control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Claim holding the user ID in verified tokens
    #[serde(default = "default_user_id_key")]
    pub user_id_key: String,

    #[serde(default)]
    pub cache: CacheMode,

    #[serde(default)]
    pub cache_config: CacheSection,

    #[serde(default)]
    pub logging: LoggingMode,

    #[serde(default)]
    pub resource_level_permissions: bool,

    #[serde(default)]
    pub jwt: Option<JwtSection>,

    #[serde(default)]
    pub database: Option<DatabaseSection>,

    #[serde(default)]
    pub route_access: RouteAccess,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    InMemory,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingMode {
    /// Human-readable output
    #[default]
    Console,
    /// One JSON object per line
    Json,
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwtSection {
    /// HS256 shared secret
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Externally owned table holding user IDs
    #[serde(default = "default_users_table")]
    pub users_table: String,
    #[serde(default = "default_users_id_column")]
    pub users_id_column: String,
}

// Default value functions
fn default_user_id_key() -> String { "userId".to_string() }
fn default_ttl_secs() -> u64 { 300 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_max_connections() -> u32 { 10 }
fn default_users_table() -> String { "users".to_string() }
fn default_users_id_column() -> String { "id".to_string() }

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            user_id_key: default_user_id_key(),
            cache: CacheMode::default(),
            cache_config: CacheSection::default(),
            logging: LoggingMode::default(),
            resource_level_permissions: false,
            jwt: None,
            database: None,
            route_access: RouteAccess::new(),
        }
    }
}

impl AccessConfig {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AccessError::Config(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json(&contents)?
        } else {
            Self::from_toml(&contents)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AccessError::Config(format!("Failed to parse configuration: {}", e)))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| AccessError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.user_id_key.trim().is_empty() {
            return Err(AccessError::Config("user_id_key must not be empty".into()));
        }

        if self.cache == CacheMode::InMemory && self.cache_config.sweep_interval_secs == 0 {
            return Err(AccessError::Config(
                "cache_config.sweep_interval_secs must be positive".into(),
            ));
        }

        if let Some(jwt) = &self.jwt {
            if jwt.secret.is_empty() {
                return Err(AccessError::Config("jwt.secret must not be empty".into()));
            }
        }

        if let Some(database) = &self.database {
            if database.max_connections == 0 {
                return Err(AccessError::Config(
                    "database.max_connections must be positive".into(),
                ));
            }
        }

        RouteMatcher::from_config(&self.route_access)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
user_id_key = "sub"
cache = "in-memory"
logging = "disabled"
resource_level_permissions = true

[cache_config]
ttl_secs = 120

[jwt]
secret = "change-me"

[route_access."/api/users/me"]
GET = ["read:self"]

[route_access."/api/users/:id"]
GET = ["read:users", "update:users"]
DELETE = ["delete:users"]
"#;

    #[test]
    fn test_parse_toml() {
        let config = AccessConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.user_id_key, "sub");
        assert_eq!(config.logging, LoggingMode::Disabled);
        assert_eq!(config.cache_config.ttl(), Duration::from_secs(120));
        assert_eq!(config.cache_config.sweep_interval_secs, 60);
        assert!(config.resource_level_permissions);

        let patterns: Vec<&String> = config.route_access.keys().collect();
        assert_eq!(patterns, ["/api/users/me", "/api/users/:id"]);
        assert_eq!(config.route_access["/api/users/:id"]["DELETE"], ["delete:users"]);
    }

    #[test]
    fn test_defaults() {
        let config = AccessConfig::from_toml("").unwrap();
        assert_eq!(config.user_id_key, "userId");
        assert_eq!(config.cache, CacheMode::InMemory);
        assert!(!config.resource_level_permissions);
        assert!(config.route_access.is_empty());
    }

    #[test]
    fn test_invalid_route_pattern_rejected() {
        let config = AccessConfig::from_toml(
            r#"
[route_access."api/no-slash"]
GET = ["x"]
"#,
        )
        .unwrap();
        assert_eq!(config.validate().unwrap_err().kind(), "config");
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"cache": "disabled", "route_access": {{"/api/items": {{"GET": ["read:items"]}}}}}}"#
        )
        .unwrap();

        let config = AccessConfig::load(file.path()).unwrap();
        assert_eq!(config.cache, CacheMode::Disabled);
        assert_eq!(config.route_access["/api/items"]["GET"], ["read:items"]);
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/warden.toml");
        let config = AccessConfig::load(path).unwrap();

        assert!(config.database.is_some());
        assert_eq!(config.route_access.keys().next().unwrap(), "/api/v1/me");
        assert_eq!(
            config.route_access["/api/v1/groups"]["GET"],
            ["manage:access", "view:groups"]
        );
    }

    #[test]
    fn test_missing_file() {
        let err = AccessConfig::load("/nonexistent/warden.toml").unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
