//! Tenant settings document
//!
//! The tenant ConfigMap carries a JSON object of INI-style sections, each a
//! flat map of string keys to string values:
//!
//! ```json
//! { "database": { "type": "postgres", "host": "db:5432", "name": "t42" } }
//! ```

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Deserialize;

use super::TenantConfigError;

/// Section holding database settings
pub const DATABASE_SECTION: &str = "database";

type Section = BTreeMap<String, String>;

/// Parsed settings document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSettings {
    sections: BTreeMap<String, Section>,
}

impl TenantSettings {
    /// Parse a settings document
    pub fn parse(document: &str) -> Result<Self, TenantConfigError> {
        let sections: BTreeMap<String, Section> = serde_json::from_str(document)
            .map_err(|e| TenantConfigError::Parse(e.to_string()))?;
        Ok(Self { sections })
    }

    /// Extract and parse the settings document stored under `key`
    pub fn from_config_map(config: &ConfigMap, key: &str) -> Result<Self, TenantConfigError> {
        let name = config.metadata.name.clone().unwrap_or_default();
        let document = config
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .ok_or_else(|| TenantConfigError::MissingSettings {
                name,
                key: key.to_string(),
            })?;
        Self::parse(document)
    }

    /// A whole section
    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    /// A single value
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Database settings from the `[database]` section
    pub fn database(&self) -> Result<DatabaseSettings, TenantConfigError> {
        let section = self.section(DATABASE_SECTION).ok_or_else(|| {
            TenantConfigError::Parse(format!("missing [{DATABASE_SECTION}] section"))
        })?;

        let value = serde_json::to_value(section)
            .map_err(|e| TenantConfigError::Parse(e.to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| TenantConfigError::Parse(format!("[{DATABASE_SECTION}]: {e}")))
    }
}

/// Connection settings for a tenant database
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSettings {
    /// Driver: "sqlite3", "mysql" or "postgres"
    #[serde(rename = "type")]
    pub driver: String,
    /// Full connection URL; overrides the individual fields when set
    #[serde(default)]
    pub url: Option<String>,
    /// host[:port]
    #[serde(default)]
    pub host: Option<String>,
    /// Database name
    #[serde(default)]
    pub name: Option<String>,
    /// User name
    #[serde(default)]
    pub user: Option<String>,
    /// Password
    #[serde(default)]
    pub password: Option<String>,
    /// sqlite3 file path
    #[serde(default)]
    pub path: Option<String>,
    /// TLS mode (postgres)
    #[serde(default)]
    pub ssl_mode: Option<String>,
}
