//! Configuration
//!
//! Connection details come from `CATALOG_*` environment variables (a `.env`
//! file is honoured) and may be overridden or completed by a TOML file that
//! also carries cache tuning and identity mappings.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CacheSettings;
use crate::error::{CatalogError, Result};
use crate::mapping::{MappingRule, MappingSet};
use crate::tree::quality::ProjectMapping;

const DEFAULT_BATCH: usize = 100;

/// Everything needed to open a session against one catalog environment
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Domain tier host name
    pub host: String,

    pub port: u16,

    pub user: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// PEM certificate to trust for TLS verification
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Page size for searches
    #[serde(default = "default_batch")]
    pub batch: usize,
}

fn default_batch() -> usize {
    DEFAULT_BATCH
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("cert", &self.cert)
            .field("batch", &self.batch)
            .finish()
    }
}

impl ConnectionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        ConnectionSection::from_env().complete()
    }

    /// Root of the REST API, always ending in `/`
    pub fn base_url(&self) -> Result<Url> {
        let raw = format!("https://{}:{}/ibm/iis/igc-rest/v1/", self.host, self.port);
        Url::parse(&raw).map_err(|e| CatalogError::Config(format!("bad catalog address {}: {}", raw, e)))
    }
}

/// Connection settings where every field may still be missing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub cert: Option<PathBuf>,
    pub batch: Option<usize>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ConnectionSection {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            host: env_var("CATALOG_HOST"),
            port: env_var("CATALOG_PORT").and_then(|p| p.parse().ok()),
            user: env_var("CATALOG_USER"),
            password: env_var("CATALOG_PASSWORD"),
            cert: env_var("CATALOG_CERT").map(PathBuf::from),
            batch: env_var("CATALOG_BATCH").and_then(|b| b.parse().ok()),
        }
    }

    /// Fields set on `other` win
    pub fn overlay(self, other: ConnectionSection) -> Self {
        Self {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            cert: other.cert.or(self.cert),
            batch: other.batch.or(self.batch),
        }
    }

    pub fn complete(self) -> Result<ConnectionConfig> {
        let missing = |name: &str| CatalogError::Config(format!("{} not set", name));
        Ok(ConnectionConfig {
            host: self.host.ok_or_else(|| missing("CATALOG_HOST"))?,
            port: self.port.ok_or_else(|| missing("CATALOG_PORT"))?,
            user: self.user.ok_or_else(|| missing("CATALOG_USER"))?,
            password: self.password.ok_or_else(|| missing("CATALOG_PASSWORD"))?,
            cert: self.cert,
            batch: self.batch.unwrap_or(DEFAULT_BATCH),
        })
    }
}

/// Contents of a promotion configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromoteConfig {
    pub connection: ConnectionSection,
    pub cache: CacheSettings,
    pub mappings: Vec<MappingRule>,
    /// Data source rewrites applied when loading a quality project
    pub project_mappings: Vec<ProjectMapping>,
}

impl PromoteConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// File settings completed by the environment; environment values win
    pub fn connection(&self) -> Result<ConnectionConfig> {
        self.connection
            .clone()
            .overlay(ConnectionSection::from_env())
            .complete()
    }

    pub fn mapping_set(&self) -> Result<MappingSet> {
        MappingSet::compile(&self.mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[connection]
host = "infosvr.example.com"
port = 9446
user = "isadmin"
password = "secret"

[cache]
threshold = 3

[[mappings]]
type = "host"
property = "name"
from = "DEV"
to = "PROD"

[[project_mappings]]
type = "DataSource"
attr = "host"
from = "DEVHOST"
to = "PRODHOST"
"#;

    #[test]
    fn test_parse_file() {
        let config = PromoteConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.cache.threshold, 3);
        assert_eq!(config.cache.page_size, 100);
        assert_eq!(config.mappings.len(), 1);
        assert_eq!(config.mapping_set().unwrap().len(), 1);
        assert_eq!(config.project_mappings[0].to, "PRODHOST");

        let connection = config.connection.clone().complete().unwrap();
        assert_eq!(connection.batch, 100);
        assert_eq!(
            connection.base_url().unwrap().as_str(),
            "https://infosvr.example.com:9446/ibm/iis/igc-rest/v1/"
        );
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let err = ConnectionSection::default().complete().unwrap_err();
        assert!(err.to_string().contains("CATALOG_HOST"));
    }

    #[test]
    fn test_overlay_prefers_later_values() {
        let file = ConnectionSection {
            host: Some("a".into()),
            port: Some(1),
            ..Default::default()
        };
        let env = ConnectionSection {
            host: Some("b".into()),
            ..Default::default()
        };
        let merged = file.overlay(env);
        assert_eq!(merged.host.as_deref(), Some("b"));
        assert_eq!(merged.port, Some(1));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = PromoteConfig::parse(SAMPLE).unwrap().connection.complete().unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
