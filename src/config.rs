//! Configuration types consumed by the core (spec §6, SPEC_FULL §6).
//!
//! Reading the YAML file off disk, resolving `$CHANTAL_CONFIG`, and CLI
//! flag handling are an external collaborator's job per spec §1 — this
//! module only defines the shapes and a pure `parse` entry point over
//! already-read bytes, the way `config::datastore::config()` in the
//! teacher hands back a `SectionConfigData` for callers to act on.

use serde::Deserialize;

use crate::error::{ChantalError, Result};
use crate::family::Family;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub gc: GcConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub family: Family,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub sync: SyncOptions,

    #[serde(default)]
    pub gpg_keys: Vec<String>,
    #[serde(default)]
    pub entitlement_cert: Option<String>,
    #[serde(default)]
    pub entitlement_key: Option<String>,

    #[serde(default)]
    pub suites: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    Basic { username: String, password: String },
    Bearer { token: String },
    Entitlement { cert: String, key: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncOptions {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retries: default_retries(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_retries() -> u32 {
    5
}
fn default_timeout_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcConfig {
    #[serde(default)]
    pub keep_last: Option<u64>,
    #[serde(default)]
    pub keep_newer_than_days: Option<u64>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            keep_last: None,
            keep_newer_than_days: None,
        }
    }
}

/// Parse an already-read YAML document into a `GlobalConfig`.
///
/// This is the core's only configuration entry point; locating the file
/// is the CLI's responsibility (spec §1).
pub fn parse(yaml: &str) -> Result<GlobalConfig> {
    serde_yaml::from_str(yaml).map_err(|err| ChantalError::Config(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_repository() {
        let yaml = r#"
repositories:
  - name: epel9
    family: rpm
    url: https://example.org/epel/9/
"#;
        let config = parse(yaml).unwrap();
        assert_eq!(config.repositories.len(), 1);
        let repo = &config.repositories[0];
        assert_eq!(repo.name, "epel9");
        assert!(repo.enabled);
        assert_eq!(repo.sync.concurrency, 4);
    }

    #[test]
    fn rejects_malformed_yaml() {
        let yaml = "repositories: [";
        assert!(parse(yaml).is_err());
    }

    #[test]
    fn parses_basic_auth() {
        let yaml = r#"
repositories:
  - name: internal
    family: deb
    url: https://example.org/debian/
    auth:
      type: basic
      username: alice
      password: hunter2
"#;
        let config = parse(yaml).unwrap();
        match config.repositories[0].auth.as_ref().unwrap() {
            AuthConfig::Basic { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "hunter2");
            }
            _ => panic!("expected basic auth"),
        }
    }
}
