//! Migrator configuration (TOML file) and environment-sourced secrets.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::discourse::DiscourseCredentials;

/// Migrator configuration.
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to the values the original batch ran
/// with. Secrets never live here; they come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigratorConfig {
    /// URL of the step-library spec file that derives the repository list.
    pub steplib_url: String,

    /// Organizations whose repositories are eligible for migration.
    pub orgs: Vec<String>,

    /// Path of the append-only checkpoint log.
    pub checkpoint_log: PathBuf,

    /// Delay between consecutive issues, for upstream rate limits.
    pub delay_ms: u64,

    /// Stop processing a repository's issues once this many completed.
    pub limit: Option<u32>,

    pub discourse: DiscourseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscourseConfig {
    pub base_url: String,
    /// Category that receives migrated topics.
    pub category: u64,
    /// Category URL quoted in the migration comments.
    pub category_url: String,
}

impl Default for DiscourseConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discuss.bitrise.io".to_string(),
            category: 11,
            category_url: "https://discuss.bitrise.io/c/issues/build-issues".to_string(),
        }
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            steplib_url: "https://bitrise-steplib-collection.s3.amazonaws.com/spec.json"
                .to_string(),
            orgs: [
                "bitrise-steplib",
                "bitrise-io",
                "bitrise-core",
                "bitrise-community",
                "bitrise-tools",
                "bitrise-docker",
                "bitrise-samples",
            ]
            .map(str::to_string)
            .to_vec(),
            checkpoint_log: PathBuf::from("data.txt"),
            delay_ms: 1000,
            limit: None,
            discourse: DiscourseConfig::default(),
        }
    }
}

impl MigratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.steplib_url.trim().is_empty() {
            return Err(anyhow!("steplib_url must not be empty"));
        }
        if self.orgs.is_empty() || self.orgs.iter().any(|o| o.trim().is_empty()) {
            return Err(anyhow!("orgs must be a non-empty array of names"));
        }
        if self.checkpoint_log.as_os_str().is_empty() {
            return Err(anyhow!("checkpoint_log must not be empty"));
        }
        if self.limit == Some(0) {
            return Err(anyhow!("limit must be > 0 when set"));
        }
        if self.discourse.base_url.trim().is_empty() {
            return Err(anyhow!("discourse.base_url must not be empty"));
        }
        if self.discourse.category == 0 {
            return Err(anyhow!("discourse.category must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MigratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<MigratorConfig> {
    if !path.exists() {
        let cfg = MigratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MigratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn require_env(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("missing environment variable {name}"))
}

/// GitHub token, required by every mode that talks to the API.
pub fn github_token() -> Result<String> {
    require_env("GITHUB_ACCESS_TOKEN")
}

/// Discourse API credentials, required by live runs only.
pub fn discourse_credentials() -> Result<DiscourseCredentials> {
    Ok(DiscourseCredentials {
        api_key: require_env("DISCOURSE_API_KEY")?,
        api_username: require_env("DISCOURSE_API_USERNAME")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, MigratorConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("migrator.toml");
        fs::write(
            &path,
            "limit = 5\n\n[discourse]\ncategory = 29\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.limit, Some(5));
        assert_eq!(cfg.discourse.category, 29);
        assert_eq!(cfg.delay_ms, 1000);
        assert_eq!(cfg.checkpoint_log, PathBuf::from("data.txt"));
    }

    #[test]
    fn validate_rejects_zero_limit_and_empty_orgs() {
        let mut cfg = MigratorConfig {
            limit: Some(0),
            ..MigratorConfig::default()
        };
        assert!(cfg.validate().is_err());

        cfg.limit = None;
        cfg.orgs.clear();
        assert!(cfg.validate().is_err());
    }
}
