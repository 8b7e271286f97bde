//! Run configuration: target list, selector rules, and pipeline knobs.
//!
//! The configuration is the external collaborator that supplies the
//! ordered target list; it is read once at run start and treated as
//! immutable afterwards. Any problem here is fatal: the run aborts
//! before a single target is attempted, and the process exits non-zero
//! so the external scheduler can alert.
//!
//! # Example
//!
//! ```yaml
//! concurrency: 4
//! max_attempts: 3
//! request_timeout_secs: 30
//! targets:
//!   - name: bls-pr
//!     url: "https://download.example.gov/pub/time.series/pr/"
//!     record_selector: "a[href]"
//!     fields:
//!       name: { kind: text, selector: "a" }
//!       href: { kind: attribute, selector: "a", attr: "href" }
//!     identity_fields: [href]
//! ```

use crate::errors::ConfigError;
use crate::models::{FieldRule, Target};
use scraper::Selector;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> usize {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Top-level run configuration, deserialized from YAML.
#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    /// How many targets are processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Total fetch attempt budget per target, including the first call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// The ordered list of sources to sync.
    pub targets: Vec<Target>,
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fail fast on problems a run could only discover mid-flight:
    /// duplicate names, unparseable URLs or selectors, identity fields
    /// that reference nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }

        let mut names = BTreeSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(ConfigError::Invalid("target with empty name".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name `{}`",
                    target.name
                )));
            }
            Url::parse(&target.url).map_err(|e| {
                ConfigError::Invalid(format!("target `{}` has invalid url: {e}", target.name))
            })?;
            check_selector(&target.name, &target.record_selector)?;
            for rule in target.fields.values() {
                check_rule(&target.name, rule)?;
            }
            for identity in &target.identity_fields {
                if !target.fields.contains_key(identity) {
                    return Err(ConfigError::Invalid(format!(
                        "target `{}` lists identity field `{identity}` with no extraction rule",
                        target.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_selector(target: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector).map_err(|e| {
        ConfigError::Invalid(format!(
            "target `{target}` has invalid selector `{selector}`: {e}"
        ))
    })?;
    Ok(())
}

fn check_rule(target: &str, rule: &FieldRule) -> Result<(), ConfigError> {
    match rule {
        FieldRule::Text { selector } | FieldRule::Attribute { selector, .. } => {
            check_selector(target, selector)
        }
        FieldRule::Nested { selector, rule } => {
            check_selector(target, selector)?;
            check_rule(target, rule)
        }
    }
}

/// Load and validate the run configuration from a YAML file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub fn load_config(path: &str) -> Result<SyncConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_string(),
        source: e,
    })?;
    let config: SyncConfig = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        source: e,
    })?;
    config.validate()?;
    info!(
        targets = config.targets.len(),
        concurrency = config.concurrency,
        max_attempts = config.max_attempts,
        "Loaded sync configuration"
    );
    Ok(config)
}
