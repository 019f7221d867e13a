//! Daemon configuration from environment variables

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const MANIFESTS_VAR: &str = "REGISTRY_MANIFESTS";
pub const RESYNC_SECONDS_VAR: &str = "REGISTRY_RESYNC_SECONDS";
pub const DEFAULT_NAMESPACE_VAR: &str = "REGISTRY_DEFAULT_NAMESPACE";

#[derive(Clone, Debug, PartialEq)]
pub struct DaemonConfig {
    /// YAML file holding ServiceEntry manifests
    pub manifest_path: PathBuf,
    /// Interval between manifest reloads
    pub resync_interval: Duration,
    /// Namespace for manifests that do not set one
    pub default_namespace: String,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let manifest_path = lookup(MANIFESTS_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("service-entries.yaml"));

        let resync_seconds = match lookup(RESYNC_SECONDS_VAR) {
            Some(value) => value
                .parse::<u64>()
                .with_context(|| format!("{} must be a number of seconds, got {:?}", RESYNC_SECONDS_VAR, value))?,
            None => 30,
        };
        if resync_seconds == 0 {
            bail!("{} must be greater than zero", RESYNC_SECONDS_VAR);
        }

        let default_namespace = lookup(DEFAULT_NAMESPACE_VAR)
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            manifest_path,
            resync_interval: Duration::from_secs(resync_seconds),
            default_namespace,
        })
    }
}
