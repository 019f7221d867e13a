//! Loading ServiceEntry manifests from multi-document YAML

use anyhow::{Context, Result};
use registry_api::{ConfigRecord, ServiceEntry};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Read and parse a manifest file
pub async fn load_service_entries(path: &Path, default_namespace: &str) -> Result<Vec<ConfigRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_service_entries(&text, default_namespace)
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Parse every ServiceEntry document in `text`. Empty documents and
/// documents of other kinds are skipped.
pub fn parse_service_entries(text: &str, default_namespace: &str) -> Result<Vec<ConfigRecord>> {
    let mut records = Vec::new();

    for (i, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {} is not valid YAML", i))?;
        if value.is_null() {
            continue;
        }

        let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
        if kind != "ServiceEntry" {
            warn!("Skipping document {} of kind {:?}", i, kind);
            continue;
        }

        let mut entry: ServiceEntry = serde_yaml::from_value(value)
            .with_context(|| format!("document {} is not a valid ServiceEntry", i))?;
        if entry.metadata.namespace.is_none() {
            entry.metadata.namespace = Some(default_namespace.to_string());
        }
        records.push(ConfigRecord::from(entry));
    }

    Ok(records)
}
