//! Content asset provider: an HTTP generation endpoint plus a CSV manifest
//! the generator appends to. The last manifest row is the newest asset.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::AssetProvider;
use subflow_core::types::Asset;

pub struct ManifestAssetProvider {
    generate_url: String,
    default_prompt_file: String,
    manifest_path: PathBuf,
    timeout: Duration,
    client: reqwest::Client,
}

impl ManifestAssetProvider {
    pub fn new(
        generate_url: &str,
        default_prompt_file: &str,
        manifest_path: &Path,
        timeout_secs: u64,
    ) -> Self {
        Self {
            generate_url: generate_url.to_string(),
            default_prompt_file: default_prompt_file.to_string(),
            manifest_path: manifest_path.to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }
}

/// Last data row of a header + rows CSV, keyed by header. Plain
/// comma-separated values only; quoting is not interpreted.
fn last_manifest_row(content: &str) -> Option<BTreeMap<String, String>> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<&str> = lines.next()?.split(',').map(str::trim).collect();
    let last = lines.last()?;
    Some(
        header
            .iter()
            .zip(last.split(',').map(str::trim))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

#[async_trait]
impl AssetProvider for ManifestAssetProvider {
    async fn trigger_generation(&self, prompt_set: &str) -> Result<Value> {
        let prompt_file = if prompt_set.is_empty() {
            self.default_prompt_file.as_str()
        } else {
            prompt_set
        };
        tracing::info!("🎨 Requesting asset generation for {prompt_file}");
        let resp = self
            .client
            .post(&self.generate_url)
            .json(&serde_json::json!({ "prompt_file": prompt_file }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SubflowError::Delivery(format!("Asset generation request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubflowError::Delivery(format!(
                "Asset generation error {status}: {body}"
            )));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| SubflowError::Delivery(format!("Asset generation response: {e}")))
    }

    async fn latest_asset(&self) -> Result<Option<Asset>> {
        if !self.manifest_path.exists() {
            tracing::debug!("No asset manifest at {}", self.manifest_path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.manifest_path)?;
        Ok(last_manifest_row(&content).map(|mut row| Asset {
            image_path: row.remove("image_path").filter(|p| !p.is_empty()),
            extra: row,
        }))
    }
}
