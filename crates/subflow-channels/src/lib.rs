//! # Subflow Channels
//! Outbound delivery and content assets.
//!
//! - [`LogMessenger`]: writes messages to the log (dry runs, local dev).
//! - [`WebhookMessenger`]: POSTs messages to an HTTP delivery service.
//! - [`ManifestAssetProvider`]: asset generation endpoint + CSV manifest.

pub mod assets;
pub mod log;
pub mod webhook;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;

use subflow_core::config::{AssetsConfig, MessagingConfig};
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::{AssetProvider, Messenger};

pub use assets::ManifestAssetProvider;
pub use log::LogMessenger;
pub use webhook::WebhookMessenger;

/// Build the messenger named by `config.kind` ("log" or "webhook").
pub fn build_messenger(config: &MessagingConfig) -> Result<Arc<dyn Messenger>> {
    match config.kind.as_str() {
        "log" => Ok(Arc::new(LogMessenger::new())),
        "webhook" => Ok(Arc::new(WebhookMessenger::new(
            &config.webhook_url,
            config.timeout_secs,
        ))),
        other => Err(SubflowError::Config(format!(
            "Unknown messaging kind '{other}' (expected 'log' or 'webhook')"
        ))),
    }
}

/// Asset provider from config; `resolve` expands the manifest path.
pub fn build_asset_provider(
    config: &AssetsConfig,
    timeout_secs: u64,
    resolve: impl Fn(&str) -> PathBuf,
) -> Arc<dyn AssetProvider> {
    Arc::new(ManifestAssetProvider::new(
        &config.generate_url,
        &config.prompt_file,
        &resolve(&config.manifest_path),
        timeout_secs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messenger_by_kind() {
        let mut config = MessagingConfig::default();
        assert_eq!(build_messenger(&config).unwrap().name(), "log");
        config.kind = "webhook".into();
        assert_eq!(build_messenger(&config).unwrap().name(), "webhook");
        config.kind = "carrier-pigeon".into();
        assert!(build_messenger(&config).err().unwrap().is_configuration());
    }
}
