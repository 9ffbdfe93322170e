//! Content asset provider collaborator.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Asset;

/// Generates content assets that may be attached to outbound messages.
/// Best-effort: callers never block a send on it.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    /// Kick off generation for a prompt set. Returns the provider's job result.
    async fn trigger_generation(&self, prompt_set: &str) -> Result<serde_json::Value>;

    /// Most recently generated asset, if any.
    async fn latest_asset(&self) -> Result<Option<Asset>>;
}
