//! Outbound messaging collaborator.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{OutboundMessage, Receipt};

/// Delivers a rendered message to a subscriber. Any `Err` is a delivery
/// failure; callers decide whether it is fatal.
#[async_trait]
pub trait Messenger: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<Receipt>;
}
