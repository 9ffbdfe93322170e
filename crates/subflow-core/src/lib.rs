//! # Subflow Core
//!
//! Shared building blocks for the subscriber lifecycle engine: configuration,
//! the error taxonomy, the subscriber data model and the collaborator traits
//! (storage, outbound messaging, content assets) the workflows are written
//! against.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SubflowConfig;
pub use error::{Result, SubflowError};
pub use traits::{AssetProvider, ConfigCache, Messenger, SubscriberStore};
pub use types::{
    Asset, Fields, LifecycleEvent, MessageLog, OutboundMessage, Receipt, SegmentRule, Subscriber,
    TierDefinition,
};
