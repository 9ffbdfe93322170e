//! Collaborator traits. Workflows depend on these, never on concrete backends.

pub mod assets;
pub mod messaging;
pub mod store;

pub use assets::AssetProvider;
pub use messaging::Messenger;
pub use store::{ConfigCache, SeedReport, SubscriberStore};
