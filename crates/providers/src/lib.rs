//! Generation backend implementations for ragloom.
//!
//! All providers implement the `ragloom_core::Provider` trait.
//! The router selects the correct provider based on configuration, and the
//! registry keeps a refreshable snapshot of the models each one offers.

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod router;
mod transport;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{ListingStatus, ModelRegistry, ProviderModels};
pub use router::{ProviderRouter, build_from_config};
