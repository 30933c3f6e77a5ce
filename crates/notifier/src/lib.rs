//! Delivery providers.
//!
//! Every vendor implements [`Provider`]; the [`ProviderRegistry`] maps
//! `(channel, name)` to an instance and picks the configured default when no
//! name is given.

pub mod error;
pub mod provider;
pub mod providers;
pub mod registry;

pub use error::ProviderError;
pub use provider::{EmailMessage, OutboundMessage, Provider, SendOptions, SendOutcome, StatusReport};
pub use registry::{ChannelHealth, HealthReport, ProviderRegistry};
