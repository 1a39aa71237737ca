//! Client side of the category REST backend.
//!
//! - [`transport`] - request executor with timeout and size limits
//! - [`probe`] - capability discovery and the session [`CapabilityRecord`]
//! - [`strategy`] - ordered update fallbacks ([`UpdateChain`])
//! - [`client`] - [`CategoryClient`], the entry point used by views
//!
//! # Example
//!
//! ```ignore
//! use catsync::api::CategoryClient;
//!
//! let client = CategoryClient::from_config(&config)?;
//! let mut category = client.get(3).await?;
//! category.name = "Ebooks".into();
//! let persisted = client.update(&category).await?;
//! ```

mod client;
mod error;
mod probe;
mod strategy;
mod transport;
mod types;

pub use client::CategoryClient;
pub use error::ApiError;
pub use probe::{parse_allow_header, Capability, CapabilityProber, CapabilityRecord, EndpointReport};
pub use strategy::{
    Encoding, Persisted, Target, UpdateChain, UpdateError, UpdateStrategy, DEFAULT_STRATEGIES,
};
pub use transport::{ApiRequest, ApiResponse, RequestBody, Transport};
pub use types::{Category, NewCategory, Verb};
