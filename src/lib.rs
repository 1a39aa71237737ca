//! Category sync client.
//!
//! Keeps a locally held category list fresh against a REST backend whose
//! write support is not known in advance:
//! - [`api`]: transport, capability discovery, and the update strategy chain
//! - [`sync`]: the list view task, refresh triggers, and cross-view edits
//! - [`config`]: optional TOML configuration

pub mod api;
pub mod config;
pub mod sync;
pub mod util;
