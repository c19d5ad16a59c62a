//! Shared configuration, error types, and domain types for Parley.
//!
//! Every other crate in the workspace depends on this one. Backend traits
//! live next to the gateways that call them; the values those backends
//! exchange live here.

pub mod config;
pub mod error;
pub mod types;

pub use config::ParleyConfig;
pub use error::{BackendError, ParleyError, Result};
pub use types::*;
