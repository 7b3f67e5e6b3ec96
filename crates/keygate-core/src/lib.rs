//! Keygate Core
//!
//! Shared vocabulary for the credential broker: the error taxonomy, the
//! configuration file model, and the credential/cache record types. This
//! crate has minimal dependencies; everything protocol-facing lives in the
//! sibling crates.

pub mod config;
pub mod credential;
pub mod error;
pub mod provider;

pub use config::{BrokerConfig, FederationMode, ProfileConfig, StorageBackend};
pub use credential::{CacheRecord, CloudCredential, ProcessCredential, Provenance};
pub use error::{Error, Result};
pub use provider::ProviderKind;
