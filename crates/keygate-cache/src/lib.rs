//! Keygate Cache
//!
//! Durable storage for the most recent temporary credentials. Two backends
//! behind one trait (OS keyring, shared credentials file) with the
//! safety-buffer and fail-closed policy in a wrapper above both, so the
//! policy cannot drift between them.

pub mod keyring;
pub mod session_file;
pub mod store;

pub use self::keyring::KeyringStore;
pub use session_file::SessionFileStore;
pub use store::{CredentialCache, CredentialStore, MemoryStore};
