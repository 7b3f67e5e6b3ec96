//! Error types for Keygate.

use thiserror::Error;

/// Broker-wide error taxonomy.
///
/// Every failure below the orchestrator is one of these classes. The
/// orchestrator alone decides fatality: configuration problems are permanent
/// until fixed, federation outages are worth a caller-side retry, and cache
/// I/O never aborts an invocation.
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // Interactive login errors
    #[error("Timed out after {seconds}s waiting for the browser login to complete")]
    UserTimeout { seconds: u64 },

    #[error("Login callback returned a state token that does not match this attempt")]
    StateMismatch,

    #[error("Port {port} is already in use; another login may be in progress")]
    PortUnavailable { port: u16 },

    // Token errors
    #[error("Authorization code exchange failed: {0}")]
    CodeExchangeFailed(String),

    #[error("Identity token rejected: {0}")]
    TokenInvalid(String),

    // Federation errors
    #[error("Federation request was rejected: {0}")]
    FederationRejected(String),

    #[error("Federation service unreachable: {0}")]
    FederationUnavailable(String),

    // Cache errors
    #[error("Credential cache error: {0}")]
    CacheIo(String),
}

impl Error {
    /// Process exit code for this failure class.
    ///
    /// Configuration errors exit 2 so wrappers can distinguish "fix your
    /// config" from "re-run me"; everything else exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigInvalid(_) => 2,
            _ => 1,
        }
    }

    /// Whether a caller could reasonably retry the whole invocation with
    /// backoff. Only transient federation outages qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::FederationUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
