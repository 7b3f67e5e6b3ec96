//! Keygate Auth
//!
//! The interactive half of the broker: provider adapters, the PKCE
//! authorization-code flow, the one-shot loopback callback server, ID token
//! validation, and the two federation strategies that turn a validated token
//! into temporary AWS credentials.

pub mod callback;
pub mod federation;
pub mod pkce;
pub mod provider;
pub mod token;

pub use callback::{AuthorizationResult, CallbackServer};
pub use federation::{
    DirectStsExchanger, FederationExchanger, IdentityPoolExchanger, exchanger_for,
};
pub use pkce::{PkceChallenge, begin_auth, complete_auth};
pub use provider::{IdentityProvider, ProviderKind};
pub use token::IdentityToken;
