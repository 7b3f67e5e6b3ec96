//! The orchestrator: cache check, interactive authentication, federation,
//! write-through, and the credential-process document.
//!
//! One invocation is one pass through the state machine with no retry loop
//! anywhere; the calling tool re-invokes on its own schedule. The cache and
//! both flow halves are injected so tests can substitute fakes.

use async_trait::async_trait;
use console::style;
use keygate_auth::{
    CallbackServer, FederationExchanger, IdentityProvider, IdentityToken, begin_auth,
    complete_auth, exchanger_for,
};
use keygate_cache::CredentialCache;
use keygate_core::{ProcessCredential, ProfileConfig, Result};
use std::time::Duration;
use tracing::{info, warn};

/// The AUTHENTICATE phase: everything between "no usable cache" and a
/// validated identity token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<IdentityToken>;
}

/// The real browser-driven flow.
pub struct InteractiveAuthenticator {
    profile: ProfileConfig,
    provider: IdentityProvider,
    http: reqwest::Client,
}

impl InteractiveAuthenticator {
    pub fn new(profile: ProfileConfig) -> Result<Self> {
        let provider = IdentityProvider::from_profile(&profile)?;
        Ok(Self {
            profile,
            provider,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Authenticator for InteractiveAuthenticator {
    async fn authenticate(&self) -> Result<IdentityToken> {
        // Bind before the browser opens: a concurrent attempt fails fast
        // here instead of silently stealing the redirect.
        let server = CallbackServer::bind(self.profile.redirect_port).await?;
        let (mut challenge, url) = begin_auth(&self.provider, &self.profile)?;

        eprintln!(
            "{} Opening your browser to sign in. If nothing opens, visit:",
            style("▶").cyan()
        );
        eprintln!("  {url}");
        if let Err(err) = open::that(url.as_str()) {
            // The printed URL stays usable; keep waiting for the redirect.
            warn!(%err, "Could not launch a browser");
        }

        let result = server
            .wait(Duration::from_secs(self.profile.callback_timeout_seconds))
            .await?;
        complete_auth(
            &self.http,
            &self.provider,
            &self.profile,
            &mut challenge,
            result,
        )
        .await
    }
}

pub struct Broker {
    cache: CredentialCache,
    authenticator: Box<dyn Authenticator>,
    exchanger: Box<dyn FederationExchanger>,
}

impl Broker {
    pub fn new(
        cache: CredentialCache,
        authenticator: Box<dyn Authenticator>,
        exchanger: Box<dyn FederationExchanger>,
    ) -> Self {
        Self {
            cache,
            authenticator,
            exchanger,
        }
    }

    /// Wire up the real flow for a profile.
    pub fn from_profile(profile: ProfileConfig, cache: CredentialCache) -> Result<Self> {
        let provider = IdentityProvider::from_profile(&profile)?;
        let exchanger = exchanger_for(&profile, &provider, reqwest::Client::new())?;
        let authenticator = Box::new(InteractiveAuthenticator::new(profile)?);
        Ok(Self::new(cache, authenticator, exchanger))
    }

    /// Whether the cache alone can serve the next invocation.
    pub fn cache_is_warm(&self) -> bool {
        self.cache.read().is_some()
    }

    /// Run the state machine and produce the document to emit.
    pub async fn credentials(&self) -> Result<ProcessCredential> {
        if let Some(cached) = self.cache.read() {
            info!(backend = self.cache.backend_name(), "Serving cached credential");
            return Ok(ProcessCredential::from(&cached));
        }

        let token = self.authenticator.authenticate().await?;
        let credential = self.exchanger.exchange(&token).await?;
        info!(
            expiration = %credential.expiration,
            "Federation produced a fresh credential"
        );

        // Write-through is best-effort: a broken cache must not cost the
        // user the login they just completed.
        if let Err(err) = self.cache.write(&credential) {
            warn!(backend = self.cache.backend_name(), %err, "Cache write failed; emitting anyway");
        }
        Ok(ProcessCredential::from(&credential))
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.invalidate()
    }
}
