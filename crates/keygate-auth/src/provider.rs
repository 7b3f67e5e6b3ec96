//! Identity-provider adapters: endpoint shapes, default scopes, and quirks.
//!
//! A closed set of provider families selected once at startup from the
//! profile configuration. Everything the rest of the flow needs to know
//! about a provider goes through [`IdentityProvider`].

use keygate_core::{Error, ProfileConfig, Result};
use url::Url;

pub use keygate_core::ProviderKind;

/// One configured identity provider: a family plus its normalized base URL.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    kind: ProviderKind,
    base: String,
}

impl IdentityProvider {
    /// Resolve the provider for a profile. The family comes from the
    /// profile (explicit `provider_type`, or detected from the domain
    /// suffix, both already enforced at config load). The base URL gets a
    /// scheme if missing, loses any trailing slash, and for Azure loses the
    /// conventional `/v2.0` suffix so endpoint paths append cleanly.
    pub fn from_profile(profile: &ProfileConfig) -> Result<Self> {
        let kind = profile.provider_kind()?;

        let domain = profile.provider_domain.trim();
        let with_scheme = if domain.contains("://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };
        let url = Url::parse(&with_scheme).map_err(|err| {
            Error::ConfigInvalid(format!("invalid provider_domain '{domain}': {err}"))
        })?;
        if url.host_str().is_none() {
            return Err(Error::ConfigInvalid(format!(
                "provider_domain '{domain}' has no host"
            )));
        }

        let mut base = url.as_str().trim_end_matches('/').to_string();
        if kind == ProviderKind::AzureAd && base.ends_with("/v2.0") {
            base.truncate(base.len() - "/v2.0".len());
        }

        Ok(Self { kind, base })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Base URL without the scheme, as identity-pool login maps expect.
    pub fn login_host(&self) -> &str {
        self.base
            .trim_start_matches("https://")
            .trim_start_matches("http://")
    }

    pub fn authorization_endpoint(&self) -> String {
        let path = match self.kind {
            ProviderKind::Okta => "/oauth2/v1/authorize",
            ProviderKind::Auth0 => "/authorize",
            ProviderKind::AzureAd => "/oauth2/v2.0/authorize",
            ProviderKind::Cognito => "/oauth2/authorize",
        };
        format!("{}{path}", self.base)
    }

    pub fn token_endpoint(&self) -> String {
        let path = match self.kind {
            ProviderKind::Okta => "/oauth2/v1/token",
            ProviderKind::Auth0 => "/oauth/token",
            ProviderKind::AzureAd => "/oauth2/v2.0/token",
            ProviderKind::Cognito => "/oauth2/token",
        };
        format!("{}{path}", self.base)
    }

    pub fn default_scopes(&self) -> &'static str {
        match self.kind {
            ProviderKind::Cognito => "openid email",
            _ => "openid profile email",
        }
    }

    /// Whether the provider supports the S256 code challenge method. All
    /// current families do; the flow treats anything else as a
    /// configuration error rather than downgrading to `plain`.
    pub fn supports_pkce_s256(&self) -> bool {
        true
    }

    /// Extra query parameters some providers want on the authorize request.
    pub fn extra_authorize_params(&self) -> &'static [(&'static str, &'static str)] {
        match self.kind {
            ProviderKind::AzureAd => &[("response_mode", "query"), ("prompt", "select_account")],
            _ => &[],
        }
    }

    /// The issuer value the ID token must carry, when it can be pinned.
    ///
    /// Cognito hosted-UI domains say nothing about the user-pool issuer, so
    /// pinning needs the configured pool id; without it the issuer check is
    /// skipped.
    pub fn expected_issuer(&self, profile: &ProfileConfig) -> Option<String> {
        match self.kind {
            ProviderKind::Okta => Some(self.base.clone()),
            // Auth0 issues tokens with a trailing slash on the issuer.
            ProviderKind::Auth0 => Some(format!("{}/", self.base)),
            ProviderKind::AzureAd => Some(format!("{}/v2.0", self.base)),
            ProviderKind::Cognito => profile.cognito_user_pool_id.as_ref().map(|pool| {
                let region = pool.split('_').next().unwrap_or_default();
                format!("https://cognito-idp.{region}.amazonaws.com/{pool}")
            }),
        }
    }
}
