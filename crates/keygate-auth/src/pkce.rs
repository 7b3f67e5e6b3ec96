//! PKCE authorization-code flow: challenge generation, authorization URL
//! construction, and the code-for-token exchange.

use crate::callback::AuthorizationResult;
use crate::provider::IdentityProvider;
use crate::token::IdentityToken;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use keygate_core::{Error, ProfileConfig, Result};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;
use url::Url;

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One authentication attempt's secrets: verifier/challenge pair plus the
/// CSRF state and replay nonce. Single-use, never persisted.
pub struct PkceChallenge {
    /// Random verifier, URL-safe base64 of 32 CSPRNG bytes (43 chars).
    pub verifier: String,
    /// base64url(SHA-256(verifier)).
    pub challenge: String,
    /// CSRF token echoed back through the redirect.
    pub state: String,
    /// Replay token echoed back inside the ID token.
    pub nonce: String,
    consumed: bool,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let verifier = URL_SAFE_NO_PAD.encode(rng.r#gen::<[u8; 32]>());
        let challenge = Self::compute_challenge(&verifier);
        let state = URL_SAFE_NO_PAD.encode(rng.r#gen::<[u8; 16]>());
        let nonce = URL_SAFE_NO_PAD.encode(rng.r#gen::<[u8; 16]>());
        Self {
            verifier,
            challenge,
            state,
            nonce,
            consumed: false,
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

/// Start an authentication attempt: generate the challenge and build the
/// provider's authorization URL.
pub fn begin_auth(
    provider: &IdentityProvider,
    profile: &ProfileConfig,
) -> Result<(PkceChallenge, Url)> {
    if !provider.supports_pkce_s256() {
        return Err(Error::ConfigInvalid(format!(
            "provider '{}' does not support the S256 code challenge method",
            provider.kind().name()
        )));
    }

    let challenge = PkceChallenge::generate();
    let mut url = Url::parse(&provider.authorization_endpoint()).map_err(|err| {
        Error::ConfigInvalid(format!("cannot build authorization URL: {err}"))
    })?;
    let scopes = profile
        .scopes
        .as_deref()
        .unwrap_or_else(|| provider.default_scopes());

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &profile.client_id);
        query.append_pair("redirect_uri", &redirect_uri(profile.redirect_port));
        query.append_pair("scope", scopes);
        query.append_pair("state", &challenge.state);
        query.append_pair("nonce", &challenge.nonce);
        query.append_pair("code_challenge", &challenge.challenge);
        query.append_pair("code_challenge_method", "S256");
        for (key, value) in provider.extra_authorize_params() {
            query.append_pair(key, value);
        }
    }

    debug!(
        provider = provider.kind().name(),
        port = profile.redirect_port,
        "Built authorization request"
    );
    Ok((challenge, url))
}

/// Exchange the authorization code for tokens and validate the ID token.
///
/// The challenge is consumed on entry: a second call with the same
/// challenge fails even if the first never reached the network.
pub async fn complete_auth(
    http: &reqwest::Client,
    provider: &IdentityProvider,
    profile: &ProfileConfig,
    challenge: &mut PkceChallenge,
    result: AuthorizationResult,
) -> Result<IdentityToken> {
    if challenge.consumed {
        return Err(Error::CodeExchangeFailed(
            "authorization code already redeemed for this attempt".to_string(),
        ));
    }
    challenge.consumed = true;

    if !constant_time_eq(result.state.as_bytes(), challenge.state.as_bytes()) {
        return Err(Error::StateMismatch);
    }

    let redirect = redirect_uri(profile.redirect_port);
    let form = [
        ("grant_type", "authorization_code"),
        ("code", result.code.as_str()),
        ("redirect_uri", redirect.as_str()),
        ("client_id", profile.client_id.as_str()),
        ("code_verifier", challenge.verifier.as_str()),
    ];

    let mut request = http
        .post(provider.token_endpoint())
        .form(&form)
        .timeout(TOKEN_REQUEST_TIMEOUT);
    if let Some(secret) = &profile.client_secret {
        request = request.basic_auth(&profile.client_id, Some(secret));
    }

    let response = request.send().await.map_err(|err| {
        Error::CodeExchangeFailed(format!("token endpoint unreachable: {err}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = parse_oauth_error(&body)
            .unwrap_or_else(|| format!("token endpoint returned HTTP {status}"));
        return Err(Error::CodeExchangeFailed(detail));
    }

    let payload: TokenEndpointResponse = response.json().await.map_err(|err| {
        Error::CodeExchangeFailed(format!("malformed token response: {err}"))
    })?;
    let raw = payload
        .id_token
        .ok_or_else(|| Error::TokenInvalid("token response carried no id_token".to_string()))?;

    debug!(provider = provider.kind().name(), "Authorization code exchanged");
    IdentityToken::validate(
        &raw,
        &profile.client_id,
        provider.expected_issuer(profile).as_deref(),
        &challenge.nonce,
    )
}

fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}/callback")
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn parse_oauth_error(body: &str) -> Option<String> {
    let parsed: OAuthErrorBody = serde_json::from_str(body).ok()?;
    Some(match parsed.error_description {
        Some(description) => format!("{}: {description}", parsed.error),
        None => parsed.error,
    })
}

/// Length-then-bytes comparison without an early exit on the bytes.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
