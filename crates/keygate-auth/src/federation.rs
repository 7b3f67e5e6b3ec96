//! Federation: turning a validated ID token into temporary AWS credentials.
//!
//! Two mutually exclusive strategies behind one trait, selected by the
//! profile's federation mode. Neither retries: a single attempt per
//! invocation, surfaced to the orchestrator.

use crate::provider::IdentityProvider;
use crate::token::IdentityToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate_core::{
    CloudCredential, Error, FederationMode, ProfileConfig, Provenance, Result,
};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// STS caps role session names at 64 characters.
const SESSION_NAME_MAX: usize = 64;

/// One federation strategy.
#[async_trait]
pub trait FederationExchanger: Send + Sync + std::fmt::Debug {
    /// Exchange an identity token for temporary credentials. Exactly one
    /// attempt; produces values only, never touches storage.
    async fn exchange(&self, token: &IdentityToken) -> Result<CloudCredential>;
}

/// Build the exchanger the profile's federation mode calls for.
pub fn exchanger_for(
    profile: &ProfileConfig,
    provider: &IdentityProvider,
    http: reqwest::Client,
) -> Result<Box<dyn FederationExchanger>> {
    match profile.mode()? {
        FederationMode::DirectIam => Ok(Box::new(DirectStsExchanger::new(profile, http)?)),
        FederationMode::IdentityPoolBroker => {
            Ok(Box::new(IdentityPoolExchanger::new(profile, provider, http)?))
        }
    }
}

/// `RoleSessionName` for audit attribution: the subject claim, restricted to
/// the character class STS accepts and truncated to the API limit. The
/// subject itself flows into session tags through the role trust policy.
fn session_name(subject: &str) -> String {
    let sanitized: String = subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@-_".contains(c) {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut name = format!("keygate-{sanitized}");
    name.truncate(SESSION_NAME_MAX);
    name
}

// ---------------------------------------------------------------------------
// Direct IAM (AssumeRoleWithWebIdentity)
// ---------------------------------------------------------------------------

/// Direct web-identity federation against an IAM role.
#[derive(Debug)]
pub struct DirectStsExchanger {
    role_arn: String,
    duration_seconds: u32,
    endpoint: String,
    client: reqwest::Client,
}

impl DirectStsExchanger {
    pub fn new(profile: &ProfileConfig, client: reqwest::Client) -> Result<Self> {
        let role_arn = profile.federated_role_arn.clone().ok_or_else(|| {
            Error::ConfigInvalid("direct_iam federation needs federated_role_arn".to_string())
        })?;
        Ok(Self {
            role_arn,
            duration_seconds: profile.session_seconds(FederationMode::DirectIam),
            endpoint: format!("https://sts.{}.amazonaws.com/", profile.aws_region),
            client,
        })
    }

    /// Point the exchanger at a stand-in STS endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct StsEnvelope {
    #[serde(rename = "AssumeRoleWithWebIdentityResponse")]
    response: StsResponse,
}

#[derive(Debug, Deserialize)]
struct StsResponse {
    #[serde(rename = "AssumeRoleWithWebIdentityResult")]
    result: StsResult,
}

#[derive(Debug, Deserialize)]
struct StsResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
struct StsCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    #[serde(rename = "Expiration")]
    expiration: String,
}

#[derive(Debug, Deserialize)]
struct StsErrorEnvelope {
    #[serde(rename = "Error")]
    error: StsErrorBody,
}

#[derive(Debug, Deserialize)]
struct StsErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

#[async_trait]
impl FederationExchanger for DirectStsExchanger {
    async fn exchange(&self, token: &IdentityToken) -> Result<CloudCredential> {
        debug!(role_arn = %self.role_arn, "Exchanging identity token with STS");

        let duration = self.duration_seconds.to_string();
        let name = session_name(token.subject());
        let params = [
            ("Action", "AssumeRoleWithWebIdentity"),
            ("Version", "2011-06-15"),
            ("RoleArn", self.role_arn.as_str()),
            ("RoleSessionName", name.as_str()),
            ("WebIdentityToken", token.raw.as_str()),
            ("DurationSeconds", duration.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .form(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| Error::FederationUnavailable(format!("STS unreachable: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<StsErrorEnvelope>(&body)
                .map(|envelope| match envelope.error.message {
                    Some(message) => format!("{}: {message}", envelope.error.code),
                    None => envelope.error.code,
                })
                .unwrap_or_else(|_| format!("STS returned HTTP {status}"));
            return if status.is_server_error() {
                Err(Error::FederationUnavailable(detail))
            } else {
                Err(Error::FederationRejected(detail))
            };
        }

        let envelope: StsEnvelope = response
            .json()
            .await
            .map_err(|err| Error::FederationUnavailable(format!("malformed STS response: {err}")))?;
        let creds = envelope.response.result.credentials;
        let expiration = DateTime::parse_from_rfc3339(&creds.expiration)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| {
                Error::FederationUnavailable(format!("unparseable STS expiration: {err}"))
            })?;

        Ok(CloudCredential {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            expiration,
            provenance: Provenance::Direct,
        })
    }
}

// ---------------------------------------------------------------------------
// Identity pool broker (GetId + GetCredentialsForIdentity)
// ---------------------------------------------------------------------------

/// Two-step federation through a managed identity pool. Both calls are
/// unsigned; the pool accepts no duration parameter (8-hour platform cap).
#[derive(Debug)]
pub struct IdentityPoolExchanger {
    pool_id: String,
    /// None selects the token's own issuer host (Cognito user-pool tokens);
    /// external providers use their configured domain.
    login_key: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

impl IdentityPoolExchanger {
    pub fn new(
        profile: &ProfileConfig,
        provider: &IdentityProvider,
        client: reqwest::Client,
    ) -> Result<Self> {
        let pool_id = profile.identity_pool_id.clone().ok_or_else(|| {
            Error::ConfigInvalid("identity_pool_broker federation needs identity_pool_id".to_string())
        })?;
        let login_key = if provider.kind() == crate::provider::ProviderKind::Cognito {
            None
        } else {
            Some(provider.login_host().to_string())
        };
        Ok(Self {
            pool_id,
            login_key,
            endpoint: format!(
                "https://cognito-identity.{}.amazonaws.com/",
                profile.aws_region
            ),
            client,
        })
    }

    /// Point the exchanger at a stand-in identity-pool endpoint.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn login_key<'a>(&'a self, token: &'a IdentityToken) -> &'a str {
        match &self.login_key {
            Some(key) => key,
            None => token.issuer_host(),
        }
    }

    async fn call(&self, target: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", format!("AWSCognitoIdentityService.{target}"))
            .body(body.to_string())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| {
                Error::FederationUnavailable(format!("identity pool unreachable: {err}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<PoolErrorBody>(&body)
            .map(|err| match err.message {
                Some(message) => format!("{}: {message}", short_type(&err.kind)),
                None => short_type(&err.kind).to_string(),
            })
            .unwrap_or_else(|_| format!("identity pool returned HTTP {status}"));
        if status.is_server_error() {
            Err(Error::FederationUnavailable(detail))
        } else {
            Err(Error::FederationRejected(detail))
        }
    }
}

/// `__type` arrives namespaced (`com.amazonaws...#NotAuthorizedException`).
fn short_type(kind: &str) -> &str {
    kind.rsplit('#').next().unwrap_or(kind)
}

#[derive(Debug, Deserialize)]
struct PoolErrorBody {
    #[serde(rename = "__type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetIdResponse {
    #[serde(rename = "IdentityId")]
    identity_id: String,
}

#[derive(Debug, Deserialize)]
struct GetCredentialsResponse {
    #[serde(rename = "Credentials")]
    credentials: PoolCredentials,
}

#[derive(Debug, Deserialize)]
struct PoolCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretKey")]
    secret_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    /// Epoch seconds, as a double.
    #[serde(rename = "Expiration")]
    expiration: f64,
}

#[async_trait]
impl FederationExchanger for IdentityPoolExchanger {
    async fn exchange(&self, token: &IdentityToken) -> Result<CloudCredential> {
        let login_key = self.login_key(token);
        debug!(pool_id = %self.pool_id, login_key, "Resolving identity-pool identity");

        let logins = json!({ login_key: token.raw });
        let id_response: GetIdResponse = self
            .call(
                "GetId",
                json!({ "IdentityPoolId": self.pool_id, "Logins": logins }),
            )
            .await?
            .json()
            .await
            .map_err(|err| {
                Error::FederationUnavailable(format!("malformed GetId response: {err}"))
            })?;

        let creds_response: GetCredentialsResponse = self
            .call(
                "GetCredentialsForIdentity",
                json!({ "IdentityId": id_response.identity_id, "Logins": logins }),
            )
            .await?
            .json()
            .await
            .map_err(|err| {
                Error::FederationUnavailable(format!(
                    "malformed GetCredentialsForIdentity response: {err}"
                ))
            })?;

        let creds = creds_response.credentials;
        let expiration = DateTime::from_timestamp(
            creds.expiration as i64,
            (creds.expiration.fract() * 1e9) as u32,
        )
        .ok_or_else(|| {
            Error::FederationUnavailable("identity-pool expiration out of range".to_string())
        })?;

        Ok(CloudCredential {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_key,
            session_token: creds.session_token,
            expiration,
            provenance: Provenance::Broker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile(mode: FederationMode) -> ProfileConfig {
        ProfileConfig {
            provider_domain: "acme.okta.com".to_string(),
            provider_type: None,
            client_id: "client-1".to_string(),
            client_secret: None,
            scopes: None,
            redirect_port: 8400,
            callback_timeout_seconds: 120,
            federation_mode: Some(mode),
            federated_role_arn: match mode {
                FederationMode::DirectIam => {
                    Some("arn:aws:iam::123456789012:role/dev".to_string())
                }
                _ => None,
            },
            identity_pool_id: match mode {
                FederationMode::IdentityPoolBroker => Some("us-east-1:pool-uuid".to_string()),
                _ => None,
            },
            cognito_user_pool_id: None,
            aws_region: "us-east-1".to_string(),
            allowed_regions: Vec::new(),
            max_session_seconds: None,
            credential_storage: Default::default(),
        }
    }

    fn identity_token() -> IdentityToken {
        IdentityToken {
            raw: "header.claims.sig".to_string(),
            subject: "user:42/acme".to_string(),
            email: Some("dev@acme.example".to_string()),
            preferred_username: None,
            issuer: "https://acme.okta.com".to_string(),
            expiry: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_session_name_sanitized_and_truncated() {
        assert_eq!(session_name("user@acme.example"), "keygate-user@acme.example");
        assert_eq!(session_name("user:42/acme"), "keygate-user-42-acme");
        assert_eq!(session_name(&"x".repeat(100)).len(), SESSION_NAME_MAX);
    }

    #[tokio::test]
    async fn test_direct_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=AssumeRoleWithWebIdentity"))
            .and(body_string_contains("RoleSessionName=keygate-user"))
            .and(body_string_contains("DurationSeconds=43200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "AssumeRoleWithWebIdentityResponse": {
                    "AssumeRoleWithWebIdentityResult": {
                        "Credentials": {
                            "AccessKeyId": "ASIAEXAMPLE",
                            "SecretAccessKey": "secret",
                            "SessionToken": "session",
                            "Expiration": "2030-01-01T12:00:00Z",
                        }
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchanger = DirectStsExchanger::new(&profile(FederationMode::DirectIam), reqwest::Client::new())
            .unwrap()
            .with_endpoint(&format!("{}/", server.uri()));
        let credential = exchanger.exchange(&identity_token()).await.unwrap();

        assert_eq!(credential.access_key_id, "ASIAEXAMPLE");
        assert_eq!(credential.provenance, Provenance::Direct);
        assert_eq!(
            credential.expiration,
            "2030-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_direct_denial_is_rejected_not_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "Error": { "Code": "AccessDenied", "Message": "Not authorized" }
            })))
            .mount(&server)
            .await;

        let exchanger = DirectStsExchanger::new(&profile(FederationMode::DirectIam), reqwest::Client::new())
            .unwrap()
            .with_endpoint(&format!("{}/", server.uri()));
        let err = exchanger.exchange(&identity_token()).await.unwrap_err();
        match err {
            Error::FederationRejected(detail) => assert!(detail.contains("AccessDenied")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_direct_outage_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let exchanger = DirectStsExchanger::new(&profile(FederationMode::DirectIam), reqwest::Client::new())
            .unwrap()
            .with_endpoint(&format!("{}/", server.uri()));
        let err = exchanger.exchange(&identity_token()).await.unwrap_err();
        assert!(matches!(err, Error::FederationUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_pool_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AWSCognitoIdentityService.GetId"))
            .and(body_string_contains("acme.okta.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "IdentityId": "us-east-1:identity-uuid"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header(
                "X-Amz-Target",
                "AWSCognitoIdentityService.GetCredentialsForIdentity",
            ))
            .and(body_string_contains("us-east-1:identity-uuid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Credentials": {
                    "AccessKeyId": "ASIAPOOL",
                    "SecretKey": "secret",
                    "SessionToken": "session",
                    "Expiration": 1893456000.0,
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = profile(FederationMode::IdentityPoolBroker);
        let provider = IdentityProvider::from_profile(&p).unwrap();
        let exchanger = IdentityPoolExchanger::new(&p, &provider, reqwest::Client::new())
            .unwrap()
            .with_endpoint(&format!("{}/", server.uri()));
        let credential = exchanger.exchange(&identity_token()).await.unwrap();

        assert_eq!(credential.access_key_id, "ASIAPOOL");
        assert_eq!(credential.provenance, Provenance::Broker);
        assert_eq!(credential.expiration.timestamp(), 1_893_456_000);
    }

    #[tokio::test]
    async fn test_pool_denial_maps_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "__type": "com.amazonaws.cognito.identity.model#NotAuthorizedException",
                "message": "Token is not from a supported provider",
            })))
            .mount(&server)
            .await;

        let p = profile(FederationMode::IdentityPoolBroker);
        let provider = IdentityProvider::from_profile(&p).unwrap();
        let exchanger = IdentityPoolExchanger::new(&p, &provider, reqwest::Client::new())
            .unwrap()
            .with_endpoint(&format!("{}/", server.uri()));
        let err = exchanger.exchange(&identity_token()).await.unwrap_err();
        match err {
            Error::FederationRejected(detail) => {
                assert!(detail.starts_with("NotAuthorizedException"));
                assert!(!detail.contains('#'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchanger_selection_follows_mode() {
        let p = profile(FederationMode::IdentityPoolBroker);
        let provider = IdentityProvider::from_profile(&p).unwrap();
        assert!(exchanger_for(&p, &provider, reqwest::Client::new()).is_ok());

        let mut broken = profile(FederationMode::DirectIam);
        broken.federated_role_arn = None;
        broken.federation_mode = Some(FederationMode::DirectIam);
        assert!(matches!(
            exchanger_for(&broken, &provider, reqwest::Client::new()).unwrap_err(),
            Error::ConfigInvalid(_)
        ));
    }
}
