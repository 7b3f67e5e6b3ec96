//! Broker configuration: profile discovery, parsing, and startup validation.
//!
//! The configuration file is produced by an external deployment tool and is
//! strictly read-only here. Every violation is a fatal `ConfigInvalid` at
//! startup, never a recoverable condition.

use crate::error::{Error, Result};
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_REDIRECT_PORT: u16 = 8400;
pub const DEFAULT_CALLBACK_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_REGION: &str = "us-east-1";

/// STS refuses sessions shorter than 15 minutes.
pub const MIN_SESSION_SECONDS: u32 = 900;

/// Federation strategy for turning an ID token into cloud credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationMode {
    /// Direct STS web-identity exchange against an IAM role.
    DirectIam,
    /// Two-step exchange through a managed identity pool.
    IdentityPoolBroker,
}

impl FederationMode {
    /// Platform ceiling on session length for this strategy.
    pub fn session_ceiling_seconds(&self) -> u32 {
        match self {
            // 12 hours for direct role sessions.
            FederationMode::DirectIam => 43_200,
            // 8 hours, imposed by the identity-pool service.
            FederationMode::IdentityPoolBroker => 28_800,
        }
    }
}

/// Where cached credentials live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS-native secret store.
    #[default]
    Keyring,
    /// Shared credentials file readable by any compliant SDK.
    Session,
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyring" => Ok(StorageBackend::Keyring),
            "session" => Ok(StorageBackend::Session),
            other => Err(Error::ConfigInvalid(format!(
                "unknown storage backend '{other}' (expected 'keyring' or 'session')"
            ))),
        }
    }
}

/// One named profile: everything the broker needs to know about a provider
/// and its federation target. Loaded once at process start, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Identity-provider domain, with or without scheme; Azure domains may
    /// carry a tenant path.
    pub provider_domain: String,
    /// Explicit provider kind (okta, auth0, azure, cognito); auto-detected
    /// from the domain suffix when absent.
    #[serde(default)]
    pub provider_type: Option<String>,
    pub client_id: String,
    /// Confidential-client secret, sent as basic auth at the token endpoint.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Space-separated scope override; provider default when absent.
    #[serde(default)]
    pub scopes: Option<String>,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,
    /// Explicit strategy; inferred from which identifier is present when
    /// absent (role arn wins over pool id).
    #[serde(default)]
    pub federation_mode: Option<FederationMode>,
    #[serde(default)]
    pub federated_role_arn: Option<String>,
    #[serde(default)]
    pub identity_pool_id: Option<String>,
    /// Pins the expected issuer for Cognito user-pool tokens.
    #[serde(default)]
    pub cognito_user_pool_id: Option<String>,
    #[serde(default = "default_region")]
    pub aws_region: String,
    /// When non-empty, `aws_region` must be a member.
    #[serde(default)]
    pub allowed_regions: Vec<String>,
    /// Requested session length; defaults to the strategy ceiling and is
    /// clamped to it.
    #[serde(default)]
    pub max_session_seconds: Option<u32>,
    #[serde(default)]
    pub credential_storage: StorageBackend,
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_callback_timeout() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT_SECONDS
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl ProfileConfig {
    /// Resolve the federation strategy, validating that the identifiers it
    /// needs are present.
    pub fn mode(&self) -> Result<FederationMode> {
        self.mode_inner().map_err(Error::ConfigInvalid)
    }

    fn mode_inner(&self) -> std::result::Result<FederationMode, String> {
        match self.federation_mode {
            Some(FederationMode::DirectIam) => {
                if self.federated_role_arn.is_none() {
                    return Err("federation_mode is direct_iam but federated_role_arn is missing"
                        .to_string());
                }
                Ok(FederationMode::DirectIam)
            }
            Some(FederationMode::IdentityPoolBroker) => {
                if self.identity_pool_id.is_none() {
                    return Err(
                        "federation_mode is identity_pool_broker but identity_pool_id is missing"
                            .to_string(),
                    );
                }
                Ok(FederationMode::IdentityPoolBroker)
            }
            None => {
                if self.federated_role_arn.is_some() {
                    Ok(FederationMode::DirectIam)
                } else if self.identity_pool_id.is_some() {
                    Ok(FederationMode::IdentityPoolBroker)
                } else {
                    Err("neither federated_role_arn nor identity_pool_id is set".to_string())
                }
            }
        }
    }

    /// Resolve the provider family: explicit `provider_type` if set,
    /// otherwise detected from the domain suffix.
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        self.provider_kind_inner().map_err(Error::ConfigInvalid)
    }

    fn provider_kind_inner(&self) -> std::result::Result<ProviderKind, String> {
        match &self.provider_type {
            Some(name) => ProviderKind::parse(name).ok_or_else(|| {
                format!("unknown provider_type '{name}' (expected okta, auth0, azure, or cognito)")
            }),
            None => {
                let host = host_of(&self.provider_domain);
                ProviderKind::detect(host).ok_or_else(|| {
                    format!("cannot detect a provider from domain '{host}'; set provider_type")
                })
            }
        }
    }

    /// Session length to request: configured value clamped to the strategy
    /// ceiling.
    pub fn session_seconds(&self, mode: FederationMode) -> u32 {
        let ceiling = mode.session_ceiling_seconds();
        self.max_session_seconds.unwrap_or(ceiling).min(ceiling)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let fail = |msg: String| Err(Error::ConfigInvalid(format!("profile '{name}': {msg}")));

        if self.provider_domain.trim().is_empty() {
            return fail("provider_domain is empty".to_string());
        }
        if self.client_id.trim().is_empty() {
            return fail("client_id is empty".to_string());
        }
        if let Err(msg) = self.provider_kind_inner() {
            return fail(msg);
        }
        if self.redirect_port == 0 {
            return fail("redirect_port must be a fixed non-zero port".to_string());
        }
        if self.callback_timeout_seconds == 0 {
            return fail("callback_timeout_seconds must be positive".to_string());
        }
        if let Err(msg) = self.mode_inner() {
            return fail(msg);
        }
        if let Some(seconds) = self.max_session_seconds
            && seconds < MIN_SESSION_SECONDS
        {
            return fail(format!(
                "max_session_seconds {seconds} is below the {MIN_SESSION_SECONDS}s minimum"
            ));
        }
        if !self.allowed_regions.is_empty()
            && !self.allowed_regions.iter().any(|r| r == &self.aws_region)
        {
            return fail(format!(
                "aws_region '{}' is not in allowed_regions",
                self.aws_region
            ));
        }
        Ok(())
    }
}

/// Host portion of a configured domain, with or without scheme or path.
fn host_of(domain: &str) -> &str {
    let rest = domain
        .trim()
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_else(|| domain.trim());
    let host = rest.split('/').next().unwrap_or(rest);
    host.split(':').next().unwrap_or(host)
}

/// The whole configuration file: named profiles plus an optional default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub default_profile: Option<String>,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl BrokerConfig {
    /// Locate the configuration file: `KEYGATE_CONFIG` if set, otherwise
    /// `config.yaml` (then `config.json`) in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("KEYGATE_CONFIG")
            && !path.is_empty()
        {
            return Some(PathBuf::from(path));
        }
        let dirs = directories::ProjectDirs::from("dev", "keygate", "keygate")?;
        let dir = dirs.config_dir();
        let yaml = dir.join("config.yaml");
        if yaml.exists() {
            return Some(yaml);
        }
        let json = dir.join("config.json");
        if json.exists() {
            return Some(json);
        }
        Some(yaml)
    }

    /// Load and validate the discovered configuration file.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().ok_or_else(|| {
            Error::ConfigInvalid("could not determine a config directory".to_string())
        })?;
        Self::load_from(&path)
    }

    /// Load and validate a specific configuration file. JSON parses as a
    /// YAML subset, so one parser covers both advertised formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::ConfigInvalid(format!("cannot read config {}: {err}", path.display()))
        })?;
        let config: BrokerConfig = serde_yaml::from_str(&content).map_err(|err| {
            Error::ConfigInvalid(format!("malformed config {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(Error::ConfigInvalid("no profiles defined".to_string()));
        }
        for (name, profile) in &self.profiles {
            profile.validate(name)?;
        }
        Ok(())
    }

    /// Pick the profile name: explicit selection, then the file's
    /// `default_profile`, then the literal `default`.
    pub fn select_profile<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
    }

    pub fn profile(&self, name: &str) -> Result<&ProfileConfig> {
        self.profiles.get(name).ok_or_else(|| {
            let available: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            Error::ConfigInvalid(format!(
                "unknown profile '{name}' (available: {})",
                available.join(", ")
            ))
        })
    }
}
