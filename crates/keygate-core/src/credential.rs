//! Credential types and the credential-process output document.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current cache record schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Marker value written into every credential field of a tombstone record.
pub const TOMBSTONE_MARKER: &str = "EXPIRED";

/// Safety buffer applied when deciding whether a cached credential is still
/// usable: anything expiring within this window counts as expired, so a
/// caller never receives a credential that dies mid-request.
pub const EXPIRY_BUFFER_SECONDS: i64 = 30;

/// How a credential was obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Direct STS web-identity federation.
    #[default]
    Direct,
    /// Identity-pool mediated federation.
    Broker,
}

/// A set of temporary cloud credentials produced by federation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    pub provenance: Provenance,
}

impl CloudCredential {
    /// True when the credential expires within `buffer` from now.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expiration <= Utc::now() + buffer
    }
}

/// Stored form of a [`CloudCredential`] plus a schema version tag.
///
/// The field names mirror the emitted credential-process document so the
/// secure-store blob stays readable with standard tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    #[serde(rename = "SessionToken")]
    pub session_token: String,
    #[serde(rename = "Expiration")]
    pub expiration: DateTime<Utc>,
    #[serde(rename = "Provenance", default)]
    pub provenance: Provenance,
}

impl CacheRecord {
    /// Wrap a freshly exchanged credential for storage.
    pub fn new(credential: &CloudCredential) -> Self {
        Self {
            version: SCHEMA_VERSION,
            access_key_id: credential.access_key_id.clone(),
            secret_access_key: credential.secret_access_key.clone(),
            session_token: credential.session_token.clone(),
            expiration: credential.expiration,
            provenance: credential.provenance,
        }
    }

    /// The already-expired dummy record written by cache invalidation.
    ///
    /// Invalidation overwrites instead of deleting: deleting a secret-store
    /// entry makes the OS re-prompt for access on the next create.
    pub fn tombstone() -> Self {
        Self {
            version: SCHEMA_VERSION,
            access_key_id: TOMBSTONE_MARKER.to_string(),
            secret_access_key: TOMBSTONE_MARKER.to_string(),
            session_token: TOMBSTONE_MARKER.to_string(),
            expiration: DateTime::UNIX_EPOCH,
            provenance: Provenance::Direct,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.access_key_id == TOMBSTONE_MARKER
    }

    /// True when the record expires within `buffer` from now.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expiration <= Utc::now() + buffer
    }

    pub fn credential(&self) -> CloudCredential {
        CloudCredential {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            expiration: self.expiration,
            provenance: self.provenance,
        }
    }
}

/// The JSON document emitted on stdout for the invoking CLI/SDK.
///
/// Field names and the `Version` tag are fixed by the external
/// credential-process contract; any deviation breaks every caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCredential {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    #[serde(rename = "SessionToken")]
    pub session_token: String,
    #[serde(rename = "Expiration")]
    pub expiration: String,
}

impl ProcessCredential {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&CloudCredential> for ProcessCredential {
    fn from(credential: &CloudCredential) -> Self {
        Self {
            version: SCHEMA_VERSION,
            access_key_id: credential.access_key_id.clone(),
            secret_access_key: credential.secret_access_key.clone(),
            session_token: credential.session_token.clone(),
            expiration: credential
                .expiration
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credential(expires_in: Duration) -> CloudCredential {
        CloudCredential {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: Utc::now() + expires_in,
            provenance: Provenance::Direct,
        }
    }

    #[test]
    fn test_expiry_buffer_edges() {
        let buffer = Duration::seconds(EXPIRY_BUFFER_SECONDS);
        assert!(sample_credential(Duration::seconds(10)).expires_within(buffer));
        assert!(sample_credential(Duration::seconds(-60)).expires_within(buffer));
        assert!(!sample_credential(Duration::hours(10)).expires_within(buffer));
    }

    #[test]
    fn test_tombstone_is_expired_and_detected() {
        let tombstone = CacheRecord::tombstone();
        assert!(tombstone.is_tombstone());
        assert!(tombstone.expiration < Utc::now());
        assert!(tombstone.expires_within(Duration::seconds(0)));
        assert_eq!(tombstone.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_cache_record_roundtrip() {
        let credential = sample_credential(Duration::hours(1));
        let record = CacheRecord::new(&credential);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"Version\":1"));
        assert!(json.contains("\"AccessKeyId\":\"AKIAEXAMPLE\""));
        assert!(json.contains("\"Provenance\":\"direct\""));

        let parsed: CacheRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.credential(), credential);
    }

    #[test]
    fn test_record_without_provenance_defaults_to_direct() {
        let json = r#"{"Version":1,"AccessKeyId":"a","SecretAccessKey":"b","SessionToken":"c","Expiration":"2030-01-01T00:00:00Z"}"#;
        let parsed: CacheRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.provenance, Provenance::Direct);
    }

    #[test]
    fn test_process_document_shape() {
        let mut credential = sample_credential(Duration::hours(1));
        credential.expiration = "2030-06-01T08:30:00Z".parse().unwrap();
        let doc = ProcessCredential::from(&credential);
        let json = doc.to_json();
        assert!(json.starts_with("{\"Version\":1,"));
        assert!(json.contains("\"Expiration\":\"2030-06-01T08:30:00Z\""));
        assert!(!json.contains('\n'));
        assert!(!json.contains("Provenance"));
    }
}
