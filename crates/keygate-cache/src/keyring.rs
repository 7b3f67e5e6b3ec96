//! Secure-store backend on the OS-native keyring.
//!
//! The record lives as a JSON blob in one keyring entry per profile.
//! Invalidation overwrites the blob with the tombstone instead of deleting
//! the entry: a delete-then-create cycle makes several OS stores re-prompt
//! for access, an overwrite does not.

use crate::store::CredentialStore;
use keygate_core::{CacheRecord, Error, Result};
use tracing::debug;

const SERVICE: &str = "keygate";

pub struct KeyringStore {
    entry: ::keyring::Entry,
}

impl KeyringStore {
    /// One entry per broker profile: service `keygate`, user
    /// `{profile}-credentials`.
    pub fn new(profile: &str) -> Result<Self> {
        let entry = ::keyring::Entry::new(SERVICE, &format!("{profile}-credentials"))
            .map_err(|err| Error::CacheIo(format!("keyring unavailable: {err}")))?;
        Ok(Self { entry })
    }
}

impl CredentialStore for KeyringStore {
    fn read(&self) -> Result<Option<CacheRecord>> {
        let blob = match self.entry.get_password() {
            Ok(blob) => blob,
            Err(::keyring::Error::NoEntry) => return Ok(None),
            Err(err) => return Err(Error::CacheIo(format!("keyring read failed: {err}"))),
        };
        let record = serde_json::from_str(&blob)
            .map_err(|err| Error::CacheIo(format!("stored record is malformed: {err}")))?;
        Ok(Some(record))
    }

    fn write(&self, record: &CacheRecord) -> Result<()> {
        let blob = serde_json::to_string(record)
            .map_err(|err| Error::CacheIo(format!("cannot serialize record: {err}")))?;
        self.entry
            .set_password(&blob)
            .map_err(|err| Error::CacheIo(format!("keyring write failed: {err}")))?;
        debug!("Credential written to the OS keyring");
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        match self.entry.get_password() {
            // Overwrite in place; never delete.
            Ok(_) => self.write(&CacheRecord::tombstone()),
            // Nothing stored: creating an entry just to tombstone it would
            // itself trigger an access prompt.
            Err(::keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(Error::CacheIo(format!("keyring read failed: {err}"))),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use keygate_core::{CloudCredential, Provenance};
    use std::sync::Once;

    static MOCK_KEYRING: Once = Once::new();

    fn mock_store(profile: &str) -> KeyringStore {
        MOCK_KEYRING.call_once(|| {
            ::keyring::set_default_credential_builder(::keyring::mock::default_credential_builder());
        });
        KeyringStore::new(profile).unwrap()
    }

    fn record(expires_in: Duration) -> CacheRecord {
        CacheRecord::new(&CloudCredential {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: Utc::now() + expires_in,
            provenance: Provenance::Direct,
        })
    }

    #[test]
    fn test_round_trip() {
        let store = mock_store("round-trip");
        assert!(store.read().unwrap().is_none());

        let record = record(Duration::hours(1));
        store.write(&record).unwrap();
        assert_eq!(store.read().unwrap(), Some(record));
    }

    #[test]
    fn test_invalidate_overwrites_with_tombstone() {
        let store = mock_store("invalidate");
        store.write(&record(Duration::hours(1))).unwrap();
        store.invalidate().unwrap();

        let stored = store.read().unwrap().expect("entry must still exist");
        assert!(stored.is_tombstone());
        assert!(stored.expiration < Utc::now());
    }

    #[test]
    fn test_invalidate_without_entry_is_a_noop() {
        let store = mock_store("absent");
        store.invalidate().unwrap();
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_malformed_blob_is_a_cache_error() {
        let store = mock_store("malformed");
        store.entry.set_password("not json").unwrap();
        assert!(matches!(store.read().unwrap_err(), Error::CacheIo(_)));
    }
}
