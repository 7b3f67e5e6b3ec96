//! The store trait and the policy wrapper shared by every backend.

use chrono::Duration;
use keygate_core::credential::EXPIRY_BUFFER_SECONDS;
use keygate_core::{CacheRecord, CloudCredential, Result};
use std::sync::Mutex;
use tracing::{debug, warn};

/// One credential slot in durable storage.
///
/// Backends store and fetch records verbatim; freshness decisions belong to
/// [`CredentialCache`]. `invalidate` overwrites the record with the
/// tombstone rather than deleting it, and is a no-op when nothing is stored.
pub trait CredentialStore: Send + Sync {
    fn read(&self) -> Result<Option<CacheRecord>>;
    fn write(&self, record: &CacheRecord) -> Result<()>;
    fn invalidate(&self) -> Result<()>;
    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

impl<S: CredentialStore> CredentialStore for std::sync::Arc<S> {
    fn read(&self) -> Result<Option<CacheRecord>> {
        (**self).read()
    }
    fn write(&self, record: &CacheRecord) -> Result<()> {
        (**self).write(record)
    }
    fn invalidate(&self) -> Result<()> {
        (**self).invalidate()
    }
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// The policy layer every read and write goes through.
///
/// Applies the expiry safety buffer, recognizes the tombstone, and treats
/// any backend read error as a miss: re-authentication is always preferred
/// over serving a possibly corrupt credential.
pub struct CredentialCache {
    store: Box<dyn CredentialStore>,
    buffer: Duration,
}

impl CredentialCache {
    pub fn new(store: Box<dyn CredentialStore>) -> Self {
        Self {
            store,
            buffer: Duration::seconds(EXPIRY_BUFFER_SECONDS),
        }
    }

    #[cfg(test)]
    pub fn with_buffer(store: Box<dyn CredentialStore>, buffer: Duration) -> Self {
        Self { store, buffer }
    }

    /// Fetch the cached credential if it is still safely usable.
    pub fn read(&self) -> Option<CloudCredential> {
        let record = match self.store.read() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(backend = self.store.name(), "Cache empty");
                return None;
            }
            Err(err) => {
                // Fail closed: a broken cache degrades to re-authentication.
                warn!(backend = self.store.name(), %err, "Cache read failed; treating as miss");
                return None;
            }
        };
        if record.is_tombstone() {
            debug!(backend = self.store.name(), "Cache holds a tombstone");
            return None;
        }
        if record.expires_within(self.buffer) {
            debug!(
                backend = self.store.name(),
                expiration = %record.expiration,
                "Cached credential expired or expiring within the buffer"
            );
            return None;
        }
        Some(record.credential())
    }

    pub fn write(&self, credential: &CloudCredential) -> Result<()> {
        self.store.write(&CacheRecord::new(credential))
    }

    pub fn invalidate(&self) -> Result<()> {
        self.store.invalidate()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }
}

/// In-memory store for tests and fakes.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<CacheRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the raw stored record, bypassing policy.
    pub fn stored(&self) -> Option<CacheRecord> {
        self.slot.lock().unwrap().clone()
    }
}

impl CredentialStore for MemoryStore {
    fn read(&self) -> Result<Option<CacheRecord>> {
        Ok(self.slot.lock().unwrap().clone())
    }

    fn write(&self, record: &CacheRecord) -> Result<()> {
        *self.slot.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            *slot = Some(CacheRecord::tombstone());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
