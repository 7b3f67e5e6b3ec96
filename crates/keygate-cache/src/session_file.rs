//! Session-file backend: the shared AWS credentials file.
//!
//! This backend exists for its read path: once a valid credential is in
//! `~/.aws/credentials`, any compliant SDK reads it directly and never pays
//! the broker's subprocess round trip. The broker's own freshness marker
//! rides along as `x-` extension keys that third-party readers ignore.
//!
//! Writes are atomic: the complete new content is built in a temporary file
//! next to the target, owner-only permissions are set before any content is
//! written, then one rename moves it into place. A concurrent reader sees
//! the old file or the new one, never a mix.

use crate::store::CredentialStore;
use chrono::{DateTime, SecondsFormat, Utc};
use keygate_core::{CacheRecord, Error, Provenance, Result};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

const KEY_ACCESS_KEY: &str = "aws_access_key_id";
const KEY_SECRET_KEY: &str = "aws_secret_access_key";
const KEY_SESSION_TOKEN: &str = "aws_session_token";
const KEY_EXPIRATION: &str = "x-expiration";
const KEY_PROVENANCE: &str = "x-provenance";

pub struct SessionFileStore {
    path: PathBuf,
    profile: String,
}

impl SessionFileStore {
    /// The shared credentials file, section named after the broker profile.
    /// `AWS_SHARED_CREDENTIALS_FILE` overrides the default
    /// `~/.aws/credentials` location, matching the AWS CLI.
    pub fn new(profile: &str) -> Result<Self> {
        if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE")
            && !path.is_empty()
        {
            return Ok(Self::at_path(path, profile));
        }
        let home = directories::UserDirs::new()
            .ok_or_else(|| Error::CacheIo("cannot determine the home directory".to_string()))?;
        let path = home.home_dir().join(".aws").join("credentials");
        Ok(Self::at_path(path, profile))
    }

    /// Point the store at an explicit file, bypassing the standard location.
    pub fn at_path(path: impl Into<PathBuf>, profile: &str) -> Self {
        Self {
            path: path.into(),
            profile: profile.to_string(),
        }
    }

    fn record_from_section(&self, section: &Section) -> Option<CacheRecord> {
        let access_key_id = section.value(KEY_ACCESS_KEY)?.to_string();
        let secret_access_key = section.value(KEY_SECRET_KEY)?.to_string();
        let session_token = section.value(KEY_SESSION_TOKEN)?.to_string();

        // A section without the broker's expiration marker was written by
        // someone else; its freshness is unknown, so treat it as expired.
        let expiration = section
            .value(KEY_EXPIRATION)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH);
        let provenance = match section.value(KEY_PROVENANCE) {
            Some("broker") => Provenance::Broker,
            _ => Provenance::Direct,
        };

        Some(CacheRecord {
            version: keygate_core::credential::SCHEMA_VERSION,
            access_key_id,
            secret_access_key,
            session_token,
            expiration,
            provenance,
        })
    }

    fn section_lines(&self, record: &CacheRecord) -> Vec<String> {
        vec![
            format!("[{}]", self.profile),
            format!("{KEY_ACCESS_KEY} = {}", record.access_key_id),
            format!("{KEY_SECRET_KEY} = {}", record.secret_access_key),
            format!("{KEY_SESSION_TOKEN} = {}", record.session_token),
            format!(
                "{KEY_EXPIRATION} = {}",
                record.expiration.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            format!("{KEY_PROVENANCE} = {}", match record.provenance {
                Provenance::Direct => "direct",
                Provenance::Broker => "broker",
            }),
        ]
    }

    fn load(&self) -> Result<CredentialsFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(CredentialsFile::parse(&content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(CredentialsFile::default())
            }
            Err(err) => Err(Error::CacheIo(format!(
                "cannot read {}: {err}",
                self.path.display()
            ))),
        }
    }

    /// Replace the whole file in one rename.
    fn store_atomically(&self, content: &str) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            Error::CacheIo(format!("{} has no parent directory", self.path.display()))
        })?;
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::CacheIo(format!("cannot create {}: {err}", parent.display()))
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|err| Error::CacheIo(format!("cannot create temp file: {err}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|err| Error::CacheIo(format!("cannot restrict temp file: {err}")))?;
        }
        temp.write_all(content.as_bytes())
            .map_err(|err| Error::CacheIo(format!("cannot write temp file: {err}")))?;
        temp.persist(&self.path).map_err(|err| {
            Error::CacheIo(format!("cannot replace {}: {err}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "Credentials file replaced atomically");
        Ok(())
    }

    fn write_record(&self, record: &CacheRecord) -> Result<()> {
        let mut file = self.load()?;
        file.replace_section(&self.profile, self.section_lines(record));
        self.store_atomically(&file.render())
    }
}

impl CredentialStore for SessionFileStore {
    fn read(&self) -> Result<Option<CacheRecord>> {
        let file = self.load()?;
        Ok(file
            .section(&self.profile)
            .and_then(|section| self.record_from_section(section)))
    }

    fn write(&self, record: &CacheRecord) -> Result<()> {
        self.write_record(record)
    }

    fn invalidate(&self) -> Result<()> {
        let file = self.load()?;
        if file.section(&self.profile).is_none() {
            return Ok(());
        }
        self.write_record(&CacheRecord::tombstone())
    }

    fn name(&self) -> &'static str {
        "session-file"
    }
}

/// A credentials file as raw sections. Foreign sections keep their exact
/// lines; only the broker's own section is ever regenerated.
#[derive(Debug, Default)]
struct CredentialsFile {
    /// Lines before the first section header (comments, usually).
    preamble: Vec<String>,
    sections: Vec<Section>,
}

#[derive(Debug)]
struct Section {
    name: String,
    lines: Vec<String>,
}

impl Section {
    fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().skip(1).find_map(|line| {
            let (k, v) = line.split_once('=')?;
            (k.trim() == key).then(|| v.trim())
        })
    }
}

impl CredentialsFile {
    fn parse(content: &str) -> Self {
        let mut file = CredentialsFile::default();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                file.sections.push(Section {
                    name: trimmed[1..trimmed.len() - 1].trim().to_string(),
                    lines: vec![line.to_string()],
                });
            } else {
                match file.sections.last_mut() {
                    Some(section) => section.lines.push(line.to_string()),
                    None => file.preamble.push(line.to_string()),
                }
            }
        }
        file
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    fn replace_section(&mut self, name: &str, lines: Vec<String>) {
        let section = Section {
            name: name.to_string(),
            lines,
        };
        match self.sections.iter_mut().find(|s| s.name == name) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }

    fn render(&self) -> String {
        let mut out = Vec::new();
        out.extend(self.preamble.iter().cloned());
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 || !self.preamble.is_empty() {
                // Blank line between blocks, dropping trailing blanks a
                // previous parse may have kept.
                while out.last().is_some_and(|line| line.trim().is_empty()) {
                    out.pop();
                }
                out.push(String::new());
            }
            out.extend(
                section
                    .lines
                    .iter()
                    .filter(|line| !(line.trim().is_empty()))
                    .cloned(),
            );
        }
        let mut rendered = out.join("\n");
        rendered.push('\n');
        rendered
    }
}
