//! Membership store: the persisted map from directory `uid` to
//! [`ReconciliationRecord`].
//!
//! # File layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "members": {
//!     "<uid>": { "fullname": …, "mails": […], "trello": { "<mail>": {…} | null }, … }
//!   }
//! }
//! ```
//!
//! The flat layout written by earlier releases (`{ "<uid>": { fullname, mails,
//! trelloid, timestamp } }`) is still accepted on load and migrated.
//!
//! Writes use the `.tmp` + rename pattern: the previous file is either left
//! intact or fully replaced, never half-written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::types::{ReconciliationRecord, Uid};

/// Schema version written by [`MembershipStore::save`].
pub const STATE_VERSION: u32 = 1;

pub type Members = BTreeMap<Uid, ReconciliationRecord>;

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    members: &'a Members,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateCompat {
    Versioned(VersionedCompat),
    Legacy(BTreeMap<Uid, LegacyMeta>),
}

#[derive(Debug, Deserialize)]
struct VersionedCompat {
    version: u32,
    #[serde(default)]
    members: Members,
}

#[derive(Debug, Deserialize)]
struct LegacyMeta {
    fullname: String,
    #[serde(default)]
    mails: Option<Vec<String>>,
    #[serde(default)]
    timestamp: i64,
}

impl LegacyMeta {
    fn migrate(self) -> ReconciliationRecord {
        let mut record = ReconciliationRecord::new(self.fullname, self.mails.unwrap_or_default());
        if let Some(first_seen) = legacy_timestamp(self.timestamp) {
            record.first_seen = first_seen;
        }
        record
    }
}

/// The top-level numeric `version`, if the document declares one. Legacy
/// files are keyed by uid, so a member named `version` holds an object and
/// is not mistaken for a schema marker.
fn declared_version(value: &serde_json::Value) -> Option<u64> {
    value.get("version").and_then(serde_json::Value::as_u64)
}

fn legacy_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// In-memory membership map bound to its state file.
#[derive(Debug, Clone)]
pub struct MembershipStore {
    path: PathBuf,
    members: Members,
}

impl MembershipStore {
    /// An empty store that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            members: Members::new(),
        }
    }

    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store. A file that cannot be read or
    /// parsed is renamed to `<file>.corrupt` and an empty store is returned,
    /// so a bad cache never blocks a run. Only a file written by a newer
    /// schema (or a failure to move a bad file aside) is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no state file found, starting empty");
            return Ok(Self::empty(path));
        }

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "state file unreadable");
                set_aside(&path)?;
                return Ok(Self::empty(path));
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::empty(path));
        }

        let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "state file is not valid JSON");
                set_aside(&path)?;
                return Ok(Self::empty(path));
            }
        };

        // Checked before the records are decoded: a newer schema may not
        // parse as this one, and must never be set aside and overwritten.
        if let Some(found) = declared_version(&value) {
            if found != u64::from(STATE_VERSION) {
                return Err(StoreError::UnsupportedVersion {
                    path,
                    found: u32::try_from(found).unwrap_or(u32::MAX),
                });
            }
        }

        let members = match serde_json::from_value::<StateCompat>(value) {
            Ok(StateCompat::Versioned(state)) => {
                tracing::debug!(version = state.version, "versioned state file");
                state.members
            }
            Ok(StateCompat::Legacy(legacy)) => {
                tracing::info!(
                    path = %path.display(),
                    members = legacy.len(),
                    "migrating legacy state file"
                );
                legacy
                    .into_iter()
                    .map(|(uid, meta)| (uid, meta.migrate()))
                    .collect()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "state file does not match any known layout");
                set_aside(&path)?;
                return Ok(Self::empty(path));
            }
        };

        tracing::debug!(path = %path.display(), members = members.len(), "state loaded");
        Ok(Self { path, members })
    }

    /// Persist the full map atomically.
    ///
    /// Writes `<file>.tmp` next to the target, restricts it to the owner, then
    /// renames it over the target.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }

        let json = serde_json::to_string_pretty(&StateFileRef {
            version: STATE_VERSION,
            members: &self.members,
        })?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, json + "\n").map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        tracing::debug!(path = %self.path.display(), members = self.members.len(), "state saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn members(&self) -> &Members {
        &self.members
    }

    pub fn get(&self, uid: &Uid) -> Option<&ReconciliationRecord> {
        self.members.get(uid)
    }

    pub fn get_mut(&mut self, uid: &Uid) -> Option<&mut ReconciliationRecord> {
        self.members.get_mut(uid)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.members.contains_key(uid)
    }

    /// Insert a record for a `uid` seen for the first time.
    ///
    /// An existing record is never replaced; returns `false` in that case.
    pub fn insert_new(&mut self, uid: Uid, record: ReconciliationRecord) -> bool {
        if self.members.contains_key(&uid) {
            return false;
        }
        self.members.insert(uid, record);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uid, &ReconciliationRecord)> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Clear `seen_in_directory` on every record before a directory pass.
    pub fn reset_seen(&mut self) {
        for record in self.members.values_mut() {
            record.seen_in_directory = false;
        }
    }

    /// Records not seen in the current directory pass, in `uid` order.
    pub fn departed(&self) -> impl Iterator<Item = (&Uid, &ReconciliationRecord)> {
        self.members.iter().filter(|(_, r)| !r.seen_in_directory)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

fn set_aside(path: &Path) -> Result<(), StoreError> {
    let target = corrupt_path(path);
    std::fs::rename(path, &target).map_err(|e| io_err(path, e))?;
    tracing::warn!(moved_to = %target.display(), "bad state file set aside, starting empty");
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}
