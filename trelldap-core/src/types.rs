//! Domain types shared by the reconciliation engine and its clients.
//!
//! Persisted types serialize with the camelCase field names of the state file
//! (`fullname`, `mails`, `trello`, `firstSeen`, `updatedAt`).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Directory identity key (the LDAP `uid` attribute). Immutable once a record
/// has been created for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub String);

impl Uid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Directory side
// ---------------------------------------------------------------------------

/// A member as returned by one directory snapshot. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMember {
    pub uid: Uid,
    pub fullname: String,
    /// Contact addresses; the first one is canonical.
    pub mails: Vec<String>,
}

impl DirectoryMember {
    pub fn new(uid: impl Into<Uid>, fullname: impl Into<String>, mails: Vec<String>) -> Self {
        Self {
            uid: uid.into(),
            fullname: fullname.into(),
            mails,
        }
    }

    /// The canonical contact address, if the directory returned any.
    pub fn canonical_mail(&self) -> Option<&str> {
        self.mails.first().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Platform side
// ---------------------------------------------------------------------------

/// A Trello account resolved from a mail address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformIdentity {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(default)]
    pub username: String,
}

/// Result of resolving one mail address: `None` means the platform answered
/// that no account matches. Serialized as JSON `null`.
pub type Resolution = Option<PlatformIdentity>;

// ---------------------------------------------------------------------------
// Persisted record
// ---------------------------------------------------------------------------

/// Reconciliation state for one directory identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub fullname: String,
    #[serde(default)]
    pub mails: Vec<String>,
    /// Mail address → resolution. A key that is present is never looked up again.
    #[serde(rename = "trello", default)]
    pub platform_links: BTreeMap<String, Resolution>,
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Recomputed on every run; never written to disk.
    #[serde(skip)]
    pub seen_in_directory: bool,
}

impl ReconciliationRecord {
    /// Snapshot a directory member at first sighting.
    ///
    /// Mails keep their order of first occurrence; duplicates and empty
    /// strings are dropped.
    pub fn new(fullname: impl Into<String>, mails: impl IntoIterator<Item = String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for mail in mails {
            let mail = mail.trim().to_string();
            if !mail.is_empty() && !unique.contains(&mail) {
                unique.push(mail);
            }
        }
        Self {
            fullname: fullname.into(),
            mails: unique,
            platform_links: BTreeMap::new(),
            first_seen: Utc::now(),
            updated_at: None,
            seen_in_directory: false,
        }
    }

    /// Mails that have not been resolved yet, in array order.
    pub fn pending_mails(&self) -> Vec<String> {
        self.mails
            .iter()
            .filter(|m| !self.platform_links.contains_key(*m))
            .cloned()
            .collect()
    }

    pub fn is_resolved(&self, mail: &str) -> bool {
        self.platform_links.contains_key(mail)
    }

    /// Store the resolution for `mail` unless one is already present.
    ///
    /// Returns `false` (and changes nothing) when the mail was already resolved.
    pub fn link(&mut self, mail: impl Into<String>, resolution: Resolution) -> bool {
        let mail = mail.into();
        if self.platform_links.contains_key(&mail) {
            return false;
        }
        self.platform_links.insert(mail, resolution);
        self.updated_at = Some(Utc::now());
        true
    }

    /// Identities found for this record, in mail order.
    pub fn identities(&self) -> impl Iterator<Item = &PlatformIdentity> {
        self.mails
            .iter()
            .filter_map(|m| self.platform_links.get(m))
            .filter_map(Option::as_ref)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
