//! Seams to the two remote systems.
//!
//! The engine only talks to these traits; `trelldap-ldap` and
//! `trelldap-trello` provide the production implementations.

use std::collections::BTreeSet;

use trelldap_core::{DirectoryMember, PlatformIdentity, Uid};

use crate::error::{DirectoryError, PlatformError};

/// Read access to the authoritative directory.
pub trait DirectoryClient {
    /// The full member set, in directory order. Called once per run.
    fn members(&mut self) -> Result<Vec<DirectoryMember>, DirectoryError>;

    /// Additional mail addresses for `uid`. An empty list when the directory
    /// has no alias support.
    fn aliases(&mut self, uid: &Uid) -> Result<Vec<String>, DirectoryError>;

    /// Drop the current session and establish a new one.
    fn reconnect(&mut self) -> Result<(), DirectoryError>;
}

/// Read access to the collaboration platform.
pub trait PlatformClient {
    /// Look up the account registered under `mail`.
    ///
    /// `Ok(None)` means the platform has no matching account.
    fn search_by_email(&mut self, mail: &str) -> Result<Option<PlatformIdentity>, PlatformError>;

    /// Member ids of the configured organization, or `Ok(None)` when no
    /// organization is configured.
    fn organization_member_ids(&mut self) -> Result<Option<BTreeSet<String>>, PlatformError>;
}
