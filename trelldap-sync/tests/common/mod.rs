//! In-memory directory and platform doubles shared by the engine tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use trelldap_core::{DirectoryMember, PlatformIdentity, Uid};
use trelldap_sync::{
    DirectoryClient, DirectoryError, PlatformClient, PlatformError, ReconcileOptions, RetryPolicy,
    Sleeper,
};

pub fn member(uid: &str, fullname: &str, mails: &[&str]) -> DirectoryMember {
    DirectoryMember::new(uid, fullname, mails.iter().map(|m| m.to_string()).collect())
}

pub fn identity(id: &str, username: &str) -> PlatformIdentity {
    PlatformIdentity {
        id: id.to_string(),
        active: true,
        full_name: username.to_uppercase(),
        username: username.to_string(),
    }
}

/// Options with no real waiting and small budgets.
pub fn fast_options() -> ReconcileOptions {
    ReconcileOptions {
        rate_limit: RetryPolicy::new(Some(5), Duration::from_secs(300)),
        reconnect: RetryPolicy::new(Some(3), Duration::from_secs(5)),
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    pub members: Vec<DirectoryMember>,
    pub aliases: HashMap<Uid, Vec<String>>,
    /// Errors handed out by `aliases` before it starts succeeding.
    pub alias_failures: VecDeque<DirectoryError>,
    pub members_error: Option<String>,
    pub alias_calls: Vec<Uid>,
    pub reconnects: u32,
}

impl FakeDirectory {
    pub fn new(members: Vec<DirectoryMember>) -> Self {
        Self {
            members,
            ..Self::default()
        }
    }

    pub fn with_aliases(mut self, uid: &str, aliases: &[&str]) -> Self {
        self.aliases.insert(
            Uid::from(uid),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
        self
    }
}

impl DirectoryClient for FakeDirectory {
    fn members(&mut self) -> Result<Vec<DirectoryMember>, DirectoryError> {
        match &self.members_error {
            Some(msg) => Err(DirectoryError::Query(msg.clone())),
            None => Ok(self.members.clone()),
        }
    }

    fn aliases(&mut self, uid: &Uid) -> Result<Vec<String>, DirectoryError> {
        self.alias_calls.push(uid.clone());
        if let Some(err) = self.alias_failures.pop_front() {
            return Err(err);
        }
        Ok(self.aliases.get(uid).cloned().unwrap_or_default())
    }

    fn reconnect(&mut self) -> Result<(), DirectoryError> {
        self.reconnects += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePlatform {
    pub accounts: HashMap<String, PlatformIdentity>,
    /// 1-based call numbers that answer "rate limited".
    pub rate_limited_calls: HashSet<usize>,
    pub always_rate_limited: bool,
    /// Mails that fail with HTTP 500.
    pub broken: HashSet<String>,
    pub organization: Option<BTreeSet<String>>,
    /// The organization listing fails with HTTP 503.
    pub organization_error: bool,
    /// How many listing calls answer "rate limited" before one succeeds.
    pub organization_rate_limited: usize,
    pub organization_calls: usize,
    pub calls: Vec<String>,
}

impl FakePlatform {
    pub fn with_account(mut self, mail: &str, id: &str, username: &str) -> Self {
        self.accounts.insert(mail.to_string(), identity(id, username));
        self
    }
}

impl PlatformClient for FakePlatform {
    fn search_by_email(&mut self, mail: &str) -> Result<Option<PlatformIdentity>, PlatformError> {
        self.calls.push(mail.to_string());
        if self.always_rate_limited || self.rate_limited_calls.contains(&self.calls.len()) {
            return Err(PlatformError::RateLimited { retry_after: None });
        }
        if self.broken.contains(mail) {
            return Err(PlatformError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        Ok(self.accounts.get(mail).cloned())
    }

    fn organization_member_ids(&mut self) -> Result<Option<BTreeSet<String>>, PlatformError> {
        self.organization_calls += 1;
        if self.organization_calls <= self.organization_rate_limited {
            return Err(PlatformError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            });
        }
        if self.organization_error {
            return Err(PlatformError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(self.organization.clone())
    }
}

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

/// Records each requested wait and, when given a path, what the state file
/// held at that moment.
#[derive(Clone, Default)]
pub struct SnapshotSleeper {
    pub state_file: Option<PathBuf>,
    pub waits: Rc<RefCell<Vec<Duration>>>,
    pub snapshots: Rc<RefCell<Vec<Option<String>>>>,
}

impl SnapshotSleeper {
    pub fn watching(path: impl Into<PathBuf>) -> Self {
        Self {
            state_file: Some(path.into()),
            ..Self::default()
        }
    }
}

impl Sleeper for SnapshotSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
        if let Some(path) = &self.state_file {
            self.snapshots
                .borrow_mut()
                .push(std::fs::read_to_string(path).ok());
        }
    }
}
