//! Reconciliation engine.
//!
//! ## One pass
//!
//! 1. Ingest: take the directory snapshot, create records for new `uid`s
//!    (with their mail aliases) and mark every listed `uid` as seen.
//! 2. Correlate: look up every mail not yet present in a record's links.
//!    A rate-limited lookup checkpoints the store, waits, and retries.
//! 3. Sweep: report records the directory no longer lists.
//! 4. Audit: report linked accounts outside the platform organization.
//! 5. Persist: save the store.

use std::collections::HashSet;

use trelldap_core::config::SyncConfig;
use trelldap_core::{MembershipStore, ReconciliationRecord, Uid};

use crate::clients::{DirectoryClient, PlatformClient};
use crate::error::{DirectoryError, PlatformError, SyncError};
use crate::retry::{retry, Attempt, RetryPolicy, Sleeper, ThreadSleeper};

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Retry budgets for the two recoverable failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub rate_limit: RetryPolicy,
    pub reconnect: RetryPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            rate_limit: RetryPolicy::rate_limit(),
            reconnect: RetryPolicy::reconnect(),
        }
    }
}

impl From<&SyncConfig> for ReconcileOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            rate_limit: RetryPolicy::new(
                cfg.rate_limit_max_attempts,
                std::time::Duration::from_secs(cfg.rate_limit_cooldown_secs),
            ),
            reconnect: RetryPolicy::new(
                cfg.reconnect_max_attempts,
                std::time::Duration::from_secs(cfg.reconnect_cooldown_secs),
            ),
        }
    }
}

/// A cached record whose `uid` was missing from this run's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartedMember {
    pub uid: Uid,
    pub fullname: String,
}

/// A mail whose lookup failed for a reason other than rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedMail {
    pub uid: Uid,
    pub mail: String,
    /// `true` when this is the member's first (canonical) address.
    pub canonical: bool,
    pub error: String,
}

/// A linked platform account that is not a member of the organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationGap {
    pub uid: Uid,
    pub platform_id: String,
    pub username: String,
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Size of the directory snapshot.
    pub members: usize,
    /// `uid`s seen for the first time.
    pub discovered: Vec<Uid>,
    /// Mails linked to a platform account during this pass.
    pub resolved: usize,
    /// Mails the platform definitively has no account for.
    pub not_found: usize,
    pub unresolved: Vec<UnresolvedMail>,
    pub rate_limit_waits: u32,
    pub reconnects: u32,
    pub departed: Vec<DepartedMember>,
    /// `None` when no organization is configured or the listing failed.
    pub not_in_organization: Option<Vec<OrganizationGap>>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Drives one reconciliation pass over a [`MembershipStore`].
pub struct Reconciler<D, P, S = ThreadSleeper> {
    directory: D,
    platform: P,
    sleeper: S,
    options: ReconcileOptions,
}

impl<D, P> Reconciler<D, P, ThreadSleeper>
where
    D: DirectoryClient,
    P: PlatformClient,
{
    pub fn new(directory: D, platform: P, options: ReconcileOptions) -> Self {
        Self {
            directory,
            platform,
            sleeper: ThreadSleeper,
            options,
        }
    }
}

impl<D, P, S> Reconciler<D, P, S>
where
    D: DirectoryClient,
    P: PlatformClient,
    S: Sleeper,
{
    /// Replace the cooldown sleeper.
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> Reconciler<D, P, T> {
        Reconciler {
            directory: self.directory,
            platform: self.platform,
            sleeper,
            options: self.options,
        }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Run one full pass and persist the result.
    ///
    /// When a retry budget runs out the store is checkpointed before the
    /// error is returned, so work completed so far survives.
    pub fn run(&mut self, store: &mut MembershipStore) -> Result<ReconcileReport, SyncError> {
        match self.pass(store) {
            Err(err @ SyncError::RetriesExhausted { .. }) => {
                store.save()?;
                Err(err)
            }
            other => other,
        }
    }

    fn pass(&mut self, store: &mut MembershipStore) -> Result<ReconcileReport, SyncError> {
        let mut report = ReconcileReport::default();

        let order = self.ingest(store, &mut report)?;
        self.correlate(store, &order, &mut report)?;
        sweep(store, &mut report);
        self.audit_organization(store, &mut report)?;

        store.save()?;
        tracing::info!(
            members = report.members,
            discovered = report.discovered.len(),
            resolved = report.resolved,
            not_found = report.not_found,
            unresolved = report.unresolved.len(),
            departed = report.departed.len(),
            "reconciliation pass complete"
        );
        Ok(report)
    }

    /// Step 1. Returns the snapshot's `uid`s in directory order, without
    /// duplicates.
    fn ingest(
        &mut self,
        store: &mut MembershipStore,
        report: &mut ReconcileReport,
    ) -> Result<Vec<Uid>, SyncError> {
        store.reset_seen();
        let snapshot = self.directory.members()?;
        report.members = snapshot.len();
        tracing::info!(members = snapshot.len(), "directory snapshot taken");

        let mut order = Vec::with_capacity(snapshot.len());
        let mut listed: HashSet<Uid> = HashSet::with_capacity(snapshot.len());
        for member in snapshot {
            if !listed.insert(member.uid.clone()) {
                tracing::debug!(uid = %member.uid, "duplicate uid in directory snapshot");
                continue;
            }

            if !store.contains(&member.uid) {
                if member.canonical_mail().is_none() {
                    tracing::warn!(uid = %member.uid, "directory entry has no mail address");
                }
                let aliases = self.aliases_for(&member.uid, report)?;
                let record =
                    ReconciliationRecord::new(member.fullname, member.mails.into_iter().chain(aliases));
                tracing::info!(
                    uid = %member.uid,
                    mails = record.mails.len(),
                    "new directory member since last run"
                );
                store.insert_new(member.uid.clone(), record);
                report.discovered.push(member.uid.clone());
            }

            if let Some(record) = store.get_mut(&member.uid) {
                record.seen_in_directory = true;
            }
            order.push(member.uid);
        }
        Ok(order)
    }

    /// Alias lookup with reconnect-and-retry on connection loss. Any other
    /// failure degrades to "no aliases".
    fn aliases_for(
        &mut self,
        uid: &Uid,
        report: &mut ReconcileReport,
    ) -> Result<Vec<String>, SyncError> {
        let Self {
            directory,
            sleeper,
            options,
            ..
        } = self;

        let outcome = retry(
            "directory alias lookup",
            &options.reconnect,
            &*sleeper,
            |attempt| {
                if attempt > 1 {
                    report.reconnects += 1;
                    tracing::info!(uid = %uid, attempt, "reconnecting to directory");
                    if let Err(err) = directory.reconnect() {
                        return classify_directory(Err(err));
                    }
                }
                classify_directory(directory.aliases(uid))
            },
            |_, _| Ok(()),
        )?;

        match outcome {
            Ok(aliases) => Ok(aliases),
            Err(err) => {
                tracing::warn!(uid = %uid, error = %err, "alias lookup failed, keeping directory mails only");
                Ok(Vec::new())
            }
        }
    }

    /// Step 2.
    fn correlate(
        &mut self,
        store: &mut MembershipStore,
        order: &[Uid],
        report: &mut ReconcileReport,
    ) -> Result<(), SyncError> {
        let Self {
            platform,
            sleeper,
            options,
            ..
        } = self;

        for uid in order {
            let Some(record) = store.get(uid) else {
                continue;
            };
            let canonical = record.mails.first().cloned();
            let pending = record.pending_mails();

            for mail in pending {
                let outcome = {
                    let store_ref: &MembershipStore = store;
                    let waits = &mut report.rate_limit_waits;
                    retry(
                        "platform member lookup",
                        &options.rate_limit,
                        &*sleeper,
                        |_| classify_platform(platform.search_by_email(&mail)),
                        |err, _| {
                            *waits += 1;
                            note_retry_hint(err, options.rate_limit.cooldown);
                            tracing::info!(
                                path = %store_ref.path().display(),
                                "platform rate limit reached, checkpointing before cooldown"
                            );
                            store_ref.save().map_err(SyncError::from)
                        },
                    )?
                };

                let is_canonical = canonical.as_deref() == Some(mail.as_str());
                match outcome {
                    Ok(resolution) => {
                        match &resolution {
                            Some(identity) => {
                                tracing::info!(
                                    uid = %uid,
                                    mail = %mail,
                                    platform_id = %identity.id,
                                    username = %identity.username,
                                    "mail linked to platform account"
                                );
                                report.resolved += 1;
                            }
                            None => {
                                tracing::info!(uid = %uid, mail = %mail, "no platform account for mail");
                                report.not_found += 1;
                            }
                        }
                        if let Some(record) = store.get_mut(uid) {
                            record.link(mail, resolution);
                        }
                    }
                    Err(err) => {
                        if is_canonical {
                            tracing::warn!(uid = %uid, mail = %mail, error = %err, "canonical mail left unresolved");
                        } else {
                            tracing::warn!(uid = %uid, mail = %mail, error = %err, "mail left unresolved");
                        }
                        report.unresolved.push(UnresolvedMail {
                            uid: uid.clone(),
                            mail,
                            canonical: is_canonical,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 4. Informational; only a failed checkpoint stops the run.
    fn audit_organization(
        &mut self,
        store: &MembershipStore,
        report: &mut ReconcileReport,
    ) -> Result<(), SyncError> {
        let Self {
            platform,
            sleeper,
            options,
            ..
        } = self;

        let waits = &mut report.rate_limit_waits;
        let listing = retry(
            "organization membership listing",
            &options.rate_limit,
            &*sleeper,
            |_| classify_platform(platform.organization_member_ids()),
            |err, _| {
                *waits += 1;
                note_retry_hint(err, options.rate_limit.cooldown);
                store.save().map_err(SyncError::from)
            },
        );

        let ids = match listing {
            Ok(Ok(Some(ids))) => ids,
            Ok(Ok(None)) => {
                tracing::debug!("no organization configured, skipping membership audit");
                return Ok(());
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "organization membership listing failed");
                return Ok(());
            }
            Err(err @ SyncError::RetriesExhausted { .. }) => {
                tracing::warn!(error = %err, "organization membership listing skipped");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let mut gaps = Vec::new();
        for (uid, record) in store.iter().filter(|(_, r)| r.seen_in_directory) {
            for identity in record.identities() {
                if !ids.contains(&identity.id) {
                    tracing::info!(
                        uid = %uid,
                        username = %identity.username,
                        "linked account is not an organization member"
                    );
                    gaps.push(OrganizationGap {
                        uid: uid.clone(),
                        platform_id: identity.id.clone(),
                        username: identity.username.clone(),
                    });
                }
            }
        }
        report.not_in_organization = Some(gaps);
        Ok(())
    }
}

/// The cooldown stays fixed; a longer server hint is only reported.
fn note_retry_hint(err: &PlatformError, cooldown: std::time::Duration) {
    if let Some(hint) = err.retry_after() {
        if hint > cooldown {
            tracing::warn!(
                retry_after_secs = hint.as_secs(),
                cooldown_secs = cooldown.as_secs(),
                "server asks for a longer wait than the configured cooldown"
            );
        } else {
            tracing::debug!(retry_after_secs = hint.as_secs(), "server retry hint");
        }
    }
}

/// Step 3. Observational only: departed records are left in the store.
fn sweep(store: &MembershipStore, report: &mut ReconcileReport) {
    report.departed = store
        .departed()
        .map(|(uid, record)| DepartedMember {
            uid: uid.clone(),
            fullname: record.fullname.clone(),
        })
        .collect();
    for member in &report.departed {
        tracing::info!(uid = %member.uid, fullname = %member.fullname, "member no longer in directory");
    }
}

fn classify_directory<T>(
    result: Result<T, DirectoryError>,
) -> Attempt<Result<T, DirectoryError>, DirectoryError> {
    match result {
        Err(err) if err.is_disconnect() => Attempt::Backoff(err),
        other => Attempt::Done(other),
    }
}

fn classify_platform<T>(
    result: Result<T, PlatformError>,
) -> Attempt<Result<T, PlatformError>, PlatformError> {
    match result {
        Err(err) if err.is_rate_limited() => Attempt::Backoff(err),
        other => Attempt::Done(other),
    }
}
