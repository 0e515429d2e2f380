//! # trelldap-sync
//!
//! Reconciliation engine between a directory and a collaboration platform.
//!
//! Build a [`Reconciler`] from a [`DirectoryClient`] and a [`PlatformClient`],
//! then call [`Reconciler::run`] with a loaded
//! [`MembershipStore`](trelldap_core::MembershipStore).

pub mod clients;
pub mod engine;
pub mod error;
pub mod retry;

pub use clients::{DirectoryClient, PlatformClient};
pub use engine::{
    DepartedMember, OrganizationGap, ReconcileOptions, ReconcileReport, Reconciler, UnresolvedMail,
};
pub use error::{DirectoryError, PlatformError, SyncError};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
