//! trelldap core library: domain types, membership store, configuration, errors.
//!
//! - [`types`]: directory/platform identities and the persisted record
//! - [`store`]: [`MembershipStore`] load / save
//! - [`config`]: [`Config`] loading with `env:` substitution
//! - [`error`]: [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, StoreError};
pub use store::MembershipStore;
pub use types::{DirectoryMember, PlatformIdentity, ReconciliationRecord, Resolution, Uid};
