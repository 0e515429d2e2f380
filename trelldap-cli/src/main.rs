//! trelldap: reconcile LDAP directory members with Trello accounts.
//!
//! # Usage
//!
//! ```text
//! trelldap [--config <path>]
//! ```
//!
//! One invocation performs one reconciliation pass and exits. The membership
//! state file is updated in place; progress is logged to stderr and a summary
//! is printed to stdout.

mod report;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use tracing::info;

use trelldap_core::{Config, MembershipStore};
use trelldap_ldap::LdapDirectory;
use trelldap_sync::{ReconcileOptions, Reconciler};
use trelldap_trello::TrelloClient;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "trelldap",
    version,
    about = "Reconcile LDAP directory members with Trello accounts",
    long_about = None,
)]
struct Cli {
    /// Configuration file (JSON, or YAML by extension).
    #[arg(
        long,
        short = 'c',
        env = "TRELLDAP_CONFIG",
        default_value = "config.json"
    )]
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    run(&cli.config)
}

fn run(config_path: &Path) -> Result<()> {
    let mut config = Config::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    if config.ldap.secure && config.ldap.password.is_empty() {
        config.ldap.password = Password::new()
            .with_prompt(format!("LDAP password for {}", config.ldap.bind_dn))
            .interact()
            .context("failed to read LDAP password")?;
    }

    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let state_path = config.state_file(config_dir);
    let mut store = MembershipStore::load(&state_path)
        .with_context(|| format!("failed to load state file {}", state_path.display()))?;
    info!(
        state_file = %state_path.display(),
        cached = store.len(),
        "membership state loaded"
    );

    let directory = LdapDirectory::connect(config.ldap.clone())
        .with_context(|| format!("failed to connect to {}", config.ldap.url()))?;
    let platform = TrelloClient::new(&config.trello);

    let mut reconciler = Reconciler::new(directory, platform, ReconcileOptions::from(&config.sync));
    let summary = reconciler
        .run(&mut store)
        .context("reconciliation pass failed")?;

    report::print(&summary, &state_path);
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
