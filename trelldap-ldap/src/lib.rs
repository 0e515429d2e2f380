//! # LDAP directory client
//!
//! [`LdapDirectory`] implements [`DirectoryClient`] on top of the blocking
//! `ldap3::LdapConn`.
//!
//! - member search: one-level search under `baseDN` with the configured filter
//! - alias search: optional, one query per newly seen `uid`
//! - STARTTLS and simple bind when `secure` is set
//! - connection-class failures map to [`DirectoryError::Disconnected`] so the
//!   engine can reconnect and retry

use ldap3::{ldap_escape, LdapConn, LdapConnSettings, LdapError, Scope, SearchEntry};
use tracing::{debug, info, warn};

use trelldap_core::config::{AliasConfig, LdapConfig, MemberAttributes};
use trelldap_core::{DirectoryMember, Uid};
use trelldap_sync::{DirectoryClient, DirectoryError};

/// LDAP result codes that mean the server (or the path to it) went away.
const DISCONNECT_CODES: [u32; 3] = [
    51, // busy
    52, // unavailable
    80, // other, returned by several servers on shutdown
];

/// Directory client holding one LDAP session.
pub struct LdapDirectory {
    config: LdapConfig,
    conn: Option<LdapConn>,
}

impl LdapDirectory {
    /// Open and, when `secure` is set, STARTTLS + bind a session.
    pub fn connect(config: LdapConfig) -> Result<Self, DirectoryError> {
        let conn = open(&config)?;
        Ok(Self {
            config,
            conn: Some(conn),
        })
    }

    fn session(&mut self) -> Result<&mut LdapConn, DirectoryError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DirectoryError::Disconnected("no open LDAP session".to_string()))
    }

    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: Vec<&str>,
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        let timeout = self.config.timeout();
        let conn = self.session()?;
        debug!(base = %base, filter = %filter, "searching LDAP");
        let (entries, _) = conn
            .with_timeout(timeout)
            .search(base, Scope::OneLevel, filter, attrs)
            .and_then(|result| result.success())
            .map_err(classify)?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }
}

impl DirectoryClient for LdapDirectory {
    fn members(&mut self) -> Result<Vec<DirectoryMember>, DirectoryError> {
        let attributes = self.config.attributes.clone();
        let base = self.config.base_dn.clone();
        let filter = self.config.filter.clone();
        let entries = self.search(
            &base,
            &filter,
            vec![
                attributes.uid.as_str(),
                attributes.fullname.as_str(),
                attributes.mail.as_str(),
            ],
        )?;

        let mut members = Vec::with_capacity(entries.len());
        for entry in &entries {
            match member_from_entry(entry, &attributes) {
                Some(member) => members.push(member),
                None => warn!(dn = %entry.dn, "directory entry has no uid, skipping"),
            }
        }
        info!(members = members.len(), "LDAP member search completed");
        Ok(members)
    }

    fn aliases(&mut self, uid: &Uid) -> Result<Vec<String>, DirectoryError> {
        let Some(cfg) = self.config.aliases.clone() else {
            return Ok(Vec::new());
        };
        let filter = alias_filter(&cfg, uid);
        let entries = self.search(
            &cfg.base_dn,
            &filter,
            vec![cfg.alias_attribute.as_str(), cfg.mail_attribute.as_str()],
        )?;
        let aliases = aliases_from_entries(&entries, &cfg);
        debug!(uid = %uid, aliases = aliases.len(), "alias lookup completed");
        Ok(aliases)
    }

    fn reconnect(&mut self) -> Result<(), DirectoryError> {
        if let Some(mut old) = self.conn.take() {
            let _ = old.unbind();
        }
        self.conn = Some(open(&self.config)?);
        info!(url = %self.config.url(), "LDAP session re-established");
        Ok(())
    }
}

impl Drop for LdapDirectory {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.unbind();
        }
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("config", &self.config)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

fn open(config: &LdapConfig) -> Result<LdapConn, DirectoryError> {
    let url = config.url();
    let settings = LdapConnSettings::new()
        .set_conn_timeout(config.timeout())
        .set_starttls(config.secure);

    debug!(url = %url, starttls = config.secure, "connecting to LDAP server");
    let mut conn = LdapConn::with_settings(settings, &url).map_err(classify)?;

    if config.secure {
        debug!(bind_dn = %config.bind_dn, "performing LDAP bind");
        conn.simple_bind(&config.bind_dn, &config.password)
            .and_then(|result| result.success())
            .map_err(|err| match classify(err) {
                DirectoryError::Query(msg) => {
                    DirectoryError::Query(format!("bind as {} failed: {msg}", config.bind_dn))
                }
                other => other,
            })?;
    }
    Ok(conn)
}

/// Sort an `ldap3` failure into reconnectable or not.
pub fn classify(err: LdapError) -> DirectoryError {
    let disconnected = match &err {
        LdapError::Io { .. }
        | LdapError::EndOfStream
        | LdapError::OpSend { .. }
        | LdapError::ResultRecv { .. }
        | LdapError::Timeout { .. } => true,
        LdapError::LdapResult { result } => DISCONNECT_CODES.contains(&result.rc),
        _ => false,
    };
    if disconnected {
        DirectoryError::Disconnected(err.to_string())
    } else {
        DirectoryError::Query(err.to_string())
    }
}

fn first<'a>(entry: &'a SearchEntry, attr: &str) -> Option<&'a str> {
    entry
        .attrs
        .get(attr)
        .and_then(|values| values.first())
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Map a member entry; `None` when it carries no uid.
pub fn member_from_entry(entry: &SearchEntry, attrs: &MemberAttributes) -> Option<DirectoryMember> {
    let uid = first(entry, &attrs.uid)?;
    let fullname = first(entry, &attrs.fullname).unwrap_or(uid);
    let mails = entry
        .attrs
        .get(&attrs.mail)
        .map(|values| {
            values
                .iter()
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Some(DirectoryMember::new(uid, fullname, mails))
}

/// Alias search filter for `uid`, with the uid escaped.
pub fn alias_filter(cfg: &AliasConfig, uid: &Uid) -> String {
    cfg.filter.replace("{uid}", &ldap_escape(uid.as_str()))
}

/// Mail addresses of single-target alias entries. Entries pointing at more
/// than one recipient are mailing lists, not personal aliases.
pub fn aliases_from_entries(entries: &[SearchEntry], cfg: &AliasConfig) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| {
            entry
                .attrs
                .get(&cfg.alias_attribute)
                .map_or(0, Vec::len)
                <= 1
        })
        .filter_map(|entry| first(entry, &cfg.mail_attribute))
        .map(str::to_string)
        .collect()
}
