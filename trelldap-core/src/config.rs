//! Process configuration.
//!
//! The file is JSON unless its extension is `.yaml` / `.yml`. Before parsing,
//! every `env:NAME` token in the raw text is replaced with the value of the
//! environment variable `NAME` (empty when unset), so secrets can stay out of
//! the file:
//!
//! ```json
//! { "trello": { "key": "env:TRELLO_KEY", "token": "env:TRELLO_TOKEN" } }
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default state file name, resolved next to the config file.
pub const DEFAULT_STATE_FILE: &str = "members.json";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ldap: LdapConfig,
    pub trello: TrelloConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Directory connection and search settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapConfig {
    pub hostname: String,
    #[serde(default = "default_ldap_port", deserialize_with = "port_from_any")]
    pub port: u16,
    /// STARTTLS and bind before searching.
    #[serde(default)]
    pub secure: bool,
    #[serde(rename = "bindDN", default)]
    pub bind_dn: String,
    #[serde(default)]
    pub password: String,
    pub filter: String,
    #[serde(rename = "baseDN")]
    pub base_dn: String,
    #[serde(default)]
    pub attributes: MemberAttributes,
    /// Mail alias lookup; disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<AliasConfig>,
    #[serde(default = "default_ldap_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("bind_dn", &self.bind_dn)
            .field("password", &"***")
            .field("filter", &self.filter)
            .field("base_dn", &self.base_dn)
            .field("attributes", &self.attributes)
            .field("aliases", &self.aliases)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LdapConfig {
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.hostname, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Attribute names read from member entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemberAttributes {
    pub uid: String,
    pub fullname: String,
    pub mail: String,
}

impl Default for MemberAttributes {
    fn default() -> Self {
        Self {
            uid: "uid".to_string(),
            fullname: "cn".to_string(),
            mail: "mail".to_string(),
        }
    }
}

/// Where and how mail aliases are looked up for a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct AliasConfig {
    #[serde(rename = "baseDN")]
    pub base_dn: String,
    /// Search filter; `{uid}` is replaced by the escaped member uid.
    pub filter: String,
    /// Attribute listing the alias targets; entries with more than one value
    /// are distribution lists and are skipped.
    pub alias_attribute: String,
    /// Attribute holding the alias mail address.
    pub mail_attribute: String,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            base_dn: "ou=mx,dc=redhat,dc=com".to_string(),
            filter: "(sendmailMTAAliasValue={uid})".to_string(),
            alias_attribute: "sendmailMTAAliasValue".to_string(),
            mail_attribute: "rhatEmailAddress".to_string(),
        }
    }
}

/// Trello API credentials and scope.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrelloConfig {
    pub key: String,
    pub token: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub board: String,
    #[serde(default = "default_trello_api_url")]
    pub api_url: String,
    #[serde(default = "default_trello_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TrelloConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrelloConfig")
            .field("key", &"***")
            .field("token", &"***")
            .field("organization", &self.organization)
            .field("board", &self.board)
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl TrelloConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Engine settings: state file location and retry budgets.
///
/// A `null` attempt limit means retry forever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Relative paths are resolved against the config file's directory.
    pub state_file: Option<PathBuf>,
    pub rate_limit_cooldown_secs: u64,
    pub rate_limit_max_attempts: Option<u32>,
    pub reconnect_cooldown_secs: u64,
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            rate_limit_cooldown_secs: 300,
            rate_limit_max_attempts: Some(12),
            reconnect_cooldown_secs: 5,
            reconnect_max_attempts: Some(5),
        }
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_ldap_timeout_secs() -> u64 {
    30
}

fn default_trello_api_url() -> String {
    "https://api.trello.com/1".to_string()
}

fn default_trello_timeout_secs() -> u64 {
    30
}

/// Ports were historically written as strings (`"389"`); accept both forms.
fn port_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => Ok(n),
        Port::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Replace every `env:NAME` token with the value of `$NAME`.
pub fn substitute_env(raw: &str) -> String {
    substitute_with(raw, |name| std::env::var(name).ok())
}

/// [`substitute_env`] with an explicit lookup; unknown names become empty.
pub fn substitute_with<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    static ENV_TOKEN: OnceLock<Regex> = OnceLock::new();
    let re = ENV_TOKEN
        .get_or_init(|| Regex::new(r"env:([A-Z_][A-Z0-9_]*)").expect("valid env token pattern"));
    re.replace_all(raw, |caps: &regex::Captures<'_>| {
        lookup(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Read, substitute, parse and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(path, &substitute_env(&raw))?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_json::from_str(text).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("ldap.hostname", &self.ldap.hostname),
            ("ldap.baseDN", &self.ldap.base_dn),
            ("ldap.filter", &self.ldap.filter),
            ("trello.key", &self.trello.key),
            ("trello.token", &self.trello.token),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if self.ldap.secure && self.ldap.bind_dn.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ldap.bindDN is required when ldap.secure is set".to_string(),
            ));
        }
        if let Some(aliases) = &self.ldap.aliases {
            if !aliases.filter.contains("{uid}") {
                return Err(ConfigError::Invalid(
                    "ldap.aliases.filter must contain {uid}".to_string(),
                ));
            }
        }
        if self.sync.rate_limit_max_attempts == Some(0) || self.sync.reconnect_max_attempts == Some(0)
        {
            return Err(ConfigError::Invalid(
                "retry attempt limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// State file path, resolved against `config_dir` when relative.
    pub fn state_file(&self, config_dir: &Path) -> PathBuf {
        let file = self
            .sync
            .state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        if file.is_absolute() {
            file
        } else {
            config_dir.join(file)
        }
    }
}
