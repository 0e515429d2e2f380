//! Trello REST client.
//!
//! Only the two read endpoints the reconciler needs are wrapped. Every request
//! carries the `key` / `token` query pair; neither value ever reaches a log
//! line or an error message.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use ureq::{Agent, AgentBuilder};

use trelldap_core::config::TrelloConfig;
use trelldap_core::PlatformIdentity;
use trelldap_sync::{PlatformClient, PlatformError};

/// Longest error body kept in [`PlatformError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Membership {
    id_member: String,
}

/// Blocking Trello API client.
pub struct TrelloClient {
    agent: Agent,
    api_url: String,
    key: String,
    token: String,
    organization: String,
}

impl TrelloClient {
    pub fn new(config: &TrelloConfig) -> Self {
        let agent = AgentBuilder::new().timeout(config.timeout()).build();
        Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            token: config.token.clone(),
            organization: config.organization.clone(),
        }
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let url = format!("{}{}", self.api_url, path);
        debug!(path, "Trello GET");

        let mut request = self.agent.get(&url);
        for (name, value) in query {
            request = request.query(name, value);
        }
        let response = request
            .query("key", &self.key)
            .query("token", &self.token)
            .call()
            .map_err(|err| self.classify(err))?;

        response
            .into_json::<T>()
            .map_err(|err| PlatformError::Decode(self.redact(&err.to_string())))
    }

    fn classify(&self, err: ureq::Error) -> PlatformError {
        match err {
            ureq::Error::Status(429, response) => PlatformError::RateLimited {
                retry_after: retry_after(response.header("Retry-After")),
            },
            ureq::Error::Status(status, response) => {
                let mut body = response.into_string().unwrap_or_default();
                if body.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                PlatformError::Status {
                    status,
                    body: self.redact(body.trim()),
                }
            }
            ureq::Error::Transport(transport) => {
                PlatformError::Transport(self.redact(&transport.to_string()))
            }
        }
    }

    fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in [&self.key, &self.token] {
            if !secret.is_empty() {
                out = out.replace(secret.as_str(), "***");
            }
        }
        out
    }
}

impl std::fmt::Debug for TrelloClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrelloClient")
            .field("api_url", &self.api_url)
            .field("organization", &self.organization)
            .finish_non_exhaustive()
    }
}

impl PlatformClient for TrelloClient {
    fn search_by_email(&mut self, mail: &str) -> Result<Option<PlatformIdentity>, PlatformError> {
        let found: Vec<PlatformIdentity> =
            self.get("/search/members", &[("query", mail), ("limit", "1")])?;
        Ok(found.into_iter().next())
    }

    fn organization_member_ids(&mut self) -> Result<Option<BTreeSet<String>>, PlatformError> {
        if self.organization.trim().is_empty() {
            return Ok(None);
        }
        let path = format!("/organizations/{}/memberships", self.organization);
        let memberships: Vec<Membership> = self.get(&path, &[])?;
        if memberships.is_empty() {
            warn!(organization = %self.organization, "organization has no visible memberships");
        }
        Ok(Some(
            memberships.into_iter().map(|m| m.id_member).collect(),
        ))
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after(header: Option<&str>) -> Option<Duration> {
    header
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
