//! In-memory correlation of issued CLA prompts with the one person allowed to answer them.
//!
//! Entries live until they are matched, expire, or are evicted to make room. Nothing here
//! survives a restart.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Key of an issued prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Id of the welcome message posted in the chat channel.
    ChatMessage(String),
    /// A pull request thread, keyed by repository, number and author.
    PullRequest {
        repo: String,
        number: u64,
        login: String,
    },
}

impl PromptId {
    pub fn chat_message(id: impl Into<String>) -> Self {
        Self::ChatMessage(id.into())
    }

    pub fn pull_request(repo: impl Into<String>, number: u64, login: impl Into<String>) -> Self {
        Self::PullRequest {
            repo: repo.into(),
            number,
            login: login.into(),
        }
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChatMessage(id) => write!(f, "msg:{id}"),
            Self::PullRequest {
                repo,
                number,
                login,
            } => write!(f, "pr:{repo}:{number}:{login}"),
        }
    }
}

/// Who is expected to answer a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Platform identity compared against inbound signals.
    pub id: String,
    /// Name written to the record store.
    pub display: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display: display.into(),
        }
    }
}

/// Where follow-up messages for a prompt go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelContext {
    Chat {
        guild_id: String,
        channel_id: String,
    },
    IssueThread {
        owner: String,
        repo: String,
        number: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAcceptance {
    pub prompt_id: PromptId,
    pub expected_actor: Actor,
    pub channel: ChannelContext,
    pub issued_at: DateTime<Utc>,
}

impl PendingAcceptance {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.issued_at >= ttl
    }
}

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub required_signal: String,
    pub ttl: Duration,
    pub max_entries: usize,
    /// When set, any signal on a known prompt removes it, matching or not.
    pub consume_on_mismatch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched(PendingAcceptance),
    Mismatched { consumed: bool },
    NotFound,
}

#[derive(Debug)]
pub struct Correlator {
    cfg: CorrelatorConfig,
    entries: HashMap<PromptId, PendingAcceptance>,
}

impl Correlator {
    pub fn new(cfg: CorrelatorConfig) -> Self {
        Self {
            cfg,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores a pending acceptance, replacing any entry under the same id.
    ///
    /// Returns the id of the entry evicted to stay within `max_entries`, if any.
    pub fn register(
        &mut self,
        prompt_id: PromptId,
        expected_actor: Actor,
        channel: ChannelContext,
        now: DateTime<Utc>,
    ) -> Option<PromptId> {
        self.prune_expired(now);

        let mut evicted = None;
        if !self.entries.contains_key(&prompt_id) && self.entries.len() >= self.cfg.max_entries {
            evicted = self
                .entries
                .values()
                .min_by_key(|p| p.issued_at)
                .map(|p| p.prompt_id.clone());
            if let Some(id) = &evicted {
                self.entries.remove(id);
            }
        }

        self.entries.insert(
            prompt_id.clone(),
            PendingAcceptance {
                prompt_id,
                expected_actor,
                channel,
                issued_at: now,
            },
        );
        evicted
    }

    /// Checks an inbound signal against the prompt it refers to.
    ///
    /// A match always removes the entry, so a repeated signal resolves to `NotFound`.
    pub fn resolve(
        &mut self,
        prompt_id: &PromptId,
        observed_actor: &str,
        observed_signal: &str,
        now: DateTime<Utc>,
    ) -> Resolution {
        let Some(pending) = self.entries.get(prompt_id) else {
            return Resolution::NotFound;
        };
        if pending.is_expired(now, self.cfg.ttl) {
            self.entries.remove(prompt_id);
            return Resolution::NotFound;
        }

        let matched = pending.expected_actor.id == observed_actor
            && observed_signal == self.cfg.required_signal;
        if matched {
            return match self.entries.remove(prompt_id) {
                Some(p) => Resolution::Matched(p),
                None => Resolution::NotFound,
            };
        }

        if self.cfg.consume_on_mismatch {
            self.entries.remove(prompt_id);
        }
        Resolution::Mismatched {
            consumed: self.cfg.consume_on_mismatch,
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.cfg.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, p| !p.is_expired(now, ttl));
        before - self.entries.len()
    }
}
