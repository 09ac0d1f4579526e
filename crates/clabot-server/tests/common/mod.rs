#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clabot_contracts::{
    ChannelMessage, GuildMemberAdd, IssueCommentEvent, MessageReactionAdd, PostedComment,
    PullRequestEvent, Role,
};
use clabot_kernel::{Correlator, CorrelatorConfig, MessageCatalog};
use clabot_server::{AppState, ChatApi, CodeHostApi, RecordStore, ServiceError, Settings};
use secrecy::SecretString;
use serde_json::json;

pub const GUILD: &str = "guild-1";
pub const CHANNEL: &str = "chan-1";
pub const ROLE: &str = "role-1";
pub const BOT_LOGIN: &str = "cla-helper[bot]";
pub const SIGNAL: &str = "👍";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub content: String,
}

#[derive(Default)]
pub struct RecordingChat {
    pub fail_role_grant: bool,
    pub sent: Mutex<Vec<SentMessage>>,
    pub role_grants: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl RecordingChat {
    pub fn failing_role_grant() -> Self {
        Self {
            fail_role_grant: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn role_grants(&self) -> Vec<String> {
        self.role_grants.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<ChannelMessage, ServiceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(SentMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        });
        Ok(ChannelMessage {
            id: format!("msg-{id}"),
            channel_id: channel_id.to_string(),
        })
    }

    async fn add_role(
        &self,
        _guild_id: &str,
        user_id: &str,
        _role_id: &str,
    ) -> Result<(), ServiceError> {
        self.role_grants.lock().unwrap().push(user_id.to_string());
        if self.fail_role_grant {
            return Err(ServiceError::Http {
                service: "discord",
                status: 403,
                message: "Missing Permissions".to_string(),
            });
        }
        Ok(())
    }

    async fn guild_roles(&self, _guild_id: &str) -> Result<Vec<Role>, ServiceError> {
        Ok(vec![
            Role {
                id: "everyone".to_string(),
                name: "@everyone".to_string(),
            },
            Role {
                id: ROLE.to_string(),
                name: "Contributor".to_string(),
            },
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedThreadComment {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingCodeHost {
    pub comments: Mutex<Vec<PostedThreadComment>>,
}

impl RecordingCodeHost {
    pub fn comments(&self) -> Vec<PostedThreadComment> {
        self.comments.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeHostApi for RecordingCodeHost {
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<PostedComment, ServiceError> {
        let mut comments = self.comments.lock().unwrap();
        comments.push(PostedThreadComment {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
            body: body.to_string(),
        });
        Ok(PostedComment {
            id: comments.len() as u64,
            html_url: format!(
                "https://github.com/{owner}/{repo}/pull/{number}#issuecomment-{}",
                comments.len()
            ),
        })
    }
}

pub struct Harness {
    pub state: AppState,
    pub chat: Arc<RecordingChat>,
    pub code_host: Arc<RecordingCodeHost>,
    pub store: Arc<RecordStore>,
}

pub fn correlator_config() -> CorrelatorConfig {
    CorrelatorConfig {
        required_signal: SIGNAL.to_string(),
        ttl: chrono::Duration::hours(1),
        max_entries: 100,
        consume_on_mismatch: false,
    }
}

pub fn harness() -> Harness {
    harness_with(RecordingChat::default(), correlator_config(), None)
}

pub fn harness_with(
    chat: RecordingChat,
    correlator: CorrelatorConfig,
    webhook_secret: Option<&str>,
) -> Harness {
    let chat = Arc::new(chat);
    let code_host = Arc::new(RecordingCodeHost::default());
    let store = Arc::new(RecordStore::memory());
    let settings = Settings {
        guild_id: GUILD.to_string(),
        channel_id: CHANNEL.to_string(),
        role_id: ROLE.to_string(),
        bot_login: BOT_LOGIN.to_string(),
        webhook_secret: webhook_secret.map(|s| SecretString::from(s.to_string())),
    };
    let messages = MessageCatalog::new(
        vec!["Welcome {mention}! React with {signal} to accept {cla_url}.".to_string()],
        SIGNAL,
        "Contributor",
        "https://example.com/cla",
    );
    let state = AppState::new(
        settings,
        messages,
        chat.clone(),
        code_host.clone(),
        store.clone(),
        Correlator::new(correlator),
    );
    Harness {
        state,
        chat,
        code_host,
        store,
    }
}

pub fn member_join(user_id: &str, username: &str) -> GuildMemberAdd {
    serde_json::from_value(json!({
        "guild_id": GUILD,
        "user": {"id": user_id, "username": username, "discriminator": "0"},
        "joined_at": "2026-10-19T00:00:00Z"
    }))
    .unwrap()
}

pub fn reaction(user_id: &str, message_id: &str, emoji: &str) -> MessageReactionAdd {
    serde_json::from_value(json!({
        "user_id": user_id,
        "channel_id": CHANNEL,
        "message_id": message_id,
        "guild_id": GUILD,
        "emoji": {"id": null, "name": emoji}
    }))
    .unwrap()
}

pub fn pull_request_payload(action: &str, login: &str, number: u64) -> serde_json::Value {
    json!({
        "action": action,
        "number": number,
        "pull_request": {
            "number": number,
            "html_url": format!("https://github.com/acme/widgets/pull/{number}"),
            "user": {"login": login, "id": 11, "type": "User"}
        },
        "repository": {
            "name": "widgets",
            "full_name": "acme/widgets",
            "owner": {"login": "acme", "id": 1, "type": "Organization"}
        },
        "sender": {"login": login, "id": 11, "type": "User"}
    })
}

pub fn pull_request(action: &str, login: &str, number: u64) -> PullRequestEvent {
    serde_json::from_value(pull_request_payload(action, login, number)).unwrap()
}

pub fn issue_comment_payload(
    commenter: &str,
    author: &str,
    number: u64,
    body: &str,
) -> serde_json::Value {
    json!({
        "action": "created",
        "issue": {
            "number": number,
            "html_url": format!("https://github.com/acme/widgets/pull/{number}"),
            "user": {"login": author, "id": 11, "type": "User"},
            "pull_request": {"url": format!("https://api.github.com/repos/acme/widgets/pulls/{number}")}
        },
        "comment": {
            "id": 900,
            "body": body,
            "html_url": format!("https://github.com/acme/widgets/pull/{number}#issuecomment-900"),
            "user": {"login": commenter, "id": 12, "type": "User"}
        },
        "repository": {
            "name": "widgets",
            "full_name": "acme/widgets",
            "owner": {"login": "acme", "id": 1, "type": "Organization"}
        },
        "sender": {"login": commenter, "id": 12, "type": "User"}
    })
}

pub fn issue_comment(commenter: &str, author: &str, number: u64, body: &str) -> IssueCommentEvent {
    serde_json::from_value(issue_comment_payload(commenter, author, number, body)).unwrap()
}
