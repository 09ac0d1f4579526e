//! Wire types for the three platforms the bot talks to: the Discord gateway and REST API,
//! GitHub webhooks and REST API, and the Airtable records API.
//!
//! Only the fields the bot reads are modelled; unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Discord
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

pub const INTENT_GUILD_MEMBERS: u64 = 1 << 1;
pub const INTENT_GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;

pub const EVENT_READY: &str = "READY";
pub const EVENT_GUILD_MEMBER_ADD: &str = "GUILD_MEMBER_ADD";
pub const EVENT_MESSAGE_REACTION_ADD: &str = "MESSAGE_REACTION_ADD";

/// Close codes after which reconnecting cannot succeed.
pub const FATAL_CLOSE_CODES: [u16; 5] = [4004, 4010, 4011, 4013, 4014];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: Option<bool>,
}

impl DiscordUser {
    /// `username#1234` for legacy accounts, plain `username` once the discriminator is gone.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    pub fn is_bot(&self) -> bool {
        self.bot.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberAdd {
    pub guild_id: String,
    pub user: DiscordUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionEmoji {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageReactionAdd {
    pub user_id: String,
    pub channel_id: String,
    pub message_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub emoji: ReactionEmoji,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMessage<'a> {
    pub content: &'a str,
    pub allowed_mentions: AllowedMentions,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<&'static str>,
}

impl AllowedMentions {
    pub fn users_only() -> Self {
        Self {
            parse: vec!["users"],
        }
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const GITHUB_DELIVERY_HEADER: &str = "x-github-delivery";

pub const EVENT_PULL_REQUEST: &str = "pull_request";
pub const EVENT_ISSUE_COMMENT: &str = "issue_comment";
pub const EVENT_PULL_REQUEST_REVIEW_COMMENT: &str = "pull_request_review_comment";
pub const EVENT_RELEASE: &str = "release";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
}

impl GitHubUser {
    pub fn is_bot(&self) -> bool {
        self.account_type.as_deref() == Some("Bot")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: GitHubUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub user: GitHubUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: Repository,
    pub sender: GitHubUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub html_url: String,
    pub user: GitHubUser,
    #[serde(default)]
    pub pull_request: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub html_url: String,
    pub user: GitHubUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
    pub sender: GitHubUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: u64,
    pub app_slug: String,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateComment<'a> {
    pub body: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostedComment {
    pub id: u64,
    pub html_url: String,
}

// ---------------------------------------------------------------------------
// Airtable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtableRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub fields: Map<String, Value>,
    #[serde(
        default,
        rename = "createdTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirtableRecords {
    pub records: Vec<AirtableRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discord_tag_drops_zero_discriminator() {
        let legacy: DiscordUser = serde_json::from_value(json!({
            "id": "1", "username": "alice", "discriminator": "1234"
        }))
        .unwrap();
        assert_eq!(legacy.tag(), "alice#1234");

        let migrated: DiscordUser = serde_json::from_value(json!({
            "id": "2", "username": "bob", "discriminator": "0"
        }))
        .unwrap();
        assert_eq!(migrated.tag(), "bob");
        assert_eq!(migrated.mention(), "<@2>");
    }

    #[test]
    fn reaction_payload_tolerates_missing_member() {
        let ev: MessageReactionAdd = serde_json::from_value(json!({
            "user_id": "10",
            "channel_id": "20",
            "message_id": "30",
            "emoji": {"id": null, "name": "👍"},
            "burst": false
        }))
        .unwrap();
        assert_eq!(ev.emoji.name.as_deref(), Some("👍"));
        assert!(ev.guild_id.is_none());
    }

    #[test]
    fn issue_comment_event_decodes_bot_sender() {
        let ev: IssueCommentEvent = serde_json::from_value(json!({
            "action": "created",
            "issue": {
                "number": 7,
                "html_url": "https://github.com/o/r/pull/7",
                "user": {"login": "dave", "id": 1, "type": "User"},
                "pull_request": {"url": "https://api.github.com/repos/o/r/pulls/7"}
            },
            "comment": {
                "id": 99,
                "body": "👍",
                "html_url": "https://github.com/o/r/pull/7#issuecomment-99",
                "user": {"login": "clabot[bot]", "id": 2, "type": "Bot"}
            },
            "repository": {"name": "r", "full_name": "o/r", "owner": {"login": "o", "id": 3}},
            "sender": {"login": "clabot[bot]", "id": 2, "type": "Bot"}
        }))
        .unwrap();
        assert!(ev.sender.is_bot());
        assert!(ev.issue.pull_request.is_some());
    }
}
