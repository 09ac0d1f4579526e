//! Platform-independent CLA acceptance logic: prompt correlation, record shaping and the
//! text the bot posts.

pub mod correlator;
pub mod signature;
pub mod templates;

use clabot_contracts::DiscordUser;

pub use correlator::{
    Actor, ChannelContext, Correlator, CorrelatorConfig, PendingAcceptance, PromptId, Resolution,
};
pub use signature::{sign_payload, verify_payload_signature};
pub use templates::{MessageCatalog, DEFAULT_WELCOME_TEMPLATES};

/// A row in the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceRecord {
    pub name: String,
    pub note: String,
}

impl AcceptanceRecord {
    pub fn from_chat(name: &str, signal: &str, message_link: &str) -> Self {
        Self {
            name: name.to_string(),
            note: format!("Discord: Agreed to the CLA by reacting with {signal} here: {message_link}"),
        }
    }

    pub fn from_code_host(login: &str, signal: &str, comment_url: &str) -> Self {
        Self {
            name: login.to_string(),
            note: format!("GitHub: Agreed to the CLA by commenting {signal} here: {comment_url}"),
        }
    }
}

pub fn chat_actor(user: &DiscordUser) -> Actor {
    Actor::new(user.id.clone(), user.tag())
}

pub fn discord_message_link(guild_id: &str, channel_id: &str, message_id: &str) -> String {
    format!("https://discord.com/channels/{guild_id}/{channel_id}/{message_id}")
}

pub fn discord_mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

/// Login GitHub shows for comments made by an installed app.
pub fn app_bot_login(app_slug: &str) -> String {
    format!("{app_slug}[bot]")
}

/// Exact-match Airtable formula, e.g. `{Name} = 'alice'`.
pub fn airtable_filter_formula(field: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("{{{field}}} = '{escaped}'")
}
