//! Human-facing text the bot posts.
//!
//! Templates use `{mention}`, `{signal}`, `{role}` and `{cla_url}` placeholders.

use rand::Rng;

pub const DEFAULT_WELCOME_TEMPLATES: &[&str] = &[
    "Welcome aboard, {mention}! Before you dive in, please read our CLA ({cla_url}) and react to this message with {signal} to accept it.",
    "Hey {mention}, great to have you here! React with {signal} to accept the CLA ({cla_url}) and I'll give you the {role} role.",
    "{mention} just joined! Accept the contributor license agreement at {cla_url} by reacting with {signal}, and the {role} role is yours.",
    "Hi {mention}! One quick thing: react with {signal} to accept our CLA ({cla_url}) so I can unlock the rest of the server for you.",
];

#[derive(Debug, Clone)]
pub struct MessageCatalog {
    welcome: Vec<String>,
    signal: String,
    role_name: String,
    cla_url: String,
}

impl MessageCatalog {
    /// An empty `welcome` list falls back to [`DEFAULT_WELCOME_TEMPLATES`].
    pub fn new(
        welcome: Vec<String>,
        signal: impl Into<String>,
        role_name: impl Into<String>,
        cla_url: impl Into<String>,
    ) -> Self {
        let welcome = if welcome.is_empty() {
            DEFAULT_WELCOME_TEMPLATES
                .iter()
                .map(|t| t.to_string())
                .collect()
        } else {
            welcome
        };
        Self {
            welcome,
            signal: signal.into(),
            role_name: role_name.into(),
            cla_url: cla_url.into(),
        }
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }

    pub fn welcome<R: Rng + ?Sized>(&self, rng: &mut R, mention: &str) -> String {
        let template = &self.welcome[rng.random_range(0..self.welcome.len())];
        self.fill(template, mention)
    }

    pub fn chat_confirmation(&self, mention: &str) -> String {
        self.fill(
            "Thanks for accepting the CLA, {mention}! Adding the {role} role now.",
            mention,
        )
    }

    pub fn role_grant_failed(&self, mention: &str, error: &str) -> String {
        format!(
            "{} Error: {error}\nPlease ask a server admin to add the role manually.",
            self.fill(
                "Sorry {mention}, something went wrong while giving you the {role} role.",
                mention,
            )
        )
    }

    pub fn pull_request_prompt(&self, login: &str) -> String {
        self.fill(
            "Hello {mention}!\n\nThanks for your pull request! Please read the contributor license agreement here: {cla_url}\n\nReply with {signal} to accept it.",
            &format!("@{login}"),
        )
    }

    pub fn pull_request_confirmation(&self, login: &str) -> String {
        self.fill(
            "You have now accepted the CLA, {mention}. Thank you!",
            &format!("@{login}"),
        )
    }

    fn fill(&self, template: &str, mention: &str) -> String {
        template
            .replace("{signal}", &self.signal)
            .replace("{role}", &self.role_name)
            .replace("{cla_url}", &self.cla_url)
            .replace("{mention}", mention)
    }
}
