pub mod discord;
pub mod error;
pub mod github;
pub mod platform;
pub mod store;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use clabot_config::Config;
use clabot_contracts::{
    GuildMemberAdd, IssueCommentEvent, MessageReactionAdd, PullRequestEvent, EVENT_ISSUE_COMMENT,
    EVENT_PULL_REQUEST, EVENT_PULL_REQUEST_REVIEW_COMMENT, EVENT_RELEASE, GITHUB_DELIVERY_HEADER,
    GITHUB_EVENT_HEADER, GITHUB_SIGNATURE_HEADER,
};
use clabot_kernel::{
    app_bot_login, chat_actor, discord_mention, discord_message_link, verify_payload_signature,
    AcceptanceRecord, Actor, ChannelContext, Correlator, CorrelatorConfig, MessageCatalog,
    PromptId, Resolution,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::signal;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

pub use discord::{DiscordClient, DiscordGateway};
pub use error::ServiceError;
pub use github::GitHubAppClient;
pub use platform::{ChatApi, CodeHostApi};
pub use store::{AppendOutcome, RecordStore};

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let http = Client::builder()
        .timeout(Duration::from_millis(cfg.http.timeout_ms))
        .build()
        .map_err(|e| format!("http client build failed: {e}"))?;

    let discord = DiscordClient::new(&cfg.discord, http.clone());
    let role = find_role(
        &discord,
        &cfg.discord.server_id,
        &cfg.discord.target_role_name,
    )
    .await
    .map_err(|e| e.to_string())?;
    info!(role_id = %role.id, role = %role.name, "target role found");

    let store =
        RecordStore::from_config(&cfg.record_store, http.clone()).map_err(|e| e.to_string())?;
    let (github, installation) = GitHubAppClient::connect(&cfg.github, http)
        .await
        .map_err(|e| e.to_string())?;

    let settings = Settings {
        guild_id: cfg.discord.server_id.clone(),
        channel_id: cfg.discord.channel_id.clone(),
        role_id: role.id,
        bot_login: app_bot_login(&installation.app_slug),
        webhook_secret: cfg.github.webhook_secret.clone(),
    };
    let messages = MessageCatalog::new(
        cfg.acceptance.welcome_templates.clone(),
        cfg.acceptance.signal.clone(),
        cfg.discord.target_role_name.clone(),
        cfg.acceptance.cla_url.clone(),
    );
    let state = AppState::new(
        settings,
        messages,
        Arc::new(discord),
        Arc::new(github),
        Arc::new(store),
        Correlator::new(correlator_config(&cfg.acceptance)),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let gateway = DiscordGateway::new(&cfg.discord);
    let mut gateway_task = tokio::spawn({
        let state = state.clone();
        async move { gateway.run(state, shutdown_rx).await }
    });

    let app = build_app(state, &cfg.server.webhook_path);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, path = %cfg.server.webhook_path, "listening for github webhooks");

    let exit = tokio::select! {
        res = axum::serve(listener, app).into_future() => Exit::Server(res),
        res = &mut gateway_task => Exit::Gateway(res),
        _ = shutdown_signal() => Exit::Signal,
    };

    match exit {
        Exit::Server(res) => {
            let _ = shutdown_tx.send(());
            res.map_err(|e| format!("serve failed: {e}"))
        }
        Exit::Gateway(Ok(Ok(()))) => Err("discord gateway stopped unexpectedly".to_string()),
        Exit::Gateway(Ok(Err(e))) => Err(e.to_string()),
        Exit::Gateway(Err(e)) => Err(format!("discord gateway task failed: {e}")),
        Exit::Signal => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(2), gateway_task).await {
                Ok(Ok(Err(e))) => warn!(error = %e, "discord gateway closed with error"),
                Ok(Err(e)) => warn!(error = %e, "discord gateway task failed"),
                Err(_) => warn!("discord gateway did not close in time"),
                Ok(Ok(Ok(()))) => {}
            }
            info!("shutdown complete");
            Ok(())
        }
    }
}

enum Exit {
    Server(std::io::Result<()>),
    Gateway(Result<Result<(), ServiceError>, tokio::task::JoinError>),
    Signal,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

pub fn build_app(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(webhook_path, post(github_webhook))
        .with_state(state)
}

/// Looks up the role granted on acceptance by its display name.
pub async fn find_role(
    chat: &dyn ChatApi,
    guild_id: &str,
    name: &str,
) -> Result<clabot_contracts::Role, ServiceError> {
    chat.guild_roles(guild_id)
        .await?
        .into_iter()
        .find(|r| r.name == name)
        .ok_or_else(|| {
            ServiceError::Setup(format!("role {name:?} not found in guild {guild_id}"))
        })
}

pub fn correlator_config(cfg: &clabot_config::Acceptance) -> CorrelatorConfig {
    CorrelatorConfig {
        required_signal: cfg.signal.clone(),
        ttl: chrono::Duration::milliseconds(
            i64::try_from(cfg.pending_ttl_ms).unwrap_or(i64::MAX),
        ),
        max_entries: cfg.max_pending,
        consume_on_mismatch: cfg.consume_on_mismatch,
    }
}

/// Identities resolved at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub guild_id: String,
    /// Channel welcome prompts are posted to.
    pub channel_id: String,
    pub role_id: String,
    /// Login the code host shows for the bot's own comments.
    pub bot_login: String,
    pub webhook_secret: Option<SecretString>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Prompted(PromptId),
    AlreadyRecorded,
    Ignored(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Inserted,
    AlreadyPresent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptanceOutcome {
    Accepted {
        record: RecordStatus,
        confirmed: bool,
        /// `None` where no role exists to grant.
        role_granted: Option<bool>,
    },
    AlreadyRecorded,
    NoMatch,
    Ignored(&'static str),
}

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    messages: Arc<MessageCatalog>,
    chat: Arc<dyn ChatApi>,
    code_host: Arc<dyn CodeHostApi>,
    store: Arc<RecordStore>,
    correlator: Arc<Mutex<Correlator>>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        messages: MessageCatalog,
        chat: Arc<dyn ChatApi>,
        code_host: Arc<dyn CodeHostApi>,
        store: Arc<RecordStore>,
        correlator: Correlator,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            messages: Arc::new(messages),
            chat,
            code_host,
            store,
            correlator: Arc::new(Mutex::new(correlator)),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub async fn pending_count(&self) -> usize {
        self.correlator.lock().await.len()
    }

    async fn register(&self, prompt_id: PromptId, actor: Actor, channel: ChannelContext) {
        let evicted = self
            .correlator
            .lock()
            .await
            .register(prompt_id.clone(), actor, channel, Utc::now());
        if let Some(old) = evicted {
            warn!(prompt_id = %old, "pending acceptance evicted to make room");
        }
        debug!(%prompt_id, "pending acceptance registered");
    }

    /// Welcomes a new member and waits for their reaction.
    pub async fn process_member_join(
        &self,
        ev: GuildMemberAdd,
    ) -> Result<PromptOutcome, ServiceError> {
        if ev.guild_id != self.settings.guild_id {
            return Ok(PromptOutcome::Ignored("other guild"));
        }
        if ev.user.is_bot() {
            return Ok(PromptOutcome::Ignored("bot account"));
        }

        let text = self
            .messages
            .welcome(&mut rand::rng(), &discord_mention(&ev.user.id));
        let sent = self.chat.send_message(&self.settings.channel_id, &text).await?;

        let prompt_id = PromptId::chat_message(sent.id);
        self.register(
            prompt_id.clone(),
            chat_actor(&ev.user),
            ChannelContext::Chat {
                guild_id: ev.guild_id,
                channel_id: sent.channel_id,
            },
        )
        .await;
        Ok(PromptOutcome::Prompted(prompt_id))
    }

    pub async fn handle_member_join(&self, ev: GuildMemberAdd) {
        let user_id = ev.user.id.clone();
        match self.process_member_join(ev).await {
            Ok(PromptOutcome::Prompted(prompt_id)) => {
                info!(%user_id, %prompt_id, "sent CLA prompt to new member")
            }
            Ok(outcome) => debug!(%user_id, ?outcome, "member join not prompted"),
            Err(e) => error!(%user_id, error = %e, "failed to prompt new member"),
        }
    }

    /// Records the acceptance and grants the role when the prompted member reacts with the signal.
    pub async fn process_reaction(
        &self,
        ev: MessageReactionAdd,
    ) -> Result<AcceptanceOutcome, ServiceError> {
        let signal = ev.emoji.name.as_deref().unwrap_or_default();
        let prompt_id = PromptId::chat_message(ev.message_id.clone());
        let resolution =
            self.correlator
                .lock()
                .await
                .resolve(&prompt_id, &ev.user_id, signal, Utc::now());

        let pending = match resolution {
            Resolution::Matched(p) => p,
            Resolution::Mismatched { consumed } => {
                debug!(%prompt_id, user_id = %ev.user_id, consumed, "reaction does not match prompt");
                return Ok(AcceptanceOutcome::NoMatch);
            }
            Resolution::NotFound => return Ok(AcceptanceOutcome::NoMatch),
        };
        let ChannelContext::Chat {
            guild_id,
            channel_id,
        } = pending.channel
        else {
            return Ok(AcceptanceOutcome::Ignored("not a chat prompt"));
        };

        let link = discord_message_link(&guild_id, &channel_id, &ev.message_id);
        let record = AcceptanceRecord::from_chat(&pending.expected_actor.display, signal, &link);
        let record_status = match self.store.append(&record).await {
            Ok(AppendOutcome::Inserted) => RecordStatus::Inserted,
            Ok(AppendOutcome::AlreadyPresent) => RecordStatus::AlreadyPresent,
            Err(e) => {
                error!(name = %record.name, error = %e, "failed to record acceptance");
                RecordStatus::Failed
            }
        };

        let mention = discord_mention(&ev.user_id);
        let confirmed = match self
            .chat
            .send_message(&channel_id, &self.messages.chat_confirmation(&mention))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(user_id = %ev.user_id, error = %e, "failed to send confirmation");
                false
            }
        };

        let role_granted = match self
            .chat
            .add_role(&guild_id, &ev.user_id, &self.settings.role_id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(user_id = %ev.user_id, error = %e, "failed to grant role");
                let text = self.messages.role_grant_failed(&mention, &e.to_string());
                if let Err(e) = self.chat.send_message(&channel_id, &text).await {
                    error!(user_id = %ev.user_id, error = %e, "failed to report role grant failure");
                }
                false
            }
        };

        Ok(AcceptanceOutcome::Accepted {
            record: record_status,
            confirmed,
            role_granted: Some(role_granted),
        })
    }

    pub async fn handle_reaction(&self, ev: MessageReactionAdd) {
        let user_id = ev.user_id.clone();
        let message_id = ev.message_id.clone();
        match self.process_reaction(ev).await {
            Ok(outcome @ AcceptanceOutcome::Accepted { .. }) => {
                info!(%user_id, %message_id, ?outcome, "chat acceptance handled")
            }
            Ok(_) => {}
            Err(e) => error!(%user_id, %message_id, error = %e, "failed to handle reaction"),
        }
    }

    /// Asks the author of a newly opened pull request to accept the CLA.
    pub async fn process_pull_request(
        &self,
        ev: PullRequestEvent,
    ) -> Result<PromptOutcome, ServiceError> {
        if !matches!(ev.action.as_str(), "opened" | "reopened") {
            return Ok(PromptOutcome::Ignored("pull request action"));
        }
        let author = &ev.pull_request.user;
        if author.is_bot() {
            return Ok(PromptOutcome::Ignored("bot author"));
        }
        if self.store.exists(&author.login).await? {
            return Ok(PromptOutcome::AlreadyRecorded);
        }

        let owner = &ev.repository.owner.login;
        let repo = &ev.repository.name;
        let number = ev.pull_request.number;
        let posted = self
            .code_host
            .create_comment(
                owner,
                repo,
                number,
                &self.messages.pull_request_prompt(&author.login),
            )
            .await?;
        debug!(url = %posted.html_url, "posted CLA prompt");

        let prompt_id = PromptId::pull_request(&ev.repository.full_name, number, &author.login);
        self.register(
            prompt_id.clone(),
            Actor::new(author.login.clone(), author.login.clone()),
            ChannelContext::IssueThread {
                owner: owner.clone(),
                repo: repo.clone(),
                number,
            },
        )
        .await;
        Ok(PromptOutcome::Prompted(prompt_id))
    }

    pub async fn handle_pull_request(&self, ev: PullRequestEvent) {
        let login = ev.pull_request.user.login.clone();
        let url = ev.pull_request.html_url.clone();
        match self.process_pull_request(ev).await {
            Ok(PromptOutcome::Prompted(prompt_id)) => {
                info!(%login, %url, %prompt_id, "sent CLA prompt on pull request")
            }
            Ok(outcome) => debug!(%login, %url, ?outcome, "pull request not prompted"),
            Err(e) => error!(%login, %url, error = %e, "failed to prompt pull request author"),
        }
    }

    /// Records the acceptance when the issue author comments exactly the signal.
    pub async fn process_issue_comment(
        &self,
        ev: IssueCommentEvent,
    ) -> Result<AcceptanceOutcome, ServiceError> {
        if ev.action != "created" {
            return Ok(AcceptanceOutcome::Ignored("comment action"));
        }
        let commenter = ev.comment.user.login.as_str();
        if commenter == self.settings.bot_login {
            return Ok(AcceptanceOutcome::Ignored("own comment"));
        }

        let author = ev.issue.user.login.as_str();
        let body = ev.comment.body.as_str();
        let prompt_id = PromptId::pull_request(&ev.repository.full_name, ev.issue.number, author);
        let resolution = self
            .correlator
            .lock()
            .await
            .resolve(&prompt_id, commenter, body, Utc::now());
        match resolution {
            Resolution::Matched(_) => {}
            Resolution::Mismatched { consumed } => {
                debug!(%prompt_id, %commenter, consumed, "comment does not match prompt");
                return Ok(AcceptanceOutcome::NoMatch);
            }
            // Prompts issued before a restart are gone; an exact reply from the author still counts.
            Resolution::NotFound => {
                if commenter != author || body != self.messages.signal() {
                    return Ok(AcceptanceOutcome::NoMatch);
                }
            }
        }

        let record =
            AcceptanceRecord::from_code_host(commenter, self.messages.signal(), &ev.comment.html_url);
        if self.store.append(&record).await? == AppendOutcome::AlreadyPresent {
            return Ok(AcceptanceOutcome::AlreadyRecorded);
        }

        let confirmed = match self
            .code_host
            .create_comment(
                &ev.repository.owner.login,
                &ev.repository.name,
                ev.issue.number,
                &self.messages.pull_request_confirmation(commenter),
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(login = %commenter, error = %e, "failed to post confirmation");
                false
            }
        };

        Ok(AcceptanceOutcome::Accepted {
            record: RecordStatus::Inserted,
            confirmed,
            role_granted: None,
        })
    }

    pub async fn handle_issue_comment(&self, ev: IssueCommentEvent) {
        let login = ev.comment.user.login.clone();
        let url = ev.comment.html_url.clone();
        match self.process_issue_comment(ev).await {
            Ok(outcome @ AcceptanceOutcome::Accepted { .. }) => {
                info!(%login, %url, ?outcome, "code host acceptance handled")
            }
            Ok(outcome) => debug!(%login, %url, ?outcome, "comment not accepted"),
            Err(e) => error!(%login, %url, error = %e, "failed to handle comment"),
        }
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let delivery = header(GITHUB_DELIVERY_HEADER).unwrap_or("-").to_string();
    let Some(event) = header(GITHUB_EVENT_HEADER) else {
        warn!(%delivery, "webhook without event header");
        return StatusCode::INTERNAL_SERVER_ERROR;
    };

    if !matches!(
        event,
        EVENT_PULL_REQUEST
            | EVENT_ISSUE_COMMENT
            | EVENT_PULL_REQUEST_REVIEW_COMMENT
            | EVENT_RELEASE
    ) {
        info!(%delivery, event, "received unregistered github event");
        return StatusCode::OK;
    }

    // Only registered events are authenticated; the rest are acknowledged unread.
    if let Some(secret) = &state.settings.webhook_secret {
        let signature = header(GITHUB_SIGNATURE_HEADER);
        if !verify_payload_signature(secret.expose_secret().as_bytes(), &body, signature) {
            warn!(%delivery, event, "webhook signature mismatch");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    match event {
        EVENT_PULL_REQUEST => match serde_json::from_slice::<PullRequestEvent>(&body) {
            Ok(ev) => {
                info!(%delivery, action = %ev.action, url = %ev.pull_request.html_url, "received pull request event");
                tokio::spawn(async move { state.handle_pull_request(ev).await });
            }
            Err(e) => {
                warn!(%delivery, error = %e, "malformed pull_request payload");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        },
        EVENT_ISSUE_COMMENT => match serde_json::from_slice::<IssueCommentEvent>(&body) {
            Ok(ev) => {
                info!(%delivery, action = %ev.action, url = %ev.comment.html_url, "received issue comment event");
                tokio::spawn(async move { state.handle_issue_comment(ev).await });
            }
            Err(e) => {
                warn!(%delivery, error = %e, "malformed issue_comment payload");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        },
        _ => {
            if let Err(e) = serde_json::from_slice::<Value>(&body) {
                warn!(%delivery, event, error = %e, "malformed webhook payload");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            debug!(%delivery, event, "no handler for event");
        }
    }
    StatusCode::OK
}
