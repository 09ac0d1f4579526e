//! Discord REST client and gateway connection.

use std::time::Duration;

use async_trait::async_trait;
use clabot_contracts::{
    AllowedMentions, ChannelMessage, CreateMessage, GatewayPayload, GuildMemberAdd, Hello,
    MessageReactionAdd, Role, EVENT_GUILD_MEMBER_ADD, EVENT_MESSAGE_REACTION_ADD, EVENT_READY,
    FATAL_CLOSE_CODES, INTENT_GUILD_MEMBERS, INTENT_GUILD_MESSAGE_REACTIONS, OP_DISPATCH,
    OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_IDENTIFY, OP_INVALID_SESSION, OP_RECONNECT,
};
use futures::{Sink, SinkExt, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::error::{expect_success, ServiceError};
use crate::platform::ChatApi;
use crate::AppState;

const DISCORD: &str = "discord";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn user_agent() -> String {
    format!(
        "DiscordBot (https://github.com/clabot/clabot, {})",
        env!("CARGO_PKG_VERSION")
    )
}

pub struct DiscordClient {
    client: Client,
    api_base_url: String,
    token: SecretString,
}

impl DiscordClient {
    pub fn new(cfg: &clabot_config::Discord, client: Client) -> Self {
        Self {
            client,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base_url, path))
            .header(AUTHORIZATION, format!("Bot {}", self.token.expose_secret()))
            .header(USER_AGENT, user_agent())
    }
}

#[async_trait]
impl ChatApi for DiscordClient {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<ChannelMessage, ServiceError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/channels/{channel_id}/messages"),
            )
            .json(&CreateMessage {
                content,
                allowed_mentions: AllowedMentions::users_only(),
            })
            .send()
            .await
            .map_err(|e| ServiceError::transport(DISCORD, e))?;
        expect_success(DISCORD, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::decode(DISCORD, e))
    }

    async fn add_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), ServiceError> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
            )
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| ServiceError::transport(DISCORD, e))?;
        expect_success(DISCORD, response).await?;
        Ok(())
    }

    async fn guild_roles(&self, guild_id: &str) -> Result<Vec<Role>, ServiceError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/guilds/{guild_id}/roles"))
            .send()
            .await
            .map_err(|e| ServiceError::transport(DISCORD, e))?;
        expect_success(DISCORD, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::decode(DISCORD, e))
    }
}

/// Receives member-join and reaction events and hands them to [`AppState`].
pub struct DiscordGateway {
    url: String,
    token: SecretString,
    reconnect_delay: Duration,
}

impl DiscordGateway {
    pub fn new(cfg: &clabot_config::Discord) -> Self {
        Self {
            url: cfg.gateway_url.clone(),
            token: cfg.token.clone(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Runs until shutdown is signalled or the gateway rejects the bot for good.
    pub async fn run(
        &self,
        state: AppState,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServiceError> {
        loop {
            info!("connecting to discord gateway");
            match self.connect_and_run(&state, &mut shutdown).await {
                Ok(()) => {
                    info!("discord gateway connection closed");
                    return Ok(());
                }
                Err(e @ ServiceError::GatewayFatal { .. }) => return Err(e),
                Err(e) => {
                    error!(error = %e, "discord gateway connection lost");
                    info!("reconnecting in {:?}", self.reconnect_delay);
                    tokio::select! {
                        _ = shutdown.recv() => return Ok(()),
                        _ = sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        state: &AppState,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServiceError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let hello = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let payload: GatewayPayload = serde_json::from_str(&text)
                        .map_err(|e| ServiceError::Gateway(format!("undecodable payload: {e}")))?;
                    if payload.op == OP_HELLO {
                        break serde_json::from_value::<Hello>(payload.d.unwrap_or(Value::Null))
                            .map_err(|e| ServiceError::Gateway(format!("invalid hello: {e}")))?;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => return Err(close_error(frame)),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(ServiceError::Gateway(
                        "connection closed before hello".to_string(),
                    ))
                }
            }
        };

        send_json(&mut write, &self.identify_payload()).await?;
        debug!(interval_ms = hello.heartbeat_interval, "identified with gateway");

        let period = Duration::from_millis(hello.heartbeat_interval.max(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut seq: Option<u64> = None;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        return Err(ServiceError::Gateway(
                            "heartbeat was not acknowledged".to_string(),
                        ));
                    }
                    send_json(&mut write, &heartbeat_payload(seq)).await?;
                    awaiting_ack = true;
                }
                msg = read.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "skipping undecodable gateway payload");
                                continue;
                            }
                        };
                        if payload.s.is_some() {
                            seq = payload.s;
                        }
                        match payload.op {
                            OP_DISPATCH => dispatch(
                                state,
                                payload.t.as_deref().unwrap_or_default(),
                                payload.d.unwrap_or(Value::Null),
                            ),
                            OP_HEARTBEAT => send_json(&mut write, &heartbeat_payload(seq)).await?,
                            OP_HEARTBEAT_ACK => awaiting_ack = false,
                            OP_RECONNECT => {
                                return Err(ServiceError::Gateway(
                                    "gateway requested reconnect".to_string(),
                                ))
                            }
                            OP_INVALID_SESSION => {
                                return Err(ServiceError::Gateway(
                                    "gateway invalidated the session".to_string(),
                                ))
                            }
                            other => debug!(op = other, "ignoring gateway opcode"),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => return Err(close_error(frame)),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(ServiceError::Gateway("connection closed".to_string())),
                },
            }
        }
    }

    fn identify_payload(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token.expose_secret(),
                "intents": INTENT_GUILD_MEMBERS | INTENT_GUILD_MESSAGE_REACTIONS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "clabot",
                    "device": "clabot"
                }
            }
        })
    }
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({"op": OP_HEARTBEAT, "d": seq})
}

async fn send_json<S>(sink: &mut S, value: &Value) -> Result<(), ServiceError>
where
    S: Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    sink.send(WsMessage::Text(value.to_string()))
        .await
        .map_err(Into::into)
}

fn close_error(frame: Option<CloseFrame<'_>>) -> ServiceError {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            if FATAL_CLOSE_CODES.contains(&code) {
                ServiceError::GatewayFatal {
                    code,
                    reason: frame.reason.to_string(),
                }
            } else {
                ServiceError::Gateway(format!("closed with code {code}: {}", frame.reason))
            }
        }
        None => ServiceError::Gateway("closed without a close frame".to_string()),
    }
}

fn dispatch(state: &AppState, event: &str, data: Value) {
    match event {
        EVENT_READY => info!("discord gateway session ready"),
        EVENT_GUILD_MEMBER_ADD => match serde_json::from_value::<GuildMemberAdd>(data) {
            Ok(ev) => {
                let state = state.clone();
                tokio::spawn(async move { state.handle_member_join(ev).await });
            }
            Err(e) => warn!(error = %e, "undecodable GUILD_MEMBER_ADD payload"),
        },
        EVENT_MESSAGE_REACTION_ADD => match serde_json::from_value::<MessageReactionAdd>(data) {
            Ok(ev) => {
                let state = state.clone();
                tokio::spawn(async move { state.handle_reaction(ev).await });
            }
            Err(e) => warn!(error = %e, "undecodable MESSAGE_REACTION_ADD payload"),
        },
        other => debug!(event = other, "ignoring gateway event"),
    }
}
