//! GitHub App client: app JWTs, installation tokens and issue comments.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use clabot_contracts::{CreateComment, Installation, InstallationToken, PostedComment};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{expect_success, ServiceError};
use crate::platform::CodeHostApi;

const GITHUB: &str = "github";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

pub struct GitHubAppClient {
    client: Client,
    api_base_url: String,
    app_id: u64,
    key: EncodingKey,
    installation_id: u64,
    token: Mutex<Option<CachedToken>>,
}

impl GitHubAppClient {
    /// Parses the app key and looks up the installation owned by `installation_user`.
    pub async fn connect(
        cfg: &clabot_config::GitHub,
        client: Client,
    ) -> Result<(Self, Installation), ServiceError> {
        let key = EncodingKey::from_rsa_pem(cfg.private_key.expose_secret().as_bytes())
            .map_err(|e| ServiceError::AppAuth(format!("invalid private key: {e}")))?;
        let mut app = Self {
            client,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            app_id: cfg.app_id,
            key,
            installation_id: 0,
            token: Mutex::new(None),
        };
        let installation = app.user_installation(&cfg.installation_user).await?;
        info!(
            installation_id = installation.id,
            app_slug = %installation.app_slug,
            events = ?installation.events,
            "github app installation found"
        );
        app.installation_id = installation.id;
        Ok((app, installation))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base_url, path))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("clabot/", env!("CARGO_PKG_VERSION")))
            .header(API_VERSION_HEADER, API_VERSION)
    }

    fn app_jwt(&self) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 540,
            iss: self.app_id.to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| ServiceError::AppAuth(format!("failed to sign app jwt: {e}")))
    }

    async fn user_installation(&self, login: &str) -> Result<Installation, ServiceError> {
        let response = self
            .request(Method::GET, &format!("/users/{login}/installation"))
            .bearer_auth(self.app_jwt()?)
            .send()
            .await
            .map_err(|e| ServiceError::transport(GITHUB, e))?;
        expect_success(GITHUB, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::decode(GITHUB, e))
    }

    /// Returns a cached installation token, minting a new one within a minute of expiry.
    async fn installation_token(&self) -> Result<SecretString, ServiceError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Utc::now() + Duration::seconds(60) < t.expires_at {
                return Ok(t.token.clone());
            }
        }

        let response = self
            .request(
                Method::POST,
                &format!("/app/installations/{}/access_tokens", self.installation_id),
            )
            .bearer_auth(self.app_jwt()?)
            .send()
            .await
            .map_err(|e| ServiceError::transport(GITHUB, e))?;
        let minted: InstallationToken = expect_success(GITHUB, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::decode(GITHUB, e))?;
        let expires_at = DateTime::parse_from_rfc3339(&minted.expires_at)
            .map_err(|e| ServiceError::decode(GITHUB, format!("expires_at: {e}")))?
            .with_timezone(&Utc);
        debug!(%expires_at, "minted installation token");

        let token = SecretString::from(minted.token);
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

#[async_trait]
impl CodeHostApi for GitHubAppClient {
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<PostedComment, ServiceError> {
        let token = self.installation_token().await?;
        let response = self
            .request(
                Method::POST,
                &format!("/repos/{owner}/{repo}/issues/{number}/comments"),
            )
            .bearer_auth(token.expose_secret())
            .json(&CreateComment { body })
            .send()
            .await
            .map_err(|e| ServiceError::transport(GITHUB, e))?;
        expect_success(GITHUB, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::decode(GITHUB, e))
    }
}
