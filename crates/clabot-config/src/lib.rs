use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: Server,
    pub discord: Discord,
    pub github: GitHub,
    pub record_store: RecordStore,
    pub acceptance: Acceptance,
    #[serde(default)]
    pub http: Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub listen_addr: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discord {
    pub token: SecretString,
    pub server_id: String,
    pub channel_id: String,
    pub target_role_name: String,
    #[serde(default = "default_discord_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_discord_gateway_url")]
    pub gateway_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHub {
    pub app_id: u64,
    pub private_key: SecretString,
    pub installation_user: String,
    #[serde(default)]
    pub webhook_secret: Option<SecretString>,
    #[serde(default = "default_github_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordStore {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default)]
    pub airtable: Option<Airtable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Airtable {
    pub api_key: SecretString,
    pub base_id: String,
    pub table_name: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_notes_field")]
    pub notes_field: String,
    #[serde(default = "default_airtable_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Acceptance {
    #[serde(default = "default_signal")]
    pub signal: String,
    pub cla_url: String,
    #[serde(default)]
    pub welcome_templates: Vec<String>,
    #[serde(default)]
    pub consume_on_mismatch: bool,
    #[serde(default = "default_pending_ttl_ms")]
    pub pending_ttl_ms: u64,
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Http {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Placeholder every welcome template must contain.
pub const MENTION_PLACEHOLDER: &str = "{mention}";

fn default_webhook_path() -> String {
    "/github".to_string()
}

fn default_discord_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_discord_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_github_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_airtable_api_base_url() -> String {
    "https://api.airtable.com".to_string()
}

fn default_name_field() -> String {
    "Name".to_string()
}

fn default_notes_field() -> String {
    "Notes".to_string()
}

fn default_signal() -> String {
    "👍".to_string()
}

fn default_pending_ttl_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_max_pending() -> usize {
    10_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    match cfg.record_store.kind.as_str() {
        "airtable" => {
            if cfg.record_store.airtable.is_none() {
                return Err(ConfigError::UnsupportedConfig(
                    "record_store.airtable is required when record_store.type=airtable"
                        .to_string(),
                ));
            }
        }
        "sqlite" => {
            if cfg
                .record_store
                .sqlite_path
                .as_ref()
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
            {
                return Err(ConfigError::UnsupportedConfig(
                    "record_store.sqlite_path is required when record_store.type=sqlite"
                        .to_string(),
                ));
            }
        }
        "memory" => {}
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "record_store.type={other} is not implemented; supported: airtable, sqlite, memory"
            )));
        }
    }
    if !cfg.server.webhook_path.starts_with('/') {
        return Err(ConfigError::UnsupportedConfig(
            "server.webhook_path must start with '/'".to_string(),
        ));
    }
    if cfg.acceptance.signal.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "acceptance.signal must not be empty".to_string(),
        ));
    }
    if let Some(t) = cfg
        .acceptance
        .welcome_templates
        .iter()
        .find(|t| !t.contains(MENTION_PLACEHOLDER))
    {
        return Err(ConfigError::UnsupportedConfig(format!(
            "acceptance.welcome_templates entry must contain {MENTION_PLACEHOLDER}: {t:?}"
        )));
    }
    if cfg.acceptance.pending_ttl_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "acceptance.pending_ttl_ms must be >= 1".to_string(),
        ));
    }
    if cfg.acceptance.max_pending == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "acceptance.max_pending must be >= 1".to_string(),
        ));
    }
    if cfg.http.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "http.timeout_ms must be >= 1".to_string(),
        ));
    }
    Ok(())
}
