use thiserror::Error;

/// Failures talking to Discord, GitHub or the record store.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("http {status} from {service}: {message}")]
    Http {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("{service} request timed out")]
    Timeout { service: &'static str },
    #[error("unexpected {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("record store error: {0}")]
    Store(String),
    #[error("github app authentication failed: {0}")]
    AppAuth(String),
    #[error("discord gateway error: {0}")]
    Gateway(String),
    #[error("discord gateway closed with fatal code {code}: {reason}")]
    GatewayFatal { code: u16, reason: String },
    #[error("setup failed: {0}")]
    Setup(String),
}

impl ServiceError {
    pub(crate) fn transport(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { service }
        } else {
            Self::Transport {
                service,
                message: err.to_string(),
            }
        }
    }

    pub(crate) fn decode(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            service,
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}

/// Passes successful responses through and turns everything else into [`ServiceError::Http`].
pub(crate) async fn expect_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read response body".to_string());
    Err(ServiceError::Http {
        service,
        status: status.as_u16(),
        message,
    })
}
