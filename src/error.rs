use crate::executor::ResponseBody;
use crate::models::Marketplace;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account {account_id} has no refresh token")]
    CredentialMissing { account_id: Uuid },
    #[error("token refresh failed with HTTP {status}: {body}")]
    CredentialRefreshFailed { status: u16, body: String },
    #[error("rate limited by provider after {attempts} attempts (HTTP {status})")]
    ProviderRateLimited {
        status: u16,
        body: ResponseBody,
        attempts: u32,
    },
    #[error("provider failed after {attempts} attempts (HTTP {status})")]
    ProviderTransientFailure {
        status: u16,
        body: ResponseBody,
        attempts: u32,
    },
    #[error("provider rejected request with HTTP {status}: {body}")]
    ProviderRejected { status: u16, body: ResponseBody },
    #[error("invalid {marketplace} payload: {reason}")]
    InvalidExternalPayload {
        marketplace: Marketplace,
        reason: String,
    },
    #[error("no cached quote for requested band")]
    NoCachedQuote,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("oauth state rejected: {0}")]
    OAuthState(String),
    #[error("quote provider failed: {0}")]
    QuoteProvider(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialMissing,
    CredentialRefreshFailed,
    ProviderRateLimited,
    ProviderTransientFailure,
    ProviderRejected,
    InvalidExternalPayload,
    NoCachedQuote,
    Transport,
    NotFound,
    Configuration,
    OAuthState,
    QuoteProvider,
    Storage,
}

impl SyncError {
    pub fn invalid_payload(marketplace: Marketplace, reason: impl Into<String>) -> Self {
        Self::InvalidExternalPayload {
            marketplace,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CredentialMissing { .. } => ErrorKind::CredentialMissing,
            Self::CredentialRefreshFailed { .. } => ErrorKind::CredentialRefreshFailed,
            Self::ProviderRateLimited { .. } => ErrorKind::ProviderRateLimited,
            Self::ProviderTransientFailure { .. } => ErrorKind::ProviderTransientFailure,
            Self::ProviderRejected { .. } => ErrorKind::ProviderRejected,
            Self::InvalidExternalPayload { .. } => ErrorKind::InvalidExternalPayload,
            Self::NoCachedQuote => ErrorKind::NoCachedQuote,
            Self::Transport(_) => ErrorKind::Transport,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::OAuthState(_) => ErrorKind::OAuthState,
            Self::QuoteProvider(_) => ErrorKind::QuoteProvider,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Failures after which the stored grant is considered dead and the
    /// account should stop being polled.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::CredentialMissing { .. } => true,
            Self::CredentialRefreshFailed { status, .. } => matches!(status, 400 | 401 | 403),
            _ => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::CredentialRefreshFailed { status, .. }
            | Self::ProviderRateLimited { status, .. }
            | Self::ProviderTransientFailure { status, .. }
            | Self::ProviderRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(value: redis::RedisError) -> Self {
        Self::Storage(value.to_string())
    }
}
