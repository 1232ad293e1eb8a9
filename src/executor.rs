//! Authenticated marketplace calls with bounded retry.

use crate::{
    amazon::{
        self,
        signing::{AwsCredentials, SigningParams, sign_request},
    },
    config::AppConfig,
    credentials::CredentialManager,
    error::SyncError,
    metrics,
    models::{ChannelAccount, Marketplace},
};
use chrono::Utc;
use reqwest::{Client, Method, Url, header::RETRY_AFTER};
use serde::Serialize;
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Response body, kept as JSON when it looks like JSON and as text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(text: String) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str(trimmed) {
                return ResponseBody::Json(value);
            }
        }
        ResponseBody::Text(text)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    /// JSON value of the body; `Null` for text bodies.
    pub fn into_json(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(_) => Value::Null,
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => write!(f, "{value}"),
            ResponseBody::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound applied to provider `Retry-After` values.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            max_retry_after: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retry_after: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_retry_after);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// One outbound call: path relative to the marketplace base (or an absolute
/// pagination URL), query pairs, optional JSON body and extra headers.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

struct Attempt {
    status: u16,
    retry_after: Option<Duration>,
    body: ResponseBody,
}

#[derive(Clone)]
pub struct RequestExecutor {
    client: Client,
    credentials: CredentialManager,
    config: Arc<AppConfig>,
    policy: RetryPolicy,
    aws: AwsCredentials,
}

impl RequestExecutor {
    pub fn new(client: Client, credentials: CredentialManager, config: Arc<AppConfig>) -> Self {
        let aws = AwsCredentials::from_config(&config.amazon);
        Self {
            client,
            credentials,
            config,
            policy: RetryPolicy::default(),
            aws,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn base_url(&self, account: &ChannelAccount) -> Result<String, SyncError> {
        match account.marketplace {
            Marketplace::Shopify => {
                let shop = account.external_id.as_deref().ok_or_else(|| {
                    SyncError::Configuration(format!("shopify account {} has no shop", account.id))
                })?;
                Ok(self.config.shopify.shop_base(shop))
            }
            Marketplace::Ebay => Ok(self.config.ebay.api_base_url.clone()),
            Marketplace::Amazon => Ok(match &self.config.amazon.endpoint_override {
                Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
                None => format!("https://{}", amazon::spapi_host(self.region(account))),
            }),
        }
    }

    fn region<'a>(&'a self, account: &'a ChannelAccount) -> &'a str {
        account
            .region
            .as_deref()
            .unwrap_or(self.config.amazon.region.as_str())
    }

    fn build_url(&self, account: &ChannelAccount, request: &ApiRequest) -> Result<Url, SyncError> {
        let raw = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            request.path.clone()
        } else {
            format!("{}{}", self.base_url(account)?, request.path)
        };
        let mut url = Url::parse(&raw)
            .map_err(|err| SyncError::Configuration(format!("invalid url {raw}: {err}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    /// Sends `request` for `account` with a valid credential attached, retrying
    /// throttling, server errors and transport failures.
    pub async fn execute(
        &self,
        account: &ChannelAccount,
        request: ApiRequest,
    ) -> Result<ResponseBody, SyncError> {
        let token = self.credentials.acquire_valid_credential(account).await?;
        let url = self.build_url(account, &request)?;
        let body = request
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|err| SyncError::Configuration(format!("unserializable body: {err}")))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .send_once(account, &request, &url, body.as_deref(), &token)
                .await;

            let (status, retry_after, response_body) = match outcome {
                Ok(Attempt {
                    status,
                    retry_after,
                    body,
                }) => (status, retry_after, body),
                Err(SyncError::Transport(reason)) if attempt < self.policy.max_attempts => {
                    warn!(
                        target: "channel_sync.executor",
                        account_id = %account.id,
                        marketplace = %account.marketplace,
                        attempt,
                        %reason,
                        "transport error, retrying"
                    );
                    metrics::provider_retry(account.marketplace);
                    tokio::time::sleep(self.policy.delay_for(attempt, None)).await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            metrics::provider_response(account.marketplace, status);
            if (200..300).contains(&status) {
                debug!(
                    target: "channel_sync.executor",
                    account_id = %account.id,
                    method = %request.method,
                    path = url.path(),
                    status,
                    attempt,
                    "provider call succeeded"
                );
                return Ok(response_body);
            }

            if is_retryable(status) && attempt < self.policy.max_attempts {
                let delay = self.policy.delay_for(attempt, retry_after);
                warn!(
                    target: "channel_sync.executor",
                    account_id = %account.id,
                    marketplace = %account.marketplace,
                    path = url.path(),
                    status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "provider throttled or failed, backing off"
                );
                metrics::provider_retry(account.marketplace);
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(match status {
                429 => SyncError::ProviderRateLimited {
                    status,
                    body: response_body,
                    attempts: attempt,
                },
                s if is_retryable(s) => SyncError::ProviderTransientFailure {
                    status,
                    body: response_body,
                    attempts: attempt,
                },
                _ => SyncError::ProviderRejected {
                    status,
                    body: response_body,
                },
            });
        }
    }

    async fn send_once(
        &self,
        account: &ChannelAccount,
        request: &ApiRequest,
        url: &Url,
        body: Option<&[u8]>,
        token: &str,
    ) -> Result<Attempt, SyncError> {
        let mut headers = request.headers.clone();
        headers.push(("accept".into(), "application/json".into()));
        if body.is_some() {
            headers.push(("content-type".into(), "application/json".into()));
        }

        match account.marketplace {
            Marketplace::Shopify => {
                headers.push(("x-shopify-access-token".into(), token.to_string()));
            }
            Marketplace::Ebay => {
                let marketplace_id = account
                    .marketplace_ids
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.config.ebay.marketplace_id.clone());
                headers.push(("authorization".into(), format!("Bearer {token}")));
                headers.push(("x-ebay-c-marketplace-id".into(), marketplace_id));
            }
            Marketplace::Amazon => {
                if !self.aws.is_configured() {
                    return Err(SyncError::Configuration(
                        "AMAZON_SPAPI_AWS_ACCESS_KEY_ID or AMAZON_SPAPI_AWS_SECRET_ACCESS_KEY not configured"
                            .into(),
                    ));
                }
                headers.push(("x-amz-access-token".into(), token.to_string()));
                let params = SigningParams {
                    credentials: &self.aws,
                    region: amazon::aws_region(self.region(account)),
                    service: amazon::SIGNING_SERVICE,
                    time: Utc::now(),
                };
                let signed =
                    sign_request(&params, &request.method, url, &headers, body.unwrap_or_default())?;
                headers.extend(signed);
            }
        }

        let mut builder = self.client.request(request.method.clone(), url.clone());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(bytes) = body {
            builder = builder.body(bytes.to_vec());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await?;
        Ok(Attempt {
            status,
            retry_after,
            body: ResponseBody::parse(text),
        })
    }
}
