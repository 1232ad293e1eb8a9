use crate::{
    config::AmazonConfig,
    credentials::{TokenGrant, read_grant},
    error::SyncError,
};
use reqwest::Client;
use urlencoding::encode;

fn consent_base(region: &str) -> &'static str {
    match region {
        "eu" => "https://sellercentral-europe.amazon.com/apps/authorize/consent",
        "fe" => "https://sellercentral.amazon.co.jp/apps/authorize/consent",
        _ => "https://sellercentral.amazon.com/apps/authorize/consent",
    }
}

/// Seller Central consent URL for the seller's region. Unknown regions fall
/// back to North America.
pub fn authorize_url(config: &AmazonConfig, region: &str, state: &str) -> String {
    format!(
        "{}?application_id={}&state={}&redirect_uri={}&version=beta",
        consent_base(region),
        encode(&config.app_id),
        encode(state),
        encode(&config.redirect_uri),
    )
}

/// Login-with-Amazon code exchange.
pub async fn exchange_code(
    client: &Client,
    config: &AmazonConfig,
    code: &str,
) -> Result<TokenGrant, SyncError> {
    let body = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("redirect_uri", config.redirect_uri.as_str()),
    ];
    request_token(client, config, &body).await
}

pub async fn refresh_token(
    client: &Client,
    config: &AmazonConfig,
    refresh_token: &str,
) -> Result<TokenGrant, SyncError> {
    let body = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
    ];
    request_token(client, config, &body).await
}

async fn request_token(
    client: &Client,
    config: &AmazonConfig,
    params: &[(&str, &str)],
) -> Result<TokenGrant, SyncError> {
    if config.client_id.is_empty() || config.client_secret.is_empty() {
        return Err(SyncError::Configuration(
            "AMAZON_LWA_CLIENT_ID or AMAZON_LWA_CLIENT_SECRET not configured".into(),
        ));
    }
    let response = client.post(&config.token_url).form(params).send().await?;
    read_grant(response).await
}
