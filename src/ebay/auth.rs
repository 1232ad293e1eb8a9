use crate::{
    config::EbayConfig,
    credentials::{TokenGrant, read_grant},
    error::SyncError,
};
use reqwest::Client;
use urlencoding::encode;

/// Consent page URL. eBay identifies the redirect by RuName rather than URL.
pub fn authorize_url(config: &EbayConfig, state: &str) -> String {
    format!(
        "{}/oauth2/authorize?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        config.auth_base_url,
        encode(&config.client_id),
        encode(&config.ru_name),
        encode(&config.scope),
        encode(state),
    )
}

pub async fn exchange_code(
    client: &Client,
    config: &EbayConfig,
    code: &str,
) -> Result<TokenGrant, SyncError> {
    let body = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", config.ru_name.as_str()),
    ];
    request_token(client, config, &body).await
}

pub async fn refresh_token(
    client: &Client,
    config: &EbayConfig,
    refresh_token: &str,
) -> Result<TokenGrant, SyncError> {
    let body = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("scope", config.scope.as_str()),
    ];
    request_token(client, config, &body).await
}

async fn request_token(
    client: &Client,
    config: &EbayConfig,
    params: &[(&str, &str)],
) -> Result<TokenGrant, SyncError> {
    if config.client_id.is_empty() || config.client_secret.is_empty() {
        return Err(SyncError::Configuration(
            "EBAY_CLIENT_ID or EBAY_CLIENT_SECRET not configured".into(),
        ));
    }
    let response = client
        .post(config.token_url())
        .basic_auth(&config.client_id, Some(&config.client_secret))
        .form(params)
        .send()
        .await?;
    read_grant(response).await
}
