use crate::{
    config::ShopifyConfig,
    credentials::{TokenGrant, read_grant},
    error::SyncError,
};
use reqwest::Client;
use serde_json::json;
use urlencoding::encode;

/// Accepts `shop`, `shop.myshopify.com` or a pasted admin URL and returns the
/// bare `*.myshopify.com` domain.
pub fn normalize_shop_domain(input: &str) -> Option<String> {
    let trimmed = input
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()?
        .to_lowercase();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return None;
    }
    if trimmed.ends_with(".myshopify.com") {
        Some(trimmed)
    } else if !trimmed.contains('.') {
        Some(format!("{trimmed}.myshopify.com"))
    } else {
        None
    }
}

pub fn authorize_url(config: &ShopifyConfig, shop: &str, redirect_uri: &str, state: &str) -> String {
    format!(
        "https://{shop}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}",
        encode(&config.client_id),
        encode(&config.scopes),
        encode(redirect_uri),
        encode(state),
    )
}

pub async fn exchange_code(
    client: &Client,
    config: &ShopifyConfig,
    shop: &str,
    code: &str,
) -> Result<TokenGrant, SyncError> {
    let body = json!({
        "client_id": config.client_id,
        "client_secret": config.client_secret,
        "code": code,
    });
    request_token(client, config, shop, &body).await
}

/// Refreshes an expiring offline token.
pub async fn refresh_token(
    client: &Client,
    config: &ShopifyConfig,
    shop: &str,
    refresh_token: &str,
) -> Result<TokenGrant, SyncError> {
    let body = json!({
        "client_id": config.client_id,
        "client_secret": config.client_secret,
        "grant_type": "refresh_token",
        "refresh_token": refresh_token,
    });
    request_token(client, config, shop, &body).await
}

async fn request_token(
    client: &Client,
    config: &ShopifyConfig,
    shop: &str,
    body: &serde_json::Value,
) -> Result<TokenGrant, SyncError> {
    if config.client_id.is_empty() || config.client_secret.is_empty() {
        return Err(SyncError::Configuration(
            "SHOPIFY_CLIENT_ID or SHOPIFY_CLIENT_SECRET not configured".into(),
        ));
    }
    let url = format!("{}/admin/oauth/access_token", config.shop_base(shop));
    let response = client.post(url).json(body).send().await?;
    read_grant(response).await
}
