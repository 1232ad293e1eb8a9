//! Shared helpers for tests that talk to an in-process HTTP server.

use crate::{
    config::AppConfig,
    credentials::CredentialManager,
    executor::{RequestExecutor, RetryPolicy},
    http::build_client,
    models::{ChannelAccount, Marketplace},
    store::Store,
};
use axum::Router;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Configuration with every marketplace endpoint pointed at `base`.
pub fn config_for(base: &str) -> AppConfig {
    let mut config = AppConfig::from_env();
    config.app_base_url = "https://app.example.com".into();
    config.redis_url = None;

    config.shopify.client_id = "shopify-id".into();
    config.shopify.client_secret = "shopify-secret".into();
    config.shopify.base_url_override = Some(base.to_string());

    config.ebay.client_id = "ebay-id".into();
    config.ebay.client_secret = "ebay-secret".into();
    config.ebay.api_base_url = base.to_string();
    config.ebay.auth_base_url = base.to_string();

    config.amazon.client_id = "lwa-id".into();
    config.amazon.client_secret = "lwa-secret".into();
    config.amazon.token_url = format!("{base}/auth/o2/token");
    config.amazon.aws_access_key_id = "AKIDEXAMPLE".into();
    config.amazon.aws_secret_access_key = "secret".into();
    config.amazon.aws_session_token = None;
    config.amazon.endpoint_override = Some(base.to_string());

    config.rate_shopping.api_url = None;
    config.shippo.api_key = None;
    config
}

pub struct Harness {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub credentials: CredentialManager,
    pub executor: RequestExecutor,
}

pub fn harness(base: &str) -> Harness {
    let store = Store::new();
    let config = Arc::new(config_for(base));
    let client = build_client();
    let credentials = CredentialManager::new(store.clone(), config.clone(), client.clone());
    let executor = RequestExecutor::new(client, credentials.clone(), config.clone())
        .with_policy(RetryPolicy::immediate(3));
    Harness {
        store,
        config,
        credentials,
        executor,
    }
}

/// Active account holding a token that stays valid for an hour.
pub async fn connected_account(
    store: &Store,
    marketplace: Marketplace,
    external_id: &str,
) -> ChannelAccount {
    let mut account =
        ChannelAccount::new(Uuid::new_v4(), marketplace, Some(external_id.to_string()));
    account.access_token = Some("live-token".into());
    account.refresh_token = Some("refresh-token".into());
    account.access_token_expires_at = Some(Utc::now() + Duration::hours(1));
    account.region = Some("na".into());
    account.marketplace_ids = match marketplace {
        Marketplace::Amazon => vec!["ATVPDKIKX0DER".into()],
        Marketplace::Ebay => vec!["EBAY_US".into()],
        Marketplace::Shopify => Vec::new(),
    };
    store.upsert_account(account).await
}
