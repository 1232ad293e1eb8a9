//! Access-token lifecycle for connected accounts.

use crate::{
    amazon, config::AppConfig, ebay, error::SyncError, metrics, models::ChannelAccount,
    models::Marketplace, models::OAuthTransaction, shopify, store::Store, store::TokenUpdate,
};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Tokens are refreshed when they expire within this window.
pub const REFRESH_MARGIN_SECS: i64 = 120;

const MAX_ERROR_BODY: usize = 512;

/// Token endpoint response shared by all three marketplaces.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    pub fn into_update(self, now: DateTime<Utc>) -> TokenUpdate {
        TokenUpdate {
            access_token: self.access_token,
            access_token_expires_at: self
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| now + Duration::seconds(secs)),
            refresh_token: self.refresh_token,
            refresh_token_expires_at: self
                .refresh_token_expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| now + Duration::seconds(secs)),
        }
    }
}

/// Reads a token endpoint response. Any non-2xx status is a refresh failure;
/// the caller has not touched stored state at this point.
pub(crate) async fn read_grant(response: Response) -> Result<TokenGrant, SyncError> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    if !(200..300).contains(&status) {
        return Err(SyncError::CredentialRefreshFailed {
            status,
            body: truncate(&text),
        });
    }
    serde_json::from_str(&text).map_err(|err| SyncError::CredentialRefreshFailed {
        status,
        body: format!("unreadable token response: {err}"),
    })
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// `true` when the token must be refreshed before use. Tokens without an
/// expiry (Shopify offline tokens) never need it.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|exp| exp - now <= Duration::seconds(REFRESH_MARGIN_SECS))
}

#[derive(Clone)]
pub struct CredentialManager {
    store: Store,
    config: Arc<AppConfig>,
    client: Client,
}

impl CredentialManager {
    pub fn new(store: Store, config: Arc<AppConfig>, client: Client) -> Self {
        Self {
            store,
            config,
            client,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Returns an access token that is valid for at least the refresh margin,
    /// refreshing and persisting it first when needed.
    pub async fn acquire_valid_credential(
        &self,
        account: &ChannelAccount,
    ) -> Result<String, SyncError> {
        let account = self.store.require_account(account.id).await?;
        let now = Utc::now();

        if let Some(token) = account.access_token.as_deref()
            && !needs_refresh(account.access_token_expires_at, now)
        {
            return Ok(token.to_string());
        }

        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or(SyncError::CredentialMissing {
                account_id: account.id,
            })?;

        debug!(
            target: "channel_sync.credentials",
            account_id = %account.id,
            marketplace = %account.marketplace,
            "refreshing access token"
        );

        let grant = match account.marketplace {
            Marketplace::Shopify => {
                let shop = account.external_id.as_deref().ok_or_else(|| {
                    SyncError::Configuration(format!("shopify account {} has no shop", account.id))
                })?;
                shopify::auth::refresh_token(&self.client, &self.config.shopify, shop, refresh_token)
                    .await?
            }
            Marketplace::Ebay => {
                ebay::auth::refresh_token(&self.client, &self.config.ebay, refresh_token).await?
            }
            Marketplace::Amazon => {
                amazon::auth::refresh_token(&self.client, &self.config.amazon, refresh_token)
                    .await?
            }
        };

        let updated = self
            .store
            .apply_token_update(account.id, grant.into_update(now))
            .await?;
        metrics::token_refreshed(account.marketplace);
        info!(
            target: "channel_sync.credentials",
            account_id = %account.id,
            marketplace = %account.marketplace,
            expires_at = ?updated.access_token_expires_at,
            "access token refreshed"
        );

        updated
            .access_token
            .ok_or(SyncError::CredentialMissing {
                account_id: account.id,
            })
    }

    /// Redeems an authorization code for the marketplace named by the OAuth
    /// transaction.
    pub async fn exchange_code(
        &self,
        transaction: &OAuthTransaction,
        code: &str,
    ) -> Result<TokenGrant, SyncError> {
        match transaction.marketplace {
            Marketplace::Shopify => {
                let shop = transaction.shop_domain.as_deref().ok_or_else(|| {
                    SyncError::OAuthState("shopify authorization has no shop".into())
                })?;
                shopify::auth::exchange_code(&self.client, &self.config.shopify, shop, code).await
            }
            Marketplace::Ebay => {
                ebay::auth::exchange_code(&self.client, &self.config.ebay, code).await
            }
            Marketplace::Amazon => {
                amazon::auth::exchange_code(&self.client, &self.config.amazon, code).await
            }
        }
    }
}
