//! Single-use OAuth transaction state.

use crate::{
    error::SyncError,
    models::{Marketplace, OAuthTransaction},
};
use chrono::{Duration, Utc};
use rand::Rng;
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const STATE_TTL_SECS: i64 = 10 * 60;

const KEY_PREFIX: &str = "channel_sync:oauth:";

#[derive(Debug, Clone)]
pub struct NewAuthorization {
    pub seller_id: Uuid,
    pub marketplace: Marketplace,
    pub region: Option<String>,
    pub shop_domain: Option<String>,
    pub external_id: Option<String>,
    pub redirect_to: Option<String>,
}

#[derive(Clone)]
enum Backend {
    Redis(redis::Client),
    Memory(Arc<Mutex<HashMap<String, OAuthTransaction>>>),
}

/// Nonce store. Consuming a nonce reads and deletes it in one step, so a
/// duplicated callback can redeem an authorization code at most once.
#[derive(Clone)]
pub struct OAuthStates {
    backend: Backend,
}

impl OAuthStates {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn redis(client: redis::Client) -> Self {
        Self {
            backend: Backend::Redis(client),
        }
    }

    /// Redis when a URL is configured, process memory otherwise.
    pub fn from_url(redis_url: Option<&str>) -> Result<Self, SyncError> {
        match redis_url {
            Some(url) => Ok(Self::redis(redis::Client::open(url)?)),
            None => Ok(Self::in_memory()),
        }
    }

    pub async fn begin(&self, request: NewAuthorization) -> Result<OAuthTransaction, SyncError> {
        let nonce = hex::encode(rand::rng().random::<[u8; 16]>());
        let transaction = OAuthTransaction {
            nonce: nonce.clone(),
            seller_id: request.seller_id,
            marketplace: request.marketplace,
            region: request.region,
            shop_domain: request.shop_domain,
            external_id: request.external_id,
            redirect_to: request.redirect_to,
            expires_at: Utc::now() + Duration::seconds(STATE_TTL_SECS),
        };

        match &self.backend {
            Backend::Redis(client) => {
                let json = serde_json::to_string(&transaction)
                    .map_err(|err| SyncError::Storage(err.to_string()))?;
                let mut conn = client.get_multiplexed_async_connection().await?;
                let _: () = conn
                    .set_ex(key(&nonce), json, STATE_TTL_SECS as u64)
                    .await?;
            }
            Backend::Memory(map) => {
                let mut guard = map.lock().await;
                let now = Utc::now();
                guard.retain(|_, tx| tx.expires_at > now);
                guard.insert(nonce, transaction.clone());
            }
        }
        debug!(
            target: "channel_sync.oauth",
            seller_id = %transaction.seller_id,
            marketplace = %transaction.marketplace,
            "oauth transaction started"
        );
        Ok(transaction)
    }

    /// Redeems `nonce` for `marketplace`. Unknown, reused, expired and
    /// cross-marketplace nonces are rejected; in every case the nonce is gone
    /// afterwards.
    pub async fn consume(
        &self,
        nonce: &str,
        marketplace: Marketplace,
    ) -> Result<OAuthTransaction, SyncError> {
        let taken = match &self.backend {
            Backend::Redis(client) => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                let raw: Option<String> = conn.get_del(key(nonce)).await?;
                raw.map(|json| {
                    serde_json::from_str::<OAuthTransaction>(&json)
                        .map_err(|err| SyncError::Storage(err.to_string()))
                })
                .transpose()?
            }
            Backend::Memory(map) => map.lock().await.remove(nonce),
        };

        let transaction =
            taken.ok_or_else(|| SyncError::OAuthState("unknown or already used state".into()))?;
        if transaction.expires_at <= Utc::now() {
            return Err(SyncError::OAuthState("state expired".into()));
        }
        if transaction.marketplace != marketplace {
            return Err(SyncError::OAuthState(format!(
                "state was issued for {}",
                transaction.marketplace
            )));
        }
        Ok(transaction)
    }
}

fn key(nonce: &str) -> String {
    format!("{KEY_PREFIX}{nonce}")
}
