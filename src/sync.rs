//! The per-account refresh routine plus the flows that feed it: OAuth
//! completion and webhook ingestion. Scheduler ticks, manual refreshes and
//! fresh connections all go through [`SyncService::refresh_account`].

use crate::{
    amazon,
    config::AppConfig,
    ebay,
    error::SyncError,
    executor::RequestExecutor,
    metrics,
    models::{AccountStatus, ChannelAccount, IngestSource, Marketplace, OAuthTransaction},
    normalize::{self, RawOrder, WebhookKind},
    oauth_state::{NewAuthorization, OAuthStates},
    pipeline::{BatchSummary, Pipeline},
    shopify::{self, client::WebhookRegistration},
    store::Store,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orders are pulled for this trailing window on every refresh.
pub const PULL_WINDOW_DAYS: i64 = 2;

/// What one pull brought in. Section failures that did not abort the pull
/// are listed in `warnings`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PullReport {
    pub orders: usize,
    pub skipped_orders: usize,
    pub products: usize,
    pub inventory: usize,
    pub warnings: Vec<String>,
}

impl PullReport {
    pub fn warn(&mut self, context: &str, err: &SyncError) {
        warn!(
            target: "channel_sync.sync",
            context,
            kind = ?err.kind(),
            error = %err,
            "pull section degraded"
        );
        self.warnings.push(format!("{context}: {err}"));
    }

    pub fn absorb_orders(&mut self, summary: BatchSummary) {
        self.orders += summary.applied;
        self.skipped_orders += summary.skipped;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationStart {
    pub transaction: OAuthTransaction,
    pub authorize_url: String,
}

/// Query parameters a marketplace sends back to the callback URL. Amazon
/// names the code `spapi_oauth_code`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    #[serde(alias = "spapi_oauth_code")]
    pub code: Option<String>,
    pub shop: Option<String>,
    pub selling_partner_id: Option<String>,
    /// Comma separated.
    pub marketplace_ids: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionOutcome {
    pub account: ChannelAccount,
    pub webhooks: Option<WebhookRegistration>,
    pub report: Option<PullReport>,
    pub redirect_to: Option<String>,
}

/// A webhook delivery whose signature has already been checked.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub marketplace: Marketplace,
    pub topic: String,
    /// Shop domain, seller username or selling partner id of the sender.
    pub account_hint: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Ignored { reason: String },
    Order { order_id: Uuid, lines: usize },
    Product { variants: usize, skipped: usize },
    Inventory { applied: bool },
}

#[derive(Clone)]
pub struct SyncService {
    store: Store,
    executor: RequestExecutor,
    pipeline: Pipeline,
    oauth: OAuthStates,
}

impl SyncService {
    pub fn new(store: Store, executor: RequestExecutor, oauth: OAuthStates) -> Self {
        Self {
            pipeline: Pipeline::new(store.clone()),
            store,
            executor,
            oauth,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &AppConfig {
        self.executor.config()
    }

    /// Pulls the account's marketplace and stamps the sync time on success.
    /// An auth failure marks the account inactive before it is returned.
    pub async fn refresh_account(&self, account_id: Uuid) -> Result<PullReport, SyncError> {
        let started = Instant::now();
        let account = self.store.require_account(account_id).await?;
        if !account.is_active() {
            return Err(SyncError::Configuration(format!(
                "account {account_id} is inactive"
            )));
        }
        if !account.flags.orders_in {
            debug!(
                target: "channel_sync.sync",
                account_id = %account.id,
                "order ingestion disabled, nothing to pull"
            );
            self.store.mark_synced(account.id, Utc::now()).await?;
            return Ok(PullReport::default());
        }

        let since = Utc::now() - Duration::days(PULL_WINDOW_DAYS);
        let result = match account.marketplace {
            Marketplace::Shopify => {
                shopify::client::pull(&self.executor, &self.pipeline, &account, since).await
            }
            Marketplace::Ebay => {
                ebay::client::pull(&self.executor, &self.pipeline, &account, since).await
            }
            Marketplace::Amazon => {
                amazon::pull::pull(&self.executor, &self.pipeline, &account, since).await
            }
        };
        metrics::stage_elapsed("refresh", started.elapsed());

        match result {
            Ok(report) => {
                self.store.mark_synced(account.id, Utc::now()).await?;
                info!(
                    target: "channel_sync.sync",
                    account_id = %account.id,
                    marketplace = %account.marketplace,
                    orders = report.orders,
                    skipped_orders = report.skipped_orders,
                    products = report.products,
                    inventory = report.inventory,
                    warnings = report.warnings.len(),
                    "account refreshed"
                );
                Ok(report)
            }
            Err(err) => {
                if err.is_auth_failure() {
                    self.store
                        .set_account_status(account.id, AccountStatus::Inactive)
                        .await?;
                    warn!(
                        target: "channel_sync.sync",
                        account_id = %account.id,
                        marketplace = %account.marketplace,
                        error = %err,
                        "credentials rejected, account disabled"
                    );
                }
                Err(err)
            }
        }
    }

    /// Creates the OAuth nonce and the consent URL to send the seller to.
    pub async fn begin_authorization(
        &self,
        mut request: NewAuthorization,
    ) -> Result<AuthorizationStart, SyncError> {
        match request.marketplace {
            Marketplace::Shopify => {
                let shop = request
                    .shop_domain
                    .as_deref()
                    .and_then(shopify::auth::normalize_shop_domain)
                    .ok_or_else(|| {
                        SyncError::Configuration("a valid shop domain is required".into())
                    })?;
                request.shop_domain = Some(shop);
            }
            Marketplace::Amazon => {
                let region = request
                    .region
                    .take()
                    .map(|r| r.trim().to_lowercase())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| self.config().amazon.region.clone());
                request.region = Some(region);
            }
            Marketplace::Ebay => {}
        }

        let transaction = self.oauth.begin(request).await?;
        let config = self.config();
        let authorize_url = match transaction.marketplace {
            Marketplace::Shopify => shopify::auth::authorize_url(
                &config.shopify,
                transaction.shop_domain.as_deref().unwrap_or_default(),
                &format!("{}/oauth/shopify/callback", config.app_base_url),
                &transaction.nonce,
            ),
            Marketplace::Ebay => ebay::auth::authorize_url(&config.ebay, &transaction.nonce),
            Marketplace::Amazon => amazon::auth::authorize_url(
                &config.amazon,
                transaction.region.as_deref().unwrap_or("na"),
                &transaction.nonce,
            ),
        };
        Ok(AuthorizationStart {
            transaction,
            authorize_url,
        })
    }

    /// Redeems the callback: consumes the nonce, exchanges the code, upserts
    /// the account on its natural key and runs a first refresh. Webhook
    /// registration and the first refresh are best effort.
    pub async fn complete_authorization(
        &self,
        marketplace: Marketplace,
        params: CallbackParams,
    ) -> Result<ConnectionOutcome, SyncError> {
        let state = params
            .state
            .as_deref()
            .ok_or_else(|| SyncError::OAuthState("callback carries no state".into()))?;
        let transaction = self.oauth.consume(state, marketplace).await?;

        if let Some(error) = &params.error {
            return Err(SyncError::OAuthState(format!(
                "authorization denied: {error} {}",
                params.error_description.as_deref().unwrap_or_default()
            )));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SyncError::OAuthState("callback carries no code".into()))?;

        if marketplace == Marketplace::Shopify
            && let Some(shop) = params.shop.as_deref()
            && shopify::auth::normalize_shop_domain(shop) != transaction.shop_domain
        {
            return Err(SyncError::OAuthState(
                "callback shop does not match the authorization".into(),
            ));
        }

        let grant = self
            .executor
            .credentials()
            .exchange_code(&transaction, code)
            .await?;
        let update = grant.into_update(Utc::now());

        let external_id = match marketplace {
            Marketplace::Shopify => transaction.shop_domain.clone(),
            Marketplace::Ebay => transaction.external_id.clone(),
            Marketplace::Amazon => params
                .selling_partner_id
                .clone()
                .or_else(|| transaction.external_id.clone()),
        };

        let mut account = self
            .store
            .accounts_for_seller(transaction.seller_id, marketplace)
            .await
            .into_iter()
            .find(|a| external_id.is_none() || a.external_id == external_id)
            .unwrap_or_else(|| {
                ChannelAccount::new(transaction.seller_id, marketplace, external_id.clone())
            });
        account.access_token = Some(update.access_token);
        account.access_token_expires_at = update.access_token_expires_at;
        if update.refresh_token.is_some() {
            account.refresh_token = update.refresh_token;
            account.refresh_token_expires_at = update.refresh_token_expires_at;
        }
        account.status = AccountStatus::Active;
        match marketplace {
            Marketplace::Amazon => {
                let region = transaction.region.clone().unwrap_or_else(|| "na".into());
                let ids: Vec<String> = params
                    .marketplace_ids
                    .as_deref()
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect();
                account.marketplace_ids = if ids.is_empty() {
                    vec![amazon::default_marketplace_id(&region).to_string()]
                } else {
                    ids
                };
                account.region = Some(region);
            }
            Marketplace::Ebay => {
                if account.marketplace_ids.is_empty() {
                    account.marketplace_ids = vec![self.config().ebay.marketplace_id.clone()];
                }
            }
            Marketplace::Shopify => {}
        }
        let account = self.store.upsert_account(account).await;
        info!(
            target: "channel_sync.sync",
            account_id = %account.id,
            seller_id = %account.seller_id,
            marketplace = %account.marketplace,
            "account connected"
        );

        let webhooks = if marketplace == Marketplace::Shopify {
            let address = format!("{}/webhooks/shopify", self.config().app_base_url);
            match shopify::client::register_webhooks(&self.executor, &account, &address).await {
                Ok(registration) => Some(registration),
                Err(err) => {
                    warn!(
                        target: "channel_sync.sync",
                        account_id = %account.id,
                        error = %err,
                        "webhook registration failed"
                    );
                    None
                }
            }
        } else {
            None
        };

        let report = match self.refresh_account(account.id).await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(
                    target: "channel_sync.sync",
                    account_id = %account.id,
                    error = %err,
                    "initial refresh failed"
                );
                None
            }
        };

        let account = self.store.get_account(account.id).await.unwrap_or(account);
        Ok(ConnectionOutcome {
            account,
            webhooks,
            report,
            redirect_to: transaction.redirect_to,
        })
    }

    /// Routes a webhook payload by topic into the pipeline. Unknown topics
    /// and deliveries for inactive accounts are ignored.
    pub async fn ingest_webhook(&self, event: WebhookEvent) -> Result<IngestOutcome, SyncError> {
        let kind = match event.marketplace {
            Marketplace::Shopify => shopify::webhook_kind(&event.topic),
            Marketplace::Ebay => ebay::webhook_kind(&event.topic),
            Marketplace::Amazon => None,
        };
        let Some(kind) = kind else {
            info!(
                target: "channel_sync.sync",
                marketplace = %event.marketplace,
                topic = %event.topic,
                "ignoring unrouted webhook topic"
            );
            return Ok(IngestOutcome::Ignored {
                reason: format!("unrouted topic {}", event.topic),
            });
        };

        let account = self
            .webhook_account(event.marketplace, event.account_hint.as_deref())
            .await?;
        if !account.is_active() {
            return Ok(IngestOutcome::Ignored {
                reason: "account inactive".into(),
            });
        }

        match kind {
            WebhookKind::Order => {
                if !account.flags.orders_in {
                    return Ok(IngestOutcome::Ignored {
                        reason: "order ingestion disabled".into(),
                    });
                }
                let order = RawOrder::from_value(event.marketplace, event.payload)?.normalize()?;
                let outcome = self
                    .pipeline
                    .apply_order(&account, order, IngestSource::Webhook)
                    .await?;
                Ok(IngestOutcome::Order {
                    order_id: outcome.order_id,
                    lines: outcome.lines,
                })
            }
            WebhookKind::Product => {
                let product = shopify::payload::normalize_product(event.payload)?;
                let outcome = self.pipeline.apply_product(&account, product).await;
                Ok(IngestOutcome::Product {
                    variants: outcome.variants,
                    skipped: outcome.skipped,
                })
            }
            WebhookKind::Inventory => {
                let inventory = normalize::normalize_inventory(event.marketplace, event.payload)?;
                let applied = self
                    .pipeline
                    .apply_inventory(&account, inventory)
                    .await
                    .is_some();
                Ok(IngestOutcome::Inventory { applied })
            }
        }
    }

    async fn webhook_account(
        &self,
        marketplace: Marketplace,
        hint: Option<&str>,
    ) -> Result<ChannelAccount, SyncError> {
        let hint = hint.map(str::trim).filter(|h| !h.is_empty()).ok_or_else(|| {
            SyncError::Configuration("webhook does not identify the sending account".into())
        })?;
        let external_id = match marketplace {
            Marketplace::Shopify => {
                shopify::auth::normalize_shop_domain(hint).unwrap_or_else(|| hint.to_string())
            }
            _ => hint.to_string(),
        };
        self.store
            .find_account(marketplace, &external_id)
            .await
            .ok_or_else(|| SyncError::not_found("channel account", external_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, connected_account, harness, serve};
    use axum::{
        Json, Router,
        http::StatusCode,
        routing::{get, post},
    };
    use serde_json::json;

    fn service(h: &Harness) -> SyncService {
        SyncService::new(h.store.clone(), h.executor.clone(), OAuthStates::in_memory())
    }

    fn ebay_router() -> Router {
        Router::new()
            .route(
                "/identity/v1/oauth2/token",
                post(|| async {
                    Json(json!({
                        "access_token": "ebay-access",
                        "refresh_token": "ebay-refresh",
                        "expires_in": 7200,
                        "refresh_token_expires_in": 47304000
                    }))
                }),
            )
            .route(
                "/sell/fulfillment/v1/order",
                get(|| async {
                    Json(json!({"orders": [{
                        "orderId": "12-34",
                        "pricingSummary": {"total": {"value": "20.00", "currency": "USD"}},
                        "buyer": {"username": "buyer_one"},
                        "lineItems": [{"lineItemId": "L1", "sku": "MUG-01", "quantity": 2}]
                    }]}))
                }),
            )
            .route(
                "/sell/inventory/v1/inventory_item",
                get(|| async { Json(json!({"inventoryItems": []})) }),
            )
    }

    #[tokio::test]
    async fn ebay_connection_runs_first_refresh_and_burns_state() {
        let base = serve(ebay_router()).await;
        let h = harness(&base);
        let sync = service(&h);
        let seller_id = Uuid::new_v4();

        let start = sync
            .begin_authorization(NewAuthorization {
                seller_id,
                marketplace: Marketplace::Ebay,
                region: None,
                shop_domain: None,
                external_id: Some("seller_one".into()),
                redirect_to: Some("/settings/channels".into()),
            })
            .await
            .unwrap();
        assert!(start.authorize_url.contains(&start.transaction.nonce));

        let params = CallbackParams {
            state: Some(start.transaction.nonce.clone()),
            code: Some("auth-code".into()),
            ..CallbackParams::default()
        };
        let outcome = sync
            .complete_authorization(Marketplace::Ebay, params.clone())
            .await
            .unwrap();
        assert_eq!(outcome.account.external_id.as_deref(), Some("seller_one"));
        assert_eq!(outcome.account.access_token.as_deref(), Some("ebay-access"));
        assert_eq!(outcome.account.marketplace_ids, vec!["EBAY_US".to_string()]);
        assert!(outcome.account.last_synced_at.is_some());
        assert_eq!(outcome.report.unwrap().orders, 1);
        assert_eq!(outcome.redirect_to.as_deref(), Some("/settings/channels"));

        let replay = sync
            .complete_authorization(Marketplace::Ebay, params)
            .await
            .unwrap_err();
        assert!(matches!(replay, SyncError::OAuthState(_)));
    }

    async fn connect_ebay(sync: &SyncService, seller_id: Uuid) -> ConnectionOutcome {
        let start = sync
            .begin_authorization(NewAuthorization {
                seller_id,
                marketplace: Marketplace::Ebay,
                region: None,
                shop_domain: None,
                external_id: Some("seller_one".into()),
                redirect_to: None,
            })
            .await
            .unwrap();
        sync.complete_authorization(
            Marketplace::Ebay,
            CallbackParams {
                state: Some(start.transaction.nonce),
                code: Some("auth-code".into()),
                ..CallbackParams::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn reconnect_reuses_the_sellers_account() {
        let base = serve(ebay_router()).await;
        let h = harness(&base);
        let sync = service(&h);
        let seller_id = Uuid::new_v4();
        let first = connect_ebay(&sync, seller_id).await.account;
        let mut tuned = first.clone();
        tuned.flags.labels = true;
        tuned.status = AccountStatus::Inactive;
        h.store.upsert_account(tuned).await;

        let second = connect_ebay(&sync, seller_id).await.account;
        assert_eq!(second.id, first.id);
        assert!(second.flags.labels);
        assert!(second.is_active());
        assert_eq!(h.store.accounts_for_seller(seller_id, Marketplace::Ebay).await.len(), 1);
    }

    #[tokio::test]
    async fn amazon_callback_reads_partner_id_and_region_default() {
        let router = Router::new()
            .route(
                "/auth/o2/token",
                post(|| async {
                    Json(json!({"access_token": "Atza|a", "refresh_token": "Atzr|r", "expires_in": 3600}))
                }),
            )
            .route(
                "/orders/v0/orders",
                get(|| async { Json(json!({"payload": {"Orders": []}})) }),
            );
        let base = serve(router).await;
        let h = harness(&base);
        let sync = service(&h);

        let start = sync
            .begin_authorization(NewAuthorization {
                seller_id: Uuid::new_v4(),
                marketplace: Marketplace::Amazon,
                region: Some("EU".into()),
                shop_domain: None,
                external_id: None,
                redirect_to: None,
            })
            .await
            .unwrap();
        assert!(start.authorize_url.starts_with("https://sellercentral-europe.amazon.com"));

        let outcome = sync
            .complete_authorization(
                Marketplace::Amazon,
                CallbackParams {
                    state: Some(start.transaction.nonce),
                    code: Some("spapi-code".into()),
                    selling_partner_id: Some("A2PARTNER".into()),
                    ..CallbackParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.account.external_id.as_deref(), Some("A2PARTNER"));
        assert_eq!(outcome.account.region.as_deref(), Some("eu"));
        assert_eq!(
            outcome.account.marketplace_ids,
            vec!["A1F83G8C2ARO7P".to_string()]
        );
    }

    #[tokio::test]
    async fn denied_consent_still_consumes_state() {
        let h = harness("http://127.0.0.1:9");
        let sync = service(&h);
        let start = sync
            .begin_authorization(NewAuthorization {
                seller_id: Uuid::new_v4(),
                marketplace: Marketplace::Shopify,
                region: None,
                shop_domain: Some("https://Demo-Store.myshopify.com/admin".into()),
                external_id: None,
                redirect_to: None,
            })
            .await
            .unwrap();
        assert_eq!(
            start.transaction.shop_domain.as_deref(),
            Some("demo-store.myshopify.com")
        );
        assert!(
            start
                .authorize_url
                .contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Foauth%2Fshopify%2Fcallback")
        );

        let params = CallbackParams {
            state: Some(start.transaction.nonce),
            error: Some("access_denied".into()),
            ..CallbackParams::default()
        };
        let first = sync
            .complete_authorization(Marketplace::Shopify, params.clone())
            .await
            .unwrap_err();
        assert!(first.to_string().contains("access_denied"));
        let second = sync
            .complete_authorization(Marketplace::Shopify, params)
            .await
            .unwrap_err();
        assert!(second.to_string().contains("unknown or already used"));
    }

    #[tokio::test]
    async fn bad_shop_domain_is_refused_before_state_is_created() {
        let h = harness("http://127.0.0.1:9");
        let err = service(&h)
            .begin_authorization(NewAuthorization {
                seller_id: Uuid::new_v4(),
                marketplace: Marketplace::Shopify,
                region: None,
                shop_domain: Some("shop.example.com".into()),
                external_id: None,
                redirect_to: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn refresh_marks_account_synced() {
        let base = serve(ebay_router()).await;
        let h = harness(&base);
        let account = connected_account(&h.store, Marketplace::Ebay, "seller_one").await;

        let report = service(&h).refresh_account(account.id).await.unwrap();
        assert_eq!(report.orders, 1);
        assert!(report.warnings.is_empty());
        let stored = h.store.get_account(account.id).await.unwrap();
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn rejected_refresh_token_disables_account() {
        let router = Router::new().route(
            "/auth/o2/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant"})),
                )
            }),
        );
        let base = serve(router).await;
        let h = harness(&base);
        let mut account = connected_account(&h.store, Marketplace::Amazon, "A1SELLER").await;
        account.access_token_expires_at = Some(Utc::now() - Duration::minutes(1));
        let account = h.store.upsert_account(account).await;
        let sync = service(&h);

        let err = sync.refresh_account(account.id).await.unwrap_err();
        assert!(err.is_auth_failure());
        let stored = h.store.get_account(account.id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::Inactive);
        assert!(stored.last_synced_at.is_none());

        let again = sync.refresh_account(account.id).await.unwrap_err();
        assert!(matches!(again, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn disabled_order_ingestion_skips_the_pull() {
        let h = harness("http://127.0.0.1:9");
        let mut account = connected_account(&h.store, Marketplace::Ebay, "seller_one").await;
        account.flags.orders_in = false;
        let account = h.store.upsert_account(account).await;

        let report = service(&h).refresh_account(account.id).await.unwrap();
        assert_eq!(report, PullReport::default());
    }

    #[tokio::test]
    async fn webhooks_route_by_topic() {
        let h = harness("http://127.0.0.1:9");
        let sync = service(&h);
        let account = connected_account(&h.store, Marketplace::Shopify, "demo.myshopify.com").await;
        let event = |topic: &str, payload: Value| WebhookEvent {
            marketplace: Marketplace::Shopify,
            topic: topic.into(),
            account_hint: Some("demo.myshopify.com".into()),
            payload,
        };

        let product = sync
            .ingest_webhook(event(
                "products/update",
                json!({
                    "id": 632910392,
                    "title": "Mug",
                    "status": "active",
                    "variants": [
                        {"id": 808950810, "sku": "MUG-01", "title": "Blue", "inventory_item_id": 39072856},
                        {"id": 808950811, "sku": null, "title": "Red"}
                    ]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(
            product,
            IngestOutcome::Product {
                variants: 1,
                skipped: 1
            }
        );

        let inventory = sync
            .ingest_webhook(event(
                "inventory_levels/update",
                json!({"inventory_item_id": 39072856, "location_id": 1, "available": 4}),
            ))
            .await
            .unwrap();
        assert_eq!(inventory, IngestOutcome::Inventory { applied: true });
        let levels = h.store.inventory_for_account(account.id).await;
        assert_eq!(levels[0].available, 4);

        let order = sync
            .ingest_webhook(event(
                "orders/create",
                json!({
                    "id": 450789469,
                    "currency": "USD",
                    "total_price": "10.00",
                    "line_items": [{"id": 466157049, "variant_id": 808950810, "sku": "MUG-01", "quantity": 1, "price": "10.00"}]
                }),
            ))
            .await
            .unwrap();
        assert!(matches!(order, IngestOutcome::Order { lines: 1, .. }));

        let ignored = sync
            .ingest_webhook(event("app/uninstalled", json!({})))
            .await
            .unwrap();
        assert!(matches!(ignored, IngestOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn webhook_for_unknown_account_is_not_found() {
        let h = harness("http://127.0.0.1:9");
        let err = service(&h)
            .ingest_webhook(WebhookEvent {
                marketplace: Marketplace::Ebay,
                topic: "order".into(),
                account_hint: Some("nobody".into()),
                payload: json!({"orderId": "1"}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
