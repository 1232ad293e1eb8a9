use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
};
use channel_sync::{
    amazon,
    config::AppConfig,
    credentials::CredentialManager,
    erasure::{self, ErasureOutcome},
    error::SyncError,
    executor::RequestExecutor,
    http::build_client,
    jobs::{IngestQueue, JobInfo},
    metrics,
    models::{ApiError, ChannelAccount, InboundShipment, Marketplace, ShippingLabel},
    oauth_state::{NewAuthorization, OAuthStates},
    rates::{QuoteCache, QuoteProvider, QuoteRequest},
    scheduler::Scheduler,
    shopify,
    store::Store,
    sync::{CallbackParams, PullReport, SyncService, WebhookEvent},
};
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(AppConfig::from_env());
    let client = build_client();
    let store = Store::new();
    let credentials = CredentialManager::new(store.clone(), config.clone(), client.clone());
    let executor = RequestExecutor::new(client.clone(), credentials, config.clone());
    let oauth = OAuthStates::from_url(config.redis_url.as_deref())
        .wrap_err("oauth state backend")?;
    let sync = SyncService::new(store.clone(), executor, oauth);

    let (queue, _worker) = IngestQueue::spawn(sync.clone(), config.ingest_queue_capacity);
    let scheduler = config
        .scheduler_enabled
        .then(|| Scheduler::spawn(sync.clone()));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("prometheus recorder")?;

    let state = AppState {
        sync,
        queue,
        quotes: QuoteCache::new(store, config.rate_shopping.ttl),
        provider: QuoteProvider::from_config(&config, client),
        prometheus_handle,
    };

    let app = router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target: "channel_sync.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("http server")?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/accounts/{id}", delete(disconnect_account))
        .route("/sellers/{seller_id}/accounts/{marketplace}", get(seller_account))
        .route("/accounts/{id}/refresh", post(refresh_account))
        .route("/accounts/{id}/inventory", post(push_inventory))
        .route("/accounts/{id}/fulfillment-orders", post(create_fulfillment_order))
        .route("/accounts/{id}/shipments", post(create_shipment))
        .route("/accounts/{id}/shipments/{shipment_id}/label", post(fetch_label))
        .route("/accounts/{id}/inbound/plans", post(create_inbound_plan))
        .route("/accounts/{id}/inbound/shipments", post(create_inbound_shipment))
        .route(
            "/accounts/{id}/inbound/shipments/{shipment_id}/labels",
            get(fetch_inbound_labels),
        )
        .route("/webhooks/{marketplace}", post(receive_webhook))
        .route("/jobs/{id}", get(get_job_status))
        .route("/erasure/{marketplace}", post(erase_identity))
        .route("/oauth/{marketplace}/start", get(oauth_start))
        .route("/oauth/{marketplace}/callback", get(oauth_callback))
        .route("/rates/quote", post(quote))
        .route("/rates/cached", post(cached_quote))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
struct AppState {
    sync: SyncService,
    queue: IngestQueue,
    quotes: QuoteCache,
    provider: QuoteProvider,
    prometheus_handle: PrometheusHandle,
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "channel_sync.api", error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!(target: "channel_sync.api", "shutdown requested");
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "channel-sync",
    }))
}

/// Prometheus exposition. Guarded by `X-Metrics-Key` when `METRICS_KEY` is set.
async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SellerQuery {
    seller_id: Uuid,
}

/// Disconnect an account. Only the owning seller may remove it.
///
/// - Method: `DELETE`
/// - Path: `/accounts/{id}?seller_id=...`
/// - Response: `{ "deleted": true }`, `404` when absent or owned by another seller
async fn disconnect_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SellerQuery>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/accounts/delete");
    if !state.sync.store().delete_account(id, query.seller_id).await? {
        return Err(SyncError::not_found("channel account", id).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn seller_account(
    State(state): State<AppState>,
    Path((seller_id, marketplace)): Path<(Uuid, String)>,
) -> Result<Json<ChannelAccount>, AppError> {
    let marketplace = parse_marketplace(&marketplace)?;
    state
        .sync
        .store()
        .find_account_for_seller(seller_id, marketplace)
        .await
        .map(Json)
        .ok_or_else(|| SyncError::not_found("channel account", format!("{seller_id}/{marketplace}")).into())
}

/// Pull the account now. Errors are returned to the caller as typed failures.
///
/// - Method: `POST`
/// - Path: `/accounts/{id}/refresh`
/// - Response: `PullReport`
async fn refresh_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PullReport>, AppError> {
    metrics::inc_requests("/accounts/refresh");
    Ok(Json(state.sync.refresh_account(id).await?))
}

#[derive(Debug, Deserialize)]
struct InventoryPush {
    updates: Vec<amazon::inventory::InventoryUpdate>,
}

async fn push_inventory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<InventoryPush>,
) -> Result<Json<amazon::inventory::PushReport>, AppError> {
    metrics::inc_requests("/accounts/inventory");
    let account = amazon_account(&state, id).await?;
    let report =
        amazon::inventory::push_inventory(state.sync.executor(), &account, &body.updates).await?;
    Ok(Json(report))
}

async fn create_fulfillment_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<amazon::fulfillment::FulfillmentOrderRequest>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/accounts/fulfillment-orders");
    let account = amazon_account(&state, id).await?;
    let response =
        amazon::fulfillment::create_fulfillment_order(state.sync.executor(), &account, &request)
            .await?;
    Ok(Json(response.into_json()))
}

async fn create_shipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<amazon::shipping::ShipmentRequest>,
) -> Result<Json<amazon::shipping::ShipmentOutcome>, AppError> {
    metrics::inc_requests("/accounts/shipments");
    let account = amazon_account(&state, id).await?;
    let outcome = amazon::shipping::create_shipment(
        state.sync.executor(),
        state.sync.pipeline(),
        &account,
        &request,
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct LabelQuery {
    order_id: Option<Uuid>,
    format: Option<String>,
}

async fn fetch_label(
    State(state): State<AppState>,
    Path((id, shipment_id)): Path<(Uuid, String)>,
    Query(query): Query<LabelQuery>,
) -> Result<Json<ShippingLabel>, AppError> {
    metrics::inc_requests("/accounts/shipments/label");
    let account = amazon_account(&state, id).await?;
    let label = amazon::shipping::fetch_label(
        state.sync.executor(),
        state.sync.pipeline(),
        &account,
        &shipment_id,
        query.order_id,
        query.format.as_deref(),
    )
    .await?;
    Ok(Json(label))
}

async fn create_inbound_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<amazon::inbound::InboundPlanRequest>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/accounts/inbound/plans");
    let account = amazon_account(&state, id).await?;
    let response =
        amazon::inbound::create_inbound_plan(state.sync.executor(), &account, &request).await?;
    Ok(Json(response.into_json()))
}

async fn create_inbound_shipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<amazon::inbound::InboundShipmentRequest>,
) -> Result<Json<InboundShipment>, AppError> {
    metrics::inc_requests("/accounts/inbound/shipments");
    let account = amazon_account(&state, id).await?;
    let shipment = amazon::inbound::create_inbound_shipment(
        state.sync.executor(),
        state.sync.store(),
        &account,
        &request,
    )
    .await?;
    Ok(Json(shipment))
}

async fn fetch_inbound_labels(
    State(state): State<AppState>,
    Path((id, shipment_id)): Path<(Uuid, String)>,
    Query(request): Query<amazon::inbound::LabelRequest>,
) -> Result<Json<amazon::inbound::LabelsOutcome>, AppError> {
    metrics::inc_requests("/accounts/inbound/labels");
    let account = amazon_account(&state, id).await?;
    let outcome = amazon::inbound::fetch_inbound_labels(
        state.sync.executor(),
        state.sync.store(),
        &account,
        &shipment_id,
        &request,
    )
    .await?;
    Ok(Json(outcome))
}

/// Queue a webhook delivery.
///
/// - Method: `POST`
/// - Path: `/webhooks/{marketplace}`
/// - Headers: `X-Shopify-Topic`/`X-Shopify-Shop-Domain`/`X-Shopify-Hmac-Sha256`
///   for Shopify, `X-Channel-Topic`/`X-Channel-Account` otherwise
/// - Response: `202` with the queued `JobInfo`; `401` when a Shopify signature
///   does not match the raw body
async fn receive_webhook(
    State(state): State<AppState>,
    Path(marketplace): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    metrics::inc_requests("/webhooks");
    let marketplace = parse_marketplace(&marketplace)?;
    if marketplace == Marketplace::Shopify {
        let Some(secret) = state.sync.config().shopify.webhook_secret.as_deref() else {
            warn!(target: "channel_sync.api", "SHOPIFY_WEBHOOK_SECRET is not set");
            return Ok(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "webhook_secret_missing",
            ));
        };
        let signature = header_value(&headers, &["X-Shopify-Hmac-Sha256"]).unwrap_or_default();
        if !shopify::verify_webhook(secret, &body, &signature) {
            warn!(
                target: "channel_sync.api",
                topic = ?header_value(&headers, &["X-Shopify-Topic"]),
                shop = ?header_value(&headers, &["X-Shopify-Shop-Domain"]),
                "webhook signature mismatch"
            );
            return Ok(api_error(StatusCode::UNAUTHORIZED, "invalid_signature"));
        }
    }

    let topic = header_value(&headers, &["X-Shopify-Topic", "X-Channel-Topic"]).ok_or_else(
        || SyncError::Configuration("webhook topic header is missing".into()),
    )?;
    let account_hint = header_value(&headers, &["X-Shopify-Shop-Domain", "X-Channel-Account"]);
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| SyncError::invalid_payload(marketplace, format!("webhook body: {err}")))?;
    let info = state
        .queue
        .enqueue(WebhookEvent {
            marketplace,
            topic,
            account_hint,
            payload,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(info)).into_response())
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return Err(SyncError::Configuration(format!("invalid job id {id}")).into());
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or_else(|| SyncError::not_found("job", uuid).into())
}

#[derive(Debug, Deserialize)]
struct ErasureRequest {
    external_id: String,
}

/// Forget everything synced for an external identity.
///
/// - Method: `POST`
/// - Path: `/erasure/{marketplace}`
/// - Body: `{ "external_id": "..." }`
/// - Response: `{ deleted, counts }` or `{ deleted: false, reason }`
async fn erase_identity(
    State(state): State<AppState>,
    Path(marketplace): Path<String>,
    Json(body): Json<ErasureRequest>,
) -> Result<Json<ErasureOutcome>, AppError> {
    metrics::inc_requests("/erasure");
    let marketplace = parse_marketplace(&marketplace)?;
    let outcome =
        erasure::erase_external_identity(state.sync.store(), marketplace, &body.external_id).await;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    seller_id: Uuid,
    shop: Option<String>,
    region: Option<String>,
    external_id: Option<String>,
    redirect_to: Option<String>,
}

/// Redirects the seller to the marketplace consent page.
async fn oauth_start(
    State(state): State<AppState>,
    Path(marketplace): Path<String>,
    Query(query): Query<StartQuery>,
) -> Result<Redirect, AppError> {
    metrics::inc_requests("/oauth/start");
    let marketplace = parse_marketplace(&marketplace)?;
    let start = state
        .sync
        .begin_authorization(NewAuthorization {
            seller_id: query.seller_id,
            marketplace,
            region: query.region,
            shop_domain: query.shop,
            external_id: query.external_id,
            redirect_to: query.redirect_to,
        })
        .await?;
    Ok(Redirect::to(&start.authorize_url))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Path(marketplace): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    metrics::inc_requests("/oauth/callback");
    let marketplace = parse_marketplace(&marketplace)?;
    let outcome = state
        .sync
        .complete_authorization(marketplace, params)
        .await?;
    match &outcome.redirect_to {
        Some(target) => {
            let separator = if target.contains('?') { '&' } else { '?' };
            Ok(Redirect::to(&format!("{target}{separator}connected={marketplace}")).into_response())
        }
        None => Ok(Json(outcome).into_response()),
    }
}

async fn quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/rates/quote");
    let quote = state
        .quotes
        .get_or_create(&request, || state.provider.quote(&request))
        .await?;
    Ok(Json(json!(quote)))
}

async fn cached_quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<Value>, AppError> {
    metrics::inc_requests("/rates/cached");
    let quote = state.quotes.cached_only(&request).await?;
    Ok(Json(json!(quote)))
}

async fn amazon_account(state: &AppState, id: Uuid) -> Result<ChannelAccount, AppError> {
    let account = state.sync.store().require_account(id).await?;
    if account.marketplace != Marketplace::Amazon {
        return Err(SyncError::Configuration(format!(
            "account {id} is not an amazon account"
        ))
        .into());
    }
    Ok(account)
}

fn parse_marketplace(raw: &str) -> Result<Marketplace, AppError> {
    Marketplace::parse(raw)
        .ok_or_else(|| SyncError::Configuration(format!("unknown marketplace {raw}")).into())
}

fn api_error(status: StatusCode, error: &str) -> Response {
    let payload = ApiError {
        error: error.to_string(),
        detail: None,
    };
    (status, Json(payload)).into_response()
}

fn header_value(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

#[derive(Debug)]
struct AppError(SyncError);

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use channel_sync::error::ErrorKind;
        let status = match self.0.kind() {
            ErrorKind::InvalidExternalPayload
            | ErrorKind::Configuration
            | ErrorKind::OAuthState => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound | ErrorKind::NoCachedQuote => StatusCode::NOT_FOUND,
            ErrorKind::CredentialMissing => StatusCode::CONFLICT,
            ErrorKind::ProviderRejected => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ProviderRateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::CredentialRefreshFailed
            | ErrorKind::ProviderTransientFailure
            | ErrorKind::Transport
            | ErrorKind::QuoteProvider => StatusCode::BAD_GATEWAY,
            ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        };
        let error = serde_json::to_value(self.0.kind())
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "error".into());
        let payload = ApiError {
            error,
            detail: Some(self.0.to_string()),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    const WEBHOOK_SECRET: &str = "hush";

    fn test_app() -> (Router, Store) {
        let mut config = AppConfig::from_env();
        config.rate_shopping.api_url = None;
        config.shippo.api_key = None;
        config.shopify.webhook_secret = Some(WEBHOOK_SECRET.into());
        let config = Arc::new(config);
        let client = build_client();
        let store = Store::new();
        let credentials = CredentialManager::new(store.clone(), config.clone(), client.clone());
        let executor = RequestExecutor::new(client.clone(), credentials, config.clone());
        let sync = SyncService::new(store.clone(), executor, OAuthStates::in_memory());
        let (queue, _worker) = IngestQueue::spawn(sync.clone(), 4);
        let app = router(AppState {
            sync,
            queue,
            quotes: QuoteCache::new(store.clone(), config.rate_shopping.ttl),
            provider: QuoteProvider::from_config(&config, client),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        });
        (app, store)
    }

    fn test_router() -> Router {
        test_app().0
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn shopify_signature(body: &[u8]) -> String {
        use base64::{Engine, engine::general_purpose::STANDARD};
        use hmac::{Hmac, Mac};
        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    fn shopify_webhook(body: &str, signature: &str) -> Request<Body> {
        Request::post("/webhooks/shopify")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Shopify-Topic", "orders/create")
            .header("X-Shopify-Shop-Domain", "demo.myshopify.com")
            .header("X-Shopify-Hmac-Sha256", signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(request: Request<Body>) -> (StatusCode, Value) {
        send(&test_router(), request).await
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn erasure_without_match_reports_reason() {
        let (status, body) = call(post_json(
            "/erasure/ebay",
            json!({"external_id": "nobody"}),
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"deleted": false, "reason": "no_match"}));
    }

    #[tokio::test]
    async fn unknown_marketplace_is_a_bad_request() {
        let (status, body) = call(post_json("/erasure/etsy", json!({"external_id": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "configuration");
    }

    #[tokio::test]
    async fn webhook_needs_topic_header() {
        let (status, _) = call(post_json("/webhooks/ebay", json!({"id": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signed_shopify_webhook_is_accepted_into_queue() {
        let body = json!({"id": 1}).to_string();
        let (status, body) = call(shopify_webhook(&body, &shopify_signature(body.as_bytes()))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["topic"], "orders/create");
        assert!(body["id"].is_string());
    }

    #[tokio::test]
    async fn tampered_shopify_webhook_is_unauthorized() {
        let signed = json!({"id": 1}).to_string();
        let tampered = json!({"id": 2}).to_string();
        let (status, body) =
            call(shopify_webhook(&tampered, &shopify_signature(signed.as_bytes()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_signature");

        let unsigned = Request::post("/webhooks/shopify")
            .header("X-Shopify-Topic", "orders/create")
            .body(Body::from(signed))
            .unwrap();
        let (status, _) = call(unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disconnect_is_limited_to_the_owning_seller() {
        let (app, store) = test_app();
        let seller = Uuid::new_v4();
        let account = store
            .upsert_account(ChannelAccount::new(seller, Marketplace::Ebay, Some("seller_one".into())))
            .await;
        let delete_as = |seller: Uuid| {
            Request::delete(format!("/accounts/{}?seller_id={seller}", account.id))
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(&app, delete_as(Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let lookup = format!("/sellers/{seller}/accounts/ebay");
        let (status, body) = send(&app, Request::get(lookup.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["external_id"], "seller_one");
        assert!(body.get("access_token").is_none());

        let (status, body) = send(&app, delete_as(seller)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);
        assert!(store.get_account(account.id).await.is_none());

        let (status, _) = send(&app, delete_as(seller)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Request::get(lookup.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inbound_routes_require_an_amazon_account() {
        let (app, store) = test_app();
        let account = store
            .upsert_account(ChannelAccount::new(Uuid::new_v4(), Marketplace::Ebay, Some("s".into())))
            .await;
        let request = post_json(
            &format!("/accounts/{}/inbound/plans", account.id),
            json!({
                "shipFromAddress": {
                    "name": "Warehouse", "addressLine1": "1 Dock Rd", "city": "Seattle",
                    "stateOrProvinceCode": "WA", "postalCode": "98101", "countryCode": "US"
                },
                "items": [{"sellerSku": "MUG-01", "quantity": 24}]
            }),
        );
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "configuration");
    }

    #[tokio::test]
    async fn cache_only_miss_is_not_found() {
        let (status, body) = call(post_json(
            "/rates/cached",
            json!({"city": "Austin", "state": "TX", "zip": "78701", "weightLbs": 2.0, "itemCount": 1}),
        ))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no_cached_quote");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let uri = format!("/jobs/{}", Uuid::new_v4());
        let (status, _) = call(Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
