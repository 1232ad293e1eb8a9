use crate::{
    error::SyncError,
    executor::{ApiRequest, RequestExecutor},
    models::{ChannelAccount, IngestSource},
    normalize::RawOrder,
    pipeline::Pipeline,
    shopify::{WEBHOOK_TOPICS, payload},
    sync::PullReport,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

fn admin_path(executor: &RequestExecutor, resource: &str) -> String {
    format!(
        "/admin/api/{}/{resource}",
        executor.config().shopify.api_version
    )
}

fn array_field(body: Value, field: &str) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

pub async fn fetch_products(
    executor: &RequestExecutor,
    account: &ChannelAccount,
) -> Result<Vec<Value>, SyncError> {
    let request = ApiRequest::get(admin_path(executor, "products.json")).query("limit", "250");
    let body = executor.execute(account, request).await?;
    Ok(array_field(body.into_json(), "products"))
}

/// Orders updated since `since`, newest first.
pub async fn fetch_orders(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    since: DateTime<Utc>,
) -> Result<Vec<Value>, SyncError> {
    let request = ApiRequest::get(admin_path(executor, "orders.json"))
        .query("status", "any")
        .query("limit", "50")
        .query("order", "updated_at desc")
        .query(
            "updated_at_min",
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    let body = executor.execute(account, request).await?;
    Ok(array_field(body.into_json(), "orders"))
}

/// Inventory levels at the shop's first location.
pub async fn fetch_inventory_levels(
    executor: &RequestExecutor,
    account: &ChannelAccount,
) -> Result<Vec<Value>, SyncError> {
    let locations = executor
        .execute(account, ApiRequest::get(admin_path(executor, "locations.json")))
        .await?;
    let Some(location_id) = array_field(locations.into_json(), "locations")
        .first()
        .and_then(|loc| loc.get("id"))
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    else {
        return Ok(Vec::new());
    };

    let request = ApiRequest::get(admin_path(executor, "inventory_levels.json"))
        .query("limit", "250")
        .query("location_ids", location_id);
    let body = executor.execute(account, request).await?;
    Ok(array_field(body.into_json(), "inventory_levels"))
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct WebhookRegistration {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

/// Registers every sync topic at `address`. Topics already registered for
/// that address are left alone, and a 422 on create counts as existing.
pub async fn register_webhooks(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    address: &str,
) -> Result<WebhookRegistration, SyncError> {
    let path = admin_path(executor, "webhooks.json");
    let listed = executor
        .execute(account, ApiRequest::get(path.clone()).query("limit", "250"))
        .await;
    let registered: Vec<(String, String)> = match listed {
        Ok(body) => array_field(body.into_json(), "webhooks")
            .iter()
            .filter_map(|hook| {
                let topic = hook.get("topic")?.as_str()?;
                let addr = hook.get("address")?.as_str()?;
                Some((topic.to_string(), addr.to_string()))
            })
            .collect(),
        Err(err) if err.is_auth_failure() => return Err(err),
        Err(err) => {
            warn!(
                target: "channel_sync.shopify",
                account_id = %account.id,
                error = %err,
                "listing webhooks failed, registering all topics"
            );
            Vec::new()
        }
    };

    let mut outcome = WebhookRegistration::default();
    for topic in WEBHOOK_TOPICS {
        if registered.iter().any(|(t, a)| t == topic && a == address) {
            outcome.existing.push(topic.to_string());
            continue;
        }
        let request = ApiRequest::post(path.clone()).json(json!({
            "webhook": { "topic": topic, "address": address, "format": "json" }
        }));
        match executor.execute(account, request).await {
            Ok(_) => outcome.created.push(topic.to_string()),
            Err(SyncError::ProviderRejected { status: 422, .. }) => {
                outcome.existing.push(topic.to_string())
            }
            Err(err) => return Err(err),
        }
    }
    info!(
        target: "channel_sync.shopify",
        account_id = %account.id,
        created = outcome.created.len(),
        existing = outcome.existing.len(),
        "webhooks registered"
    );
    Ok(outcome)
}

/// Pulls products, recent orders and inventory levels into the pipeline.
/// Product and inventory failures are recorded as warnings; order and
/// credential failures abort the pull.
pub async fn pull(
    executor: &RequestExecutor,
    pipeline: &Pipeline,
    account: &ChannelAccount,
    since: DateTime<Utc>,
) -> Result<PullReport, SyncError> {
    let mut report = PullReport::default();

    match fetch_products(executor, account).await {
        Ok(products) => {
            for product in products {
                match payload::normalize_product(product) {
                    Ok(normalized) => {
                        pipeline.apply_product(account, normalized).await;
                        report.products += 1;
                    }
                    Err(err) => report.warn("product", &err),
                }
            }
        }
        Err(err) if err.is_auth_failure() => return Err(err),
        Err(err) => report.warn("products pull", &err),
    }

    let orders = fetch_orders(executor, account, since).await?;
    let raw: Vec<RawOrder> = orders
        .into_iter()
        .filter_map(|value| match payload::ShopifyOrder::from_value(value) {
            Ok(order) => Some(RawOrder::Shopify(order)),
            Err(err) => {
                report.warn("order", &err);
                None
            }
        })
        .collect();
    report.absorb_orders(
        pipeline
            .apply_raw_orders(account, raw, IngestSource::Poll)
            .await,
    );

    match fetch_inventory_levels(executor, account).await {
        Ok(levels) => {
            for level in levels {
                match payload::normalize_inventory_level(level) {
                    Ok(normalized) => {
                        if pipeline.apply_inventory(account, normalized).await.is_some() {
                            report.inventory += 1;
                        }
                    }
                    Err(err) => report.warn("inventory level", &err),
                }
            }
        }
        Err(err) if err.is_auth_failure() => return Err(err),
        Err(err) => report.warn("inventory pull", &err),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::Marketplace,
        testing::{connected_account, harness, serve},
    };
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        routing::get,
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct Shop {
        created: Arc<Mutex<Vec<String>>>,
        order_query: Arc<Mutex<HashMap<String, String>>>,
    }

    fn router(shop: Shop) -> Router {
        const V: &str = "/admin/api/2024-01";
        Router::new()
            .route(
                &format!("{V}/webhooks.json"),
                get(|| async {
                    Json(json!({"webhooks": [
                        {"topic": "orders/create", "address": "https://app.example.com/webhooks/shopify"}
                    ]}))
                })
                .post(
                    |State(shop): State<Shop>, Json(body): Json<Value>| async move {
                        let topic = body["webhook"]["topic"].as_str().unwrap().to_string();
                        shop.created.lock().unwrap().push(topic.clone());
                        if topic == "products/update" {
                            return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"errors": {"address": ["taken"]}})));
                        }
                        (StatusCode::CREATED, Json(json!({"webhook": {"id": 1}})))
                    },
                ),
            )
            .route(
                &format!("{V}/products.json"),
                get(|| async {
                    Json(json!({"products": [{
                        "id": 632910392, "title": "IPod Nano", "status": "active",
                        "variants": [
                            {"id": 808950810, "sku": "IPOD2008PINK", "title": "Pink", "inventory_item_id": 39072856},
                            {"id": 808950811, "sku": "", "title": "Red"}
                        ]
                    }]}))
                }),
            )
            .route(
                &format!("{V}/orders.json"),
                get(
                    |State(shop): State<Shop>, Query(q): Query<HashMap<String, String>>| async move {
                        *shop.order_query.lock().unwrap() = q;
                        Json(json!({"orders": [
                            {"id": 450789469, "financial_status": "paid", "currency": "USD",
                             "shipping_address": {"city": "Ottawa", "province": "Ontario", "zip": "K2P 1L4"},
                             "shipping_lines": [{"price": "4.00"}],
                             "line_items": [{"id": 466157049, "variant_id": 808950810, "quantity": 1, "price": "199.00"}]},
                            {"financial_status": "paid"}
                        ]}))
                    },
                ),
            )
            .route(
                &format!("{V}/locations.json"),
                get(|| async { Json(json!({"locations": [{"id": 487838322}]})) }),
            )
            .route(
                &format!("{V}/inventory_levels.json"),
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("location_ids").map(String::as_str), Some("487838322"));
                    Json(json!({"inventory_levels": [
                        {"inventory_item_id": 39072856, "location_id": 487838322, "available": 5},
                        {"inventory_item_id": 1, "location_id": 487838322, "available": 2}
                    ]}))
                }),
            )
            .with_state(shop)
    }

    #[tokio::test]
    async fn webhook_registration_skips_existing_and_tolerates_422() {
        let shop = Shop::default();
        let base = serve(router(shop.clone())).await;
        let h = harness(&base);
        let account = connected_account(&h.store, Marketplace::Shopify, "demo.myshopify.com").await;

        let outcome = register_webhooks(
            &h.executor,
            &account,
            "https://app.example.com/webhooks/shopify",
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.existing,
            vec!["products/update".to_string(), "orders/create".to_string()]
        );
        assert_eq!(outcome.created.len(), 3);
        assert!(!shop.created.lock().unwrap().contains(&"orders/create".to_string()));
    }

    #[tokio::test]
    async fn pull_applies_products_orders_and_inventory() {
        let shop = Shop::default();
        let base = serve(router(shop.clone())).await;
        let h = harness(&base);
        let account = connected_account(&h.store, Marketplace::Shopify, "demo.myshopify.com").await;
        let pipeline = Pipeline::new(h.store.clone());

        let since = Utc::now() - chrono::Duration::days(2);
        let report = pull(&h.executor, &pipeline, &account, since).await.unwrap();

        assert_eq!(report.products, 1);
        assert_eq!(report.orders, 1);
        assert_eq!(report.skipped_orders, 1);
        assert_eq!(report.inventory, 1);

        let query = shop.order_query.lock().unwrap().clone();
        assert_eq!(query.get("status").map(String::as_str), Some("any"));
        assert!(query.contains_key("updated_at_min"));

        let item = h
            .store
            .find_item_by_sku(account.seller_id, "IPOD2008PINK")
            .await
            .unwrap();
        let orders = h.store.orders_for_account(account.id).await;
        let lines = h.store.lines_for_order(orders[0].id).await;
        assert_eq!(lines[0].item_id, Some(item.id));
        let audit = h.store.audit_lines_for_order(orders[0].id).await;
        assert_eq!(audit[0].data_quality_status, crate::models::DataQualityStatus::Valid);
    }
}
