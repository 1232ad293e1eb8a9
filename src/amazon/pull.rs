use crate::{
    amazon::payload::AmazonOrderBundle,
    error::SyncError,
    executor::{ApiRequest, RequestExecutor},
    models::{ChannelAccount, IngestSource},
    normalize::RawOrder,
    pipeline::Pipeline,
    sync::PullReport,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::warn;

const ORDER_STATUSES: &str = "Unshipped,PartiallyShipped,Shipped,Unfulfillable";
const FULFILLMENT_CHANNELS: &str = "MFN,AFN";
const MAX_PAGES: usize = 100;

/// SP-API wraps most results in `payload`; some sandboxes return them bare.
fn page_parts(page: &Value, field: &str) -> (Vec<Value>, Option<String>) {
    let body = page.get("payload").unwrap_or(page);
    let records = body
        .get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let next = body
        .get("NextToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    (records, next)
}

/// Follows `NextToken` until exhausted. `first` is the initial request; every
/// later page is `path` with only the token.
async fn collect_pages(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    path: &str,
    first: ApiRequest,
    field: &str,
) -> Result<Vec<Value>, SyncError> {
    let mut records = Vec::new();
    let mut request = first;
    for _ in 0..MAX_PAGES {
        let page = executor.execute(account, request).await?.into_json();
        let (mut batch, next) = page_parts(&page, field);
        records.append(&mut batch);
        match next {
            Some(token) => request = ApiRequest::get(path).query("NextToken", token),
            None => return Ok(records),
        }
    }
    warn!(
        target: "channel_sync.amazon",
        account_id = %account.id,
        path,
        "page limit reached, stopping"
    );
    Ok(records)
}

pub async fn fetch_orders(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    since: DateTime<Utc>,
) -> Result<Vec<Value>, SyncError> {
    const PATH: &str = "/orders/v0/orders";
    let first = ApiRequest::get(PATH)
        .query("MarketplaceIds", account.marketplace_ids.join(","))
        .query(
            "CreatedAfter",
            since.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .query("OrderStatuses", ORDER_STATUSES)
        .query("FulfillmentChannels", FULFILLMENT_CHANNELS);
    collect_pages(executor, account, PATH, first, "Orders").await
}

pub async fn fetch_order_items(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    amazon_order_id: &str,
) -> Result<Vec<Value>, SyncError> {
    let path = format!(
        "/orders/v0/orders/{}/orderItems",
        urlencoding::encode(amazon_order_id)
    );
    let first = ApiRequest::get(path.clone());
    collect_pages(executor, account, &path, first, "OrderItems").await
}

/// Pulls orders created since `since`, fetching each order's items before
/// handing the bundle to the pipeline. Accounts without marketplace ids are
/// skipped.
pub async fn pull(
    executor: &RequestExecutor,
    pipeline: &Pipeline,
    account: &ChannelAccount,
    since: DateTime<Utc>,
) -> Result<PullReport, SyncError> {
    let mut report = PullReport::default();
    if account.marketplace_ids.is_empty() {
        warn!(
            target: "channel_sync.amazon",
            account_id = %account.id,
            "pull skipped: account has no marketplace ids"
        );
        report.warnings.push("account has no marketplace ids".into());
        return Ok(report);
    }

    let orders = fetch_orders(executor, account, since).await?;
    let mut bundles = Vec::with_capacity(orders.len());
    for order in orders {
        let Some(order_id) = order
            .get("AmazonOrderId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
        else {
            report.skipped_orders += 1;
            continue;
        };
        let items = match fetch_order_items(executor, account, &order_id).await {
            Ok(items) => items,
            Err(err) if err.is_auth_failure() => return Err(err),
            Err(err) => {
                report.warn("order items", &err);
                report.skipped_orders += 1;
                continue;
            }
        };
        match AmazonOrderBundle::from_values(order, items) {
            Ok(bundle) => bundles.push(RawOrder::Amazon(bundle)),
            Err(err) => {
                report.warn("order", &err);
                report.skipped_orders += 1;
            }
        }
    }

    report.absorb_orders(
        pipeline
            .apply_raw_orders(account, bundles, IngestSource::Poll)
            .await,
    );
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
        extract::{Path, Query},
        http::HeaderMap,
        routing::get,
    };
    use serde_json::json;
    use std::collections::HashMap;

    fn router() -> Router {
        Router::new()
            .route(
                "/orders/v0/orders",
                get(
                    |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                        assert_eq!(headers["x-amz-access-token"], "live-token");
                        assert!(headers.contains_key("x-amz-date"));
                        if q.contains_key("NextToken") {
                            assert!(!q.contains_key("MarketplaceIds"));
                            return Json(json!({"payload": {"Orders": [
                                {"AmazonOrderId": "111-2", "OrderStatus": "Unshipped",
                                 "ShippingAddress": {"City": "SEATTLE", "StateOrRegion": "WA", "PostalCode": "98101"}}
                            ]}}));
                        }
                        assert_eq!(q["MarketplaceIds"], "ATVPDKIKX0DER");
                        Json(json!({"payload": {
                            "Orders": [{"AmazonOrderId": "111-1", "OrderStatus": "Shipped"}, {"OrderStatus": "Pending"}],
                            "NextToken": "page-2"
                        }}))
                    },
                ),
            )
            .route(
                "/orders/v0/orders/{id}/orderItems",
                get(
                    |Path(id): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                        if id == "111-1" && !q.contains_key("NextToken") {
                            return Json(json!({"payload": {
                                "OrderItems": [{"OrderItemId": "A", "SellerSKU": "SKU-A", "QuantityOrdered": 1}],
                                "NextToken": "items-2"
                            }}));
                        }
                        let sku = if id == "111-1" { "SKU-B" } else { "SKU-C" };
                        Json(json!({"payload": {"OrderItems": [
                            {"OrderItemId": format!("{id}-{sku}"), "SellerSKU": sku, "QuantityOrdered": 2}
                        ]}}))
                    },
                ),
            )
    }

    #[tokio::test]
    async fn pull_pages_orders_and_items() {
        let base = serve(router()).await;
        let h = harness(&base);
        let account = connected_account(&h.store, Marketplace::Amazon, "A1SELLER").await;
        let pipeline = Pipeline::new(h.store.clone());

        let report = pull(&h.executor, &pipeline, &account, Utc::now() - chrono::Duration::days(2))
            .await
            .unwrap();

        assert_eq!(report.orders, 2);
        assert_eq!(report.skipped_orders, 1);

        let orders = h.store.orders_for_account(account.id).await;
        let first = orders
            .iter()
            .find(|o| o.external_order_id == "111-1")
            .unwrap();
        let skus: Vec<_> = h
            .store
            .lines_for_order(first.id)
            .await
            .into_iter()
            .filter_map(|line| line.sku)
            .collect();
        assert_eq!(skus, vec!["SKU-A".to_string(), "SKU-B".to_string()]);
    }

    #[tokio::test]
    async fn account_without_marketplaces_is_skipped() {
        let h = harness("http://127.0.0.1:9");
        let mut account = connected_account(&h.store, Marketplace::Amazon, "A1SELLER").await;
        account.marketplace_ids.clear();
        let pipeline = Pipeline::new(h.store.clone());

        let report = pull(&h.executor, &pipeline, &account, Utc::now()).await.unwrap();
        assert_eq!(report.orders, 0);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn bare_pages_are_read_too() {
        let (records, next) = page_parts(&json!({"Orders": [{"a": 1}], "NextToken": ""}), "Orders");
        assert_eq!(records.len(), 1);
        assert_eq!(next, None);
    }
}
