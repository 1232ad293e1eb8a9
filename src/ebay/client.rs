use crate::{
    ebay::payload,
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

const PAGE_LIMIT: &str = "50";
const MAX_PAGES: usize = 100;

/// Follows `next` links starting at `first`, collecting `field` from each page.
async fn collect_pages(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    first: ApiRequest,
    field: &str,
) -> Result<Vec<Value>, SyncError> {
    let mut records = Vec::new();
    let mut request = Some(first);
    let mut pages = 0;
    while let Some(current) = request.take() {
        pages += 1;
        let page = executor.execute(account, current).await?.into_json();
        if let Some(Value::Array(items)) = page.get(field) {
            records.extend(items.iter().cloned());
        }
        let next = page
            .get("next")
            .and_then(Value::as_str)
            .and_then(|next| next_path(&executor.config().ebay.api_base_url, next));
        if pages >= MAX_PAGES {
            if next.is_some() {
                warn!(
                    target: "channel_sync.ebay",
                    account_id = %account.id,
                    field,
                    "page limit reached, stopping"
                );
            }
            break;
        }
        request = next.map(ApiRequest::get);
    }
    Ok(records)
}

/// `next` links come back absolute; requests stay relative to the configured
/// API base so fakes and sandboxes keep working.
fn next_path(api_base: &str, next: &str) -> Option<String> {
    let next = next.trim();
    if next.is_empty() {
        return None;
    }
    if let Some(rest) = next.strip_prefix(api_base) {
        return Some(rest.to_string());
    }
    if next.starts_with("http://") || next.starts_with("https://") {
        return Some(next.to_string());
    }
    Some(if next.starts_with('/') {
        next.to_string()
    } else {
        format!("/{next}")
    })
}

/// Orders created between `since` and now.
pub async fn fetch_orders(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    since: DateTime<Utc>,
) -> Result<Vec<Value>, SyncError> {
    let filter = format!(
        "creationdate:[{}..{}]",
        since.to_rfc3339_opts(SecondsFormat::Millis, true),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let first = ApiRequest::get("/sell/fulfillment/v1/order")
        .query("limit", PAGE_LIMIT)
        .query("filter", filter);
    collect_pages(executor, account, first, "orders").await
}

pub async fn fetch_inventory_items(
    executor: &RequestExecutor,
    account: &ChannelAccount,
) -> Result<Vec<Value>, SyncError> {
    let first = ApiRequest::get("/sell/inventory/v1/inventory_item").query("limit", PAGE_LIMIT);
    collect_pages(executor, account, first, "inventoryItems").await
}

/// Pulls recent orders and inventory items. Inventory failures become
/// warnings; order and credential failures abort the pull.
pub async fn pull(
    executor: &RequestExecutor,
    pipeline: &Pipeline,
    account: &ChannelAccount,
    since: DateTime<Utc>,
) -> Result<PullReport, SyncError> {
    let mut report = PullReport::default();

    let orders = fetch_orders(executor, account, since).await?;
    let raw: Vec<RawOrder> = orders
        .into_iter()
        .filter_map(|value| match payload::EbayOrder::from_value(value) {
            Ok(order) => Some(RawOrder::Ebay(order)),
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

    match fetch_inventory_items(executor, account).await {
        Ok(items) => {
            for item in items {
                match payload::normalize_inventory_item(item) {
                    Ok(normalized) => {
                        if pipeline.apply_inventory(account, normalized).await.is_some() {
                            report.inventory += 1;
                        }
                    }
                    Err(err) => report.warn("inventory item", &err),
                }
            }
        }
        Err(err) if err.is_auth_failure() => return Err(err),
        Err(err) => report.warn("inventory pull", &err),
    }

    Ok(report)
}
