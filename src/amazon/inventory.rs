use crate::{
    error::SyncError,
    executor::{ApiRequest, RequestExecutor},
    models::ChannelAccount,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use urlencoding::encode;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    pub sku: String,
    pub quantity: i64,
    /// Falls back to the account's marketplaces when empty.
    #[serde(default)]
    pub marketplace_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PushReport {
    pub pushed: Vec<String>,
    pub skipped: Vec<String>,
}

fn selling_partner_id(account: &ChannelAccount) -> Result<&str, SyncError> {
    account
        .external_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            SyncError::Configuration(format!(
                "amazon account {} has no selling partner id",
                account.id
            ))
        })
}

/// Replaces the `DEFAULT` fulfillment availability of each SKU through the
/// Listings Items API. Blank SKUs and updates with no resolvable marketplace
/// are skipped; the first provider error aborts the batch.
pub async fn push_inventory(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    updates: &[InventoryUpdate],
) -> Result<PushReport, SyncError> {
    let mut report = PushReport::default();
    if !account.flags.inventory_out {
        warn!(
            target: "channel_sync.amazon",
            account_id = %account.id,
            "inventory push disabled for account"
        );
        report.skipped = updates.iter().map(|u| u.sku.clone()).collect();
        return Ok(report);
    }
    let seller_id = selling_partner_id(account)?;

    for update in updates {
        let sku = update.sku.trim();
        if sku.is_empty() {
            report.skipped.push(update.sku.clone());
            continue;
        }
        let marketplaces = if update.marketplace_ids.is_empty() {
            &account.marketplace_ids
        } else {
            &update.marketplace_ids
        };
        if marketplaces.is_empty() {
            warn!(
                target: "channel_sync.amazon",
                account_id = %account.id,
                sku,
                "inventory push skipped: no marketplace ids"
            );
            report.skipped.push(sku.to_string());
            continue;
        }

        let request = ApiRequest::patch(format!(
            "/listings/2021-08-01/items/{}/{}",
            encode(seller_id),
            encode(sku)
        ))
        .query("marketplaceIds", marketplaces.join(","))
        .json(json!({
            "productType": "PRODUCT",
            "patches": [{
                "op": "replace",
                "path": "/attributes/fulfillment_availability",
                "value": [{
                    "fulfillment_channel_code": "DEFAULT",
                    "quantity": update.quantity.max(0),
                }]
            }]
        }));
        executor.execute(account, request).await?;
        report.pushed.push(sku.to_string());
    }

    info!(
        target: "channel_sync.amazon",
        account_id = %account.id,
        pushed = report.pushed.len(),
        skipped = report.skipped.len(),
        "inventory pushed"
    );
    Ok(report)
}
