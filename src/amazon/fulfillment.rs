use crate::{
    error::SyncError,
    executor::{ApiRequest, RequestExecutor, ResponseBody},
    models::ChannelAccount,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ShippingSpeed {
    #[default]
    Standard,
    Expedited,
    Priority,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestinationAddress {
    pub name: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub address_line3: Option<String>,
    pub city: String,
    pub state_or_region: String,
    pub postal_code: String,
    pub country_code: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredValue {
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    pub currency_code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentItem {
    pub seller_sku: String,
    pub quantity: u32,
    pub seller_fulfillment_order_item_id: Option<String>,
    pub declared_value: Option<DeclaredValue>,
}

/// A multi-channel fulfillment order. `seller_fulfillment_order_id` is chosen
/// by the caller and reused on every retry, so Amazon deduplicates a create
/// that was sent twice.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentOrderRequest {
    pub seller_fulfillment_order_id: String,
    pub displayable_order_id: String,
    pub displayable_order_date_time: Option<DateTime<Utc>>,
    pub displayable_order_comment: Option<String>,
    #[serde(default)]
    pub shipping_speed_category: ShippingSpeed,
    pub destination_address: DestinationAddress,
    pub items: Vec<FulfillmentItem>,
    pub marketplace_id: Option<String>,
}

impl FulfillmentOrderRequest {
    fn body(&self, account: &ChannelAccount) -> serde_json::Value {
        let items: Vec<_> = self
            .items
            .iter()
            .map(|item| {
                let mut line = json!({
                    "sellerSku": item.seller_sku,
                    "sellerFulfillmentOrderItemId": item
                        .seller_fulfillment_order_item_id
                        .clone()
                        .unwrap_or_else(|| format!("{}-{}", self.seller_fulfillment_order_id, item.seller_sku)),
                    "quantity": item.quantity,
                });
                if let Some(value) = &item.declared_value {
                    line["perUnitDeclaredValue"] = json!(value);
                }
                line
            })
            .collect();

        json!({
            "marketplaceId": self
                .marketplace_id
                .clone()
                .or_else(|| account.marketplace_ids.first().cloned()),
            "sellerFulfillmentOrderId": self.seller_fulfillment_order_id,
            "displayableOrderId": self.displayable_order_id,
            "displayableOrderDate": self
                .displayable_order_date_time
                .unwrap_or_else(Utc::now)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            "displayableOrderComment": self
                .displayable_order_comment
                .clone()
                .unwrap_or_else(|| format!("Order {}", self.displayable_order_id)),
            "shippingSpeedCategory": self.shipping_speed_category,
            "destinationAddress": self.destination_address,
            "items": items,
        })
    }
}

pub async fn create_fulfillment_order(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    request: &FulfillmentOrderRequest,
) -> Result<ResponseBody, SyncError> {
    if !account.flags.fulfillment_out {
        return Err(SyncError::Configuration(format!(
            "fulfillment is disabled for account {}",
            account.id
        )));
    }
    if request.seller_fulfillment_order_id.trim().is_empty() {
        return Err(SyncError::Configuration(
            "sellerFulfillmentOrderId is required".into(),
        ));
    }
    if request.items.is_empty() {
        return Err(SyncError::Configuration(
            "fulfillment order has no items".into(),
        ));
    }

    let response = executor
        .execute(
            account,
            ApiRequest::post("/fba/outbound/2020-07-01/fulfillmentOrders")
                .json(request.body(account)),
        )
        .await?;
    info!(
        target: "channel_sync.amazon",
        account_id = %account.id,
        seller_fulfillment_order_id = %request.seller_fulfillment_order_id,
        "fulfillment order created"
    );
    Ok(response)
}
