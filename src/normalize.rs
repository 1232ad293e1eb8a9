use crate::{
    amazon::payload::AmazonOrderBundle,
    ebay::payload::EbayOrder,
    error::SyncError,
    models::{Address, Marketplace, OrderTotals},
    ebay, shopify,
    shopify::payload::ShopifyOrder,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

/// Marketplace order payload before translation.
#[derive(Debug, Clone)]
pub enum RawOrder {
    Shopify(ShopifyOrder),
    Ebay(EbayOrder),
    Amazon(AmazonOrderBundle),
}

impl RawOrder {
    pub fn marketplace(&self) -> Marketplace {
        match self {
            RawOrder::Shopify(_) => Marketplace::Shopify,
            RawOrder::Ebay(_) => Marketplace::Ebay,
            RawOrder::Amazon(_) => Marketplace::Amazon,
        }
    }

    /// Decodes a Shopify or eBay order body. Amazon orders arrive with their
    /// items fetched separately and are built with [`AmazonOrderBundle::from_values`].
    pub fn from_value(marketplace: Marketplace, value: Value) -> Result<Self, SyncError> {
        match marketplace {
            Marketplace::Shopify => Ok(RawOrder::Shopify(ShopifyOrder::from_value(value)?)),
            Marketplace::Ebay => Ok(RawOrder::Ebay(EbayOrder::from_value(value)?)),
            Marketplace::Amazon => Ok(RawOrder::Amazon(AmazonOrderBundle::from_values(
                value,
                Vec::new(),
            )?)),
        }
    }

    pub fn normalize(&self) -> Result<NormalizedOrder, SyncError> {
        match self {
            RawOrder::Shopify(order) => order.normalize(),
            RawOrder::Ebay(order) => order.normalize(),
            RawOrder::Amazon(bundle) => bundle.normalize(),
        }
    }
}

/// Translates an inventory payload: a Shopify inventory level or an eBay
/// inventory item. Amazon stock is only ever pushed, never ingested.
pub fn normalize_inventory(
    marketplace: Marketplace,
    value: Value,
) -> Result<NormalizedInventory, SyncError> {
    match marketplace {
        Marketplace::Shopify => shopify::payload::normalize_inventory_level(value),
        Marketplace::Ebay => ebay::payload::normalize_inventory_item(value),
        Marketplace::Amazon => Err(SyncError::invalid_payload(
            marketplace,
            "inventory ingestion is not supported",
        )),
    }
}

/// What a webhook topic carries, once the marketplace-specific topic name has
/// been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Order,
    Product,
    Inventory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOrder {
    pub external_order_id: String,
    pub status: String,
    pub currency: Option<String>,
    pub totals: OrderTotals,
    pub placed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub marketplace_id: Option<String>,
    pub fulfillment_channel: Option<String>,
    pub customer: Option<NormalizedCustomer>,
    pub lines: Vec<NormalizedLine>,
    pub ship_to: Address,
    /// Shipping charged on the order, carried into the audit projection as fulfillment cost.
    pub fulfillment_cost: Option<Decimal>,
    /// The payload itself shows shipping was bought (Shopify shipping lines).
    pub label_hint: bool,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedLine {
    pub external_line_id: Option<String>,
    /// Marketplace listing id used to resolve the item mapping (Shopify variant id, eBay item id).
    pub external_item_id: Option<String>,
    pub sku: Option<String>,
    pub title: Option<String>,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub fulfillment_status: Option<String>,
    pub weight_lbs: Option<f64>,
    /// Line-level shipping estimate used when the order carries none.
    pub shipping_estimate: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedCustomer {
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<Address>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedProduct {
    pub external_item_id: String,
    pub title: String,
    pub active: bool,
    pub variants: Vec<NormalizedVariant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVariant {
    pub external_variant_id: Option<String>,
    pub inventory_item_id: Option<String>,
    pub sku: Option<String>,
    pub title: String,
    pub raw: Value,
}

/// One inventory observation. Either resolves through an existing mapping
/// (`external_variant_id`) or carries the SKU needed to create one.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInventory {
    pub external_variant_id: Option<String>,
    pub sku: Option<String>,
    pub title: Option<String>,
    pub location_id: Option<String>,
    pub available: Option<i64>,
    pub raw: Value,
}

/// Decimal that deserializes from a number, a numeric string, or anything
/// else (which yields `None`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LooseDecimal(pub Option<Decimal>);

impl LooseDecimal {
    pub fn value(&self) -> Option<Decimal> {
        self.0
    }
}

impl<'de> Deserialize<'de> for LooseDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(LooseDecimal(parse_money(&value)))
    }
}

/// Identifier that may be sent as a JSON number or a string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LooseId(pub Option<String>);

impl LooseId {
    pub fn get(&self) -> Option<String> {
        self.0.clone()
    }
}

impl<'de> Deserialize<'de> for LooseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let id = match value {
            Value::String(s) => non_empty(&s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        Ok(LooseId(id))
    }
}

/// Permissive numeric parse: absent for anything that is not a finite number.
pub fn parse_money(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(|f| Decimal::from_f64_retain(f).map(|d| d.normalize()))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            Decimal::from_str(trimmed)
                .ok()
                .or_else(|| Decimal::from_scientific(trimmed).ok())
        }
        _ => None,
    }
}

pub fn parse_quantity(value: Option<Decimal>) -> i64 {
    value
        .and_then(|d| d.trunc().to_i64())
        .unwrap_or(0)
}

pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn opt_non_empty(value: Option<&str>) -> Option<String> {
    value.and_then(non_empty)
}

/// Emails are matched case-insensitively.
pub fn normalize_email(value: Option<&str>) -> Option<String> {
    opt_non_empty(value).map(|email| email.to_lowercase())
}

/// Sum of the parseable entries, `None` when there is nothing to sum.
pub fn sum_known(values: impl IntoIterator<Item = Option<Decimal>>) -> Option<Decimal> {
    let mut seen = false;
    let mut total = Decimal::ZERO;
    for value in values.into_iter().flatten() {
        seen = true;
        total += value;
    }
    seen.then_some(total)
}

/// Treats an explicit `null` the same as a missing field.
pub(crate) fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(
    marketplace: Marketplace,
    value: Value,
) -> Result<T, SyncError> {
    serde_json::from_value(value)
        .map_err(|err| SyncError::invalid_payload(marketplace, err.to_string()))
}
