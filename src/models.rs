use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::{collections::BTreeMap, fmt};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Shopify,
    Ebay,
    Amazon,
}

impl Marketplace {
    pub const ALL: [Marketplace; 3] = [Self::Shopify, Self::Ebay, Self::Amazon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Shopify => "shopify",
            Marketplace::Ebay => "ebay",
            Marketplace::Amazon => "amazon",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "shopify" => Some(Self::Shopify),
            "ebay" => Some(Self::Ebay),
            "amazon" => Some(Self::Amazon),
            _ => None,
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountFlags {
    pub orders_in: bool,
    pub inventory_out: bool,
    pub fulfillment_out: bool,
    pub labels: bool,
}

impl Default for AccountFlags {
    fn default() -> Self {
        Self {
            orders_in: true,
            inventory_out: true,
            fulfillment_out: true,
            labels: false,
        }
    }
}

/// One connected marketplace account for a seller.
///
/// Natural key is `(seller_id, marketplace, external_id)`. `external_id` is
/// the shop domain for Shopify, the seller username for eBay and the selling
/// partner id for Amazon.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub marketplace: Marketplace,
    pub external_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub region: Option<String>,
    #[serde(default)]
    pub marketplace_ids: Vec<String>,
    #[serde(default)]
    pub flags: AccountFlags,
    #[serde(default)]
    pub status: AccountStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelAccount {
    pub fn new(seller_id: Uuid, marketplace: Marketplace, external_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seller_id,
            marketplace,
            external_id,
            access_token: None,
            refresh_token: None,
            access_token_expires_at: None,
            refresh_token_expires_at: None,
            region: None,
            marketplace_ids: Vec::new(),
            flags: AccountFlags::default(),
            status: AccountStatus::Active,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub sku: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalItemMapping {
    pub id: Uuid,
    pub item_id: Uuid,
    pub account_id: Uuid,
    pub marketplace: Marketplace,
    pub external_item_id: String,
    pub external_variant_id: Option<String>,
    /// Shopify inventory item id, the key inventory level updates arrive with.
    pub inventory_item_id: Option<String>,
    pub sku: String,
    pub active: bool,
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// City, region and postal code must all be present and non-blank.
    pub fn is_deliverable(&self) -> bool {
        [&self.city, &self.region, &self.postal_code]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.line1,
            &self.line2,
            &self.city,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|field| field.as_deref().is_none_or(|v| v.trim().is_empty()))
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalCustomer {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCustomerMapping {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub account_id: Uuid,
    pub marketplace: Marketplace,
    pub external_id: String,
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub total: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    #[default]
    Poll,
    Webhook,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub account_id: Uuid,
    pub marketplace: Marketplace,
    pub marketplace_id: Option<String>,
    pub fulfillment_channel: Option<String>,
    pub source: IngestSource,
    pub external_order_id: String,
    pub status: String,
    pub currency: Option<String>,
    pub totals: OrderTotals,
    pub customer_id: Option<Uuid>,
    pub placed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub raw: Value,
    pub synced_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalOrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub external_line_id: Option<String>,
    pub item_id: Option<Uuid>,
    pub sku: Option<String>,
    pub title: Option<String>,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub fulfillment_status: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub id: Uuid,
    pub item_id: Uuid,
    pub account_id: Uuid,
    pub location_id: Option<String>,
    pub available: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityStatus {
    Valid,
    Excluded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityReason {
    MissingAddress,
    MissingLabel,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineCosts {
    pub fulfillment: Option<Decimal>,
    pub label: Option<Decimal>,
    pub prep: Option<Decimal>,
    pub third_party: Option<Decimal>,
}

impl LineCosts {
    /// Sum of the known components; `None` only when every component is unknown.
    pub fn total(&self) -> Option<Decimal> {
        let known: Vec<Decimal> = [self.fulfillment, self.label, self.prep, self.third_party]
            .into_iter()
            .flatten()
            .collect();
        if known.is_empty() {
            None
        } else {
            Some(known.into_iter().sum())
        }
    }
}

/// Denormalized, cost-annotated projection of one order line.
///
/// Keyed by `(seller_id, order_external_id, sku)` and always rebuilt whole.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOrderLine {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub account_id: Uuid,
    pub marketplace: Marketplace,
    pub marketplace_id: Option<String>,
    pub fulfillment_channel: Option<String>,
    pub source: IngestSource,
    pub order_id: Uuid,
    pub order_external_id: String,
    pub order_date: Option<DateTime<Utc>>,
    pub sku: Option<String>,
    pub item_name: Option<String>,
    pub quantity: i64,
    pub weight_lbs: Option<f64>,
    pub item_count: i64,
    pub ship_to: Address,
    pub costs: LineCosts,
    pub prep_fee_required: bool,
    pub data_quality_status: DataQualityStatus,
    pub data_quality_reasons: Vec<DataQualityReason>,
    pub original_cost_total: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingLabel {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub account_id: Uuid,
    pub marketplace: Marketplace,
    pub order_id: Option<Uuid>,
    pub shipment_id: String,
    pub label_format: Option<String>,
    pub download_url: Option<String>,
    pub document: Option<String>,
    pub mime_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundShipmentItem {
    pub seller_sku: String,
    pub quantity_shipped: u32,
    pub quantity_in_case: Option<u32>,
    pub prep_details: Option<Value>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundLabels {
    pub url: Option<String>,
    pub page_type: String,
    pub label_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// An FBA inbound shipment created for an Amazon account. Natural key is
/// `(account_id, shipment_id)`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundShipment {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub account_id: Uuid,
    pub marketplace_id: Option<String>,
    pub shipment_id: String,
    pub destination_fulfillment_center_id: String,
    pub label_prep_preference: String,
    pub shipment_name: String,
    pub items: Vec<InboundShipmentItem>,
    pub labels: Option<InboundLabels>,
    pub raw_shipment: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateShoppingQuote {
    pub id: Uuid,
    pub city_lower: String,
    pub state_lower: String,
    pub weight_band: f64,
    pub item_count: u32,
    pub amount: Decimal,
    pub currency: String,
    pub provider: Option<String>,
    pub raw: Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthTransaction {
    pub nonce: String,
    pub seller_id: Uuid,
    pub marketplace: Marketplace,
    pub region: Option<String>,
    pub shop_domain: Option<String>,
    /// Seller identity supplied up front where the callback does not carry one (eBay).
    pub external_id: Option<String>,
    pub redirect_to: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Pending,
    Completed,
    NoMatch,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub provider: Marketplace,
    pub external_id: String,
    pub status: DeletionStatus,
    pub detail: Option<String>,
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_requires_city_region_and_postal() {
        let mut addr = Address {
            city: Some("Austin".into()),
            region: Some("TX".into()),
            postal_code: Some("78701".into()),
            ..Address::default()
        };
        assert!(addr.is_deliverable());
        addr.postal_code = Some("   ".into());
        assert!(!addr.is_deliverable());
        addr.postal_code = None;
        assert!(!addr.is_deliverable());
    }

    #[test]
    fn line_costs_total_skips_unknown_components() {
        let costs = LineCosts {
            fulfillment: Some(Decimal::new(450, 2)),
            prep: Some(Decimal::ZERO),
            ..LineCosts::default()
        };
        assert_eq!(costs.total(), Some(Decimal::new(450, 2)));
        assert_eq!(LineCosts::default().total(), None);
    }

    #[test]
    fn account_tokens_never_serialize() {
        let mut account = ChannelAccount::new(Uuid::new_v4(), Marketplace::Ebay, Some("seller".into()));
        account.access_token = Some("secret-access".into());
        account.refresh_token = Some("secret-refresh".into());
        let json = serde_json::to_string(&account).expect("serialize");
        assert!(!json.contains("secret-access"));
        assert!(!json.contains("secret-refresh"));
        assert!(json.contains("\"marketplace\":\"ebay\""));
    }

    #[test]
    fn marketplace_parse_is_case_insensitive() {
        assert_eq!(Marketplace::parse(" Amazon "), Some(Marketplace::Amazon));
        assert_eq!(Marketplace::parse("etsy"), None);
    }
}
