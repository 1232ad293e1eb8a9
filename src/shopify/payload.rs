use crate::{
    error::SyncError,
    models::{Address, Marketplace, OrderTotals},
    normalize::{
        LooseDecimal, LooseId, NormalizedCustomer, NormalizedInventory, NormalizedLine,
        NormalizedOrder, NormalizedProduct, NormalizedVariant, decode, normalize_email,
        null_default, opt_non_empty, parse_quantity, parse_timestamp, sum_known,
    },
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Deserialize;
use serde_json::Value;

const GRAMS_PER_LB: f64 = 453.592;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyOrder {
    #[serde(default)]
    pub id: LooseId,
    pub currency: Option<String>,
    pub financial_status: Option<String>,
    #[serde(default)]
    pub subtotal_price: LooseDecimal,
    #[serde(default)]
    pub total_tax: LooseDecimal,
    #[serde(default)]
    pub total_price: LooseDecimal,
    #[serde(default, deserialize_with = "null_default")]
    pub shipping_lines: Vec<ShopifyShippingLine>,
    #[serde(default, deserialize_with = "null_default")]
    pub discount_applications: Vec<ShopifyDiscount>,
    pub total_shipping_price_set: Option<ShopifyPriceSet>,
    pub created_at: Option<String>,
    pub closed_at: Option<String>,
    pub customer: Option<ShopifyCustomer>,
    pub shipping_address: Option<ShopifyAddress>,
    #[serde(default, deserialize_with = "null_default")]
    pub line_items: Vec<ShopifyLineItem>,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyShippingLine {
    #[serde(default)]
    pub price: LooseDecimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyDiscount {
    #[serde(default)]
    pub value: LooseDecimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyPriceSet {
    pub shop_money: Option<ShopifyMoney>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyMoney {
    #[serde(default)]
    pub amount: LooseDecimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyCustomer {
    #[serde(default)]
    pub id: LooseId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub default_address: Option<ShopifyAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyAddress {
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub province_code: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
}

impl ShopifyAddress {
    fn to_address(&self) -> Address {
        Address {
            line1: opt_non_empty(self.address1.as_deref()),
            line2: opt_non_empty(self.address2.as_deref()),
            city: opt_non_empty(self.city.as_deref()),
            region: opt_non_empty(self.province.as_deref())
                .or_else(|| opt_non_empty(self.province_code.as_deref())),
            postal_code: opt_non_empty(self.zip.as_deref()),
            country: opt_non_empty(self.country_code.as_deref())
                .or_else(|| opt_non_empty(self.country.as_deref())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyLineItem {
    #[serde(default)]
    pub id: LooseId,
    #[serde(default)]
    pub variant_id: LooseId,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub quantity: LooseDecimal,
    #[serde(default)]
    pub price: LooseDecimal,
    #[serde(default)]
    pub total_tax: LooseDecimal,
    #[serde(default)]
    pub total_discount: LooseDecimal,
    pub fulfillment_status: Option<String>,
    #[serde(default)]
    pub grams: LooseDecimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyProduct {
    #[serde(default)]
    pub id: LooseId,
    pub title: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub variants: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ShopifyVariant {
    #[serde(default)]
    id: LooseId,
    sku: Option<String>,
    title: Option<String>,
    #[serde(default)]
    inventory_item_id: LooseId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyInventoryLevel {
    #[serde(default)]
    pub inventory_item_id: LooseId,
    #[serde(default)]
    pub location_id: LooseId,
    #[serde(default)]
    pub available: LooseDecimal,
}

impl ShopifyOrder {
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        let mut order: ShopifyOrder = decode(Marketplace::Shopify, value.clone())?;
        order.raw = value;
        Ok(order)
    }

    pub fn normalize(&self) -> Result<NormalizedOrder, SyncError> {
        let external_order_id = self
            .id
            .get()
            .ok_or_else(|| SyncError::invalid_payload(Marketplace::Shopify, "order id missing"))?;

        let shipping_total = sum_known(self.shipping_lines.iter().map(|s| s.price.value()));
        let discount_total = sum_known(self.discount_applications.iter().map(|d| d.value.value()));
        let totals = OrderTotals {
            subtotal: self.subtotal_price.value(),
            tax: self.total_tax.value(),
            shipping: Some(shipping_total.unwrap_or(Decimal::ZERO)),
            discounts: Some(discount_total.unwrap_or(Decimal::ZERO)),
            total: self.total_price.value(),
        };

        let shop_shipping = self
            .total_shipping_price_set
            .as_ref()
            .and_then(|set| set.shop_money.as_ref())
            .and_then(|money| money.amount.value());
        let fulfillment_cost = [shop_shipping, shipping_total]
            .into_iter()
            .flatten()
            .find(|amount| !amount.is_zero());

        let lines = self
            .line_items
            .iter()
            .map(|line| NormalizedLine {
                external_line_id: line.id.get(),
                external_item_id: line.variant_id.get(),
                sku: opt_non_empty(line.sku.as_deref()),
                title: opt_non_empty(line.name.as_deref())
                    .or_else(|| opt_non_empty(line.title.as_deref())),
                quantity: parse_quantity(line.quantity.value()),
                price: line.price.value(),
                tax: line.total_tax.value(),
                discounts: line.total_discount.value().filter(|d| !d.is_zero()),
                fulfillment_status: opt_non_empty(line.fulfillment_status.as_deref()),
                weight_lbs: line
                    .grams
                    .value()
                    .and_then(|g| g.to_f64())
                    .map(|grams| grams / GRAMS_PER_LB),
                shipping_estimate: None,
            })
            .collect();

        Ok(NormalizedOrder {
            external_order_id,
            status: opt_non_empty(self.financial_status.as_deref())
                .unwrap_or_else(|| "open".to_string()),
            currency: opt_non_empty(self.currency.as_deref()),
            totals,
            placed_at: parse_timestamp(self.created_at.as_deref()),
            closed_at: parse_timestamp(self.closed_at.as_deref()),
            marketplace_id: None,
            fulfillment_channel: Some("shopify".to_string()),
            customer: self.customer.as_ref().map(|c| c.normalize()),
            lines,
            ship_to: self
                .shipping_address
                .as_ref()
                .map(ShopifyAddress::to_address)
                .unwrap_or_default(),
            fulfillment_cost,
            label_hint: !self.shipping_lines.is_empty(),
            raw: self.raw.clone(),
        })
    }
}

impl ShopifyCustomer {
    fn normalize(&self) -> NormalizedCustomer {
        NormalizedCustomer {
            external_id: self.id.get(),
            email: normalize_email(self.email.as_deref()),
            phone: opt_non_empty(self.phone.as_deref()),
            first_name: opt_non_empty(self.first_name.as_deref()),
            last_name: opt_non_empty(self.last_name.as_deref()),
            address: self
                .default_address
                .as_ref()
                .map(ShopifyAddress::to_address)
                .filter(|addr| !addr.is_empty()),
            raw: serde_json::json!({
                "id": self.id.get(),
                "email": self.email,
                "phone": self.phone,
            }),
        }
    }
}

pub fn normalize_product(value: Value) -> Result<NormalizedProduct, SyncError> {
    let product: ShopifyProduct = decode(Marketplace::Shopify, value)?;
    let external_item_id = product
        .id
        .get()
        .ok_or_else(|| SyncError::invalid_payload(Marketplace::Shopify, "product id missing"))?;
    let title = opt_non_empty(product.title.as_deref()).unwrap_or_default();

    let variants = product
        .variants
        .iter()
        .map(|raw| {
            let variant: ShopifyVariant =
                serde_json::from_value(raw.clone()).unwrap_or_default();
            let sku = opt_non_empty(variant.sku.as_deref());
            let variant_title = match opt_non_empty(variant.title.as_deref()) {
                Some(suffix) if !title.is_empty() => format!("{title} - {suffix}"),
                Some(suffix) => suffix,
                None if !title.is_empty() => title.clone(),
                None => sku.clone().unwrap_or_default(),
            };
            NormalizedVariant {
                external_variant_id: variant.id.get(),
                inventory_item_id: variant.inventory_item_id.get(),
                sku,
                title: variant_title,
                raw: raw.clone(),
            }
        })
        .collect();

    Ok(NormalizedProduct {
        external_item_id,
        title,
        active: product.status.as_deref() == Some("active"),
        variants,
    })
}

pub fn normalize_inventory_level(value: Value) -> Result<NormalizedInventory, SyncError> {
    let level: ShopifyInventoryLevel = decode(Marketplace::Shopify, value.clone())?;
    let external_variant_id = level.inventory_item_id.get().ok_or_else(|| {
        SyncError::invalid_payload(Marketplace::Shopify, "inventory_item_id missing")
    })?;
    Ok(NormalizedInventory {
        external_variant_id: Some(external_variant_id),
        sku: None,
        title: None,
        location_id: level.location_id.get(),
        available: Some(parse_quantity(level.available.value())),
        raw: value,
    })
}
