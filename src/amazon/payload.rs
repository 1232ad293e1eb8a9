use crate::{
    error::SyncError,
    models::{Address, Marketplace, OrderTotals},
    normalize::{
        LooseDecimal, NormalizedCustomer, NormalizedLine, NormalizedOrder, decode,
        normalize_email, opt_non_empty, parse_quantity, parse_timestamp,
    },
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmazonOrder {
    pub amazon_order_id: Option<String>,
    pub order_status: Option<String>,
    pub purchase_date: Option<String>,
    pub latest_delivery_date: Option<String>,
    pub fulfillment_channel: Option<String>,
    pub marketplace_id: Option<String>,
    pub order_total: Option<AmazonMoney>,
    pub shipping_price: Option<AmazonMoney>,
    pub tax: Option<AmazonMoney>,
    pub promotion_discount: Option<AmazonMoney>,
    pub buyer_info: Option<AmazonBuyerInfo>,
    pub shipping_address: Option<AmazonAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmazonMoney {
    pub currency_code: Option<String>,
    #[serde(default)]
    pub amount: LooseDecimal,
}

fn amount(value: &Option<AmazonMoney>) -> Option<Decimal> {
    value.as_ref().and_then(|m| m.amount.value())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmazonBuyerInfo {
    pub buyer_email: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmazonAddress {
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state_or_region: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub phone: Option<String>,
}

impl AmazonAddress {
    fn to_address(&self) -> Address {
        Address {
            line1: opt_non_empty(self.address_line1.as_deref()),
            line2: opt_non_empty(self.address_line2.as_deref()),
            city: opt_non_empty(self.city.as_deref()),
            region: opt_non_empty(self.state_or_region.as_deref()),
            postal_code: opt_non_empty(self.postal_code.as_deref()),
            country: opt_non_empty(self.country_code.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmazonOrderItem {
    pub order_item_id: Option<String>,
    #[serde(rename = "SellerSKU")]
    pub seller_sku: Option<String>,
    #[serde(rename = "ASIN")]
    pub asin: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub quantity_ordered: LooseDecimal,
    pub item_price: Option<AmazonMoney>,
    pub item_tax: Option<AmazonMoney>,
    pub promotion_discount: Option<AmazonMoney>,
    pub shipment_status: Option<String>,
    pub package_weight: Option<AmazonWeight>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AmazonWeight {
    #[serde(default)]
    pub value: LooseDecimal,
    pub unit: Option<String>,
}

/// An order together with the items fetched from its `orderItems` endpoint.
#[derive(Debug, Clone, Default)]
pub struct AmazonOrderBundle {
    pub order: AmazonOrder,
    pub items: Vec<AmazonOrderItem>,
    pub raw: Value,
}

impl AmazonOrderBundle {
    pub fn from_values(order: Value, items: Vec<Value>) -> Result<Self, SyncError> {
        let parsed: AmazonOrder = decode(Marketplace::Amazon, order.clone())?;
        let items = items
            .into_iter()
            .map(|item| decode::<AmazonOrderItem>(Marketplace::Amazon, item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            order: parsed,
            items,
            raw: order,
        })
    }

    pub fn normalize(&self) -> Result<NormalizedOrder, SyncError> {
        let order = &self.order;
        let external_order_id = opt_non_empty(order.amazon_order_id.as_deref()).ok_or_else(|| {
            SyncError::invalid_payload(Marketplace::Amazon, "AmazonOrderId missing")
        })?;
        let status =
            opt_non_empty(order.order_status.as_deref()).unwrap_or_else(|| "Pending".to_string());

        let lines = self
            .items
            .iter()
            .map(|item| NormalizedLine {
                external_line_id: opt_non_empty(item.order_item_id.as_deref()),
                external_item_id: opt_non_empty(item.asin.as_deref()),
                sku: opt_non_empty(item.seller_sku.as_deref()),
                title: opt_non_empty(item.title.as_deref()),
                quantity: parse_quantity(item.quantity_ordered.value()),
                price: amount(&item.item_price),
                tax: amount(&item.item_tax),
                discounts: amount(&item.promotion_discount),
                fulfillment_status: opt_non_empty(item.shipment_status.as_deref())
                    .or_else(|| Some(status.clone())),
                weight_lbs: item.package_weight.as_ref().and_then(|w| {
                    (w.unit.as_deref() == Some("LB"))
                        .then(|| w.value.value().and_then(|v| v.to_f64()))
                        .flatten()
                }),
                shipping_estimate: None,
            })
            .collect();

        Ok(NormalizedOrder {
            external_order_id,
            currency: order
                .order_total
                .as_ref()
                .and_then(|m| opt_non_empty(m.currency_code.as_deref())),
            totals: OrderTotals {
                subtotal: None,
                tax: amount(&order.tax),
                shipping: amount(&order.shipping_price),
                discounts: amount(&order.promotion_discount),
                total: amount(&order.order_total),
            },
            placed_at: parse_timestamp(order.purchase_date.as_deref()),
            closed_at: parse_timestamp(order.latest_delivery_date.as_deref()),
            marketplace_id: opt_non_empty(order.marketplace_id.as_deref()),
            fulfillment_channel: opt_non_empty(order.fulfillment_channel.as_deref()),
            customer: Some(self.normalize_buyer()),
            lines,
            ship_to: order
                .shipping_address
                .as_ref()
                .map(AmazonAddress::to_address)
                .unwrap_or_default(),
            fulfillment_cost: amount(&order.shipping_price).filter(|d| !d.is_zero()),
            label_hint: false,
            status,
            raw: self.raw.clone(),
        })
    }

    fn normalize_buyer(&self) -> NormalizedCustomer {
        let buyer = self.order.buyer_info.clone().unwrap_or_default();
        let address = self.order.shipping_address.clone().unwrap_or_default();
        let (first_name, last_name) = match opt_non_empty(buyer.buyer_name.as_deref()) {
            Some(name) => {
                let mut parts = name.split_whitespace();
                let first = parts.next().map(str::to_string);
                let rest = parts.collect::<Vec<_>>().join(" ");
                (first, (!rest.is_empty()).then_some(rest))
            }
            None => (None, None),
        };
        NormalizedCustomer {
            external_id: opt_non_empty(buyer.buyer_id.as_deref())
                .or_else(|| opt_non_empty(self.order.amazon_order_id.as_deref())),
            email: normalize_email(buyer.buyer_email.as_deref()),
            phone: opt_non_empty(address.phone.as_deref()),
            first_name,
            last_name,
            address: Some(address.to_address()).filter(|addr| !addr.is_empty()),
            raw: self.raw.get("BuyerInfo").cloned().unwrap_or(Value::Null),
        }
    }
}
