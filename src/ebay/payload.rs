use crate::{
    error::SyncError,
    models::{Address, Marketplace, OrderTotals},
    normalize::{
        LooseDecimal, LooseId, NormalizedCustomer, NormalizedInventory, NormalizedLine,
        NormalizedOrder, decode, normalize_email, null_default, opt_non_empty, parse_quantity,
        parse_timestamp,
    },
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbayOrder {
    #[serde(default)]
    pub order_id: LooseId,
    #[serde(default)]
    pub legacy_order_id: LooseId,
    pub marketplace_id: Option<String>,
    pub order_fulfillment_status: Option<String>,
    pub order_payment_status: Option<String>,
    pub creation_date: Option<String>,
    pub cancelled_date: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub pricing_summary: EbayPricingSummary,
    pub buyer: Option<EbayBuyer>,
    #[serde(default, deserialize_with = "null_default")]
    pub fulfillment_start_instructions: Vec<EbayFulfillmentInstruction>,
    #[serde(default, deserialize_with = "null_default")]
    pub line_items: Vec<EbayLineItem>,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbayAmount {
    #[serde(default)]
    pub value: LooseDecimal,
    pub currency: Option<String>,
}

fn amount(value: &Option<EbayAmount>) -> Option<Decimal> {
    value.as_ref().and_then(|a| a.value.value())
}

fn currency(value: &Option<EbayAmount>) -> Option<String> {
    value
        .as_ref()
        .and_then(|a| opt_non_empty(a.currency.as_deref()))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayPricingSummary {
    pub subtotal: Option<EbayAmount>,
    pub price_subtotal: Option<EbayAmount>,
    pub total: Option<EbayAmount>,
    pub total_tax: Option<EbayAmount>,
    pub delivery_cost: Option<EbayDeliveryCost>,
    pub discount: Option<EbayAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayDeliveryCost {
    pub shipping_cost: Option<EbayAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayBuyer {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<EbayName>,
    pub tax_address: Option<EbayAddress>,
    pub registration_address: Option<EbayAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayName {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// eBay nests the postal fields under `contactAddress` on ship-to blocks and
/// inlines them on buyer addresses; both shapes are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayAddress {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state_or_province: Option<String>,
    pub county: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub contact_address: Option<Box<EbayAddress>>,
}

impl EbayAddress {
    fn to_address(&self) -> Address {
        if let Some(inner) = &self.contact_address {
            return inner.to_address();
        }
        Address {
            line1: opt_non_empty(self.address_line1.as_deref()),
            line2: opt_non_empty(self.address_line2.as_deref()),
            city: opt_non_empty(self.city.as_deref()),
            region: opt_non_empty(self.state_or_province.as_deref())
                .or_else(|| opt_non_empty(self.county.as_deref()))
                .or_else(|| opt_non_empty(self.region.as_deref())),
            postal_code: opt_non_empty(self.postal_code.as_deref()),
            country: opt_non_empty(self.country_code.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayFulfillmentInstruction {
    pub shipping_step: Option<EbayShippingStep>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EbayShippingStep {
    pub ship_to: Option<EbayAddress>,
    pub shipping_to: Option<EbayAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbayLineItem {
    #[serde(default)]
    pub line_item_id: LooseId,
    #[serde(default)]
    pub legacy_item_id: LooseId,
    pub sku: Option<String>,
    pub legacy_sku: Option<String>,
    pub title: Option<String>,
    pub item_title: Option<String>,
    #[serde(default)]
    pub quantity: LooseDecimal,
    pub line_item_cost: Option<EbayAmount>,
    pub net_price: Option<EbayAmount>,
    pub original_price: Option<EbayAmount>,
    pub total_tax: Option<EbayAmount>,
    pub discount_amount: Option<EbayAmount>,
    pub estimated_delivery_cost: Option<EbayAmount>,
    pub line_item_fulfillment_status: Option<String>,
    pub line_item_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbayInventoryItem {
    pub sku: Option<String>,
    pub title: Option<String>,
    pub product: Option<EbayInventoryProduct>,
    pub availability: Option<EbayAvailability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbayInventoryProduct {
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbayAvailability {
    pub ship_to_location_availability: Option<EbayShipToAvailability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbayShipToAvailability {
    #[serde(default)]
    pub quantity: LooseDecimal,
}

impl EbayOrder {
    pub fn from_value(value: Value) -> Result<Self, SyncError> {
        let mut order: EbayOrder = decode(Marketplace::Ebay, value.clone())?;
        order.raw = value;
        Ok(order)
    }

    fn ship_to(&self) -> Option<&EbayAddress> {
        let step = self
            .fulfillment_start_instructions
            .first()
            .and_then(|i| i.shipping_step.as_ref());
        step.and_then(|s| s.ship_to.as_ref().or(s.shipping_to.as_ref()))
            .or_else(|| self.buyer.as_ref().and_then(|b| b.tax_address.as_ref()))
            .or_else(|| {
                self.buyer
                    .as_ref()
                    .and_then(|b| b.registration_address.as_ref())
            })
    }

    pub fn normalize(&self) -> Result<NormalizedOrder, SyncError> {
        let external_order_id = self
            .order_id
            .get()
            .or_else(|| self.legacy_order_id.get())
            .ok_or_else(|| SyncError::invalid_payload(Marketplace::Ebay, "order id missing"))?;

        let pricing = &self.pricing_summary;
        let shipping_cost = pricing
            .delivery_cost
            .as_ref()
            .and_then(|d| d.shipping_cost.clone());
        let currency_code = currency(&pricing.total)
            .or_else(|| currency(&pricing.price_subtotal))
            .or_else(|| currency(&shipping_cost))
            .or_else(|| currency(&pricing.subtotal));
        let totals = OrderTotals {
            subtotal: amount(&pricing.subtotal).or_else(|| amount(&pricing.price_subtotal)),
            tax: amount(&pricing.total_tax),
            shipping: amount(&shipping_cost),
            discounts: amount(&pricing.discount),
            total: amount(&pricing.total),
        };

        let status = [
            &self.order_fulfillment_status,
            &self.order_payment_status,
        ]
        .into_iter()
        .find_map(|s| opt_non_empty(s.as_deref()))
        .unwrap_or_else(|| "open".to_string());

        let lines = self
            .line_items
            .iter()
            .map(|line| NormalizedLine {
                external_line_id: line.line_item_id.get(),
                external_item_id: line.legacy_item_id.get(),
                sku: opt_non_empty(line.sku.as_deref())
                    .or_else(|| opt_non_empty(line.legacy_sku.as_deref())),
                title: opt_non_empty(line.title.as_deref())
                    .or_else(|| opt_non_empty(line.item_title.as_deref())),
                quantity: parse_quantity(line.quantity.value()),
                price: amount(&line.line_item_cost)
                    .or_else(|| amount(&line.net_price))
                    .or_else(|| amount(&line.original_price)),
                tax: amount(&line.total_tax),
                discounts: amount(&line.discount_amount),
                fulfillment_status: opt_non_empty(line.line_item_fulfillment_status.as_deref())
                    .or_else(|| opt_non_empty(line.line_item_status.as_deref())),
                weight_lbs: None,
                shipping_estimate: amount(&line.estimated_delivery_cost),
            })
            .collect();

        Ok(NormalizedOrder {
            external_order_id,
            status,
            currency: currency_code,
            totals,
            placed_at: parse_timestamp(self.creation_date.as_deref()),
            closed_at: parse_timestamp(self.cancelled_date.as_deref()),
            marketplace_id: opt_non_empty(self.marketplace_id.as_deref()),
            fulfillment_channel: Some("ebay".to_string()),
            customer: self.buyer.as_ref().map(|buyer| self.normalize_buyer(buyer)),
            lines,
            ship_to: self.ship_to().map(EbayAddress::to_address).unwrap_or_default(),
            fulfillment_cost: amount(&shipping_cost).filter(|d| !d.is_zero()),
            label_hint: false,
            raw: self.raw.clone(),
        })
    }

    fn normalize_buyer(&self, buyer: &EbayBuyer) -> NormalizedCustomer {
        let tax = buyer.tax_address.as_ref();
        let external_id = opt_non_empty(buyer.username.as_deref());
        let first_name = tax
            .and_then(|a| opt_non_empty(a.first_name.as_deref()))
            .or_else(|| {
                buyer
                    .name
                    .as_ref()
                    .and_then(|n| opt_non_empty(n.first_name.as_deref()))
            });
        let last_name = tax
            .and_then(|a| opt_non_empty(a.last_name.as_deref()))
            .or_else(|| {
                buyer
                    .name
                    .as_ref()
                    .and_then(|n| opt_non_empty(n.last_name.as_deref()))
            })
            .or_else(|| external_id.clone());
        NormalizedCustomer {
            email: normalize_email(buyer.email.as_deref()),
            phone: tax.and_then(|a| opt_non_empty(a.phone_number.as_deref())),
            first_name,
            last_name,
            address: tax
                .or(buyer.registration_address.as_ref())
                .or_else(|| self.ship_to())
                .map(EbayAddress::to_address)
                .filter(|addr| !addr.is_empty()),
            raw: self.raw.get("buyer").cloned().unwrap_or(Value::Null),
            external_id,
        }
    }
}

/// Inventory items carry their SKU directly; there is no variant layer.
pub fn normalize_inventory_item(value: Value) -> Result<NormalizedInventory, SyncError> {
    let item: EbayInventoryItem = decode(Marketplace::Ebay, value.clone())?;
    let sku = opt_non_empty(item.sku.as_deref())
        .ok_or_else(|| SyncError::invalid_payload(Marketplace::Ebay, "inventory item sku missing"))?;
    let title = item
        .product
        .as_ref()
        .and_then(|p| opt_non_empty(p.title.as_deref()))
        .or_else(|| opt_non_empty(item.title.as_deref()));
    let available = item
        .availability
        .as_ref()
        .and_then(|a| a.ship_to_location_availability.as_ref())
        .and_then(|s| s.quantity.value())
        .map(|q| parse_quantity(Some(q)));
    Ok(NormalizedInventory {
        external_variant_id: None,
        sku: Some(sku),
        title,
        location_id: None,
        available,
        raw: value,
    })
}
