//! Folds normalized marketplace records into the canonical store.

use crate::{
    error::SyncError,
    metrics,
    models::{
        Address, AuditOrderLine, CanonicalOrder, CanonicalOrderLine, ChannelAccount,
        DataQualityReason, DataQualityStatus, IngestSource, InventoryLevel, LineCosts,
        ShippingLabel,
    },
    normalize::{NormalizedInventory, NormalizedLine, NormalizedOrder, NormalizedProduct, RawOrder},
    store::{CustomerCandidate, NewItemMapping, Store},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct OrderOutcome {
    pub order_id: Uuid,
    pub external_order_id: String,
    pub customer_id: Option<Uuid>,
    pub lines: usize,
    pub audit_lines: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProductOutcome {
    pub variants: usize,
    pub skipped: usize,
}

/// Label data returned by a shipping provider, before it is attached to an
/// account.
#[derive(Debug, Clone, Default)]
pub struct LabelInput {
    pub order_id: Option<Uuid>,
    pub shipment_id: String,
    pub label_format: Option<String>,
    pub download_url: Option<String>,
    pub document: Option<String>,
    pub mime_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// Verdict for one audit line: `missing_address` when the ship-to cannot be
/// delivered to, `missing_label` when no label exists for the order.
pub fn data_quality(
    ship_to: &Address,
    label_present: bool,
) -> (DataQualityStatus, Vec<DataQualityReason>) {
    let mut reasons = Vec::new();
    if !ship_to.is_deliverable() {
        reasons.push(DataQualityReason::MissingAddress);
    }
    if !label_present {
        reasons.push(DataQualityReason::MissingLabel);
    }
    let status = if reasons.is_empty() {
        DataQualityStatus::Valid
    } else {
        DataQualityStatus::Excluded
    };
    (status, reasons)
}

#[derive(Clone)]
pub struct Pipeline {
    store: Store,
}

impl Pipeline {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Normalizes and applies each order on its own. Payloads that cannot be
    /// normalized are logged and skipped without affecting their siblings.
    pub async fn apply_raw_orders(
        &self,
        account: &ChannelAccount,
        orders: Vec<RawOrder>,
        source: IngestSource,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for raw in orders {
            match raw.normalize() {
                Ok(order) => match self.apply_order(account, order, source).await {
                    Ok(_) => summary.applied += 1,
                    Err(err) => {
                        warn!(
                            target: "channel_sync.pipeline",
                            account_id = %account.id,
                            error = %err,
                            "order upsert failed"
                        );
                        summary.skipped += 1;
                    }
                },
                Err(err) => {
                    warn!(
                        target: "channel_sync.pipeline",
                        account_id = %account.id,
                        marketplace = %account.marketplace,
                        error = %err,
                        "skipping order payload"
                    );
                    summary.skipped += 1;
                }
            }
        }
        metrics::records_applied("order", summary.applied);
        summary
    }

    /// Upserts the customer, the order (full replace), its lines and the audit
    /// projection. Applying the same order again yields the same state apart
    /// from sync timestamps.
    pub async fn apply_order(
        &self,
        account: &ChannelAccount,
        order: NormalizedOrder,
        source: IngestSource,
    ) -> Result<OrderOutcome, SyncError> {
        let started = Instant::now();
        let customer_id = self.resolve_customer(account, &order).await;

        let canonical = self
            .store
            .upsert_order(CanonicalOrder {
                id: Uuid::new_v4(),
                seller_id: account.seller_id,
                account_id: account.id,
                marketplace: account.marketplace,
                marketplace_id: order.marketplace_id.clone(),
                fulfillment_channel: order.fulfillment_channel.clone(),
                source,
                external_order_id: order.external_order_id.clone(),
                status: order.status.clone(),
                currency: order.currency.clone(),
                totals: order.totals.clone(),
                customer_id,
                placed_at: order.placed_at,
                closed_at: order.closed_at,
                raw: order.raw.clone(),
                synced_at: Utc::now(),
            })
            .await;

        for line in &order.lines {
            let item_id = self.resolve_line_item(account, line).await;
            self.store
                .upsert_order_line(CanonicalOrderLine {
                    id: Uuid::new_v4(),
                    order_id: canonical.id,
                    external_line_id: line.external_line_id.clone(),
                    item_id,
                    sku: line.sku.clone(),
                    title: line.title.clone(),
                    quantity: line.quantity,
                    price: line.price,
                    tax: line.tax,
                    discounts: line.discounts,
                    fulfillment_status: line.fulfillment_status.clone(),
                })
                .await;
        }

        let audit_lines = self.project_audit(account, &canonical, &order, source).await;
        metrics::stage_elapsed("apply_order", started.elapsed());
        info!(
            target: "channel_sync.pipeline",
            account_id = %account.id,
            marketplace = %account.marketplace,
            external_order_id = %canonical.external_order_id,
            lines = order.lines.len(),
            "order upserted"
        );

        Ok(OrderOutcome {
            order_id: canonical.id,
            external_order_id: canonical.external_order_id,
            customer_id,
            lines: order.lines.len(),
            audit_lines,
        })
    }

    async fn resolve_customer(
        &self,
        account: &ChannelAccount,
        order: &NormalizedOrder,
    ) -> Option<Uuid> {
        let customer = order.customer.as_ref()?;
        if customer.external_id.is_none() && customer.email.is_none() && customer.phone.is_none()
        {
            return None;
        }
        let customer_id = self
            .store
            .resolve_customer(
                account.seller_id,
                account.id,
                customer.external_id.as_deref(),
                CustomerCandidate {
                    email: customer.email.clone(),
                    phone: customer.phone.clone(),
                    first_name: customer.first_name.clone(),
                    last_name: customer.last_name.clone(),
                    address: customer.address.clone(),
                },
            )
            .await;
        if let Some(external_id) = &customer.external_id {
            self.store
                .upsert_customer_mapping(account, customer_id, external_id, customer.raw.clone())
                .await;
        }
        Some(customer_id)
    }

    /// An existing mapping for the listing id wins; otherwise a SKU creates or
    /// finds the item and links it. No SKU and no mapping means no item link.
    async fn resolve_line_item(&self, account: &ChannelAccount, line: &NormalizedLine) -> Option<Uuid> {
        if let Some(external_id) = &line.external_item_id
            && let Some(mapping) = self.store.find_item_mapping(account.id, external_id).await
        {
            self.store.touch_item_mapping(mapping.id).await;
            return Some(mapping.item_id);
        }

        let sku = line.sku.as_deref()?;
        let title = line.title.as_deref().unwrap_or(sku);
        let item = self.store.upsert_item(account.seller_id, sku, title).await;
        self.store
            .upsert_item_mapping(
                account,
                NewItemMapping {
                    item_id: item.id,
                    external_item_id: line.external_item_id.clone().unwrap_or_else(|| sku.to_string()),
                    external_variant_id: None,
                    inventory_item_id: None,
                    sku: sku.to_string(),
                    active: true,
                    raw: json!({ "source": "order_line" }),
                },
            )
            .await;
        Some(item.id)
    }

    async fn project_audit(
        &self,
        account: &ChannelAccount,
        canonical: &CanonicalOrder,
        order: &NormalizedOrder,
        source: IngestSource,
    ) -> usize {
        let label_present =
            order.label_hint || self.store.has_label_for_order(canonical.id).await;
        let (status, reasons) = data_quality(&order.ship_to, label_present);

        for line in &order.lines {
            let costs = LineCosts {
                fulfillment: order.fulfillment_cost.or(line.shipping_estimate),
                label: None,
                prep: Some(Decimal::ZERO),
                third_party: None,
            };
            self.store
                .upsert_audit_line(AuditOrderLine {
                    id: Uuid::new_v4(),
                    seller_id: account.seller_id,
                    account_id: account.id,
                    marketplace: account.marketplace,
                    marketplace_id: order.marketplace_id.clone(),
                    fulfillment_channel: order.fulfillment_channel.clone(),
                    source,
                    order_id: canonical.id,
                    order_external_id: canonical.external_order_id.clone(),
                    order_date: order.placed_at,
                    sku: line.sku.clone(),
                    item_name: line.title.clone(),
                    quantity: line.quantity,
                    weight_lbs: line.weight_lbs,
                    item_count: if line.quantity > 0 { line.quantity } else { 1 },
                    ship_to: order.ship_to.clone(),
                    original_cost_total: costs.total(),
                    costs,
                    prep_fee_required: true,
                    data_quality_status: status,
                    data_quality_reasons: reasons.clone(),
                    updated_at: Utc::now(),
                })
                .await;
        }
        order.lines.len()
    }

    /// Upserts one canonical item per SKU-bearing variant and links it to the
    /// product/variant pair.
    pub async fn apply_product(
        &self,
        account: &ChannelAccount,
        product: NormalizedProduct,
    ) -> ProductOutcome {
        let mut outcome = ProductOutcome::default();
        for variant in product.variants {
            let Some(sku) = variant.sku else {
                warn!(
                    target: "channel_sync.pipeline",
                    account_id = %account.id,
                    product_id = %product.external_item_id,
                    variant_id = ?variant.external_variant_id,
                    "variant has no sku, skipping"
                );
                outcome.skipped += 1;
                continue;
            };
            let item = self
                .store
                .upsert_item(account.seller_id, &sku, &variant.title)
                .await;
            self.store
                .upsert_item_mapping(
                    account,
                    NewItemMapping {
                        item_id: item.id,
                        external_item_id: product.external_item_id.clone(),
                        external_variant_id: variant.external_variant_id,
                        inventory_item_id: variant.inventory_item_id,
                        sku,
                        active: product.active,
                        raw: variant.raw,
                    },
                )
                .await;
            outcome.variants += 1;
        }
        metrics::records_applied("variant", outcome.variants);
        info!(
            target: "channel_sync.pipeline",
            account_id = %account.id,
            product_id = %product.external_item_id,
            variants = outcome.variants,
            "product upserted"
        );
        outcome
    }

    /// Records one inventory observation. Returns `None` when the update
    /// cannot be tied to an item.
    pub async fn apply_inventory(
        &self,
        account: &ChannelAccount,
        inventory: NormalizedInventory,
    ) -> Option<InventoryLevel> {
        let item_id = match (&inventory.external_variant_id, &inventory.sku) {
            (Some(external_id), _) => {
                let Some(mapping) = self.store.find_item_mapping(account.id, external_id).await
                else {
                    warn!(
                        target: "channel_sync.pipeline",
                        account_id = %account.id,
                        external_id = %external_id,
                        "inventory update skipped: no item mapping"
                    );
                    return None;
                };
                self.store.touch_item_mapping(mapping.id).await;
                mapping.item_id
            }
            (None, Some(sku)) => {
                let title = inventory.title.as_deref().unwrap_or(sku);
                let item = self.store.upsert_item(account.seller_id, sku, title).await;
                self.store
                    .upsert_item_mapping(
                        account,
                        NewItemMapping {
                            item_id: item.id,
                            external_item_id: sku.clone(),
                            external_variant_id: None,
                            inventory_item_id: None,
                            sku: sku.clone(),
                            active: true,
                            raw: inventory.raw.clone(),
                        },
                    )
                    .await;
                item.id
            }
            (None, None) => {
                warn!(
                    target: "channel_sync.pipeline",
                    account_id = %account.id,
                    "inventory update has neither id nor sku"
                );
                return None;
            }
        };

        let available = inventory.available?;
        let level = self
            .store
            .upsert_inventory(item_id, account.id, inventory.location_id, available)
            .await;
        metrics::records_applied("inventory", 1);
        Some(level)
    }

    /// Persists a purchased label and rebuilds the data-quality verdict of the
    /// order's audit lines.
    pub async fn record_label(&self, account: &ChannelAccount, input: LabelInput) -> ShippingLabel {
        let label = self
            .store
            .upsert_label(ShippingLabel {
                id: Uuid::new_v4(),
                seller_id: account.seller_id,
                account_id: account.id,
                marketplace: account.marketplace,
                order_id: input.order_id,
                shipment_id: input.shipment_id,
                label_format: input.label_format,
                download_url: input.download_url,
                document: input.document,
                mime_type: input.mime_type,
                expires_at: input.expires_at,
                raw: input.raw,
            })
            .await;

        if let Some(order_id) = label.order_id {
            for mut line in self.store.audit_lines_for_order(order_id).await {
                let (status, reasons) = data_quality(&line.ship_to, true);
                line.data_quality_status = status;
                line.data_quality_reasons = reasons;
                line.updated_at = Utc::now();
                self.store.upsert_audit_line(line).await;
            }
        }
        info!(
            target: "channel_sync.pipeline",
            account_id = %account.id,
            shipment_id = %label.shipment_id,
            order_id = ?label.order_id,
            "shipping label recorded"
        );
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{Marketplace, OrderTotals},
        normalize::{NormalizedCustomer, NormalizedVariant},
    };

    fn account(store_seller: Uuid, marketplace: Marketplace) -> ChannelAccount {
        ChannelAccount::new(store_seller, marketplace, Some("acct".into()))
    }

    fn address() -> Address {
        Address {
            line1: Some("1 Main St".into()),
            city: Some("Austin".into()),
            region: Some("TX".into()),
            postal_code: Some("78701".into()),
            country: Some("US".into()),
            ..Address::default()
        }
    }

    fn order(external_id: &str) -> NormalizedOrder {
        NormalizedOrder {
            external_order_id: external_id.into(),
            status: "paid".into(),
            currency: Some("USD".into()),
            totals: OrderTotals {
                total: Some(Decimal::new(2500, 2)),
                ..OrderTotals::default()
            },
            placed_at: None,
            closed_at: None,
            marketplace_id: None,
            fulfillment_channel: Some("MFN".into()),
            customer: Some(NormalizedCustomer {
                external_id: Some("cust-1".into()),
                email: Some("buyer@example.com".into()),
                ..NormalizedCustomer::default()
            }),
            lines: vec![
                NormalizedLine {
                    external_line_id: Some("L1".into()),
                    sku: Some("SKU-1".into()),
                    title: Some("Widget".into()),
                    quantity: 2,
                    price: Some(Decimal::new(1000, 2)),
                    ..NormalizedLine::default()
                },
                NormalizedLine {
                    external_line_id: Some("L2".into()),
                    quantity: 0,
                    ..NormalizedLine::default()
                },
            ],
            ship_to: address(),
            fulfillment_cost: Some(Decimal::new(450, 2)),
            label_hint: false,
            raw: json!({"id": external_id}),
        }
    }

    #[tokio::test]
    async fn applying_the_same_order_twice_is_idempotent() {
        let store = Store::new();
        let pipeline = Pipeline::new(store.clone());
        let account = store.upsert_account(account(Uuid::new_v4(), Marketplace::Amazon)).await;

        let first = pipeline
            .apply_order(&account, order("A-1"), IngestSource::Poll)
            .await
            .unwrap();
        let second = pipeline
            .apply_order(&account, order("A-1"), IngestSource::Webhook)
            .await
            .unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(store.orders_for_account(account.id).await.len(), 1);
        let lines = store.lines_for_order(first.order_id).await;
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.sku.as_deref() == Some("SKU-1") && l.item_id.is_some()));
        assert!(lines.iter().any(|l| l.sku.is_none() && l.item_id.is_none()));
        assert_eq!(store.customers_for_seller(account.seller_id).await.len(), 1);
        assert_eq!(store.audit_lines_for_order(first.order_id).await.len(), 2);
    }

    #[tokio::test]
    async fn same_external_id_on_two_accounts_gives_two_orders() {
        let store = Store::new();
        let pipeline = Pipeline::new(store.clone());
        let seller = Uuid::new_v4();
        let a = store.upsert_account(ChannelAccount::new(seller, Marketplace::Ebay, Some("a".into()))).await;
        let b = store.upsert_account(ChannelAccount::new(seller, Marketplace::Ebay, Some("b".into()))).await;

        let first = pipeline.apply_order(&a, order("X"), IngestSource::Poll).await.unwrap();
        let second = pipeline.apply_order(&b, order("X"), IngestSource::Poll).await.unwrap();
        assert_ne!(first.order_id, second.order_id);
    }

    #[tokio::test]
    async fn order_replace_evicts_stale_fields() {
        let store = Store::new();
        let pipeline = Pipeline::new(store.clone());
        let account = store.upsert_account(account(Uuid::new_v4(), Marketplace::Shopify)).await;

        let outcome = pipeline.apply_order(&account, order("S-1"), IngestSource::Poll).await.unwrap();
        let mut refunded = order("S-1");
        refunded.status = "refunded".into();
        refunded.totals = OrderTotals::default();
        pipeline.apply_order(&account, refunded, IngestSource::Poll).await.unwrap();

        let stored = store.get_order(outcome.order_id).await.unwrap();
        assert_eq!(stored.status, "refunded");
        assert_eq!(stored.totals.total, None);
    }

    #[tokio::test]
    async fn audit_verdict_reflects_address_and_label() {
        let store = Store::new();
        let pipeline = Pipeline::new(store.clone());
        let account = store.upsert_account(account(Uuid::new_v4(), Marketplace::Amazon)).await;

        let mut broken = order("Q-1");
        broken.ship_to.postal_code = None;
        let outcome = pipeline.apply_order(&account, broken, IngestSource::Poll).await.unwrap();
        let audit = store.audit_lines_for_order(outcome.order_id).await;
        let line = audit.iter().find(|a| a.sku.as_deref() == Some("SKU-1")).unwrap();
        assert_eq!(line.data_quality_status, DataQualityStatus::Excluded);
        assert_eq!(
            line.data_quality_reasons,
            vec![DataQualityReason::MissingAddress, DataQualityReason::MissingLabel]
        );
        assert_eq!(line.item_count, 2);
        assert_eq!(line.costs.fulfillment, Some(Decimal::new(450, 2)));
        assert_eq!(line.original_cost_total, Some(Decimal::new(450, 2)));

        let unknown_qty = audit.iter().find(|a| a.sku.is_none()).unwrap();
        assert_eq!(unknown_qty.item_count, 1);

        let outcome = pipeline.apply_order(&account, order("Q-2"), IngestSource::Poll).await.unwrap();
        pipeline
            .record_label(
                &account,
                LabelInput {
                    order_id: Some(outcome.order_id),
                    shipment_id: "shp-1".into(),
                    ..LabelInput::default()
                },
            )
            .await;
        for line in store.audit_lines_for_order(outcome.order_id).await {
            assert_eq!(line.data_quality_status, DataQualityStatus::Valid);
            assert!(line.data_quality_reasons.is_empty());
        }

        // Re-ingesting after the label exists keeps the line valid.
        pipeline.apply_order(&account, order("Q-2"), IngestSource::Poll).await.unwrap();
        for line in store.audit_lines_for_order(outcome.order_id).await {
            assert_eq!(line.data_quality_status, DataQualityStatus::Valid);
        }
    }

    #[test]
    fn verdict_precedence() {
        assert_eq!(data_quality(&address(), true), (DataQualityStatus::Valid, vec![]));
        let mut missing = address();
        missing.postal_code = None;
        assert_eq!(
            data_quality(&missing, true),
            (DataQualityStatus::Excluded, vec![DataQualityReason::MissingAddress])
        );
        assert_eq!(
            data_quality(&address(), false),
            (DataQualityStatus::Excluded, vec![DataQualityReason::MissingLabel])
        );
    }

    #[tokio::test]
    async fn products_and_inventory_resolve_through_mappings() {
        let store = Store::new();
        let pipeline = Pipeline::new(store.clone());
        let account = store.upsert_account(account(Uuid::new_v4(), Marketplace::Shopify)).await;

        let outcome = pipeline
            .apply_product(
                &account,
                NormalizedProduct {
                    external_item_id: "P1".into(),
                    title: "Shirt".into(),
                    active: true,
                    variants: vec![
                        NormalizedVariant {
                            external_variant_id: Some("V1".into()),
                            inventory_item_id: Some("INV1".into()),
                            sku: Some("SHIRT-S".into()),
                            title: "Shirt - S".into(),
                            raw: json!({}),
                        },
                        NormalizedVariant {
                            external_variant_id: Some("V2".into()),
                            inventory_item_id: None,
                            sku: None,
                            title: "Shirt - M".into(),
                            raw: json!({}),
                        },
                    ],
                },
            )
            .await;
        assert_eq!(outcome, ProductOutcome { variants: 1, skipped: 1 });

        let level = pipeline
            .apply_inventory(
                &account,
                NormalizedInventory {
                    external_variant_id: Some("INV1".into()),
                    sku: None,
                    title: None,
                    location_id: Some("LOC".into()),
                    available: Some(7),
                    raw: json!({}),
                },
            )
            .await
            .unwrap();
        assert_eq!(level.available, 7);
        let item = store.find_item_by_sku(account.seller_id, "SHIRT-S").await.unwrap();
        assert_eq!(level.item_id, item.id);

        let unknown = pipeline
            .apply_inventory(
                &account,
                NormalizedInventory {
                    external_variant_id: Some("nope".into()),
                    sku: None,
                    title: None,
                    location_id: None,
                    available: Some(1),
                    raw: json!({}),
                },
            )
            .await;
        assert!(unknown.is_none());

        // An order line for the variant links to the same item.
        let mut o = order("S-9");
        o.lines[0].external_item_id = Some("V1".into());
        o.lines[0].sku = None;
        let applied = pipeline.apply_order(&account, o, IngestSource::Webhook).await.unwrap();
        let lines = store.lines_for_order(applied.order_id).await;
        assert!(lines.iter().any(|l| l.item_id == Some(item.id)));
    }

    #[tokio::test]
    async fn unnormalizable_orders_are_skipped_in_batches() {
        let store = Store::new();
        let pipeline = Pipeline::new(store.clone());
        let account = store.upsert_account(account(Uuid::new_v4(), Marketplace::Shopify)).await;
        let good = RawOrder::from_value(
            Marketplace::Shopify,
            json!({"id": 1, "line_items": [{"id": 10, "sku": "A", "quantity": 1}]}),
        )
        .unwrap();
        let bad = RawOrder::from_value(Marketplace::Shopify, json!({"line_items": []})).unwrap();

        let summary = pipeline
            .apply_raw_orders(&account, vec![bad, good], IngestSource::Poll)
            .await;
        assert_eq!(summary, BatchSummary { applied: 1, skipped: 1 });
        assert_eq!(store.orders_for_account(account.id).await.len(), 1);
    }
}
