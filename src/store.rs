use crate::{
    error::SyncError,
    models::{
        AccountStatus, Address, AuditOrderLine, CanonicalCustomer, CanonicalItem, CanonicalOrder,
        CanonicalOrderLine, ChannelAccount, DeletionRequest, ExternalCustomerMapping,
        ExternalItemMapping, InboundLabels, InboundShipment, InventoryLevel, Marketplace,
        RateShoppingQuote, ShippingLabel,
    },
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// In-process canonical store. Every method takes the table lock once, so a
/// single call is atomic with respect to other callers.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) accounts: HashMap<Uuid, ChannelAccount>,
    pub(crate) items: HashMap<Uuid, CanonicalItem>,
    pub(crate) item_mappings: HashMap<Uuid, ExternalItemMapping>,
    pub(crate) customers: HashMap<Uuid, CanonicalCustomer>,
    pub(crate) customer_mappings: HashMap<Uuid, ExternalCustomerMapping>,
    pub(crate) orders: HashMap<Uuid, CanonicalOrder>,
    pub(crate) order_lines: Vec<CanonicalOrderLine>,
    pub(crate) inventory: HashMap<Uuid, InventoryLevel>,
    pub(crate) labels: HashMap<Uuid, ShippingLabel>,
    pub(crate) audit_lines: HashMap<Uuid, AuditOrderLine>,
    pub(crate) quotes: HashMap<Uuid, RateShoppingQuote>,
    pub(crate) deletion_requests: Vec<DeletionRequest>,
    pub(crate) inbound_shipments: HashMap<Uuid, InboundShipment>,
}

/// Fresh token material from a token endpoint, ready to persist.
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub access_token: String,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

/// Link between a canonical item and one marketplace listing.
#[derive(Debug, Clone)]
pub struct NewItemMapping {
    pub item_id: Uuid,
    pub external_item_id: String,
    pub external_variant_id: Option<String>,
    pub inventory_item_id: Option<String>,
    pub sku: String,
    pub active: bool,
    pub raw: Value,
}

/// Contact details used to match or create a canonical customer.
#[derive(Debug, Clone, Default)]
pub struct CustomerCandidate {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<Address>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to every table.
    pub(crate) async fn transaction<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }

    // ---- accounts ----

    /// Upserts on `(seller_id, marketplace, external_id)`. An existing row keeps
    /// its id, creation time and last sync stamp.
    pub async fn upsert_account(&self, incoming: ChannelAccount) -> ChannelAccount {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .accounts
            .values()
            .find(|a| {
                a.seller_id == incoming.seller_id
                    && a.marketplace == incoming.marketplace
                    && a.external_id == incoming.external_id
            })
            .map(|a| (a.id, a.created_at, a.last_synced_at));

        let mut account = incoming;
        if let Some((id, created_at, last_synced_at)) = existing {
            account.id = id;
            account.created_at = created_at;
            account.last_synced_at = account.last_synced_at.or(last_synced_at);
        }
        account.updated_at = Utc::now();
        guard.accounts.insert(account.id, account.clone());
        account
    }

    pub async fn get_account(&self, id: Uuid) -> Option<ChannelAccount> {
        self.inner.lock().await.accounts.get(&id).cloned()
    }

    pub async fn require_account(&self, id: Uuid) -> Result<ChannelAccount, SyncError> {
        self.get_account(id)
            .await
            .ok_or_else(|| SyncError::not_found("channel account", id))
    }

    /// Account of `marketplace` with the given external id. When several
    /// sellers connected the same identity, an active account wins over an
    /// inactive one, then the most recently updated.
    pub async fn find_account(
        &self,
        marketplace: Marketplace,
        external_id: &str,
    ) -> Option<ChannelAccount> {
        let guard = self.inner.lock().await;
        let mut candidates: Vec<&ChannelAccount> = guard
            .accounts
            .values()
            .filter(|a| a.marketplace == marketplace && a.external_id.as_deref() == Some(external_id))
            .collect();
        if candidates.len() > 1 {
            warn!(
                target: "channel_sync.store",
                %marketplace,
                external_id,
                candidates = candidates.len(),
                "external identity is connected by more than one seller"
            );
        }
        candidates.sort_by_key(|a| (a.is_active(), a.updated_at, a.id));
        candidates.pop().cloned()
    }

    /// The seller's accounts on `marketplace`, most recently updated first.
    pub async fn accounts_for_seller(
        &self,
        seller_id: Uuid,
        marketplace: Marketplace,
    ) -> Vec<ChannelAccount> {
        let guard = self.inner.lock().await;
        let mut accounts: Vec<ChannelAccount> = guard
            .accounts
            .values()
            .filter(|a| a.seller_id == seller_id && a.marketplace == marketplace)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        accounts
    }

    pub async fn find_account_for_seller(
        &self,
        seller_id: Uuid,
        marketplace: Marketplace,
    ) -> Option<ChannelAccount> {
        self.accounts_for_seller(seller_id, marketplace)
            .await
            .into_iter()
            .next()
    }

    /// Hard-deletes the account record on disconnect. Synced orders and
    /// mappings stay; erasure is the path that removes those. `Ok(false)` when
    /// the account does not exist, `NotFound` when it belongs to another seller.
    pub async fn delete_account(&self, id: Uuid, seller_id: Uuid) -> Result<bool, SyncError> {
        let mut guard = self.inner.lock().await;
        match guard.accounts.get(&id).map(|a| a.seller_id) {
            None => Ok(false),
            Some(owner) if owner != seller_id => {
                warn!(
                    target: "channel_sync.store",
                    account_id = %id,
                    %seller_id,
                    "refusing to delete another seller's account"
                );
                Err(SyncError::not_found("channel account", id))
            }
            Some(_) => {
                guard.accounts.remove(&id);
                info!(target: "channel_sync.store", account_id = %id, %seller_id, "account disconnected");
                Ok(true)
            }
        }
    }

    /// Active accounts of the given marketplaces, oldest first.
    pub async fn active_accounts(&self, marketplaces: &[Marketplace]) -> Vec<ChannelAccount> {
        let guard = self.inner.lock().await;
        let mut accounts: Vec<ChannelAccount> = guard
            .accounts
            .values()
            .filter(|a| a.is_active() && marketplaces.contains(&a.marketplace))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }

    /// Writes the new token set in one step. A `None` refresh token keeps the
    /// stored one.
    pub async fn apply_token_update(
        &self,
        id: Uuid,
        update: TokenUpdate,
    ) -> Result<ChannelAccount, SyncError> {
        let mut guard = self.inner.lock().await;
        let account = guard
            .accounts
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found("channel account", id))?;
        account.access_token = Some(update.access_token);
        account.access_token_expires_at = update.access_token_expires_at;
        if let Some(refresh) = update.refresh_token {
            account.refresh_token = Some(refresh);
            account.refresh_token_expires_at = update.refresh_token_expires_at;
        }
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    pub async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), SyncError> {
        let mut guard = self.inner.lock().await;
        let account = guard
            .accounts
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found("channel account", id))?;
        account.last_synced_at = Some(at);
        Ok(())
    }

    pub async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<(), SyncError> {
        let mut guard = self.inner.lock().await;
        let account = guard
            .accounts
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found("channel account", id))?;
        account.status = status;
        account.updated_at = Utc::now();
        Ok(())
    }

    // ---- items ----

    pub async fn upsert_item(&self, seller_id: Uuid, sku: &str, title: &str) -> CanonicalItem {
        let mut guard = self.inner.lock().await;
        let now = Utc::now();
        if let Some(item) = guard
            .items
            .values_mut()
            .find(|i| i.seller_id == seller_id && i.sku == sku)
        {
            item.title = title.to_string();
            item.updated_at = now;
            return item.clone();
        }
        let item = CanonicalItem {
            id: Uuid::new_v4(),
            seller_id,
            sku: sku.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        guard.items.insert(item.id, item.clone());
        item
    }

    pub async fn find_item_by_sku(&self, seller_id: Uuid, sku: &str) -> Option<CanonicalItem> {
        self.inner
            .lock()
            .await
            .items
            .values()
            .find(|i| i.seller_id == seller_id && i.sku == sku)
            .cloned()
    }

    /// Upserts on `(account, external_item_id, external_variant_id)`.
    pub async fn upsert_item_mapping(
        &self,
        account: &ChannelAccount,
        link: NewItemMapping,
    ) -> ExternalItemMapping {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .item_mappings
            .values()
            .find(|m| {
                m.account_id == account.id
                    && m.external_item_id == link.external_item_id
                    && m.external_variant_id == link.external_variant_id
            })
            .map(|m| m.id);
        let mapping = ExternalItemMapping {
            id: existing.unwrap_or_else(Uuid::new_v4),
            item_id: link.item_id,
            account_id: account.id,
            marketplace: account.marketplace,
            external_item_id: link.external_item_id,
            external_variant_id: link.external_variant_id,
            inventory_item_id: link.inventory_item_id,
            sku: link.sku,
            active: link.active,
            raw: link.raw,
            synced_at: Utc::now(),
        };
        guard.item_mappings.insert(mapping.id, mapping.clone());
        mapping
    }

    /// Resolves a marketplace listing id against the account's mappings:
    /// variant id first, then Shopify inventory item id, then a product-level
    /// mapping.
    pub async fn find_item_mapping(
        &self,
        account_id: Uuid,
        external_id: &str,
    ) -> Option<ExternalItemMapping> {
        let guard = self.inner.lock().await;
        let for_account = || guard.item_mappings.values().filter(|m| m.account_id == account_id);
        for_account()
            .find(|m| m.external_variant_id.as_deref() == Some(external_id))
            .or_else(|| for_account().find(|m| m.inventory_item_id.as_deref() == Some(external_id)))
            .or_else(|| {
                for_account().find(|m| {
                    m.external_variant_id.is_none() && m.external_item_id == external_id
                })
            })
            .cloned()
    }

    pub async fn touch_item_mapping(&self, id: Uuid) {
        if let Some(mapping) = self.inner.lock().await.item_mappings.get_mut(&id) {
            mapping.synced_at = Utc::now();
        }
    }

    pub async fn item_mappings_for_account(&self, account_id: Uuid) -> Vec<ExternalItemMapping> {
        self.inner
            .lock()
            .await
            .item_mappings
            .values()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect()
    }

    // ---- customers ----

    /// Returns the seller's oldest customer sharing the email or phone, else
    /// the customer already mapped to `(account, external_id)`, else a new one.
    pub async fn resolve_customer(
        &self,
        seller_id: Uuid,
        account_id: Uuid,
        external_id: Option<&str>,
        candidate: CustomerCandidate,
    ) -> Uuid {
        let mut guard = self.inner.lock().await;
        let tables = &mut *guard;
        let now = Utc::now();

        let by_contact = tables
            .customers
            .values()
            .filter(|c| c.seller_id == seller_id)
            .filter(|c| {
                (candidate.email.is_some() && c.email == candidate.email)
                    || (candidate.phone.is_some() && c.phone == candidate.phone)
            })
            .min_by_key(|c| c.created_at)
            .map(|c| c.id);

        let matched = by_contact.or_else(|| {
            external_id.and_then(|ext| {
                tables
                    .customer_mappings
                    .values()
                    .find(|m| m.account_id == account_id && m.external_id == ext)
                    .map(|m| m.customer_id)
                    .filter(|id| tables.customers.contains_key(id))
            })
        });

        if let Some(id) = matched {
            if let (Some(address), Some(customer)) = (candidate.address, tables.customers.get_mut(&id))
                && !customer.addresses.contains(&address)
            {
                customer.addresses.push(address);
                customer.updated_at = now;
            }
            return id;
        }

        let customer = CanonicalCustomer {
            id: Uuid::new_v4(),
            seller_id,
            email: candidate.email,
            phone: candidate.phone,
            first_name: candidate.first_name,
            last_name: candidate.last_name,
            addresses: candidate.address.into_iter().collect(),
            created_at: now,
            updated_at: now,
        };
        let id = customer.id;
        tables.customers.insert(id, customer);
        id
    }

    pub async fn upsert_customer_mapping(
        &self,
        account: &ChannelAccount,
        customer_id: Uuid,
        external_id: &str,
        raw: Value,
    ) -> ExternalCustomerMapping {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .customer_mappings
            .values()
            .find(|m| m.account_id == account.id && m.external_id == external_id)
            .map(|m| m.id);
        let mapping = ExternalCustomerMapping {
            id: existing.unwrap_or_else(Uuid::new_v4),
            customer_id,
            account_id: account.id,
            marketplace: account.marketplace,
            external_id: external_id.to_string(),
            raw,
            synced_at: Utc::now(),
        };
        guard.customer_mappings.insert(mapping.id, mapping.clone());
        mapping
    }

    pub async fn customers_for_seller(&self, seller_id: Uuid) -> Vec<CanonicalCustomer> {
        self.inner
            .lock()
            .await
            .customers
            .values()
            .filter(|c| c.seller_id == seller_id)
            .cloned()
            .collect()
    }

    // ---- orders ----

    /// Full replace on `(account_id, external_order_id)`; only the id survives.
    pub async fn upsert_order(&self, mut order: CanonicalOrder) -> CanonicalOrder {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.orders.values().find(|o| {
            o.account_id == order.account_id && o.external_order_id == order.external_order_id
        }) {
            order.id = existing.id;
        }
        guard.orders.insert(order.id, order.clone());
        order
    }

    pub async fn get_order(&self, id: Uuid) -> Option<CanonicalOrder> {
        self.inner.lock().await.orders.get(&id).cloned()
    }

    pub async fn orders_for_account(&self, account_id: Uuid) -> Vec<CanonicalOrder> {
        self.inner
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Upserts on `(order_id, external_line_id)`. Lines without an external id
    /// cannot be matched and are always appended.
    pub async fn upsert_order_line(&self, mut line: CanonicalOrderLine) -> CanonicalOrderLine {
        let mut guard = self.inner.lock().await;
        let slot = line.external_line_id.as_ref().and_then(|ext| {
            guard.order_lines.iter().position(|l| {
                l.order_id == line.order_id && l.external_line_id.as_ref() == Some(ext)
            })
        });
        match slot {
            Some(index) => {
                line.id = guard.order_lines[index].id;
                guard.order_lines[index] = line.clone();
            }
            None => guard.order_lines.push(line.clone()),
        }
        line
    }

    pub async fn lines_for_order(&self, order_id: Uuid) -> Vec<CanonicalOrderLine> {
        self.inner
            .lock()
            .await
            .order_lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect()
    }

    // ---- inventory ----

    /// Upserts on `(item_id, account_id, location_id)`.
    pub async fn upsert_inventory(
        &self,
        item_id: Uuid,
        account_id: Uuid,
        location_id: Option<String>,
        available: i64,
    ) -> InventoryLevel {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .inventory
            .values()
            .find(|l| l.item_id == item_id && l.account_id == account_id && l.location_id == location_id)
            .map(|l| l.id);
        let level = InventoryLevel {
            id: existing.unwrap_or_else(Uuid::new_v4),
            item_id,
            account_id,
            location_id,
            available,
            updated_at: Utc::now(),
        };
        guard.inventory.insert(level.id, level.clone());
        level
    }

    pub async fn inventory_for_account(&self, account_id: Uuid) -> Vec<InventoryLevel> {
        self.inner
            .lock()
            .await
            .inventory
            .values()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect()
    }

    // ---- labels ----

    /// Upserts on `(account_id, shipment_id)`.
    pub async fn upsert_label(&self, mut label: ShippingLabel) -> ShippingLabel {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard
            .labels
            .values()
            .find(|l| l.account_id == label.account_id && l.shipment_id == label.shipment_id)
        {
            label.id = existing.id;
            label.order_id = label.order_id.or(existing.order_id);
        }
        guard.labels.insert(label.id, label.clone());
        label
    }

    pub async fn has_label_for_order(&self, order_id: Uuid) -> bool {
        self.inner
            .lock()
            .await
            .labels
            .values()
            .any(|l| l.order_id == Some(order_id))
    }

    // ---- audit ----

    /// Full replace on `(seller_id, order_external_id, sku)`.
    pub async fn upsert_audit_line(&self, mut line: AuditOrderLine) -> AuditOrderLine {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.audit_lines.values().find(|a| {
            a.seller_id == line.seller_id
                && a.order_external_id == line.order_external_id
                && a.sku == line.sku
        }) {
            line.id = existing.id;
        }
        guard.audit_lines.insert(line.id, line.clone());
        line
    }

    pub async fn audit_lines_for_order(&self, order_id: Uuid) -> Vec<AuditOrderLine> {
        self.inner
            .lock()
            .await
            .audit_lines
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect()
    }

    // ---- quotes ----

    /// Most recently updated unexpired quote whose band lies in `[low, high]`.
    pub async fn find_quote(
        &self,
        city_lower: &str,
        state_lower: &str,
        item_count: u32,
        band_low: f64,
        band_high: f64,
        now: DateTime<Utc>,
    ) -> Option<RateShoppingQuote> {
        const EPSILON: f64 = 1e-9;
        self.inner
            .lock()
            .await
            .quotes
            .values()
            .filter(|q| {
                q.city_lower == city_lower
                    && q.state_lower == state_lower
                    && q.item_count == item_count
                    && q.weight_band >= band_low - EPSILON
                    && q.weight_band <= band_high + EPSILON
                    && q.expires_at.is_none_or(|exp| exp > now)
            })
            .max_by_key(|q| q.updated_at)
            .cloned()
    }

    /// Upserts on `(city_lower, state_lower, weight_band, item_count)`.
    pub async fn upsert_quote(&self, mut quote: RateShoppingQuote) -> RateShoppingQuote {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.quotes.values().find(|q| {
            q.city_lower == quote.city_lower
                && q.state_lower == quote.state_lower
                && q.weight_band == quote.weight_band
                && q.item_count == quote.item_count
        }) {
            quote.id = existing.id;
        }
        guard.quotes.insert(quote.id, quote.clone());
        quote
    }

    pub async fn quote_count(&self) -> usize {
        self.inner.lock().await.quotes.len()
    }

    // ---- inbound shipments ----

    /// Upserts on `(account_id, shipment_id)`. Labels fetched earlier survive.
    pub async fn upsert_inbound_shipment(&self, mut shipment: InboundShipment) -> InboundShipment {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.inbound_shipments.values().find(|s| {
            s.account_id == shipment.account_id && s.shipment_id == shipment.shipment_id
        }) {
            shipment.id = existing.id;
            shipment.created_at = existing.created_at;
            shipment.labels = shipment.labels.or_else(|| existing.labels.clone());
        }
        shipment.updated_at = Utc::now();
        guard.inbound_shipments.insert(shipment.id, shipment.clone());
        shipment
    }

    /// Attaches label details to a known shipment; `None` when the shipment was
    /// never created through this service.
    pub async fn record_inbound_labels(
        &self,
        account_id: Uuid,
        shipment_id: &str,
        labels: InboundLabels,
    ) -> Option<InboundShipment> {
        let mut guard = self.inner.lock().await;
        let shipment = guard
            .inbound_shipments
            .values_mut()
            .find(|s| s.account_id == account_id && s.shipment_id == shipment_id)?;
        shipment.labels = Some(labels);
        shipment.updated_at = Utc::now();
        Some(shipment.clone())
    }

    pub async fn get_inbound_shipment(
        &self,
        account_id: Uuid,
        shipment_id: &str,
    ) -> Option<InboundShipment> {
        self.inner
            .lock()
            .await
            .inbound_shipments
            .values()
            .find(|s| s.account_id == account_id && s.shipment_id == shipment_id)
            .cloned()
    }

    // ---- deletion requests ----

    pub async fn deletion_requests(&self) -> Vec<DeletionRequest> {
        self.inner.lock().await.deletion_requests.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IngestSource;
    use serde_json::json;

    fn order(account_id: Uuid, external: &str, status: &str) -> CanonicalOrder {
        CanonicalOrder {
            id: Uuid::new_v4(),
            seller_id: Uuid::nil(),
            account_id,
            marketplace: Marketplace::Shopify,
            marketplace_id: None,
            fulfillment_channel: None,
            source: IngestSource::Poll,
            external_order_id: external.to_string(),
            status: status.to_string(),
            currency: None,
            totals: Default::default(),
            customer_id: None,
            placed_at: None,
            closed_at: None,
            raw: json!({}),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn account_upsert_keeps_identity() {
        let store = Store::new();
        let seller = Uuid::new_v4();
        let mut first = ChannelAccount::new(seller, Marketplace::Shopify, Some("a.myshopify.com".into()));
        first.access_token = Some("one".into());
        let first = store.upsert_account(first).await;

        let mut second = ChannelAccount::new(seller, Marketplace::Shopify, Some("a.myshopify.com".into()));
        second.access_token = Some("two".into());
        let second = store.upsert_account(second).await;

        assert_eq!(first.id, second.id);
        let stored = store.get_account(first.id).await.unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn token_update_keeps_refresh_token_when_absent() {
        let store = Store::new();
        let mut account = ChannelAccount::new(Uuid::new_v4(), Marketplace::Ebay, Some("s".into()));
        account.refresh_token = Some("R1".into());
        let account = store.upsert_account(account).await;

        let updated = store
            .apply_token_update(
                account.id,
                TokenUpdate {
                    access_token: "A2".into(),
                    access_token_expires_at: None,
                    refresh_token: None,
                    refresh_token_expires_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.access_token.as_deref(), Some("A2"));
        assert_eq!(updated.refresh_token.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn order_upsert_replaces_on_natural_key() {
        let store = Store::new();
        let account = Uuid::new_v4();
        let a = store.upsert_order(order(account, "1001", "open")).await;
        let b = store.upsert_order(order(account, "1001", "paid")).await;
        assert_eq!(a.id, b.id);
        let all = store.orders_for_account(account).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, "paid");
    }

    #[tokio::test]
    async fn customers_match_on_email_or_phone() {
        let store = Store::new();
        let seller = Uuid::new_v4();
        let account = Uuid::new_v4();
        let first = store
            .resolve_customer(
                seller,
                account,
                None,
                CustomerCandidate {
                    email: Some("a@example.com".into()),
                    ..Default::default()
                },
            )
            .await;
        let by_email = store
            .resolve_customer(
                seller,
                account,
                None,
                CustomerCandidate {
                    email: Some("a@example.com".into()),
                    phone: Some("555".into()),
                    ..Default::default()
                },
            )
            .await;
        let other = store
            .resolve_customer(
                seller,
                account,
                None,
                CustomerCandidate {
                    email: Some("b@example.com".into()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(first, by_email);
        assert_ne!(first, other);
        assert_eq!(store.customers_for_seller(seller).await.len(), 2);
    }

    #[tokio::test]
    async fn contact_match_wins_over_external_mapping() {
        let store = Store::new();
        let seller = Uuid::new_v4();
        let account = ChannelAccount::new(seller, Marketplace::Shopify, Some("a.myshopify.com".into()));
        let account = store.upsert_account(account).await;
        let email = |e: &str| CustomerCandidate {
            email: Some(e.into()),
            ..Default::default()
        };

        let mapped = store.resolve_customer(seller, account.id, Some("c1"), email("a@example.com")).await;
        store.upsert_customer_mapping(&account, mapped, "c1", json!({})).await;
        let by_email = store.resolve_customer(seller, account.id, None, email("b@example.com")).await;

        let resolved = store
            .resolve_customer(seller, account.id, Some("c1"), email("b@example.com"))
            .await;
        assert_eq!(resolved, by_email);

        let no_contact = store
            .resolve_customer(seller, account.id, Some("c1"), CustomerCandidate::default())
            .await;
        assert_eq!(no_contact, mapped);
    }

    #[tokio::test]
    async fn shared_identity_resolves_to_latest_active_account() {
        let store = Store::new();
        let first = store
            .upsert_account(ChannelAccount::new(Uuid::new_v4(), Marketplace::Ebay, Some("shared".into())))
            .await;
        let second = store
            .upsert_account(ChannelAccount::new(Uuid::new_v4(), Marketplace::Ebay, Some("shared".into())))
            .await;
        assert_eq!(store.find_account(Marketplace::Ebay, "shared").await.unwrap().id, second.id);

        store.set_account_status(second.id, AccountStatus::Inactive).await.unwrap();
        assert_eq!(store.find_account(Marketplace::Ebay, "shared").await.unwrap().id, first.id);
        assert!(store.find_account(Marketplace::Shopify, "shared").await.is_none());
    }

    #[tokio::test]
    async fn delete_account_is_scoped_to_its_seller() {
        let store = Store::new();
        let seller = Uuid::new_v4();
        let account = store
            .upsert_account(ChannelAccount::new(seller, Marketplace::Amazon, Some("A1SELLER".into())))
            .await;
        assert_eq!(
            store.find_account_for_seller(seller, Marketplace::Amazon).await.unwrap().id,
            account.id
        );

        let err = store.delete_account(account.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(store.get_account(account.id).await.is_some());

        assert!(store.delete_account(account.id, seller).await.unwrap());
        assert!(store.get_account(account.id).await.is_none());
        assert!(store.find_account_for_seller(seller, Marketplace::Amazon).await.is_none());
        assert!(!store.delete_account(account.id, seller).await.unwrap());
    }
}
