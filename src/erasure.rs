//! Removal of everything synced for an external identity that asked to be
//! forgotten.

use crate::{
    models::{DeletionRequest, DeletionStatus, Marketplace},
    store::{Store, Tables},
};
use chrono::Utc;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErasureOutcome {
    pub deleted: bool,
    pub counts: Option<BTreeMap<String, u64>>,
    pub reason: Option<String>,
}

/// Deletes every account of `marketplace` whose external id is `external_id`
/// together with its orders, lines, labels, audit rows, inventory and external
/// mappings. Runs under one store lock, so readers never observe a partial
/// erasure. A `DeletionRequest` is appended either way.
pub async fn erase_external_identity(
    store: &Store,
    marketplace: Marketplace,
    external_id: &str,
) -> ErasureOutcome {
    let external_id = external_id.trim().to_string();
    let outcome = store
        .transaction(|tables| {
            let mut request = DeletionRequest {
                id: Uuid::new_v4(),
                provider: marketplace,
                external_id: external_id.clone(),
                status: DeletionStatus::Pending,
                detail: None,
                counts: BTreeMap::new(),
                created_at: Utc::now(),
                completed_at: None,
            };

            let accounts: Vec<Uuid> = tables
                .accounts
                .values()
                .filter(|a| {
                    a.marketplace == marketplace
                        && !external_id.is_empty()
                        && a.external_id.as_deref() == Some(external_id.as_str())
                })
                .map(|a| a.id)
                .collect();

            if accounts.is_empty() {
                request.status = DeletionStatus::NoMatch;
                request.detail = Some("no channel account matches the external id".into());
                request.completed_at = Some(Utc::now());
                tables.deletion_requests.push(request);
                return ErasureOutcome {
                    deleted: false,
                    counts: None,
                    reason: Some("no_match".into()),
                };
            }

            let mut counts = BTreeMap::new();
            for account_id in accounts {
                erase_account(tables, account_id, &mut counts);
            }
            request.status = DeletionStatus::Completed;
            request.counts = counts.clone();
            request.completed_at = Some(Utc::now());
            tables.deletion_requests.push(request);
            ErasureOutcome {
                deleted: true,
                counts: Some(counts),
                reason: None,
            }
        })
        .await;

    match &outcome.counts {
        Some(counts) => info!(
            target: "channel_sync.erasure",
            %marketplace,
            ?counts,
            "external identity erased"
        ),
        None => warn!(
            target: "channel_sync.erasure",
            %marketplace,
            "erasure request matched no account"
        ),
    }
    outcome
}

fn bump(counts: &mut BTreeMap<String, u64>, key: &str, removed: usize) {
    *counts.entry(key.to_string()).or_default() += removed as u64;
}

fn erase_account(tables: &mut Tables, account_id: Uuid, counts: &mut BTreeMap<String, u64>) {
    let order_ids: HashSet<Uuid> = tables
        .orders
        .values()
        .filter(|o| o.account_id == account_id)
        .map(|o| o.id)
        .collect();

    let before = tables.order_lines.len();
    tables.order_lines.retain(|l| !order_ids.contains(&l.order_id));
    bump(counts, "orderLines", before - tables.order_lines.len());

    let before = tables.labels.len();
    tables.labels.retain(|_, l| {
        l.account_id != account_id && !l.order_id.is_some_and(|id| order_ids.contains(&id))
    });
    bump(counts, "labels", before - tables.labels.len());

    let before = tables.audit_lines.len();
    tables.audit_lines.retain(|_, a| a.account_id != account_id);
    bump(counts, "audit", before - tables.audit_lines.len());

    let before = tables.inventory.len();
    tables.inventory.retain(|_, l| l.account_id != account_id);
    bump(counts, "inventory", before - tables.inventory.len());

    let before = tables.inbound_shipments.len();
    tables.inbound_shipments.retain(|_, s| s.account_id != account_id);
    bump(counts, "inboundShipments", before - tables.inbound_shipments.len());

    let before = tables.item_mappings.len();
    tables.item_mappings.retain(|_, m| m.account_id != account_id);
    bump(counts, "items", before - tables.item_mappings.len());

    let before = tables.customer_mappings.len();
    tables.customer_mappings.retain(|_, m| m.account_id != account_id);
    bump(counts, "customers", before - tables.customer_mappings.len());

    let before = tables.orders.len();
    tables.orders.retain(|_, o| o.account_id != account_id);
    bump(counts, "orders", before - tables.orders.len());

    let removed = usize::from(tables.accounts.remove(&account_id).is_some());
    bump(counts, "channelAccounts", removed);
}
