//! Background polling. One loop per channel family wakes on the family's
//! tick and refreshes every active account whose last sync is older than the
//! family's cadence.

use crate::{models::Marketplace, sync::SyncService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::{
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ChannelFamily {
    pub name: &'static str,
    pub marketplaces: &'static [Marketplace],
    pub tick: Duration,
    pub cadence: Duration,
}

pub const STOREFRONT_FAMILY: ChannelFamily = ChannelFamily {
    name: "storefront",
    marketplaces: &[Marketplace::Shopify, Marketplace::Ebay],
    tick: Duration::from_secs(5 * 60),
    cadence: Duration::from_secs(30 * 60),
};

pub const AMAZON_FAMILY: ChannelFamily = ChannelFamily {
    name: "amazon",
    marketplaces: &[Marketplace::Amazon],
    tick: Duration::from_secs(10 * 60),
    cadence: Duration::from_secs(60 * 60),
};

pub const FAMILIES: [ChannelFamily; 2] = [STOREFRONT_FAMILY, AMAZON_FAMILY];

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TickSummary {
    pub dispatched: usize,
    pub not_due: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// `true` when the account has never synced or its last sync is at least
/// `cadence` old.
pub fn is_due(last_synced_at: Option<DateTime<Utc>>, now: DateTime<Utc>, cadence: Duration) -> bool {
    match last_synced_at {
        None => true,
        Some(at) => (now - at).to_std().is_ok_and(|elapsed| elapsed >= cadence),
    }
}

pub struct Scheduler {
    sync: SyncService,
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler with no loops running; ticks are driven by the caller.
    pub fn new(sync: SyncService) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sync,
            shutdown,
            loops: Vec::new(),
        }
    }

    /// Starts one polling loop per channel family.
    pub fn spawn(sync: SyncService) -> Self {
        let mut scheduler = Self::new(sync);
        for family in FAMILIES {
            let sync = scheduler.sync.clone();
            let mut stop = scheduler.shutdown.subscribe();
            scheduler.loops.push(tokio::spawn(async move {
                let mut ticker = interval(family.tick);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(
                    target: "channel_sync.scheduler",
                    family = family.name,
                    tick_secs = family.tick.as_secs(),
                    cadence_secs = family.cadence.as_secs(),
                    "polling loop started"
                );
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            run_tick(&sync, &family, Utc::now()).await;
                        }
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                    }
                }
                info!(target: "channel_sync.scheduler", family = family.name, "polling loop stopped");
            }));
        }
        scheduler
    }

    /// Runs one pass over `family`. Refresh failures are logged and counted,
    /// never returned.
    pub async fn tick(&self, family: &ChannelFamily, now: DateTime<Utc>) -> TickSummary {
        run_tick(&self.sync, family, now).await
    }

    /// Stops the loops. A pass already in flight finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.loops {
            if let Err(err) = handle.await {
                warn!(target: "channel_sync.scheduler", error = %err, "polling loop ended abnormally");
            }
        }
    }
}

async fn run_tick(sync: &SyncService, family: &ChannelFamily, now: DateTime<Utc>) -> TickSummary {
    let mut summary = TickSummary::default();
    let accounts = sync.store().active_accounts(family.marketplaces).await;

    let mut refreshes = JoinSet::new();
    for account in accounts {
        if !is_due(account.last_synced_at, now, family.cadence) {
            summary.not_due += 1;
            continue;
        }
        summary.dispatched += 1;
        let sync = sync.clone();
        refreshes.spawn(async move {
            let result = sync.refresh_account(account.id).await;
            (account, result)
        });
    }

    while let Some(joined) = refreshes.join_next().await {
        match joined {
            Ok((_, Ok(_))) => summary.succeeded += 1,
            Ok((account, Err(err))) => {
                summary.failed += 1;
                error!(
                    target: "channel_sync.scheduler",
                    account_id = %account.id,
                    marketplace = %account.marketplace,
                    kind = ?err.kind(),
                    error = %err,
                    "scheduled refresh failed"
                );
            }
            Err(err) => {
                summary.failed += 1;
                error!(target: "channel_sync.scheduler", error = %err, "refresh task panicked");
            }
        }
    }

    debug!(
        target: "channel_sync.scheduler",
        family = family.name,
        dispatched = summary.dispatched,
        not_due = summary.not_due,
        failed = summary.failed,
        "tick complete"
    );
    summary
}
