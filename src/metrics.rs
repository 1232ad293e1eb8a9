use crate::models::Marketplace;
use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

// Each helper emits a trace event and updates the installed `metrics`
// recorder. Without a recorder the facade calls are no-ops.

pub fn inc_requests(route: &'static str) {
    trace!(target: "channel_sync.metrics", route, "requests_total_inc");
    counter!("channel_sync_requests_total", "route" => route).increment(1);
}

pub fn provider_response(marketplace: Marketplace, status: u16) {
    trace!(
        target: "channel_sync.metrics",
        marketplace = marketplace.as_str(),
        status,
        "provider_response"
    );
    counter!(
        "channel_sync_provider_responses_total",
        "marketplace" => marketplace.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn provider_retry(marketplace: Marketplace) {
    counter!("channel_sync_provider_retries_total", "marketplace" => marketplace.as_str())
        .increment(1);
}

pub fn token_refreshed(marketplace: Marketplace) {
    counter!("channel_sync_token_refreshes_total", "marketplace" => marketplace.as_str())
        .increment(1);
}

pub fn records_applied(kind: &'static str, count: usize) {
    counter!("channel_sync_records_applied_total", "kind" => kind).increment(count as u64);
}

pub fn quote_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("channel_sync_quote_lookups_total", "outcome" => outcome).increment(1);
}

pub fn stage_elapsed(stage: &'static str, elapsed: Duration) {
    trace!(
        target: "channel_sync.metrics",
        stage,
        elapsed_ms = elapsed.as_millis() as u64,
        "stage_elapsed"
    );
    histogram!("channel_sync_stage_seconds", "stage" => stage).record(elapsed.as_secs_f64());
}
