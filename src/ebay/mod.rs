pub mod auth;
pub mod client;
pub mod payload;

use crate::normalize::WebhookKind;

/// eBay notifications are forwarded by topic family rather than by the
/// Platform Notifications event name.
pub fn webhook_kind(topic: &str) -> Option<WebhookKind> {
    match topic.trim().to_ascii_lowercase().as_str() {
        "order" | "orders" => Some(WebhookKind::Order),
        "inventory" | "inventory_item" => Some(WebhookKind::Inventory),
        _ => None,
    }
}
