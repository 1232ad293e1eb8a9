pub mod auth;
pub mod client;
pub mod payload;

use crate::normalize::WebhookKind;
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_TOPICS: [&str; 5] = [
    "products/create",
    "products/update",
    "inventory_levels/update",
    "orders/create",
    "orders/updated",
];

/// Maps an `X-Shopify-Topic` value to the record it carries.
pub fn webhook_kind(topic: &str) -> Option<WebhookKind> {
    match topic {
        "products/create" | "products/update" => Some(WebhookKind::Product),
        "inventory_levels/update" => Some(WebhookKind::Inventory),
        "orders/create" | "orders/updated" => Some(WebhookKind::Order),
        _ => None,
    }
}

/// Checks `X-Shopify-Hmac-Sha256`: the base64 HMAC-SHA256 of the raw request
/// body under the app's webhook secret. The digest compare is constant time.
pub fn verify_webhook(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
