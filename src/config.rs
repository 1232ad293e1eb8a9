use chrono::Duration;
use std::env;

const DEFAULT_EBAY_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment",
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
];

const DEFAULT_SHOPIFY_SCOPES: &str =
    "read_products,read_orders,read_customers,read_inventory,write_inventory,write_fulfillments";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub app_base_url: String,
    pub redis_url: Option<String>,
    pub scheduler_enabled: bool,
    pub ingest_queue_capacity: usize,
    pub shopify: ShopifyConfig,
    pub ebay: EbayConfig,
    pub amazon: AmazonConfig,
    pub rate_shopping: RateShoppingConfig,
    pub shippo: ShippoConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT").unwrap_or(8000),
            app_base_url: env_or("APP_BASE_URL", "").trim_end_matches('/').to_string(),
            redis_url: env_opt("REDIS_URL"),
            scheduler_enabled: env_opt("SCHEDULER_ENABLED")
                .map(|value| parse_bool(&value))
                .unwrap_or(true),
            ingest_queue_capacity: env_parse::<usize>("INGEST_QUEUE_CAPACITY")
                .filter(|v| *v > 0)
                .unwrap_or(64),
            shopify: ShopifyConfig::from_env(),
            ebay: EbayConfig::from_env(),
            amazon: AmazonConfig::from_env(),
            rate_shopping: RateShoppingConfig::from_env(),
            shippo: ShippoConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_version: String,
    pub scopes: String,
    /// Key Shopify signs webhook deliveries with (`X-Shopify-Hmac-Sha256`).
    pub webhook_secret: Option<String>,
    /// Replaces `https://{shop}` when set; used against sandboxes and local fakes.
    pub base_url_override: Option<String>,
}

impl ShopifyConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: env_or("SHOPIFY_CLIENT_ID", ""),
            client_secret: env_or("SHOPIFY_CLIENT_SECRET", ""),
            api_version: env_or("SHOPIFY_API_VERSION", "2024-01"),
            scopes: env_or("SHOPIFY_SCOPES", DEFAULT_SHOPIFY_SCOPES),
            webhook_secret: env_opt("SHOPIFY_WEBHOOK_SECRET"),
            base_url_override: env_opt("SHOPIFY_API_BASE_URL"),
        }
    }

    pub fn shop_base(&self, shop_domain: &str) -> String {
        match &self.base_url_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{shop_domain}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub client_id: String,
    pub client_secret: String,
    pub ru_name: String,
    pub scope: String,
    pub marketplace_id: String,
    pub api_base_url: String,
    pub auth_base_url: String,
}

impl EbayConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: env_or("EBAY_CLIENT_ID", ""),
            client_secret: env_or("EBAY_CLIENT_SECRET", ""),
            ru_name: env_or("EBAY_RU_NAME", ""),
            scope: env_opt("EBAY_SCOPE").unwrap_or_else(|| DEFAULT_EBAY_SCOPES.join(" ")),
            marketplace_id: env_or("EBAY_MARKETPLACE_ID", "EBAY_US"),
            api_base_url: env_or("EBAY_API_BASE_URL", "https://api.ebay.com")
                .trim_end_matches('/')
                .to_string(),
            auth_base_url: env_or("EBAY_AUTH_BASE_URL", "https://auth.ebay.com")
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.api_base_url)
    }
}

#[derive(Debug, Clone)]
pub struct AmazonConfig {
    pub app_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_url: String,
    pub region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub aws_session_token: Option<String>,
    /// Replaces the regional SP-API host when set.
    pub endpoint_override: Option<String>,
}

impl AmazonConfig {
    pub fn from_env() -> Self {
        let client_id = env_or("AMAZON_LWA_CLIENT_ID", "");
        let app_base = env_or("APP_BASE_URL", "");
        Self {
            app_id: env_opt("AMAZON_APP_ID").unwrap_or_else(|| client_id.clone()),
            client_id,
            client_secret: env_or("AMAZON_LWA_CLIENT_SECRET", ""),
            redirect_uri: normalize_redirect_uri(
                &env_opt("AMAZON_LWA_REDIRECT_URI")
                    .unwrap_or_else(|| format!("{app_base}/oauth/amazon/callback")),
            ),
            token_url: env_or("AMAZON_LWA_TOKEN_URL", "https://api.amazon.com/auth/o2/token"),
            region: env_or("AMAZON_REGION", "na").to_lowercase(),
            aws_access_key_id: env_or("AMAZON_SPAPI_AWS_ACCESS_KEY_ID", ""),
            aws_secret_access_key: env_or("AMAZON_SPAPI_AWS_SECRET_ACCESS_KEY", ""),
            aws_session_token: env_opt("AMAZON_SPAPI_AWS_SESSION_TOKEN"),
            endpoint_override: env_opt("AMAZON_SPAPI_ENDPOINT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateShoppingConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub ttl: Duration,
}

impl RateShoppingConfig {
    pub fn from_env() -> Self {
        let ttl_secs = env_parse::<i64>("RATE_SHOPPING_TTL_SECS")
            .filter(|v| *v > 0)
            .unwrap_or(7 * 24 * 60 * 60);
        Self {
            api_url: env_opt("RATE_SHOPPING_API_URL"),
            api_key: env_opt("RATE_SHOPPING_API_KEY"),
            ttl: Duration::seconds(ttl_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShippoConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub mock_mode: bool,
    pub from_city: String,
    pub from_state: String,
    pub from_postal: String,
    pub from_country: String,
}

impl ShippoConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_opt("SHIPPO_API_KEY"),
            api_base: env_or("SHIPPO_API_BASE", "https://api.goshippo.com"),
            mock_mode: env_opt("SHIPPO_MOCK_MODE")
                .map(|value| parse_bool(&value))
                .unwrap_or(false),
            from_city: env_or("SHIPPO_FROM_CITY", "Los Angeles"),
            from_state: env_or("SHIPPO_FROM_STATE", "CA"),
            from_postal: env_or("SHIPPO_FROM_POSTAL", "90001"),
            from_country: env_or("SHIPPO_FROM_COUNTRY", "US"),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|value| value.parse::<T>().ok())
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// Some consoles paste redirect URIs with a leading `=`.
fn normalize_redirect_uri(value: &str) -> String {
    value.trim().trim_start_matches('=').to_string()
}
