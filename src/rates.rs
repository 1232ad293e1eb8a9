//! Cached shipping-rate quotes keyed by destination, weight band and item count.

use crate::{
    config::{AppConfig, RateShoppingConfig, ShippoConfig},
    error::SyncError,
    metrics,
    models::RateShoppingQuote,
    normalize::parse_money,
    store::Store,
};
use chrono::{Duration, Utc};
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use tracing::{debug, info};
use uuid::Uuid;

pub const WEIGHT_STEP_LBS: f64 = 0.25;
pub const WEIGHT_TOLERANCE_LBS: f64 = 0.25;
const DEFAULT_CURRENCY: &str = "USD";

/// Rounds to the nearest 0.25 lb. Non-finite weights band to zero.
pub fn weight_band(weight_lbs: f64) -> f64 {
    if !weight_lbs.is_finite() {
        return 0.0;
    }
    (weight_lbs / WEIGHT_STEP_LBS).round() * WEIGHT_STEP_LBS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub city: String,
    pub state: String,
    pub zip: Option<String>,
    pub weight_lbs: f64,
    pub item_count: u32,
}

impl QuoteRequest {
    fn key(&self) -> (String, String, f64) {
        (
            self.city.trim().to_lowercase(),
            self.state.trim().to_lowercase(),
            weight_band(self.weight_lbs),
        )
    }
}

/// What a provider returns for a cold key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedQuote {
    pub amount: Decimal,
    pub currency: Option<String>,
    pub provider: Option<String>,
    pub raw: Value,
}

#[derive(Clone)]
pub struct QuoteCache {
    store: Store,
    ttl: Duration,
}

impl QuoteCache {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    async fn lookup(&self, request: &QuoteRequest) -> Option<RateShoppingQuote> {
        let (city, state, band) = request.key();
        let hit = self
            .store
            .find_quote(
                &city,
                &state,
                request.item_count,
                band - WEIGHT_TOLERANCE_LBS,
                band + WEIGHT_TOLERANCE_LBS,
                Utc::now(),
            )
            .await;
        metrics::quote_lookup(hit.is_some());
        hit
    }

    /// Cached quote within tolerance, or `NoCachedQuote`. Never calls a provider.
    pub async fn cached_only(&self, request: &QuoteRequest) -> Result<RateShoppingQuote, SyncError> {
        self.lookup(request).await.ok_or(SyncError::NoCachedQuote)
    }

    /// Returns a cached quote within tolerance, otherwise calls `fetch` once
    /// and stores its result under the quantized band. Concurrent misses for
    /// the same key may each fetch; the last write wins.
    pub async fn get_or_create<F, Fut>(
        &self,
        request: &QuoteRequest,
        fetch: F,
    ) -> Result<RateShoppingQuote, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedQuote, SyncError>>,
    {
        if let Some(hit) = self.lookup(request).await {
            debug!(
                target: "channel_sync.rates",
                band = hit.weight_band,
                item_count = hit.item_count,
                "quote cache hit"
            );
            return Ok(hit);
        }

        let fetched = fetch().await?;
        let (city_lower, state_lower, weight_band) = request.key();
        let now = Utc::now();
        let quote = self
            .store
            .upsert_quote(RateShoppingQuote {
                id: Uuid::new_v4(),
                city_lower,
                state_lower,
                weight_band,
                item_count: request.item_count,
                amount: fetched.amount,
                currency: fetched
                    .currency
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                provider: fetched.provider,
                raw: fetched.raw,
                expires_at: Some(now + self.ttl),
                updated_at: now,
            })
            .await;
        info!(
            target: "channel_sync.rates",
            band = quote.weight_band,
            item_count = quote.item_count,
            provider = ?quote.provider,
            "quote cached"
        );
        Ok(quote)
    }
}

/// `5 + 0.5 per lb + 0.2 per item`, at least one item, rounded to cents.
pub fn synthetic_quote(weight_lbs: f64, item_count: u32, provider: &str) -> FetchedQuote {
    let weight = Decimal::try_from(weight_lbs.max(0.0)).unwrap_or(Decimal::ZERO);
    let items = Decimal::from(item_count.max(1));
    let amount = Decimal::from(5) + Decimal::new(5, 1) * weight + Decimal::new(2, 1) * items;
    FetchedQuote {
        amount: amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        currency: Some(DEFAULT_CURRENCY.to_string()),
        provider: Some(provider.to_string()),
        raw: json!({ "synthetic": true }),
    }
}

/// Generic rate-shopping endpoint: `POST {url}` with the request as JSON,
/// answering `{amount | rate, currency?, provider?}`.
#[derive(Clone)]
pub struct RateApiProvider {
    client: Client,
    config: RateShoppingConfig,
}

impl RateApiProvider {
    pub fn new(client: Client, config: RateShoppingConfig) -> Self {
        Self { client, config }
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<FetchedQuote, SyncError> {
        let url = self
            .config
            .api_url
            .as_deref()
            .ok_or_else(|| SyncError::Configuration("RATE_SHOPPING_API_URL not configured".into()))?;
        let mut call = self.client.post(url).json(&json!({
            "city": request.city,
            "state": request.state,
            "zip": request.zip,
            "weightLbs": request.weight_lbs,
            "itemCount": request.item_count,
            "currency": DEFAULT_CURRENCY,
        }));
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }
        let response = call.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::QuoteProvider(format!(
                "rate api returned HTTP {}: {text}",
                status.as_u16()
            )));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|err| SyncError::QuoteProvider(format!("rate api body: {err}")))?;
        let amount = body
            .get("amount")
            .or_else(|| body.get("rate"))
            .and_then(parse_money)
            .ok_or_else(|| SyncError::QuoteProvider("rate api response missing amount".into()))?;
        Ok(FetchedQuote {
            amount,
            currency: body.get("currency").and_then(Value::as_str).map(str::to_string),
            provider: body.get("provider").and_then(Value::as_str).map(str::to_string),
            raw: body,
        })
    }
}

/// Shippo shipment quote from the configured origin. Shippo insists on a
/// street, so destinations carry a placeholder one; the cheapest rate wins.
#[derive(Clone)]
pub struct ShippoProvider {
    client: Client,
    config: ShippoConfig,
}

impl ShippoProvider {
    pub fn new(client: Client, config: ShippoConfig) -> Self {
        Self { client, config }
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<FetchedQuote, SyncError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| SyncError::Configuration("SHIPPO_API_KEY not configured".into()))?;
        if self.config.mock_mode {
            return Ok(synthetic_quote(
                request.weight_lbs,
                request.item_count,
                "mock-shippo",
            ));
        }

        let body = json!({
            "address_from": {
                "street1": "Approximate address",
                "city": self.config.from_city,
                "state": self.config.from_state,
                "zip": self.config.from_postal,
                "country": self.config.from_country,
            },
            "address_to": {
                "street1": "Approximate address",
                "city": request.city,
                "state": request.state,
                "zip": request.zip,
                "country": "US",
            },
            "parcels": [{
                "weight": request.weight_lbs.max(0.1),
                "mass_unit": "lb",
                "length": 10, "width": 8, "height": 4, "distance_unit": "in",
            }],
            "async": false,
        });
        let response = self
            .client
            .post(format!("{}/shipments", self.config.api_base.trim_end_matches('/')))
            .header("authorization", format!("ShippoToken {key}"))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::QuoteProvider(format!(
                "shippo returned HTTP {}: {text}",
                status.as_u16()
            )));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|err| SyncError::QuoteProvider(format!("shippo body: {err}")))?;

        let cheapest = body
            .get("rates")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|rate| {
                let amount = rate.get("amount").and_then(parse_money)?;
                Some((amount, rate))
            })
            .min_by(|a, b| a.0.cmp(&b.0));
        let Some((amount, rate)) = cheapest else {
            return Err(SyncError::QuoteProvider("shippo returned no usable rates".into()));
        };
        Ok(FetchedQuote {
            amount,
            currency: rate.get("currency").and_then(Value::as_str).map(str::to_string),
            provider: rate.get("provider").and_then(Value::as_str).map(str::to_string),
            raw: body.clone(),
        })
    }
}

/// Provider chosen from configuration: the rate API when a URL is set, then
/// Shippo when a key is set, otherwise the synthetic formula.
#[derive(Clone)]
pub enum QuoteProvider {
    Api(RateApiProvider),
    Shippo(ShippoProvider),
    Synthetic,
}

impl QuoteProvider {
    pub fn from_config(config: &AppConfig, client: Client) -> Self {
        if config.rate_shopping.api_url.is_some() {
            Self::Api(RateApiProvider::new(client, config.rate_shopping.clone()))
        } else if config.shippo.api_key.is_some() {
            Self::Shippo(ShippoProvider::new(client, config.shippo.clone()))
        } else {
            Self::Synthetic
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Api(_) => "rate_api",
            Self::Shippo(_) => "shippo",
            Self::Synthetic => "synthetic",
        }
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<FetchedQuote, SyncError> {
        match self {
            Self::Api(provider) => provider.quote(request).await,
            Self::Shippo(provider) => provider.quote(request).await,
            Self::Synthetic => Ok(synthetic_quote(
                request.weight_lbs,
                request.item_count,
                "synthetic",
            )),
        }
    }
}
