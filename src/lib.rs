pub mod amazon;
pub mod config;
pub mod credentials;
pub mod ebay;
pub mod erasure;
pub mod error;
pub mod executor;
pub mod http;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod oauth_state;
pub mod pipeline;
pub mod rates;
pub mod scheduler;
pub mod shopify;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;
