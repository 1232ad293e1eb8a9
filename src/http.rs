use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("channel-sync/", env!("CARGO_PKG_VERSION"));

pub fn build_client() -> Client {
    let timeout = secs_from_env("HTTP_TIMEOUT_SECS", 15);
    let connect = secs_from_env("HTTP_CONNECT_TIMEOUT_SECS", 5);
    client_with_timeouts(Duration::from_secs(timeout), Duration::from_secs(connect))
}

pub fn client_with_timeouts(timeout: Duration, connect: Duration) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(connect)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
