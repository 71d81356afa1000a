//! Shared HTTP Client Module
//!
//! Provides a global, lazy-initialized HTTP client with connection pooling,
//! so every generator call reuses TLS sessions and TCP connections.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Global HTTP client for Gemini API calls
///
/// - 60s timeout; summaries and enrichment replies are short
/// - 10 idle connections per host for parallel enrichment batches
/// - 90s idle timeout to balance resource usage and performance
pub static GEMINI_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
        // Builder only fails when the TLS backend cannot initialize
        .unwrap_or_else(|_| Client::new())
});

/// Get the global Gemini HTTP client
#[inline]
pub fn gemini_client() -> &'static Client {
    &GEMINI_CLIENT
}
