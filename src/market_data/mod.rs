//! Market data: the shared chain cache, the background fetcher and the quote
//! sources that feed it (synthetic and HTTP snapshot)

mod cache;
mod fetcher;
mod synthetic;

pub use cache::{CachedChain, MarketDataCache};
pub use fetcher::BackgroundFetcher;
pub use synthetic::SyntheticMarket;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::types::StrikeQuote;

/// One pull from a quote source
#[derive(Debug, Clone, Deserialize)]
pub struct ChainFetch {
    pub spot: f64,
    pub chain: Vec<StrikeQuote>,
}

/// Trait for option-chain sources
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Get the source name
    fn name(&self) -> &'static str;

    /// Pull the full chain and spot for an instrument
    async fn fetch(&self, instrument: &str) -> Result<ChainFetch>;
}

/// Pulls `{spot, chain}` JSON snapshots from an HTTP endpoint
pub struct HttpQuoteSource {
    client: reqwest::Client,
    url: String,
}

impl HttpQuoteSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, instrument: &str) -> Result<ChainFetch> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("index", instrument)])
            .send()
            .await
            .context("Failed to fetch option chain")?;

        if !response.status().is_success() {
            bail!("Option chain endpoint returned {}", response.status());
        }

        let snapshot: ChainFetch = response
            .json()
            .await
            .context("Failed to parse option chain response")?;

        Ok(snapshot)
    }
}
