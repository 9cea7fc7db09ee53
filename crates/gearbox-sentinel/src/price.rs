//! Batched USD prices from the DefiLlama coins API.

use crate::config::HttpConfig;
use crate::http;
use crate::valuation::{PriceOracle, PriceTable};
use alloy::primitives::Address;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr as _;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct CoinsResponse {
    #[serde(default)]
    coins: HashMap<String, CoinPrice>,
}

#[derive(Debug, Deserialize)]
struct CoinPrice {
    price: f64,
}

pub struct LlamaPriceOracle {
    client: Client,
    base_url: String,
}

impl LlamaPriceOracle {
    pub fn new(cfg: &HttpConfig) -> eyre::Result<Self> {
        let base_url = cfg.coins_base_url.trim().trim_end_matches('/').to_owned();
        http::ensure_secure_url("coins_base_url", &base_url)?;
        Ok(Self {
            client: http::client(cfg)?,
            base_url,
        })
    }

    /// One URL covering every token: `/prices/current/{chain}:{addr},...`.
    pub fn prices_url(&self, chain: &str, tokens: &[Address]) -> String {
        let coins: Vec<String> = tokens
            .iter()
            .map(|t| format!("{chain}:{t:#x}"))
            .collect();
        format!("{}/prices/current/{}", self.base_url, coins.join(","))
    }
}

/// Keys look like `ethereum:0xabc...`; anything else, and non-finite or
/// negative prices, is dropped.
fn price_table(resp: CoinsResponse) -> PriceTable {
    resp.coins
        .into_iter()
        .filter_map(|(key, coin)| {
            let (_, addr) = key.split_once(':')?;
            let addr = Address::from_str(addr).ok()?;
            (coin.price.is_finite() && coin.price >= 0.0_f64).then_some((addr, coin.price))
        })
        .collect()
}

impl PriceOracle for LlamaPriceOracle {
    async fn prices(&self, chain: &str, tokens: &[Address]) -> eyre::Result<PriceTable> {
        let url = self.prices_url(chain, tokens);
        let resp: CoinsResponse = http::get_json(&self.client, &url, "coins prices").await?;
        let table = price_table(resp);
        debug!(chain, requested = tokens.len(), priced = table.len(), "fetched prices");
        Ok(table)
    }
}
