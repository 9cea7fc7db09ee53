//! DefiLlama yields and the Gearbox APY feed.

use crate::config::HttpConfig;
use crate::financial_math as fm;
use crate::http;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const GEARBOX_PROJECT: &str = "gearbox";

/// Treat an explicit JSON `null` like a missing field.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct YieldPool {
    #[serde(default, deserialize_with = "null_default")]
    pub pool: String,
    #[serde(default, deserialize_with = "null_default")]
    pub project: String,
    #[serde(default, deserialize_with = "null_default")]
    pub chain: String,
    #[serde(default, deserialize_with = "null_default")]
    pub symbol: String,
    #[serde(rename = "tvlUsd", default, deserialize_with = "null_default")]
    pub tvl_usd: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub apy: f64,
    #[serde(rename = "apyBase", default, deserialize_with = "null_default")]
    pub apy_base: f64,
    #[serde(rename = "apyReward", default, deserialize_with = "null_default")]
    pub apy_reward: f64,
    #[serde(default, deserialize_with = "null_default")]
    pub stablecoin: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PoolsResponse {
    #[serde(default, deserialize_with = "null_default")]
    data: Vec<YieldPool>,
}

pub struct YieldsClient {
    client: Client,
    yields_url: String,
    rewards_url: String,
}

impl YieldsClient {
    pub fn new(cfg: &HttpConfig) -> eyre::Result<Self> {
        http::ensure_secure_url("yields_url", &cfg.yields_url)?;
        http::ensure_secure_url("rewards_url", &cfg.rewards_url)?;
        Ok(Self {
            client: http::client(cfg)?,
            yields_url: cfg.yields_url.trim().to_owned(),
            rewards_url: cfg.rewards_url.trim().to_owned(),
        })
    }

    /// Every pool the aggregator lists for the Gearbox project.
    pub async fn gearbox_pools(&self) -> eyre::Result<Vec<YieldPool>> {
        let resp: PoolsResponse = http::get_json(&self.client, &self.yields_url, "yields").await?;
        let all = resp.data.len();
        let pools = gearbox_only(resp.data);
        debug!(all, gearbox = pools.len(), "fetched yield pools");
        Ok(pools)
    }

    pub async fn rewards(&self) -> eyre::Result<RewardsFeed> {
        http::get_json(&self.client, &self.rewards_url, "rewards feed").await
    }
}

pub fn gearbox_only(pools: Vec<YieldPool>) -> Vec<YieldPool> {
    pools
        .into_iter()
        .filter(|p| p.project == GEARBOX_PROJECT)
        .collect()
}

/// Case-insensitive chain filter, largest TVL first.
pub fn pools_on_chain(mut pools: Vec<YieldPool>, chain: Option<&str>) -> Vec<YieldPool> {
    if let Some(c) = chain {
        pools.retain(|p| p.chain.eq_ignore_ascii_case(c));
    }
    pools.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd));
    pools
}

/// The `count` highest-APY pools.
pub fn top_by_apy(mut pools: Vec<YieldPool>, count: usize) -> Vec<YieldPool> {
    pools.sort_by(|a, b| b.apy.total_cmp(&a.apy));
    pools.truncate(count);
    pools
}

pub fn total_tvl(pools: &[YieldPool]) -> f64 {
    let tvl: Vec<f64> = pools.iter().map(|p| p.tvl_usd).collect();
    fm::sum_f64(&tvl)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolStats {
    pub total_tvl: f64,
    pub pools: usize,
    pub chains: Vec<String>,
    pub stablecoin_pools: usize,
    pub volatile_pools: usize,
    pub avg_apy: f64,
    pub best_apy: Option<YieldPool>,
    pub largest: Option<YieldPool>,
}

impl ProtocolStats {
    pub fn from_pools(pools: &[YieldPool]) -> Self {
        let chains: BTreeSet<String> = pools.iter().map(|p| p.chain.clone()).collect();
        let stablecoin_pools = pools.iter().filter(|p| p.stablecoin).count();
        let apys: Vec<f64> = pools.iter().map(|p| p.apy).collect();
        Self {
            total_tvl: total_tvl(pools),
            pools: pools.len(),
            chains: chains.into_iter().collect(),
            stablecoin_pools,
            volatile_pools: pools.len() - stablecoin_pools,
            avg_apy: fm::mean(&apys),
            best_apy: pools.iter().max_by(|a, b| a.apy.total_cmp(&b.apy)).cloned(),
            largest: pools
                .iter()
                .max_by(|a, b| a.tvl_usd.total_cmp(&b.tvl_usd))
                .cloned(),
        }
    }
}

/// Snapshot of the Gearbox APY server, keyed by numeric chain id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewardsFeed {
    #[serde(default, deserialize_with = "null_default")]
    pub chains: BTreeMap<String, ChainRewards>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainRewards {
    #[serde(default, deserialize_with = "null_default")]
    pub pools: PoolList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolList {
    #[serde(default, deserialize_with = "null_default")]
    pub data: Vec<PoolRewards>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolRewards {
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub rewards: Rewards,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rewards {
    #[serde(default, deserialize_with = "null_default")]
    pub points: Vec<PointsProgram>,
    #[serde(rename = "externalAPY", default, deserialize_with = "null_default")]
    pub external_apy: Vec<ExternalApy>,
    #[serde(rename = "extraAPY", default, deserialize_with = "null_default")]
    pub extra_apy: Vec<ExtraApy>,
}

impl Rewards {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.external_apy.is_empty() && self.extra_apy.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PointsProgram {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub duration: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalApy {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtraApy {
    #[serde(default, deserialize_with = "null_default")]
    pub apy: f64,
    #[serde(rename = "rewardTokenSymbol", default)]
    pub reward_token_symbol: Option<String>,
}

pub fn chain_name(chain_id: &str) -> String {
    match chain_id {
        "1" => "Ethereum".into(),
        "10" => "Optimism".into(),
        "56" => "BSC".into(),
        "42161" => "Arbitrum".into(),
        "143" => "Monad".into(),
        "146" => "Sonic".into(),
        other => format!("Chain {other}"),
    }
}

/// A pool with at least one reward program, tagged with its chain's display name.
#[derive(Debug, Clone)]
pub struct ActiveProgram<'a> {
    pub chain: String,
    pub pool: &'a PoolRewards,
}

/// Pools carrying any reward program, chains in numeric id order.
pub fn active_programs(feed: &RewardsFeed) -> Vec<ActiveProgram<'_>> {
    let mut chains: Vec<(&String, &ChainRewards)> = feed.chains.iter().collect();
    chains.sort_by_key(|(id, _)| id.parse::<u64>().unwrap_or(u64::MAX));
    chains
        .into_iter()
        .flat_map(|(id, c)| {
            let name = chain_name(id);
            c.pools
                .data
                .iter()
                .filter(|p| !p.rewards.is_empty())
                .map(move |pool| ActiveProgram {
                    chain: name.clone(),
                    pool,
                })
        })
        .collect()
}
