use crate::errors::SentinelError;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr as _;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// DefiLlama yields dataset (all pools, all projects).
    pub yields_url: String,
    /// Gearbox APY server snapshot with reward programs.
    pub rewards_url: String,
    /// DefiLlama coins API base; prices are fetched from `/prices/current/...`.
    pub coins_base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            yields_url: "https://yields.llama.fi/pools".into(),
            rewards_url: "https://state-cache.gearbox.foundation/apy-server/latest.json".into(),
            coins_base_url: "https://coins.llama.fi".into(),
            user_agent: format!("gearbox-sentinel/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 15,
        }
    }
}

impl HttpConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Budget for a single contract call, retries included. Exceeding it
    /// counts as "no data" for that call only.
    pub call_timeout_ms: u64,
    /// Per-request HTTP timeout for the node connection.
    pub rpc_timeout_seconds: u64,
    /// Upper bound on contract calls in flight at once across a whole scan.
    pub max_concurrent_calls: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            rpc_timeout_seconds: 30,
            max_concurrent_calls: 8,
        }
    }
}

impl ScanConfig {
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownToken {
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    /// Chain key used by the DefiLlama coins API (`ethereum`, `arbitrum`, ...).
    pub llama_chain: String,
    pub credit_managers: Vec<String>,
    /// Display metadata keyed by token address (any case).
    pub known_tokens: BTreeMap<String, KnownToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub http: HttpConfig,
    pub scan: ScanConfig,
    pub chains: BTreeMap<String, ChainConfig>,
}

/// Static chain definition used by the table-driven defaults.
struct ChainDef {
    name: &'static str,
    rpc_url: &'static str,
    fallbacks: &'static [&'static str],
    credit_managers: &'static [&'static str],
    known_tokens: &'static [(&'static str, &'static str, u8)],
}

/// Gearbox v3 credit managers listed by the Gearbox app on mainnet.
const ETHEREUM_CREDIT_MANAGERS: &[&str] = &[
    "0xf5edc34204e67e592bdcb84114571c9e4bd0bdf7",
    "0xb79d6544839d169869476589d2e54014a074317b",
    "0x79c6c1ce5b12abcc3e407ce8c160ee1160250921",
    "0xc307a074bd5aec2d6ad1d9b74465c24a59b490fd",
    "0x9a0fdf7cdab4604fc27ebeab4b3d57bd825e8ebe",
    "0x06c0df5ac1f24bc2097b59ed8ee1db86bf0b09df",
    "0x1128860755c6d452d9326e35d1672ca7c920b7c1",
    "0x35e154be3c856c37d539aae90178fe5ac6d37644",
    "0x11fd8801a051b296e337a3e1168839fb346d5940",
    "0x6252467C2FefB61cB55180282943139BAeEA36c5",
    "0x7a4EffD87C2f3C55CA251080b1343b605f327E3a",
];

const ETHEREUM_TOKENS: &[(&str, &str, u8)] = &[
    ("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "WETH", 18),
    ("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6),
    ("0xdac17f958d2ee523a2206206994597c13d831ec7", "USDT", 6),
    ("0x6b175474e89094c44da98b954eedeac495271d0f", "DAI", 18),
    ("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599", "WBTC", 8),
    ("0x7f39c581f595b53c5cb19bd0b3f8da6c935e2ca0", "wstETH", 18),
    ("0xae78736cd615f374d3085123a210448e74fc6393", "rETH", 18),
    ("0xf939e0a03fb07f59a73314e73794be0e57ac1b4e", "crvUSD", 18),
    ("0x83f20f44975d03b1b09e64809b757c47f942beea", "sDAI", 18),
    ("0x18084fba666a33d37592fa2633fd49a74dd93a88", "tBTC", 18),
    ("0x40d16fc0246ad3160ccc09b8d0d3a2cd28ae6c2f", "GHO", 18),
];

const CHAINS: &[ChainDef] = &[
    ChainDef {
        name: "ethereum",
        rpc_url: "https://ethereum-rpc.publicnode.com",
        fallbacks: &["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
        credit_managers: ETHEREUM_CREDIT_MANAGERS,
        known_tokens: ETHEREUM_TOKENS,
    },
    ChainDef {
        name: "arbitrum",
        rpc_url: "https://arbitrum-one-rpc.publicnode.com",
        fallbacks: &["https://arb1.arbitrum.io/rpc"],
        credit_managers: &[],
        known_tokens: &[],
    },
    ChainDef {
        name: "optimism",
        rpc_url: "https://optimism-rpc.publicnode.com",
        fallbacks: &["https://mainnet.optimism.io"],
        credit_managers: &[],
        known_tokens: &[],
    },
];

impl Default for SentinelConfig {
    fn default() -> Self {
        let chains = CHAINS
            .iter()
            .map(|def| {
                let cfg = ChainConfig {
                    rpc_url: def.rpc_url.into(),
                    fallback_rpc_urls: def.fallbacks.iter().map(|&s| s.into()).collect(),
                    llama_chain: def.name.into(),
                    credit_managers: def.credit_managers.iter().map(|&s| s.into()).collect(),
                    known_tokens: def
                        .known_tokens
                        .iter()
                        .map(|&(addr, symbol, decimals)| {
                            (
                                addr.into(),
                                KnownToken {
                                    symbol: symbol.into(),
                                    decimals,
                                },
                            )
                        })
                        .collect(),
                };
                (def.name.to_owned(), cfg)
            })
            .collect();
        Self {
            http: HttpConfig::default(),
            scan: ScanConfig::default(),
            chains,
        }
    }
}

/// A chain's configuration with every address parsed, ready to inject into
/// the scanner and token resolver.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    pub name: String,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub llama_chain: String,
    pub credit_managers: Vec<Address>,
    pub known_tokens: BTreeMap<Address, KnownToken>,
}

pub fn parse_address(s: &str) -> Result<Address, SentinelError> {
    Address::from_str(s.trim()).map_err(|e| SentinelError::InvalidAddress {
        input: s.trim().to_owned(),
        reason: e.to_string(),
    })
}

impl SentinelConfig {
    pub fn chain_names(&self) -> Vec<&str> {
        self.chains.keys().map(String::as_str).collect()
    }

    /// Resolve `chain` into a registry. Fails without touching the network
    /// when the chain is unknown or has no credit managers.
    pub fn registry(&self, chain: &str) -> Result<ChainRegistry, SentinelError> {
        let key = chain.trim().to_ascii_lowercase();
        let Some(cfg) = self
            .chains
            .get(&key)
            .filter(|c| !c.rpc_url.trim().is_empty())
        else {
            return Err(SentinelError::UnsupportedChain {
                chain: key,
                available: self.chain_names().join(", "),
            });
        };
        if cfg.credit_managers.is_empty() {
            return Err(SentinelError::NoCreditManagers(key));
        }
        let credit_managers = cfg
            .credit_managers
            .iter()
            .map(|s| parse_address(s))
            .collect::<Result<Vec<_>, _>>()?;
        let known_tokens = cfg
            .known_tokens
            .iter()
            .map(|(addr, t)| parse_address(addr).map(|a| (a, t.clone())))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let llama_chain = if cfg.llama_chain.trim().is_empty() {
            key.clone()
        } else {
            cfg.llama_chain.trim().to_owned()
        };
        Ok(ChainRegistry {
            name: key,
            rpc_url: cfg.rpc_url.trim().to_owned(),
            fallback_rpc_urls: cfg.fallback_rpc_urls.clone(),
            llama_chain,
            credit_managers,
            known_tokens,
        })
    }
}
