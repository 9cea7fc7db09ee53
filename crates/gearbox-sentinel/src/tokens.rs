//! Token symbol/decimals lookup with a run-scoped cache.

use crate::abi::{self, ContractCall, Function};
use crate::chain::ChainReader;
use crate::config::KnownToken;
use alloy::primitives::{Address, Bytes};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tracing::debug;

pub const FALLBACK_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// `0x` plus the first 8 hex digits, e.g. `0xc02aaa39...`.
pub fn short_symbol(addr: Address) -> String {
    let full = format!("{addr:#x}");
    let head: String = full.chars().take(10).collect();
    format!("{head}...")
}

/// Resolves tokens from the static table first, then the cache, then the chain.
///
/// The cache lives as long as the resolver; each address is resolved over the
/// network at most once, and concurrent callers for the same address wait on
/// the first caller's result.
pub struct TokenResolver<'a, R> {
    reader: &'a R,
    known: &'a BTreeMap<Address, KnownToken>,
    call_timeout: Duration,
    permits: Arc<Semaphore>,
    cache: Mutex<HashMap<Address, Arc<OnceCell<TokenInfo>>>>,
}

impl<'a, R: ChainReader> TokenResolver<'a, R> {
    pub fn new(
        reader: &'a R,
        known: &'a BTreeMap<Address, KnownToken>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            reader,
            known,
            call_timeout,
            permits: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Draw call slots from a limiter shared with other callers.
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = permits;
        self
    }

    pub async fn resolve(&self, address: Address) -> TokenInfo {
        if let Some(k) = self.known.get(&address) {
            return TokenInfo {
                address,
                symbol: k.symbol.clone(),
                decimals: k.decimals,
            };
        }
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(address).or_default())
        };
        let info = cell.get_or_init(|| self.fetch(address)).await;
        info.clone()
    }

    /// Addresses resolved over the network so far.
    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.initialized())
            .count()
    }

    async fn read(&self, function: Function, address: Address) -> Option<Bytes> {
        let call = ContractCall::new(address, function);
        let Ok(_permit) = self.permits.acquire().await else {
            return None;
        };
        match tokio::time::timeout(self.call_timeout, self.reader.call(&call)).await {
            Ok(Ok(raw)) if !raw.is_empty() => Some(raw),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!(
                    token = %format!("{address:#x}"),
                    function = function.signature(),
                    error = %format!("{e:#}"),
                    "token metadata read failed"
                );
                None
            }
            Err(_) => {
                debug!(
                    token = %format!("{address:#x}"),
                    function = function.signature(),
                    "token metadata read timed out"
                );
                None
            }
        }
    }

    async fn fetch(&self, address: Address) -> TokenInfo {
        let (symbol_raw, decimals_raw) = tokio::join!(
            self.read(Function::Symbol, address),
            self.read(Function::Decimals, address)
        );
        let symbol = symbol_raw
            .and_then(|raw| abi::decode_string(&raw).ok().flatten())
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| short_symbol(address));
        let decimals = decimals_raw
            .and_then(|raw| abi::decode_uint(&raw).ok().flatten())
            .and_then(abi::small_uint)
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(FALLBACK_DECIMALS);
        TokenInfo {
            address,
            symbol,
            decimals,
        }
    }
}
