//! Read-only contract calls against an EVM node.

use crate::abi::ContractCall;
use crate::config::ChainRegistry;
use alloy::{
    network::TransactionBuilder as _,
    primitives::Bytes,
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    transports::RpcError,
};
use eyre::Context as _;
use reqwest::Client;
use std::{future::Future, time::Duration};
use tracing::debug;

/// The one transport operation the scanner needs.
///
/// An empty return means the call reverted or the target has no code; errors
/// are reserved for transport failures.
pub trait ChainReader: Sync {
    fn call(&self, call: &ContractCall) -> impl Future<Output = eyre::Result<Bytes>> + Send;
}

/// Endpoint rotation with bounded exponential backoff between rounds.
#[derive(Debug, Clone)]
struct RetryPolicy {
    /// Full passes over the endpoint list.
    rounds: usize,
    base_delay: Duration,
    max_delay: Duration,
    /// Upper bound for the random jitter added to every sleep.
    jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rounds: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter_max_ms: 150,
        }
    }
}

impl RetryPolicy {
    fn delay_after(&self, round: usize) -> Duration {
        let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(factor).min(max_ms);
        let jitter = if cfg!(test) || self.jitter_max_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.jitter_max_ms.saturating_add(1)
        };
        Duration::from_millis(ms.saturating_add(jitter))
    }
}

/// Run `op` against each endpoint in order until one succeeds.
///
/// Sleeps only after a whole round has failed. The last error is returned,
/// wrapped with `label`.
async fn first_success<E, T, Fut>(
    endpoints: &[E],
    policy: &RetryPolicy,
    mut op: impl FnMut(&E) -> Fut + Send,
    label: &'static str,
) -> eyre::Result<T>
where
    E: Sync,
    Fut: Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("{label}: no endpoints configured");
    }
    let mut last: Option<eyre::Report> = None;
    for round in 0..policy.rounds.max(1) {
        for e in endpoints {
            match op(e).await {
                Ok(v) => return Ok(v),
                Err(err) => last = Some(err),
            }
        }
        if round + 1 < policy.rounds {
            tokio::time::sleep(policy.delay_after(round)).await;
        }
    }
    Err(last
        .unwrap_or_else(|| eyre::eyre!("no attempts made"))
        .wrap_err(label))
}

struct Endpoint {
    url: String,
    provider: RootProvider,
}

/// `eth_call` at `latest` over HTTP, rotating through the chain's RPC URLs.
///
/// Providers are built once and share one HTTP client, so connections are
/// pooled across calls.
pub struct RpcReader {
    chain: String,
    endpoints: Vec<Endpoint>,
    retry: RetryPolicy,
}

impl RpcReader {
    pub fn new(registry: &ChainRegistry, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .context("build rpc http client")?;
        let mut endpoints: Vec<Endpoint> = Vec::with_capacity(1 + registry.fallback_rpc_urls.len());
        for u in std::iter::once(&registry.rpc_url).chain(&registry.fallback_rpc_urls) {
            let t = u.trim();
            if t.is_empty() || endpoints.iter().any(|e| e.url == t) {
                continue;
            }
            let parsed: reqwest::Url = t
                .parse()
                .with_context(|| format!("invalid rpc url: {t}"))?;
            let http = alloy::transports::http::Http::with_client(client.clone(), parsed);
            let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
            endpoints.push(Endpoint {
                url: t.to_owned(),
                provider: RootProvider::new(rpc_client),
            });
        }
        Ok(Self {
            chain: registry.name.clone(),
            endpoints,
            retry: RetryPolicy::default(),
        })
    }

    pub fn urls(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.url.as_str()).collect()
    }
}

impl ChainReader for RpcReader {
    async fn call(&self, call: &ContractCall) -> eyre::Result<Bytes> {
        let tx = TransactionRequest::default()
            .with_to(call.target)
            .with_input(call.calldata());
        first_success(
            &self.endpoints,
            &self.retry,
            |ep| {
                let tx = tx.clone();
                let provider = ep.provider.clone();
                async move {
                    match provider.call(tx).block(BlockNumberOrTag::Latest.into()).await {
                        Ok(out) => Ok(out),
                        Err(RpcError::ErrorResp(payload)) => {
                            debug!(
                                code = payload.code,
                                message = %payload.message,
                                "eth_call reverted"
                            );
                            Ok(Bytes::new())
                        }
                        Err(e) => Err(eyre::Report::new(e)).context("eth_call"),
                    }
                }
            },
            "eth_call",
        )
        .await
        .with_context(|| format!("{} call to {:#x}", self.chain, call.target))
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory node keyed by `(target, calldata)`.

    use super::*;
    use alloy::primitives::Address;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct MockChain {
        responses: HashMap<(Address, Bytes), Bytes>,
        failing: Vec<(Address, Bytes)>,
        log: Mutex<Vec<ContractCall>>,
    }

    impl MockChain {
        pub fn respond(&mut self, call: &ContractCall, data: Vec<u8>) {
            self.responses
                .insert((call.target, call.calldata()), Bytes::from(data));
        }

        /// Make a call fail at the transport level.
        pub fn fail(&mut self, call: &ContractCall) {
            self.failing.push((call.target, call.calldata()));
        }

        pub fn calls(&self) -> Vec<ContractCall> {
            self.log
                .lock()
                .map(|g| g.clone())
                .unwrap_or_default()
        }

        pub fn calls_to(&self, target: Address) -> usize {
            self.calls().iter().filter(|c| c.target == target).count()
        }
    }

    impl ChainReader for MockChain {
        async fn call(&self, call: &ContractCall) -> eyre::Result<Bytes> {
            if let Ok(mut g) = self.log.lock() {
                g.push(call.clone());
            }
            let key = (call.target, call.calldata());
            if self.failing.contains(&key) {
                eyre::bail!("connection reset");
            }
            Ok(self.responses.get(&key).cloned().unwrap_or_default())
        }
    }

    /// Wraps a [`MockChain`], delaying every call and stalling chosen ones
    /// indefinitely. Tracks the highest number of calls in flight.
    #[derive(Debug)]
    pub struct SlowChain {
        inner: MockChain,
        delay: Duration,
        stalled: Vec<ContractCall>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl SlowChain {
        pub fn new(inner: MockChain, delay: Duration) -> Self {
            Self {
                inner,
                delay,
                stalled: Vec::new(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub fn stall(&mut self, call: &ContractCall) {
            self.stalled.push(call.clone());
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl ChainReader for SlowChain {
        async fn call(&self, call: &ContractCall) -> eyre::Result<Bytes> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.peak.fetch_max(now, Ordering::SeqCst);
            let wait = if self.stalled.contains(call) {
                Duration::from_secs(3_600)
            } else {
                self.delay
            };
            tokio::time::sleep(wait).await;
            self.inner.call(call).await
        }
    }
}
