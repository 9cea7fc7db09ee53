//! Discovery of a wallet's credit accounts across Gearbox credit managers.
//!
//! The scan never aborts on a single failing call: a manager whose account
//! list cannot be read is skipped, an account whose info cannot be decoded is
//! skipped, and a mask bit whose collateral token cannot be resolved is left
//! out of that account's collateral. Whatever could be assembled is returned.

use crate::abi::{self, ContractCall, CreditAccountInfo, Function};
use crate::chain::ChainReader;
use crate::config::{KnownToken, ScanConfig};
use crate::tokens::{TokenInfo, TokenResolver};
use alloy::primitives::{Address, Bytes, U256};
use eyre::Context as _;
use futures::stream::{self, StreamExt as _};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralEntry {
    pub token: TokenInfo,
    pub raw_balance: U256,
    pub liquidation_threshold_bps: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub account: Address,
    pub manager: Address,
    pub underlying: Option<TokenInfo>,
    pub debt: CreditAccountInfo,
    pub collateral: Vec<CollateralEntry>,
}

impl Position {
    /// Positions are identified by `(manager, account)`, not by account alone.
    pub const fn key(&self) -> (Address, Address) {
        (self.manager, self.account)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub positions: Vec<Position>,
    pub managers_scanned: usize,
    pub managers_total: usize,
}

pub struct PositionScanner<'a, R> {
    reader: &'a R,
    tokens: TokenResolver<'a, R>,
    call_timeout: Duration,
    concurrency: usize,
    /// Shared by every call site, token reads included, so nested fan-outs
    /// never put more than `concurrency` calls on the wire.
    permits: Arc<Semaphore>,
}

impl<'a, R: ChainReader> PositionScanner<'a, R> {
    pub fn new(
        reader: &'a R,
        known: &'a BTreeMap<Address, KnownToken>,
        cfg: &ScanConfig,
    ) -> Self {
        let concurrency = cfg.max_concurrent_calls.clamp(1, Semaphore::MAX_PERMITS);
        let permits = Arc::new(Semaphore::new(concurrency));
        Self {
            reader,
            tokens: TokenResolver::new(reader, known, cfg.call_timeout())
                .with_permits(Arc::clone(&permits)),
            call_timeout: cfg.call_timeout(),
            concurrency,
            permits,
        }
    }

    pub async fn scan(&self, wallet: Address, managers: &[Address]) -> ScanReport {
        let per_manager: Vec<Option<Vec<Position>>> = stream::iter(managers.iter().copied())
            .map(|m| self.scan_manager(wallet, m))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ScanReport {
            managers_total: managers.len(),
            ..ScanReport::default()
        };
        for found in per_manager.into_iter().flatten() {
            report.managers_scanned += 1;
            report.positions.extend(found);
        }
        info!(
            wallet = %format!("{wallet:#x}"),
            tokens_resolved = self.tokens.cached_len(),
            scanned = report.managers_scanned,
            total = report.managers_total,
            positions = report.positions.len(),
            "credit manager scan finished"
        );
        report
    }

    /// `None` when the manager's account list could not be read.
    async fn scan_manager(&self, wallet: Address, manager: Address) -> Option<Vec<Position>> {
        let accounts = match self.list_accounts(manager).await {
            Ok(a) => a,
            Err(e) => {
                warn!(
                    manager = %format!("{manager:#x}"),
                    error = %format!("{e:#}"),
                    "skipping credit manager"
                );
                return None;
            }
        };
        if accounts.is_empty() {
            debug!(manager = %format!("{manager:#x}"), "no credit accounts");
            return Some(vec![]);
        }

        let underlying = match self.underlying_token(manager).await {
            Some(addr) => Some(self.tokens.resolve(addr).await),
            None => None,
        };

        let owned: Vec<(Address, CreditAccountInfo)> = stream::iter(accounts)
            .map(|account| async move {
                let info = self.account_info(manager, account).await?;
                (info.borrower == wallet).then_some((account, info))
            })
            .buffered(self.concurrency)
            .filter_map(|x| async move { x })
            .collect()
            .await;

        let mut positions = Vec::with_capacity(owned.len());
        for (account, info) in owned {
            let collateral = self.collateral(manager, account, &info).await;
            positions.push(Position {
                account,
                manager,
                underlying: underlying.clone(),
                debt: info,
                collateral,
            });
        }
        Some(positions)
    }

    async fn list_accounts(&self, manager: Address) -> eyre::Result<Vec<Address>> {
        let raw = self
            .call_strict(&ContractCall::new(manager, Function::CreditAccounts))
            .await?;
        abi::decode_address_array(&raw).context("decode creditAccounts")
    }

    /// `pool()` on the manager, then `asset()` on the pool with
    /// `underlyingToken()` as the fallback.
    async fn underlying_token(&self, manager: Address) -> Option<Address> {
        let pool = self
            .call(&ContractCall::new(manager, Function::Pool))
            .await
            .and_then(|raw| usable_address(&raw))?;
        if let Some(asset) = self
            .call(&ContractCall::new(pool, Function::Asset))
            .await
            .and_then(|raw| usable_address(&raw))
        {
            return Some(asset);
        }
        self.call(&ContractCall::new(pool, Function::UnderlyingToken))
            .await
            .and_then(|raw| usable_address(&raw))
    }

    async fn account_info(&self, manager: Address, account: Address) -> Option<CreditAccountInfo> {
        let call = ContractCall::with_address(manager, Function::CreditAccountInfo, account);
        let info = self
            .call(&call)
            .await
            .and_then(|raw| abi::decode_credit_account_info(&raw));
        if info.is_none() {
            debug!(account = %format!("{account:#x}"), "credit account info unavailable");
        }
        info
    }

    async fn collateral(
        &self,
        manager: Address,
        account: Address,
        info: &CreditAccountInfo,
    ) -> Vec<CollateralEntry> {
        stream::iter(info.enabled_bits())
            .map(|bit| self.collateral_for_bit(manager, account, bit))
            .buffered(self.concurrency)
            .filter_map(|x| async move { x })
            .collect()
            .await
    }

    async fn collateral_for_bit(
        &self,
        manager: Address,
        account: Address,
        bit: usize,
    ) -> Option<CollateralEntry> {
        let mask = U256::from(1_u64) << bit;
        let call = ContractCall::with_uint(manager, Function::CollateralTokenByMask, mask);
        let decoded = self
            .call(&call)
            .await
            .map(|raw| abi::decode_collateral_token(&raw));
        let (token, lt) = match decoded {
            Some(Ok(Some(pair))) => pair,
            Some(Err(e)) => {
                debug!(bit, error = %e, "collateral token decode failed");
                return None;
            }
            Some(Ok(None)) | None => {
                debug!(bit, "collateral token unavailable");
                return None;
            }
        };
        if token == Address::ZERO {
            return None;
        }

        let balance_call = ContractCall::with_address(token, Function::BalanceOf, account);
        let (balance, info) = tokio::join!(self.call(&balance_call), self.tokens.resolve(token));
        let raw_balance = balance
            .and_then(|raw| abi::decode_uint(&raw).ok().flatten())
            .unwrap_or(U256::ZERO);
        Some(CollateralEntry {
            token: info,
            raw_balance,
            liquidation_threshold_bps: lt,
        })
    }

    /// A call whose failure or timeout is "no data". Empty returns are `None`.
    async fn call(&self, call: &ContractCall) -> Option<Bytes> {
        match self.call_strict(call).await {
            Ok(raw) if !raw.is_empty() => Some(raw),
            Ok(_) => None,
            Err(e) => {
                debug!(
                    calldata = %call.calldata_hex(),
                    contract = %format!("{:#x}", call.target),
                    error = %format!("{e:#}"),
                    "call failed"
                );
                None
            }
        }
    }

    async fn call_strict(&self, call: &ContractCall) -> eyre::Result<Bytes> {
        let _permit = self.permits.acquire().await.context("call limiter closed")?;
        tokio::time::timeout(self.call_timeout, self.reader.call(call))
            .await
            .map_err(|elapsed| eyre::eyre!("call to {:#x} timed out: {elapsed}", call.target))?
    }
}

fn usable_address(raw: &[u8]) -> Option<Address> {
    abi::decode_address(raw).filter(|a| *a != Address::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::test_encode as enc;
    use crate::chain::mock::{MockChain, SlowChain};
    use std::str::FromStr as _;

    fn a(s: &str) -> eyre::Result<Address> {
        Ok(Address::from_str(s)?)
    }

    struct Fixture {
        chain: MockChain,
        known: BTreeMap<Address, KnownToken>,
        wallet: Address,
        manager: Address,
        pool: Address,
        usdc: Address,
        weth: Address,
    }

    fn fixture() -> eyre::Result<Fixture> {
        let usdc = a("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")?;
        let weth = a("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")?;
        let mut known = BTreeMap::new();
        known.insert(
            usdc,
            KnownToken {
                symbol: "USDC".into(),
                decimals: 6,
            },
        );
        known.insert(
            weth,
            KnownToken {
                symbol: "WETH".into(),
                decimals: 18,
            },
        );
        Ok(Fixture {
            chain: MockChain::default(),
            known,
            wallet: a("0x00000000000000000000000000000000000000Ab")?,
            manager: a("0x1000000000000000000000000000000000000001")?,
            pool: a("0x2000000000000000000000000000000000000002")?,
            usdc,
            weth,
        })
    }

    fn cfg() -> ScanConfig {
        ScanConfig {
            call_timeout_ms: 5_000,
            rpc_timeout_seconds: 5,
            max_concurrent_calls: 4,
        }
    }

    impl Fixture {
        fn manager_with_accounts(&mut self, manager: Address, accounts: &[Address]) {
            self.chain.respond(
                &ContractCall::new(manager, Function::CreditAccounts),
                enc::address_array(accounts),
            );
        }

        fn pool_with_asset(&mut self, manager: Address) {
            self.chain.respond(
                &ContractCall::new(manager, Function::Pool),
                abi::address_word(self.pool).to_vec(),
            );
            self.chain.respond(
                &ContractCall::new(self.pool, Function::Asset),
                abi::address_word(self.usdc).to_vec(),
            );
        }

        fn account(&mut self, manager: Address, account: Address, borrower: Address, mask: U256) {
            self.chain.respond(
                &ContractCall::with_address(manager, Function::CreditAccountInfo, account),
                enc::credit_account_info(U256::from(5_000_000_000_u64), mask, borrower),
            );
        }

        fn collateral(&mut self, manager: Address, bit: usize, token: Address, lt: u16) {
            self.chain.respond(
                &ContractCall::with_uint(
                    manager,
                    Function::CollateralTokenByMask,
                    U256::from(1_u64) << bit,
                ),
                enc::collateral_token(token, lt),
            );
        }

        fn balance(&mut self, token: Address, account: Address, amount: U256) {
            self.chain.respond(
                &ContractCall::with_address(token, Function::BalanceOf, account),
                enc::uint_word(amount),
            );
        }
    }

    #[tokio::test]
    async fn keeps_only_the_wallets_accounts() -> eyre::Result<()> {
        let mut f = fixture()?;
        let mine = a("0x3000000000000000000000000000000000000003")?;
        let theirs = a("0x4000000000000000000000000000000000000004")?;
        let broken = a("0x5000000000000000000000000000000000000005")?;
        let other_wallet = a("0x00000000000000000000000000000000000000cd")?;
        let m = f.manager;
        f.manager_with_accounts(m, &[mine, theirs, broken]);
        f.pool_with_asset(m);
        f.account(m, mine, f.wallet, U256::ZERO);
        f.account(m, theirs, other_wallet, U256::ZERO);

        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let report = scanner.scan(f.wallet, &[m]).await;
        assert_eq!(report.managers_scanned, 1);
        assert_eq!(report.positions.len(), 1);
        let p = report.positions.first().ok_or_else(|| eyre::eyre!("no position"))?;
        assert_eq!(p.account, mine);
        assert_eq!(p.key(), (m, mine));
        assert_eq!(p.underlying.as_ref().map(|t| t.symbol.as_str()), Some("USDC"));

        let report = scanner.scan(other_wallet, &[m]).await;
        assert_eq!(
            report.positions.iter().map(|p| p.account).collect::<Vec<_>>(),
            vec![theirs]
        );
        Ok(())
    }

    #[tokio::test]
    async fn borrower_match_ignores_address_case() -> eyre::Result<()> {
        let mut f = fixture()?;
        let acct = a("0x3000000000000000000000000000000000000003")?;
        let m = f.manager;
        f.manager_with_accounts(m, &[acct]);
        f.account(m, acct, a("0x00000000000000000000000000000000000000ab")?, U256::ZERO);
        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let upper = a("0x00000000000000000000000000000000000000AB")?;
        assert_eq!(scanner.scan(upper, &[m]).await.positions.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn resolves_collateral_from_mask_skipping_bad_bits() -> eyre::Result<()> {
        let mut f = fixture()?;
        let acct = a("0x3000000000000000000000000000000000000003")?;
        let m = f.manager;
        let mask = U256::from(0b1001_u64) | (U256::from(1_u64) << 200_usize);
        f.manager_with_accounts(m, &[acct]);
        f.pool_with_asset(m);
        f.account(m, acct, f.wallet, mask);
        let (usdc, weth) = (f.usdc, f.weth);
        f.collateral(m, 0, usdc, 9_500);
        f.collateral(m, 200, weth, 9_000);
        f.balance(usdc, acct, U256::from(250_000_000_u64));
        f.balance(weth, acct, U256::from(2_000_000_000_000_000_000_u128));

        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let report = scanner.scan(f.wallet, &[m]).await;
        let p = report.positions.first().ok_or_else(|| eyre::eyre!("no position"))?;
        assert_eq!(p.debt.enabled_count(), 3);
        let got: Vec<(&str, u16)> = p
            .collateral
            .iter()
            .map(|c| (c.token.symbol.as_str(), c.liquidation_threshold_bps))
            .collect();
        assert_eq!(got, vec![("USDC", 9_500), ("WETH", 9_000)], "bit 3 skipped");
        assert_eq!(
            p.collateral.get(1).map(|c| c.raw_balance),
            Some(U256::from(2_000_000_000_000_000_000_u128))
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_manager_is_scanned_without_further_calls() -> eyre::Result<()> {
        let mut f = fixture()?;
        let empty = a("0x6000000000000000000000000000000000000006")?;
        let down = a("0x7000000000000000000000000000000000000007")?;
        f.manager_with_accounts(empty, &[]);
        f.chain.fail(&ContractCall::new(down, Function::CreditAccounts));

        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let report = scanner.scan(f.wallet, &[empty, down]).await;
        assert_eq!(report.managers_scanned, 1, "empty counts, failed does not");
        assert_eq!(report.managers_total, 2);
        assert!(report.positions.is_empty());
        assert_eq!(f.chain.calls_to(empty), 1, "only creditAccounts()");
        assert_eq!(f.chain.calls_to(f.pool), 0, "no underlying lookup");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_account_list_skips_manager() -> eyre::Result<()> {
        let mut f = fixture()?;
        let m = f.manager;
        let mut raw = enc::uint_word(U256::from(32_u64));
        raw.extend(enc::uint_word(U256::from(50_u64)));
        f.chain.respond(&ContractCall::new(m, Function::CreditAccounts), raw);
        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let report = scanner.scan(f.wallet, &[m]).await;
        assert_eq!(report.managers_scanned, 0);
        Ok(())
    }

    #[tokio::test]
    async fn falls_back_to_underlying_token_then_to_absent() -> eyre::Result<()> {
        let mut f = fixture()?;
        let acct = a("0x3000000000000000000000000000000000000003")?;
        let m = f.manager;
        let (pool, usdc) = (f.pool, f.usdc);
        f.manager_with_accounts(m, &[acct]);
        f.account(m, acct, f.wallet, U256::ZERO);
        f.chain.respond(
            &ContractCall::new(m, Function::Pool),
            abi::address_word(pool).to_vec(),
        );
        f.chain.respond(
            &ContractCall::new(pool, Function::UnderlyingToken),
            abi::address_word(usdc).to_vec(),
        );
        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let report = scanner.scan(f.wallet, &[m]).await;
        let p = report.positions.first().ok_or_else(|| eyre::eyre!("no position"))?;
        assert_eq!(p.underlying.as_ref().map(|t| t.address), Some(usdc));

        let mut g = fixture()?;
        let m = g.manager;
        g.manager_with_accounts(m, &[acct]);
        g.account(m, acct, g.wallet, U256::ZERO);
        let scanner = PositionScanner::new(&g.chain, &g.known, &cfg());
        let report = scanner.scan(g.wallet, &[m]).await;
        let p = report.positions.first().ok_or_else(|| eyre::eyre!("no position"))?;
        assert!(p.underlying.is_none(), "reported without underlying");
        Ok(())
    }

    #[tokio::test]
    async fn same_account_under_two_managers_is_two_positions() -> eyre::Result<()> {
        let mut f = fixture()?;
        let acct = a("0x3000000000000000000000000000000000000003")?;
        let m2 = a("0x8000000000000000000000000000000000000008")?;
        let m1 = f.manager;
        for m in [m1, m2] {
            f.manager_with_accounts(m, &[acct]);
            f.account(m, acct, f.wallet, U256::ZERO);
        }
        let scanner = PositionScanner::new(&f.chain, &f.known, &cfg());
        let report = scanner.scan(f.wallet, &[m1, m2]).await;
        let keys: Vec<_> = report.positions.iter().map(Position::key).collect();
        assert_eq!(keys, vec![(m1, acct), (m2, acct)]);
        Ok(())
    }

    fn with_timeout_ms(ms: u64) -> ScanConfig {
        ScanConfig {
            call_timeout_ms: ms,
            ..cfg()
        }
    }

    #[tokio::test]
    async fn stalled_account_list_skips_only_that_manager() -> eyre::Result<()> {
        let mut f = fixture()?;
        let mine = a("0x3000000000000000000000000000000000000003")?;
        let stuck = a("0x7000000000000000000000000000000000000007")?;
        let m = f.manager;
        f.manager_with_accounts(m, &[mine]);
        f.account(m, mine, f.wallet, U256::ZERO);
        let mut chain = SlowChain::new(f.chain, Duration::ZERO);
        chain.stall(&ContractCall::new(stuck, Function::CreditAccounts));

        let cfg = with_timeout_ms(50);
        let scanner = PositionScanner::new(&chain, &f.known, &cfg);
        let report =
            tokio::time::timeout(Duration::from_secs(10), scanner.scan(f.wallet, &[stuck, m]))
                .await?;
        assert_eq!(report.managers_scanned, 1, "stalled manager not counted");
        assert_eq!(report.managers_total, 2);
        let keys: Vec<_> = report.positions.iter().map(Position::key).collect();
        assert_eq!(keys, vec![(m, mine)]);
        Ok(())
    }

    #[tokio::test]
    async fn stalled_collateral_calls_only_affect_their_entry() -> eyre::Result<()> {
        let mut f = fixture()?;
        let acct = a("0x3000000000000000000000000000000000000003")?;
        let m = f.manager;
        let (usdc, weth) = (f.usdc, f.weth);
        f.manager_with_accounts(m, &[acct]);
        f.account(m, acct, f.wallet, U256::from(0b111_u64));
        f.collateral(m, 0, usdc, 9_500);
        f.balance(usdc, acct, U256::from(250_000_000_u64));
        f.collateral(m, 2, weth, 9_000);
        f.balance(weth, acct, U256::from(2_000_000_000_000_000_000_u128));

        let mut chain = SlowChain::new(f.chain, Duration::ZERO);
        chain.stall(&ContractCall::with_uint(
            m,
            Function::CollateralTokenByMask,
            U256::from(1_u64) << 1_usize,
        ));
        chain.stall(&ContractCall::with_address(weth, Function::BalanceOf, acct));

        let cfg = with_timeout_ms(50);
        let scanner = PositionScanner::new(&chain, &f.known, &cfg);
        let report =
            tokio::time::timeout(Duration::from_secs(10), scanner.scan(f.wallet, &[m])).await?;
        let p = report.positions.first().ok_or_else(|| eyre::eyre!("no position"))?;
        let got: Vec<(&str, U256)> = p
            .collateral
            .iter()
            .map(|c| (c.token.symbol.as_str(), c.raw_balance))
            .collect();
        assert_eq!(
            got,
            vec![("USDC", U256::from(250_000_000_u64)), ("WETH", U256::ZERO)],
            "bit 1 dropped, WETH balance zeroed"
        );
        Ok(())
    }

    #[tokio::test]
    async fn calls_in_flight_stay_within_the_limit() -> eyre::Result<()> {
        let mut f = fixture()?;
        let unknown = a("0x9000000000000000000000000000000000000009")?;
        let usdc = f.usdc;
        let mut managers = Vec::new();
        for n in 1..=4_u8 {
            let m = Address::with_last_byte(n);
            let accounts = [Address::with_last_byte(0x10 + n), Address::with_last_byte(0x20 + n)];
            f.manager_with_accounts(m, &accounts);
            f.collateral(m, 0, usdc, 9_500);
            f.collateral(m, 1, unknown, 8_000);
            for acct in accounts {
                f.account(m, acct, f.wallet, U256::from(0b11_u64));
                f.balance(usdc, acct, U256::from(1_000_000_u64));
                f.balance(unknown, acct, U256::from(1_u64));
            }
            managers.push(m);
        }

        let chain = SlowChain::new(f.chain, Duration::from_millis(5));
        let cfg = ScanConfig {
            max_concurrent_calls: 2,
            ..cfg()
        };
        let scanner = PositionScanner::new(&chain, &f.known, &cfg);
        let report = scanner.scan(f.wallet, &managers).await;
        assert_eq!(report.managers_scanned, 4);
        assert_eq!(report.positions.len(), 8);
        assert!(
            report.positions.iter().all(|p| p.collateral.len() == 2),
            "every entry resolved"
        );
        assert!(chain.peak() >= 1, "calls were made");
        assert!(chain.peak() <= 2, "peak in flight was {}", chain.peak());
        Ok(())
    }
}
