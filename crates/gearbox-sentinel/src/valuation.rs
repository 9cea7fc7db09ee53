//! USD valuation of scanned positions.

use crate::financial_math as fm;
use crate::scanner::Position;
use crate::tokens::{TokenInfo, FALLBACK_DECIMALS};
use alloy::primitives::{Address, U256};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tracing::warn;

/// USD price per whole token.
pub type PriceTable = BTreeMap<Address, f64>;

/// Batched price lookup; one call covers every token of a report.
pub trait PriceOracle: Sync {
    fn prices(
        &self,
        chain: &str,
        tokens: &[Address],
    ) -> impl Future<Output = eyre::Result<PriceTable>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollateralValue {
    pub token: TokenInfo,
    pub amount: f64,
    pub usd: f64,
    pub lt_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionValue {
    pub position: Position,
    pub debt_units: f64,
    pub debt_usd: f64,
    pub collateral: Vec<CollateralValue>,
    pub collateral_usd: f64,
    /// Omitted unless both debt and collateral carry USD value.
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenExposure {
    pub token: TokenInfo,
    pub amount: f64,
    pub usd: f64,
    pub positions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuationReport {
    pub positions: Vec<PositionValue>,
    /// Collateral summed per token across all positions, largest USD first.
    pub exposure: Vec<TokenExposure>,
    pub total_debt_usd: f64,
    pub total_collateral_usd: f64,
    pub prices_available: bool,
}

/// Underlyings and collateral tokens, each once.
pub fn distinct_tokens(positions: &[Position]) -> Vec<Address> {
    let mut set = BTreeSet::new();
    for p in positions {
        if let Some(u) = &p.underlying {
            set.insert(u.address);
        }
        set.extend(p.collateral.iter().map(|c| c.token.address));
    }
    set.into_iter().collect()
}

/// Price every distinct token with one request, then aggregate.
///
/// A failed price request still yields a report, with zero USD values and
/// `prices_available` cleared.
pub async fn value_positions<O: PriceOracle>(
    oracle: &O,
    chain: &str,
    positions: Vec<Position>,
) -> ValuationReport {
    let tokens = distinct_tokens(&positions);
    let (prices, available) = if tokens.is_empty() {
        (PriceTable::new(), true)
    } else {
        match oracle.prices(chain, &tokens).await {
            Ok(t) => (t, true),
            Err(e) => {
                warn!(
                    chain,
                    tokens = tokens.len(),
                    error = %format!("{e:#}"),
                    "price lookup failed"
                );
                (PriceTable::new(), false)
            }
        }
    };
    let mut report = aggregate(positions, &prices);
    report.prices_available = available;
    report
}

fn price_of(prices: &PriceTable, token: Address) -> f64 {
    prices.get(&token).copied().unwrap_or(0.0_f64)
}

fn value_one(position: Position, prices: &PriceTable) -> PositionValue {
    let (debt_decimals, debt_price) = position
        .underlying
        .as_ref()
        .map_or((FALLBACK_DECIMALS, 0.0_f64), |u| {
            (u.decimals, price_of(prices, u.address))
        });
    let debt_units = fm::units_to_f64(position.debt.debt, debt_decimals);
    let debt_usd = fm::usd_value(debt_units, debt_price);

    let collateral: Vec<CollateralValue> = position
        .collateral
        .iter()
        .map(|c| {
            let amount = fm::units_to_f64(c.raw_balance, c.token.decimals);
            CollateralValue {
                token: c.token.clone(),
                amount,
                usd: fm::usd_value(amount, price_of(prices, c.token.address)),
                lt_percent: fm::lt_bps_to_percent(c.liquidation_threshold_bps),
            }
        })
        .collect();
    let usd: Vec<f64> = collateral.iter().map(|c| c.usd).collect();
    let collateral_usd = fm::sum_f64(&usd);

    PositionValue {
        ratio: fm::collateral_ratio(collateral_usd, debt_usd),
        position,
        debt_units,
        debt_usd,
        collateral,
        collateral_usd,
    }
}

/// Pure aggregation over an already fetched price table.
pub fn aggregate(positions: Vec<Position>, prices: &PriceTable) -> ValuationReport {
    let values: Vec<PositionValue> = positions
        .into_iter()
        .map(|p| value_one(p, prices))
        .collect();

    let mut by_token: BTreeMap<Address, TokenExposure> = BTreeMap::new();
    let mut total_debt_usd = 0.0_f64;
    let mut total_collateral_usd = 0.0_f64;
    for v in &values {
        fm::accum(&mut total_debt_usd, v.debt_usd);
        fm::accum(&mut total_collateral_usd, v.collateral_usd);
        for c in &v.collateral {
            let e = by_token
                .entry(c.token.address)
                .or_insert_with(|| TokenExposure {
                    token: c.token.clone(),
                    amount: 0.0_f64,
                    usd: 0.0_f64,
                    positions: 0,
                });
            fm::accum(&mut e.amount, c.amount);
            fm::accum(&mut e.usd, c.usd);
            e.positions += 1;
        }
    }
    let mut exposure: Vec<TokenExposure> = by_token.into_values().collect();
    exposure.sort_by(|a, b| b.usd.total_cmp(&a.usd));

    ValuationReport {
        positions: values,
        exposure,
        total_debt_usd,
        total_collateral_usd,
        prices_available: true,
    }
}

/// Whether the account currently owes anything.
pub fn has_debt(p: &Position) -> bool {
    p.debt.debt > U256::ZERO
}
