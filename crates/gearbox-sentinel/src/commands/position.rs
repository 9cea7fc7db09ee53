use super::usd;
use crate::chain::RpcReader;
use crate::cli_output::{self, fmt_token, fmt_units, short_wallet, truncated};
use crate::config::{parse_address, SentinelConfig};
use crate::price::LlamaPriceOracle;
use crate::scanner::PositionScanner;
use crate::valuation::{self, PositionValue, ValuationReport};
use alloy::primitives::{Address, U256};
use tracing::{info, warn};

pub const DEFAULT_CHAIN: &str = "ethereum";

pub fn usage() -> Vec<String> {
    vec![
        "Usage: gearbox-sentinel position <wallet_address> [chain]".to_owned(),
        format!("  chain: {DEFAULT_CHAIN} (default)"),
    ]
}

pub fn header(managers: usize, chain: &str, wallet: Address) -> Vec<String> {
    vec![
        format!(
            "Scanning {managers} CreditManagers on {chain} for {}",
            short_wallet(wallet)
        ),
        String::new(),
    ]
}

fn render_position(v: &PositionValue, priced: bool, out: &mut Vec<String>) {
    let p = &v.position;
    let (name, decimals) = p
        .underlying
        .as_ref()
        .map_or(("?", crate::tokens::FALLBACK_DECIMALS), |u| {
            (u.symbol.as_str(), u.decimals)
        });

    let (manager, account) = p.key();
    out.push(format!("  Credit Account: {account:#x}"));
    out.push(format!(
        "    CreditManager: {}",
        truncated(&format!("{manager:#x}"), 20)
    ));
    out.push(format!("    Underlying:    {name}"));
    let debt = format!("{} {name}", fmt_token(p.debt.debt, decimals));
    if priced && valuation::has_debt(p) {
        out.push(format!("    Debt:          {debt} ({})", usd(v.debt_usd)));
    } else {
        out.push(format!("    Debt:          {debt}"));
    }
    if p.debt.last_update_block > U256::ZERO {
        out.push(format!(
            "    Last debt update: block {}",
            cli_output::group_digits(&p.debt.last_update_block.to_string())
        ));
    }
    out.push(format!(
        "    Collateral tokens enabled: {}",
        p.debt.enabled_count()
    ));
    for c in &v.collateral {
        let value = if priced {
            format!("  {}", usd(c.usd))
        } else {
            String::new()
        };
        out.push(format!(
            "      {:<10} {:>18}  LT {:>6.2}%{value}",
            c.token.symbol,
            fmt_units(c.amount),
            c.lt_percent
        ));
    }
    if priced && !v.collateral.is_empty() {
        out.push(format!("    Collateral value: {}", usd(v.collateral_usd)));
    }
    if let Some(r) = v.ratio {
        out.push(format!("    Collateral/debt:  {r:.2}x"));
    }
    out.push(String::new());
}

/// Everything after the header: accounts, scan coverage, exposure, totals.
pub fn render_report(scanned: usize, total: usize, report: &ValuationReport) -> Vec<String> {
    let mut out = Vec::new();
    let priced = report.prices_available;
    for v in &report.positions {
        render_position(v, priced, &mut out);
    }

    out.push(format!("  Scanned {scanned}/{total} CreditManagers"));
    if report.positions.is_empty() {
        out.push("  No active credit accounts found for this address.".to_owned());
        out.push("  Note: only configured CreditManagers are scanned.".to_owned());
        return out;
    }

    if !report.exposure.is_empty() {
        out.push(String::new());
        out.push("  Collateral exposure:".to_owned());
        for e in &report.exposure {
            let value = if priced {
                format!("  {}", usd(e.usd))
            } else {
                String::new()
            };
            out.push(format!(
                "    {:<10} {:>18}  in {} account(s){value}",
                e.token.symbol,
                fmt_units(e.amount),
                e.positions
            ));
        }
    }
    out.push(String::new());
    if priced {
        out.push(format!("  Total debt:       {}", usd(report.total_debt_usd)));
        out.push(format!(
            "  Total collateral: {}",
            usd(report.total_collateral_usd)
        ));
    } else {
        out.push("  Prices unavailable; USD values omitted.".to_owned());
    }
    out
}

pub async fn run(
    cfg: &SentinelConfig,
    wallet: Option<&str>,
    chain: Option<&str>,
) -> eyre::Result<()> {
    let Some(wallet) = wallet else {
        cli_output::stdout_lines(&usage());
        return Ok(());
    };
    let wallet = match parse_address(wallet) {
        Ok(w) => w,
        Err(e) => {
            warn!(code = e.code(), error = %e, "rejecting wallet");
            cli_output::stdout_line(&format!("Invalid wallet address: {e}"));
            return Ok(());
        }
    };
    let registry = match cfg.registry(chain.unwrap_or(DEFAULT_CHAIN)) {
        Ok(r) => r,
        Err(e) => {
            warn!(code = e.code(), error = %e, "chain not scannable");
            cli_output::stdout_line(&e.to_string());
            return Ok(());
        }
    };
    let oracle = LlamaPriceOracle::new(&cfg.http)?;
    let reader = RpcReader::new(&registry, cfg.scan.rpc_timeout())?;

    cli_output::stdout_lines(&header(
        registry.credit_managers.len(),
        &registry.name,
        wallet,
    ));
    info!(
        chain = %registry.name,
        managers = registry.credit_managers.len(),
        rpc_urls = reader.urls().len(),
        "scanning"
    );

    let scanner = PositionScanner::new(&reader, &registry.known_tokens, &cfg.scan);
    let scan = scanner.scan(wallet, &registry.credit_managers).await;
    let (scanned, total) = (scan.managers_scanned, scan.managers_total);
    let report = valuation::value_positions(&oracle, &registry.llama_chain, scan.positions).await;

    cli_output::stdout_lines(&render_report(scanned, total, &report));
    Ok(())
}
