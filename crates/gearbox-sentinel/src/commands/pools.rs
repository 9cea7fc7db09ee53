use crate::cli_output::{self, thousands};
use crate::config::SentinelConfig;
use crate::yields::{self, ProtocolStats, YieldPool, YieldsClient};
use eyre::Context as _;

pub const DEFAULT_TOP: usize = 5;

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

/// Pools table, largest TVL first, with a total row.
pub fn render_pools(pools: &[YieldPool], chain: Option<&str>) -> Vec<String> {
    if pools.is_empty() {
        let suffix = chain.map(|c| format!(" on {c}")).unwrap_or_default();
        return vec![format!("No Gearbox pools found{suffix}")];
    }
    let mut out = vec![
        format!(
            "{:<12} {:<12} {:>14} {:>8} {:>8} {:>8} {:>6}",
            "Symbol", "Chain", "TVL", "APY", "Base", "Reward", "Stable"
        ),
        "-".repeat(80),
    ];
    for p in pools {
        out.push(format!(
            "{:<12} {:<12} ${:>12} {:>7.2}% {:>7.2}% {:>7.2}% {:>6}",
            p.symbol,
            p.chain,
            thousands(p.tvl_usd, 0),
            p.apy,
            p.apy_base,
            p.apy_reward,
            yes_no(p.stablecoin)
        ));
    }
    out.push("-".repeat(80));
    out.push(format!(
        "{:<12} {:<12} ${:>12}   {} pools",
        "Total",
        "",
        thousands(yields::total_tvl(pools), 0),
        pools.len()
    ));
    out
}

pub fn render_top(pools: &[YieldPool], requested: usize) -> Vec<String> {
    let mut out = vec![
        format!("Top {requested} Gearbox Pools by APY"),
        format!(
            "{:<4} {:<12} {:<12} {:>8} {:>14}",
            "#", "Symbol", "Chain", "APY", "TVL"
        ),
        "-".repeat(55),
    ];
    for (i, p) in pools.iter().enumerate() {
        out.push(format!(
            "{:<4} {:<12} {:<12} {:>7.2}% ${:>12}",
            i + 1,
            p.symbol,
            p.chain,
            p.apy,
            thousands(p.tvl_usd, 0)
        ));
    }
    out
}

pub fn render_stats(s: &ProtocolStats) -> Vec<String> {
    let mut out = vec![
        "Gearbox Protocol Stats".to_owned(),
        "=".repeat(50),
        format!("  Total TVL:        ${:>14}", thousands(s.total_tvl, 0)),
        format!("  Pools:            {}", s.pools),
        format!("  Chains:           {}", s.chains.join(", ")),
        format!("  Stablecoin pools: {}", s.stablecoin_pools),
        format!("  Volatile pools:   {}", s.volatile_pools),
        format!("  Avg APY:          {:.2}%", s.avg_apy),
    ];
    if let Some(b) = &s.best_apy {
        out.push(format!(
            "  Best APY:         {:.2}% ({} on {})",
            b.apy, b.symbol, b.chain
        ));
    }
    if let Some(l) = &s.largest {
        out.push(format!(
            "  Largest pool:     {} ({} on {})",
            usd_whole(l.tvl_usd),
            l.symbol,
            l.chain
        ));
    }
    out
}

fn usd_whole(v: f64) -> String {
    format!("${}", thousands(v, 0))
}

async fn gearbox_pools(cfg: &SentinelConfig) -> eyre::Result<Vec<YieldPool>> {
    YieldsClient::new(&cfg.http)?
        .gearbox_pools()
        .await
        .context("fetch Gearbox pools")
}

pub async fn run_pools(cfg: &SentinelConfig, chain: Option<&str>) -> eyre::Result<()> {
    let chain = chain.map(str::to_ascii_lowercase);
    let pools = yields::pools_on_chain(gearbox_pools(cfg).await?, chain.as_deref());
    cli_output::stdout_lines(&render_pools(&pools, chain.as_deref()));
    Ok(())
}

pub async fn run_top(cfg: &SentinelConfig, count: usize) -> eyre::Result<()> {
    let top = yields::top_by_apy(gearbox_pools(cfg).await?, count);
    cli_output::stdout_lines(&render_top(&top, count));
    Ok(())
}

pub async fn run_stats(cfg: &SentinelConfig) -> eyre::Result<()> {
    let stats = ProtocolStats::from_pools(&gearbox_pools(cfg).await?);
    cli_output::stdout_lines(&render_stats(&stats));
    Ok(())
}
