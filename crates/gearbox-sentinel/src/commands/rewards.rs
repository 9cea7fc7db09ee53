use crate::cli_output::{self, truncated};
use crate::config::SentinelConfig;
use crate::yields::{self, RewardsFeed, YieldsClient};
use eyre::Context as _;
use serde_json::Value;

/// Strings print bare, numbers as JSON, anything missing as `?`.
fn field(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => "?".to_owned(),
        Some(other) => other.to_string(),
    }
}

fn or_unknown(s: Option<&String>) -> &str {
    s.map_or("?", String::as_str)
}

pub fn render_rewards(feed: &RewardsFeed) -> Vec<String> {
    let active = yields::active_programs(feed);
    if active.is_empty() {
        return vec!["No active reward programs found.".to_owned()];
    }
    let mut out = Vec::new();
    for a in active {
        let r = &a.pool.rewards;
        out.push(String::new());
        out.push(format!(
            "  Pool: {} ({})",
            truncated(or_unknown(a.pool.pool.as_ref()), 20),
            a.chain
        ));
        for pt in &r.points {
            out.push(format!(
                "    Points: {} ({}) - {}/{}",
                or_unknown(pt.name.as_ref()),
                or_unknown(pt.symbol.as_ref()),
                field(pt.amount.as_ref()),
                field(pt.duration.as_ref())
            ));
        }
        for ea in &r.external_apy {
            out.push(format!(
                "    External APY: {} - {}%",
                or_unknown(ea.name.as_ref()),
                field(ea.value.as_ref())
            ));
        }
        for xa in &r.extra_apy {
            out.push(format!(
                "    Extra APY: {:.2}% in {}",
                xa.apy,
                or_unknown(xa.reward_token_symbol.as_ref())
            ));
        }
    }
    out
}

pub async fn run(cfg: &SentinelConfig) -> eyre::Result<()> {
    let feed = YieldsClient::new(&cfg.http)?
        .rewards()
        .await
        .context("fetch Gearbox rewards")?;
    cli_output::stdout_lines(&render_rewards(&feed));
    Ok(())
}
