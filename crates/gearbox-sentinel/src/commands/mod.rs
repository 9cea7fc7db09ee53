//! CLI subcommands. Renderers are pure; `run` functions fetch and print.

pub mod pools;
pub mod position;
pub mod rewards;

use crate::cli_output;

/// `$1,234.56`.
fn usd(v: f64) -> String {
    format!("${}", cli_output::thousands(v, 2))
}
