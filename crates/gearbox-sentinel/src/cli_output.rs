//! Centralised helpers for user-facing CLI output.
//!
//! Commands render into strings; only this module touches stdout.

use crate::financial_math as fm;
use alloy::primitives::{Address, U256};

fn write_line(mut w: impl std::io::Write, s: &str) {
    if w.write_all(s.as_bytes()).is_err() {
        return;
    }
    if w.write_all(b"\n").is_err() {
        return;
    }
    let _flush = w.flush();
}

/// Write rendered command output to stdout. A closed pipe is not an error.
pub fn stdout_lines(lines: &[String]) {
    let mut stdout = std::io::stdout().lock();
    for l in lines {
        write_line(&mut stdout, l);
    }
}

pub fn stdout_line(s: &str) {
    write_line(std::io::stdout().lock(), s);
}

/// Insert thousands separators into a decimal integer string.
pub fn group_digits(int: &str) -> String {
    let (sign, digits) = int
        .strip_prefix('-')
        .map_or(("", int), |rest| ("-", rest));
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    format!("{sign}{out}")
}

/// Fixed-precision number with thousands separators: `1234567.891` → `1,234,567.89`.
pub fn thousands(v: f64, precision: usize) -> String {
    let s = format!("{v:.precision$}");
    match s.split_once('.') {
        Some((int, frac)) => format!("{}.{frac}", group_digits(int)),
        None => group_digits(&s),
    }
}

/// Human token amount: whole units with separators for large values, more
/// precision for small ones.
pub fn fmt_token(raw: U256, decimals: u8) -> String {
    if raw.is_zero() {
        return "0".to_owned();
    }
    fmt_units(fm::units_to_f64(raw, decimals))
}

pub fn fmt_units(v: f64) -> String {
    if v >= 1_000_000.0_f64 {
        thousands(v, 0)
    } else if v >= 1.0_f64 {
        thousands(v, 4)
    } else {
        format!("{v:.6}")
    }
}

/// `0x1234ab...abcdef`: first 8 and last 6 characters of the lowercase form.
pub fn short_wallet(addr: Address) -> String {
    let s = format!("{addr:#x}");
    let head: String = s.chars().take(8).collect();
    let tail: String = s.chars().skip(s.len().saturating_sub(6)).collect();
    format!("{head}...{tail}")
}

/// First `n` characters followed by `...`.
pub fn truncated(s: &str, n: usize) -> String {
    let head: String = s.chars().take(n).collect();
    format!("{head}...")
}
