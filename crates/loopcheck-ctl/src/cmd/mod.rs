//! CLI command modules.

pub mod config;
pub mod loopback;
pub mod stress;
pub mod trace;

use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;

pub const RULE: &str = "═══════════════════════════════════════";

/// Print a boxed section header.
pub fn header(title: &str) {
    println!("{RULE}");
    println!("  {title}");
    println!("{RULE}");
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode report")?;
    println!("{text}");
    Ok(())
}

/// Parse the value following `flag` at `args[*i]`, advancing `i` past it.
pub fn flag_value<T>(args: &[&str], i: &mut usize, flag: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    *i += 1;
    let raw = args
        .get(*i)
        .with_context(|| format!("{flag} requires a value"))?;
    raw.parse()
        .with_context(|| format!("invalid value for {flag}: {raw}"))
}
