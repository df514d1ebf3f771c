//! loopcheck: USB loopback and stress verification harness.

mod cmd;
mod usb;

use anyhow::Result;

use loopcheck_core::LoopcheckConfig;
use loopcheck_harness::cancel_pair;

use cmd::loopback::LoopbackArgs;
use cmd::stress::StressArgs;
use cmd::trace::TraceArgs;

fn print_usage() {
    println!("Usage: loopcheck [--json] <command>");
    println!();
    println!("Commands:");
    println!("  loopback [--device N] [--zlp] [--random-chunks] [--buffer-size N]");
    println!("           [--seed S] [--parallel] [--fail-fast]");
    println!("                Echo a random buffer through every endpoint pair");
    println!("  stress   [--device N] [--iterations N] [--seed S] [--fail-fast]");
    println!("                Randomized bulk/interrupt/control trials");
    println!("  trace <file> [--start LABEL] [--end LABEL]");
    println!("                Latency between paired labels in a trace dump");
    println!("  config        Show the resolved configuration");
    println!("  config init   Write the default config file if missing");
    println!();
    println!("Options:");
    println!("  --json        Print reports as JSON");
    println!();
    println!("Config file: {}", LoopcheckConfig::file_path().display());
}

fn usage_error(message: &str) -> ! {
    eprintln!("{message}");
    eprintln!();
    print_usage();
    std::process::exit(1);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut json = false;
    let mut remaining: Vec<&str> = Vec::new();
    for arg in &args {
        if arg == "--json" {
            json = true;
        } else {
            remaining.push(arg);
        }
    }

    let config = match LoopcheckConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            LoopcheckConfig::default()
        }
    };

    let (cancel_handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping at the next boundary");
            cancel_handle.cancel();
        }
    });

    let passed = match remaining.as_slice() {
        ["loopback", rest @ ..] => {
            let args = LoopbackArgs::parse(rest).unwrap_or_else(|e| usage_error(&e.to_string()));
            cmd::loopback::run(args, &config, json, cancel).await?
        }
        ["stress", rest @ ..] => {
            let args = StressArgs::parse(rest).unwrap_or_else(|e| usage_error(&e.to_string()));
            cmd::stress::run(args, &config, json, cancel).await?
        }
        ["trace", rest @ ..] => {
            let args = TraceArgs::parse(rest).unwrap_or_else(|e| usage_error(&e.to_string()));
            cmd::trace::run(args, json)?
        }
        ["config"] => {
            cmd::config::show(&config)?;
            true
        }
        ["config", "init"] => {
            cmd::config::init()?;
            true
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            true
        }
        [] => usage_error("No command given."),
        other => usage_error(&format!("Unknown command: {}", other.join(" "))),
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
