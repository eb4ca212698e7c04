//! sysguard-run - evaluates a monitoring config and logs value changes
//!
//! This binary loads a config, spawns the configured daemons, and
//! prints every var change once per tick. It is the pipeline behind a
//! gadget renderer, minus the gadgets.

use std::path::PathBuf;

use clap::Parser;
use sysguard_formula::Value;
use sysguard_runtime::{Config, Engine};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sysguard-run")]
#[command(about = "Run a sysguard monitoring config")]
struct Cli {
    /// Path to the config file
    config: PathBuf,

    /// Number of ticks to run (0 = run indefinitely)
    #[arg(long, default_value = "0")]
    ticks: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sysguard=info,sysguard_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };

    let config = match Config::parse(&source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };

    let engine = match Engine::build(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };

    info!(config = %cli.config.display(), "starting");

    let mut consumer = |name: &str, value: Value<'_>| match value {
        Value::Num(n) => println!("{name} = {n}"),
        Value::Str(s) => println!("{name} = {s}"),
    };
    engine.run(cli.ticks, &mut consumer).await;
}
