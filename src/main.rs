//! gatehouse: proxy reconciliation and admission control.
//!
//! # Architecture Overview
//!
//! ```text
//!   routing state (store)
//!          │
//!          ▼
//!   ┌──────────────┐   files    ┌──────────────┐  SIGHUP   ┌─────────────┐
//!   │   compiler   │──────────▶│  reconcile   │─────────▶│ supervisor  │──▶ proxy
//!   └──────────────┘            └──────────────┘           └─────────────┘      │
//!                                                                               │ access hook
//!   ┌──────────────┐  counters  ┌──────────────┐   200 / 401                     │
//!   │    store     │◀──────────│    oracle    │◀────────────────────────────────┘
//!   └──────────────┘            └──────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use gatehouse::config::{load_config, GatewayConfig};
use gatehouse::lifecycle;

#[derive(Parser)]
#[command(name = "gatehouse", version, about = "Proxy reconciliation and admission control daemon")]
struct Args {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    lifecycle::run(config).await?;
    Ok(())
}
