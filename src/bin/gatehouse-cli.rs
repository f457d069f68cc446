use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::StatusCode;

use gatehouse::compiler::RouteCompiler;
use gatehouse::config::{load_config, GatewayConfig};
use gatehouse::oracle::server::{HEADER_LISTEN_ID, HEADER_REALIP, HEADER_REMOTE, HEADER_TYPE};
use gatehouse::oracle::ACCESS_PATH;
use gatehouse::store::{AccessStore, MemoryStore};

#[derive(Parser)]
#[command(name = "gatehouse-cli")]
#[command(about = "Operator CLI for the gatehouse control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a running oracle whether an address would be admitted
    Check {
        /// Listener id; 0 selects the global blacklist check
        #[arg(short, long, default_value_t = 0)]
        listen_id: u32,

        /// Source address to check
        #[arg(short, long)]
        addr: String,

        #[arg(short, long, default_value = "http://127.0.0.1:3000")]
        url: String,

        #[arg(long, default_value = "stream")]
        kind: String,
    },
    /// Compile proxy configuration from a routing snapshot
    Compile {
        /// Gateway settings (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Routing snapshot (JSON)
        #[arg(short, long)]
        state: PathBuf,

        /// Atomically replace the configured output files
        #[arg(long)]
        write: bool,
    },
    /// List administrator-owned blacklist entries, most recent block first
    Blacklist {
        /// Routing snapshot (JSON)
        #[arg(short, long)]
        state: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            listen_id,
            addr,
            url,
            kind,
        } => {
            let res = reqwest::Client::new()
                .get(format!("{}{}", url.trim_end_matches('/'), ACCESS_PATH))
                .header(HEADER_LISTEN_ID, listen_id.to_string())
                .header(HEADER_REALIP, addr.as_str())
                .header(HEADER_REMOTE, addr.as_str())
                .header(HEADER_TYPE, kind)
                .send()
                .await?;
            match res.status() {
                StatusCode::OK => println!("allow"),
                StatusCode::UNAUTHORIZED => println!("deny"),
                other => {
                    eprintln!("Error: oracle returned status {}", other);
                    std::process::exit(2);
                }
            }
        }
        Commands::Compile {
            config,
            state,
            write,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => GatewayConfig::default(),
            };
            let store = Arc::new(MemoryStore::load_from_file(&state).await?);
            let compiler = RouteCompiler::new(store, config.proxy);

            let compiled = if write {
                compiler.compile().await?.as_ref().clone()
            } else {
                compiler.preview().await?
            };

            println!("# {}", compiled.stream_path.display());
            print!("{}", compiled.stream);
            println!();
            println!("# {}", compiled.http_path.display());
            print!("{}", compiled.http);

            if compiled.stats.skipped_routes > 0 {
                eprintln!("warning: {} route(s) skipped", compiled.stats.skipped_routes);
            }
            if write {
                eprintln!(
                    "{}",
                    if compiled.changed { "written" } else { "unchanged" }
                );
            }
        }
        Commands::Blacklist { state } => {
            let store = MemoryStore::load_from_file(&state).await?;
            let entries = store.list_own_blacklist().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}
