//! Tenant resource and connection-data collection tool.
//!
//! `recon` enumerates a tenant's cloud resources into a local cache tree;
//! `dump` walks every cached connection through its backend connector and
//! dumps the reachable data next to it. The cache is plain JSON and files,
//! readable offline by any downstream tooling.
//!
//! # Security Guarantees
//! - Read-only collection: every backend call is a GET
//! - Bearer credentials are taken from the operator, held in zeroizing
//!   buffers, and never written to the cache or logs

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use connsurveyor_collect::{DataCollector, PlatformApi, ResourcesCollector};
use connsurveyor_core::{init_logging, transport::ApiClient};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "connsurveyor-collect")]
#[command(about = "Tenant resource and connection-data collection tool")]
#[command(version)]
#[command(long_about = "
ConnSurveyor Collector - tenant resource and data collection

recon enumerates the tenant's environments, canvas apps, connections and
connector specifications into a local cache tree:

  <cache>/resources/<env>/<entity_type>/<entity_id>.json

dump drives every cached connection through its backend connector and
writes the reachable data:

  <cache>/data/<env>/connections/<api>/<connection>/<record_type>/<name>.<ext>

SECURITY FEATURES:
- Read-only collection (GET requests only)
- Credentials never cached or logged
- Offline-readable output

EXAMPLES:
  connsurveyor-collect recon --token \"$TOKEN\"
  connsurveyor-collect --cache-path ./loot dump --token \"$TOKEN\"
  connsurveyor-collect --clear-cache recon --token \"$TOKEN\"
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Root of the on-disk cache tree
    #[arg(
        long,
        env = "CONNSURVEYOR_CACHE",
        default_value = "connsurveyor_cache",
        help = "Directory the resource and data trees are written under"
    )]
    cache_path: PathBuf,

    /// Delete the whole cache before doing anything else
    #[arg(long, help = "Recursively delete the cache path before running")]
    clear_cache: bool,

    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Enumerate tenant resources into the cache
    Recon(ReconArgs),
    /// Dump data reachable through cached connections
    Dump(DumpArgs),
}

#[derive(Args)]
struct ReconArgs {
    /// Bearer credential for the platform APIs
    #[arg(
        long,
        env = "CONNSURVEYOR_TOKEN",
        hide_env_values = true,
        help = "Bearer credential (sanitized from all output)"
    )]
    token: String,

    /// Platform endpoint override
    #[arg(
        long,
        default_value = connsurveyor_collect::DEFAULT_API_BASE_URL,
        help = "Platform API base URL (sovereign clouds, test stubs)"
    )]
    api_base_url: String,
}

#[derive(Args)]
struct DumpArgs {
    /// Bearer credential for the backend APIs
    #[arg(
        long,
        env = "CONNSURVEYOR_TOKEN",
        hide_env_values = true,
        help = "Bearer credential (sanitized from all output)"
    )]
    token: String,

    /// Connection-level worker cap
    #[arg(
        long,
        default_value_t = connsurveyor_collect::DEFAULT_PARALLELISM,
        help = "Connections processed concurrently (keep low to stay under throttling)"
    )]
    parallel: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    if cli.global.clear_cache && cli.global.cache_path.is_dir() {
        info!("Clearing cache at {}", cli.global.cache_path.display());
        tokio::fs::remove_dir_all(&cli.global.cache_path).await?;
    }

    match &cli.command {
        Command::Recon(args) => {
            let client = ApiClient::new(&args.token)?;
            let api = PlatformApi::new(client, args.api_base_url.clone());
            let collector = ResourcesCollector::new(api, cli.global.cache_path.clone());
            collector.collect_and_cache().await?;

            info!("Resource collection completed");
            println!("Resources cached under {}", cli.global.cache_path.display());
        }
        Command::Dump(args) => {
            let client = ApiClient::new(&args.token)?;
            let collector =
                DataCollector::new(cli.global.cache_path.clone(), client, args.parallel);
            let collected = collector.collect().await?;

            if collected {
                info!("Data collection completed");
                println!("Data dumped under {}", cli.global.cache_path.display());
            } else {
                warn!("No cached connections found");
                println!("No cached connections found. Run recon first.");
            }
        }
    }

    Ok(())
}
