//! prefork-stat: read-only observer for a running server's statistics.
//!
//! Attaches to the shared statistics region and prints a JSON snapshot,
//! optionally polling on an interval. Never writes to the region.

use std::time::Duration;

use clap::Parser;

use prefork_common::consts::STATS_REGION_NAME;
use prefork_server::StatsRegion;

#[derive(Parser, Debug)]
#[command(
    name = "prefork-stat",
    about = "Inspect a running prefork server's statistics region",
    version
)]
struct Cli {
    /// Name of the statistics region to attach to.
    #[arg(long, default_value = STATS_REGION_NAME)]
    region: String,

    /// Re-print every N seconds instead of once.
    #[arg(long)]
    watch: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    let stats = match StatsRegion::attach(&cli.region) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("cannot attach to '{}': {e}", cli.region);
            std::process::exit(1);
        }
    };

    loop {
        match serde_json::to_string_pretty(&stats.snapshot()) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("snapshot failed: {e}");
                std::process::exit(1);
            }
        }
        match cli.watch {
            Some(secs) => std::thread::sleep(Duration::from_secs(secs.max(1))),
            None => break,
        }
    }
}
