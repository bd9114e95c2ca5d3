//! preforkd: the pre-forking HTTP server binary.
//!
//! Takes the listen port and the worker count as positional arguments;
//! everything else uses the compile-time defaults. Registers a small set
//! of built-in routes and hands control to the master.

use clap::Parser;
use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

use prefork_common::consts::{DEFAULT_PORT, DEFAULT_WORKERS};
use prefork_server::{Config, Master, Response, Router};

#[derive(Parser, Debug)]
#[command(
    name = "preforkd",
    about = "Pre-forking HTTP request-serving engine",
    version
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of pre-forked worker processes.
    #[arg(default_value_t = DEFAULT_WORKERS)]
    workers: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut router = Router::new();
    router.add_route("GET", "/", |_, _| {
        Ok(Response::text(200, "prefork engine up\n"))
    });
    router.add_route("GET", "/health", |_, _| {
        Ok(Response::json(200, json!({ "status": "ok" }).to_string()))
    });
    router.add_route("GET", "/echo/:msg", |_, params| {
        Ok(Response::json(
            200,
            json!({ "echo": params.get("msg") }).to_string(),
        ))
    });

    let config = Config {
        port: cli.port,
        workers: cli.workers,
        ..Config::default()
    };

    if let Err(e) = Master::new(config, router).run() {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
