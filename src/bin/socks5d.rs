//! SOCKS5 proxy server binary.
//!
//! Usage: socks5d <config_file>
//!
//! The config file is line-oriented `key value` pairs; see `config.rs` for
//! the recognized keys and defaults.

use std::env;
use std::path::Path;
use std::process;

use socks5d::config::Config;
use socks5d::server::Server;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        println!("Usage: {} <config_file>", program_name(&args));
        process::exit(1);
    }

    let config = Config::load(&args[1])?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_filter())
        .with_target(false)
        .init();

    tracing::info!(
        "{} {} starting",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = Server::new(config).run().await {
        tracing::error!("fatal: {}", e);
        process::exit(1);
    }

    Ok(())
}

fn program_name(args: &[String]) -> &str {
    args.first()
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or("socks5d")
}
