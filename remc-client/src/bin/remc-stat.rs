//! # STAT Dump Tool
//!
//! Purpose: Connect to a memcached server, print its statistics, and exit.
//!
//! Usage: `remc-stat [addr] [group]`. `addr` defaults to 127.0.0.1:11211;
//! `group` selects a stats subgroup such as `items` or `slabs`.
//! Log verbosity follows `RUST_LOG`.

use std::env;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use remc_client::{Client, ClientConfig};

const DEFAULT_ADDR: &str = "127.0.0.1:11211";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let group = args.next();

    let config = ClientConfig::builder()
        .addr(addr.clone())
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .with_context(|| format!("invalid configuration for {}", addr))?;
    let client = Client::with_config(config)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let entries = client
        .stats_collect(group.as_deref().map(str::as_bytes))
        .await
        .context("stats request failed")?;
    for (key, value) in &entries {
        println!(
            "{} {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }

    client.close();
    Ok(())
}
