#![warn(missing_docs)]
//! Dropstash command line and daemon

use clap::Parser;
use dropstash_daemon::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    Cli::parse().run().await
}
