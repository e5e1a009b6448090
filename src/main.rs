mod api;
mod classify;
mod cli;
mod config;
mod dispatcher;
mod facets;
mod logging;
mod model;
mod notify;
mod orchestrator;
mod poller;
mod session;
mod text_summary;
mod timer;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    // The dashboard owns the terminal and logs to a file instead.
    if !args.is_dashboard() {
        logging::init_stderr();
    }
    cli::run(args).await
}
