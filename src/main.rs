mod cli;
mod config;
mod context;
mod engine;
mod launch;
mod model;
mod orchestrator;
mod paths;
mod release;
mod text_summary;
mod zone;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(&args.log_level);

    match cli::run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if e.downcast_ref::<cli::PipelineFailed>().is_none() {
                eprintln!("Failed: {e:#}");
            }
            std::process::exit(1);
        }
    }
}
