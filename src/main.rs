mod cli;
mod config;
mod dns;
mod journal;
mod metrics;
mod orchestrator;
mod resolver;
mod sink;
mod source;
mod tree;
mod walker;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::Config;
use crate::journal::Journal;
use crate::orchestrator::Orchestrator;
use crate::resolver::UpstreamResolver;
use crate::sink::FileSink;
use crate::source::DomainReader;

// One DNS question in flight at a time
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .init();

    info!("cname-trees v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Config loaded from {}", path.display());
            config
        }
        None => Config::default(),
    };
    cli.apply(&mut config);
    let config = Arc::new(config);

    // Collaborators first: nothing is queried unless input and output are usable
    let domains = DomainReader::open(&config.input.path, config.input.blank_lines)?;
    let sink = FileSink::create(&config.output.dir)?;
    let journal = Arc::new(Journal::new(&config.journal));
    let resolver = UpstreamResolver::new(&config.resolver, journal.clone())?;

    info!(
        "Reading {}, writing trees to {}",
        config.input.path.display(),
        config.output.dir.display()
    );

    let mut orchestrator = Orchestrator::new(config.clone(), resolver, sink);
    orchestrator.run(domains).await;

    orchestrator.metrics().log_summary();
    info!("Upstreams: {}", orchestrator.resolver().get_stats());

    if config.journal.enabled {
        let mut run_stats = orchestrator.metrics().snapshot();
        run_stats["upstreams"] = orchestrator.resolver().get_stats();
        if let Err(e) = journal.write(&config.journal_path(), run_stats) {
            warn!("{:#}", e);
        }
    }

    Ok(())
}
