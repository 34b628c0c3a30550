//! Command-line entry point for the hostbound crawler.

use anyhow::Context;
use clap::Parser;
use hostbound::controls::Cli;
use hostbound::fetch::HttpFetcher;
use hostbound::html::HtmlLinkParser;
use hostbound::report::StdoutReporter;
use hostbound::runtime::Crawler;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let controls = cli.build_controls();

    let fetcher = HttpFetcher::new(controls.request_timeout())
        .context("failed to build the HTTP client")?;
    let crawler = Crawler::new(&controls, fetcher, HtmlLinkParser)
        .context("failed to prepare the crawl")?;

    let stop = crawler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing in-flight pages");
            stop.request_stop();
        }
    });

    info!(url = %controls.seed_url(), workers = controls.workers(), "starting crawl");
    let stats = crawler.run(StdoutReporter::new(cli.output)).await;
    stats.report();
    Ok(())
}
