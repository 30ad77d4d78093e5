use clap::{ArgAction, Parser};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use elb_trust_store_exporter::config::{Config, Settings};
use elb_trust_store_exporter::{
    server, AwsConnector, BundleFetcher, ExporterRegistry, Scheduler, ScrapeSettings, Scraper,
    SnapshotHandle, BUILD_DATE, BUILT_BY, COMMIT, VERSION,
};

lazy_static! {
    static ref LONG_VERSION: String = format!(
        "{}\ncommit: {}\nbuilt at: {}\nbuilt by: {}",
        VERSION, COMMIT, BUILD_DATE, BUILT_BY
    );
}

/// A Prometheus exporter for AWS Elastic Load Balancer (ELB) trust stores.
#[derive(Parser, Debug)]
#[command(
    name = "elb-trust-store-exporter",
    version = VERSION,
    long_version = LONG_VERSION.as_str(),
    about,
    disable_version_flag = true
)]
struct Cli {
    /// Print version information
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: (),

    /// Address to listen on for web interface and telemetry [default: :9180]
    #[arg(long = "web.listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Path under which to expose metrics [default: /metrics]
    #[arg(long = "web.metrics-path", value_name = "PATH")]
    metrics_path: Option<String>,

    /// AWS region to query. If not specified, the region will be auto-discovered.
    #[arg(long)]
    region: Option<String>,

    /// Interval at which to query the AWS API [default: 60m]
    #[arg(long = "query-interval", value_name = "DURATION")]
    query_interval: Option<String>,

    /// A comma-separated list of ELB trust store ARNs to monitor.
    #[arg(long = "trust-store-arns", value_delimiter = ',', value_name = "ARNS")]
    trust_store_arns: Option<Vec<String>>,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_example_config: bool,
}

fn load_settings(cli: Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut config = Config::default();
    if let Some(path) = &cli.config {
        config = config.merge_with(Config::from_file(path)?);
    }
    config = config.merge_with(Config::from_cli_args(
        cli.listen_address,
        cli.metrics_path,
        cli.region,
        cli.query_interval,
        cli.trust_store_arns,
    ));
    Ok(config.resolve()?)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.print_example_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let settings = match load_settings(cli) {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            exit(2);
        }
    };

    let fetcher = match BundleFetcher::new(BundleFetcher::DEFAULT_TIMEOUT) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            error!(error = %err, "failed to build HTTP client");
            exit(1);
        }
    };

    let handle = SnapshotHandle::new();
    let registry = match ExporterRegistry::new(handle.clone()) {
        Ok(registry) => registry,
        Err(err) => {
            error!(error = %err, "failed to register metrics");
            exit(1);
        }
    };

    let scraper = Arc::new(Scraper::new(
        Arc::new(AwsConnector),
        fetcher,
        ScrapeSettings::new(
            settings.region.clone(),
            settings.trust_store_arns.clone(),
            settings.query_interval,
        ),
    ));
    let refresher = Scheduler::new(scraper, handle).start().await;

    let listener = match server::bind(settings.listen_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(address = %settings.listen_address, error = %err, "failed to start server");
            exit(1);
        }
    };
    let app = server::router(registry, &settings.metrics_path);
    if let Err(err) = server::serve(listener, app, shutdown_signal()).await {
        error!(error = %err, "server failed");
        refresher.abort();
        exit(1);
    }
    refresher.abort();
}
