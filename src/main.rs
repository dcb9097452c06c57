use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repo_sync::{
    config::Config,
    git::{CommandGit, GitBackend},
    registry::ResourceRegistry,
    remote::ProviderFactory,
    scheduling::Scheduler,
    services::{FileConfigPersistence, RepositoryService},
    web::WebServer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "repo-sync")]
#[command(version)]
#[command(about = "Keeps git repositories in sync on cron schedules and manages their issue trackers")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("repo_sync={},tower_http=trace", cli.log_level)
    } else {
        format!("repo_sync={},tower_http=info", cli.log_level)
    };
    let json = cli.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!("Starting repo-sync v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config.display());

    // Overrides apply to this run only and are never written back
    let mut web_config = config.web.clone();
    if let Some(host) = cli.host {
        web_config.host = host;
    }
    if let Some(port) = cli.port {
        web_config.port = port;
    }

    let timezone = config.scheduler.timezone()?;
    let git: Arc<dyn GitBackend> = Arc::new(CommandGit::from_config(&config.git));
    let providers = ProviderFactory::new(&config.remote, git.clone())?;
    let registry = ResourceRegistry::new();
    let scheduler = Scheduler::new(timezone);
    info!("Scheduler using timezone {}", timezone);

    let repositories = config.repositories.clone();
    let service = Arc::new(RepositoryService::new(
        config,
        registry,
        scheduler.clone(),
        git,
        providers,
        Arc::new(FileConfigPersistence::new(&cli.config)),
    ));

    let restored = service.restore(&repositories).await;
    info!(
        "Restored {} of {} configured repositories",
        restored,
        repositories.len()
    );

    scheduler.start().await;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let server = WebServer::new(&web_config, service)?;
    let result = server.serve(shutdown).await;

    scheduler.stop().await;
    info!("Scheduler stopped");

    result
}
