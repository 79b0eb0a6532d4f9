use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use airwatch_catalog::AniListClient;
use airwatch_common::clock::SystemClock;
use airwatch_common::config::AppConfig;
use airwatch_notifier::DiscordWebhook;
use airwatch_scheduler::cli::Cli;
use airwatch_scheduler::{Scheduler, SchedulerConfig};

const LOG_TARGETS: [&str; 5] = [
    "airwatch",
    "airwatch_scheduler",
    "airwatch_catalog",
    "airwatch_notifier",
    "airwatch_common",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration; command-line arguments win over the environment
    let mut config = AppConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config);
    if let Some(path) = &config.env_file {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        policy = %config.policy,
        catalog = %config.anilist_url,
        "Airwatch starting..."
    );

    let source = AniListClient::new(
        config.anilist_url.clone(),
        config.policy,
        config.http_timeout(),
    )?
    .with_max_pages(config.catalog_max_pages);
    let notifier = DiscordWebhook::new(config.webhook_url()?.to_string(), config.http_timeout())?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut scheduler = Scheduler::new(
        source,
        notifier,
        SystemClock,
        SchedulerConfig::from(&config),
        cancel,
    );

    // A fatal loop error propagates out of main and exits non-zero
    let stats = scheduler.run().await?;

    tracing::info!(delivered = stats.delivered, "Airwatch stopped.");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let level = if config.policy.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect();
        EnvFilter::new(directives.join(","))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel the scheduler on Ctrl+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Received shutdown signal, stopping gracefully...");
    cancel.cancel();
}
