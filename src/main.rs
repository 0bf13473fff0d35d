use anyhow::Context;
use clap::Parser;
use dataset_tool::{
    setup_logging, validate_config, Cli, CliRunner, Config, PrometheusExporter, Shutdown,
};
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Exit status after SIGINT/SIGTERM, as a shell reports for Ctrl-C
const INTERRUPTED_EXIT: i32 = 130;

/// How long capture commands get to close their browsers after a signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting dataset-tool v{}", env!("CARGO_PKG_VERSION"));

    // The recorder must exist before any metric handle is registered
    let exporter = match &args.metrics_out {
        Some(_) => Some(PrometheusExporter::install()?),
        None => None,
    };

    let config = load_config(&args).await?;

    let (shutdown_tx, shutdown) = Shutdown::channel();
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);
    let cli_runner = CliRunner::new(config).with_shutdown(shutdown.clone());

    let owns_browsers = args.command.owns_browsers();
    let run = cli_runner.run(args.command);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown.requested() => {
            info!("Received shutdown signal");
            if owns_browsers {
                // capture workers see the same signal and close their browsers
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut run).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Browsers did not close within {:?}", SHUTDOWN_GRACE);
                        Err(anyhow::anyhow!("interrupted"))
                    }
                }
            } else {
                Err(anyhow::anyhow!("interrupted"))
            }
        }
    };

    if let (Some(exporter), Some(path)) = (&exporter, &args.metrics_out) {
        if let Err(e) = exporter.write_to(path) {
            error!("Failed to write metrics: {}", e);
        }
    }

    if shutdown.is_requested() {
        std::process::exit(INTERRUPTED_EXIT);
    }
    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        Config::default()
    };

    args.command.apply_overrides(&mut config)?;
    validate_config(&config)?;

    info!("Configuration loaded");
    Ok(config)
}

fn setup_shutdown_handler(shutdown_tx: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (mut sigint, mut sigterm) = match (
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
            signal::unix::signal(signal::unix::SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(true);
    })
}
