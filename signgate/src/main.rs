#![forbid(unsafe_code)]

use clap::Parser;
use signgate_lib::alerts::AlertService;
use signgate_lib::background::BackgroundDispatcher;
use signgate_lib::clock::{Clock, SystemClock};
use signgate_lib::config::{load_from_path, Config};
use signgate_lib::server::{self, ServerState, SignerClient};
use signgate_lib::telemetry::{
    init_metrics, init_tracing_with_otel, shutdown_tracing, start_observability_server,
    ObservabilityState,
};
use signgate_lib::{store, Gateway, GatewayError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rate-limiting gateway in front of a signing service")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", env = "SIGNGATE_CONFIG", default_value = "signgate.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("signgate: {err}");
            return ExitCode::FAILURE;
        }
    };
    if cli.check {
        println!("configuration OK: {}", cli.config.display());
        return ExitCode::SUCCESS;
    }

    if let Err(err) =
        init_tracing_with_otel(&cfg.logging.level, cfg.logging.show_target, &cfg.telemetry.otel_log_level)
    {
        eprintln!("signgate: {err}");
        return ExitCode::FAILURE;
    }

    let code = match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "gateway exited with error");
            ExitCode::FAILURE
        }
    };
    shutdown_tracing();
    code
}

async fn run(cfg: Config) -> Result<(), GatewayError> {
    info!(listen = %cfg.listen, signer = %cfg.signer.address, backend = ?cfg.store.backend, "configuration loaded");

    let (metrics, registry) = init_metrics().map_err(|e| GatewayError::Telemetry(e.to_string()))?;

    let stores = store::connect(&cfg.store).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();

    let (background, background_handle) = BackgroundDispatcher::spawn(
        "background",
        cfg.accounting.queue_capacity,
        cfg.accounting.workers,
        Some(Arc::clone(&metrics)),
    );
    let janitor = store::spawn_janitor(
        Arc::clone(&stores.quota),
        Arc::clone(&clock),
        Duration::from_secs(cfg.store.purge_interval_secs.max(1)),
        shutdown.clone(),
    );

    let gateway = Arc::new(Gateway::from_config(
        &cfg,
        &stores,
        background,
        Arc::clone(&clock),
        Some(Arc::clone(&metrics)),
    ));

    if let Err(e) = gateway.evaluator().install_rules(cfg.alert_rules()?).await {
        warn!(error = %e, "could not install alert rules, keeping stored rules");
    }
    let mut alerts = AlertService::new(
        Arc::clone(gateway.evaluator()),
        Duration::from_secs(cfg.alerts.interval_secs),
    );
    if cfg.alerts.enabled {
        alerts.start(&shutdown);
    }

    let observability = cfg.telemetry.metrics_port.map(|port| {
        let state = ObservabilityState {
            registry,
            store: Arc::clone(&stores.quota),
            clock: Arc::clone(&clock),
        };
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_observability_server(port, state, token).await {
                error!(error = %e, "observability server failed");
            }
        })
    });

    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            match server::shutdown_signal().await {
                Ok(()) => token.cancel(),
                Err(e) => error!(error = %e, "signal handling unavailable"),
            }
        });
    }

    let state = Arc::new(ServerState {
        gateway,
        signer: SignerClient::new(&cfg.signer, &cfg.timeout, Some(Arc::clone(&metrics))),
        metrics: Some(metrics),
    });
    let result = server::run(&cfg, state, shutdown.clone()).await;

    shutdown.cancel();
    alerts.stop().await;
    if let Err(e) = janitor.await {
        warn!(error = %e, "janitor task failed");
    }
    if let Some(task) = observability {
        if let Err(e) = task.await {
            warn!(error = %e, "observability task failed");
        }
    }
    background_handle.shutdown().await;

    result
}
