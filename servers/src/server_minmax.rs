//! # Min/Max Saver Server
//!
//! Long-running HomA service that keeps the minimum and maximum of device
//! controls over recurring windows and republishes them as retained facts.
//!
//! ## Functionality:
//! - **Configuration**: add-on options file, `.env` files, environment and
//!   command line, merged field by field.
//! - **Bounded startup**: the broker must acknowledge the connection within
//!   the configured timeout, otherwise the process exits with status 1.
//! - **Registration discovery**: subscribes `/sys/<systemId>/+/+/+`; retained
//!   registrations rebuild the tracker set after every restart.
//! - **Graceful Shutdown**: `tokio-graceful` stops the processing loop on
//!   Ctrl-C or SIGTERM, then the MQTT session is closed cleanly.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_graceful::Shutdown;
use tracing::{error, info};

use lib_minmax::configs::{self, CliArgs, SaverConfig};
use lib_minmax::core::{Engine, TopicCodec};
use lib_minmax::gateway::{run_engine, MqttGateway};
use lib_minmax::loggers::setup_logging;

const APP_NAME: &str = "server_minmax";
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() {
    configs::load_dotenv();
    let args = CliArgs::parse();

    let config = match configs::load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Held for the process lifetime so buffered file logs are flushed.
    let _log_guard = match setup_logging(config.debug, config.log_dir.as_deref(), APP_NAME) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    info!("Bye!");
}

async fn run(config: SaverConfig) -> Result<()> {
    info!(
        "Using {} MQTT broker {}:{} (TLS: {})",
        config.broker_source,
        config.broker.host,
        config.broker.port,
        config.broker.ca_certs.is_some()
    );
    info!("HomA system id: {}", config.system_id);

    let codec = TopicCodec::new(&config.system_id);
    let (gateway, mut inbound) = MqttGateway::connect(
        &config.broker,
        vec![codec.registration_filter()],
        config.connect_timeout,
    )
    .await
    .context("cannot start without an MQTT connection")?;

    let sink = gateway.sink();
    let mut engine = Engine::local(codec);

    let shutdown: Shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| async move {
        let processed = run_engine(&mut engine, &mut inbound, &sink, guard.cancelled()).await;
        info!(
            "processing stopped after {} messages, {} trackers active",
            processed,
            engine.registry().len()
        );
    });

    match shutdown.shutdown_with_limit(SHUTDOWN_LIMIT).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    gateway.shutdown(DISCONNECT_GRACE).await;
    Ok(())
}
