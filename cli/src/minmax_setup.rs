//! # minmax_setup
//!
//! Publishes retained min/max registrations for a saver from a JSON list,
//! or removes them with `--remove`.
//!
//! ```text
//! minmax_setup --systemId 123456-min-max-saver --brokerHost localhost \
//!     --brokerPort 1883 --file registrations.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use lib_minmax::configs::{self, load_registrations, CliArgs};
use lib_minmax::core::{BusCommand, TopicCodec};
use lib_minmax::gateway::{CommandSink, MqttGateway};
use lib_minmax::loggers::setup_logging;

const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(about = "Publish or remove HomA min/max saver registrations", version)]
struct SetupArgs {
    #[command(flatten)]
    common: CliArgs,

    /// JSON list of registrations: [{ "kind", "system", "control", "hours" }].
    #[arg(short = 'f', long = "file", env = "MINMAX_REGISTRATIONS")]
    file: PathBuf,

    /// Publish empty payloads, removing the listed registrations.
    #[arg(long)]
    remove: bool,
}

#[tokio::main]
async fn main() {
    configs::load_dotenv();
    let args = SetupArgs::parse();

    let config = match configs::load_config(&args.common) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = setup_logging(config.debug, None, "minmax_setup") {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&args, config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: &SetupArgs, config: configs::SaverConfig) -> Result<()> {
    let entries = load_registrations(&args.file)?;
    let codec = TopicCodec::new(&config.system_id);

    let (gateway, _inbound) = MqttGateway::connect(&config.broker, Vec::new(), config.connect_timeout)
        .await
        .context("cannot publish registrations without an MQTT connection")?;
    let sink = gateway.sink();

    for entry in &entries {
        let topic = codec.registration_topic(entry.kind, &entry.control);
        let payload = if args.remove { String::new() } else { entry.payload() };
        info!(
            "{} {} saver for {} ({})",
            if args.remove { "removing" } else { "registering" },
            entry.kind,
            entry.control,
            topic
        );
        sink.submit(BusCommand::retained(topic, payload))
            .await
            .with_context(|| format!("failed to queue registration for {}", entry.control))?;
    }

    gateway.shutdown(DRAIN_GRACE).await;
    info!("{} registrations sent", entries.len());
    Ok(())
}
