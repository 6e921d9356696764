//! # Engine Runner
//!
//! Pulls one inbound message at a time, hands it to the engine with the
//! current time and submits the resulting bus requests in order. This is the
//! only caller of [`Engine::on_message`], which keeps the engine serialized.

use std::future::Future;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::core::Engine;
use crate::gateway::{CommandSink, InboundMessage};

/// Runs until `shutdown` completes or the inbound channel closes and returns
/// the number of messages processed.
pub async fn run_engine<S, Tz, F>(
    engine: &mut Engine<Tz>,
    inbound: &mut UnboundedReceiver<InboundMessage>,
    sink: &S,
    shutdown: F,
) -> u64
where
    S: CommandSink,
    Tz: TimeZone,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested, stopping message processing");
                break;
            }
            message = inbound.recv() => {
                let Some(message) = message else {
                    warn!("inbound channel closed");
                    break;
                };
                let commands = engine.on_message(&message.topic, &message.payload, Utc::now());
                for command in commands {
                    if let Err(e) = sink.submit(command).await {
                        warn!("bus request failed: {}", e);
                    }
                }
                processed += 1;
            }
        }
    }

    debug!("processed {} messages", processed);
    processed
}
