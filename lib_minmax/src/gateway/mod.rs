//! # Bus Gateway
//!
//! Connects the engine to an MQTT broker. [`mqtt`] owns the connection and
//! its event loop; [`runner`] is the single message-processing loop that feeds
//! inbound messages to the engine and carries out its requests.

/// MQTT connection, event-loop task and the command sink.
pub mod mqtt;
/// Serialized engine loop driven by the inbound channel.
pub mod runner;

use std::future::Future;

use crate::core::BusCommand;

pub use mqtt::{GatewayError, InboundMessage, MqttGateway, MqttSink};
pub use runner::run_engine;

/// Anything that can carry out the engine's bus requests.
pub trait CommandSink {
    fn submit(&self, command: BusCommand) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
