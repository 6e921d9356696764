//! # MQTT Gateway
//!
//! Wraps a `rumqttc` client and its event loop.
//!
//! ## Key Features
//! - **Bounded startup**: [`MqttGateway::connect`] returns only after the first
//!   successful CONNACK, or fails once the deadline passes.
//! - **Re-subscription**: the fixed filters are subscribed again on every
//!   CONNACK, so a broker restart re-delivers the retained registrations.
//! - **Ordered delivery**: inbound PUBLISH packets are forwarded in arrival
//!   order to one channel.
//! - **Reconnect**: connection errors after startup are logged and the next
//!   poll reconnects after a fixed back-off.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS, TlsConfiguration, Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::configs::BrokerSettings;
use crate::core::BusCommand;
use crate::gateway::CommandSink;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to read CA bundle '{path}': {source}")]
    CaCerts {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: ConnectionError,
    },

    #[error("no connection acknowledgement from {host}:{port} within {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("event loop stopped before the connection was established")]
    Closed,

    #[error("bus request rejected: {0}")]
    Request(#[from] ClientError),
}

/// One PUBLISH packet received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Cloneable handle that submits [`BusCommand`]s to the broker.
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
}

impl CommandSink for MqttSink {
    async fn submit(&self, command: BusCommand) -> Result<(), GatewayError> {
        match command {
            BusCommand::Subscribe(topic) => {
                trace!(%topic, "subscribe");
                self.client.subscribe(topic, QoS::AtLeastOnce).await?;
            }
            BusCommand::Unsubscribe(topic) => {
                trace!(%topic, "unsubscribe");
                self.client.unsubscribe(topic).await?;
            }
            BusCommand::Publish {
                topic,
                payload,
                retain,
            } => {
                trace!(%topic, %payload, retain, "publish");
                self.client
                    .publish(topic, QoS::AtLeastOnce, retain, payload.into_bytes())
                    .await?;
            }
        }
        Ok(())
    }
}

pub struct MqttGateway {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MqttGateway {
    /// Connects to the broker and waits up to `deadline` for the first
    /// CONNACK. `subscriptions` are (re)subscribed on every CONNACK.
    pub async fn connect(
        settings: &BrokerSettings,
        subscriptions: Vec<String>,
        deadline: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundMessage>), GatewayError> {
        let options = mqtt_options(settings)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));

        info!(
            "connecting to MQTT broker {}:{} as '{}'",
            settings.host, settings.port, settings.client_id
        );
        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            subscriptions,
            inbound_tx,
            ready_tx,
            closing.clone(),
        ));

        let connected = match tokio::time::timeout(deadline, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => Err(GatewayError::Connect {
                host: settings.host.clone(),
                port: settings.port,
                source,
            }),
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => Err(GatewayError::ConnectTimeout {
                host: settings.host.clone(),
                port: settings.port,
                timeout: deadline,
            }),
        };
        if let Err(e) = connected {
            task.abort();
            return Err(e);
        }

        let gateway = Self {
            client,
            closing,
            task,
        };
        Ok((gateway, inbound_rx))
    }

    pub fn sink(&self) -> MqttSink {
        MqttSink {
            client: self.client.clone(),
        }
    }

    /// Sends DISCONNECT after the already queued requests and waits up to
    /// `grace` for the event loop to finish.
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            client,
            closing,
            mut task,
        } = self;
        closing.store(true, Ordering::SeqCst);
        if let Err(e) = client.disconnect().await {
            debug!("disconnect request not queued: {}", e);
        }
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => info!("disconnected from MQTT broker"),
            Err(_) => {
                warn!("MQTT event loop did not finish within {:?}, aborting", grace);
                task.abort();
            }
        }
    }
}

fn mqtt_options(settings: &BrokerSettings) -> Result<MqttOptions, GatewayError> {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(KEEP_ALIVE);

    if let Some(user) = &settings.username {
        options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
    }
    if let Some(path) = &settings.ca_certs {
        let ca = fs::read(path).map_err(|source| GatewayError::CaCerts {
            path: path.clone(),
            source,
        })?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
        debug!("TLS enabled with CA bundle {}", path.display());
    }
    Ok(options)
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    ready: oneshot::Sender<Result<(), ConnectionError>>,
    closing: Arc<AtomicBool>,
) {
    let mut ready = Some(ready);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("connected to MQTT broker (session present: {})", ack.session_present);
                for filter in &subscriptions {
                    // The request queue is drained by this very loop.
                    if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                        warn!("failed to subscribe '{}': {}", filter, e);
                    }
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if inbound.send(message).is_err() {
                    trace!("inbound receiver gone, message discarded");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                    break;
                }
                if closing.load(Ordering::SeqCst) {
                    debug!("event loop stopped during shutdown: {}", e);
                    break;
                }
                warn!(
                    "MQTT connection error: {}; reconnecting in {:?}",
                    e, RECONNECT_BACKOFF
                );
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".into(),
            port: 1883,
            username: None,
            password: None,
            ca_certs: None,
            client_id: "saver-test".into(),
        }
    }

    #[test]
    fn missing_ca_bundle_is_reported() {
        let mut s = settings();
        s.ca_certs = Some(PathBuf::from("/definitely/not/here/ca.pem"));
        assert!(matches!(mqtt_options(&s), Err(GatewayError::CaCerts { .. })));
    }

    #[test]
    fn plain_options_carry_identity() {
        let options = mqtt_options(&settings()).unwrap();
        assert_eq!(options.client_id(), "saver-test");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1883));
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
    }

    #[tokio::test]
    async fn unreachable_broker_fails_within_deadline() {
        // Port 9 (discard) is closed on test hosts; either refusal or timeout is fatal.
        let mut s = settings();
        s.port = 9;
        let result = MqttGateway::connect(&s, Vec::new(), Duration::from_millis(500)).await;
        assert!(matches!(
            result,
            Err(GatewayError::Connect { .. }) | Err(GatewayError::ConnectTimeout { .. })
        ));
    }
}
