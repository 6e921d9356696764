//! The processing loop, driven through a recording sink.
#![cfg(feature = "gateway")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lib_minmax::core::{BusCommand, Engine, TopicCodec};
use lib_minmax::gateway::{run_engine, CommandSink, GatewayError, InboundMessage};
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Default)]
struct RecordingSink {
    commands: Arc<Mutex<Vec<BusCommand>>>,
}

impl RecordingSink {
    fn taken(&self) -> Vec<BusCommand> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }
}

impl CommandSink for RecordingSink {
    async fn submit(&self, command: BusCommand) -> Result<(), GatewayError> {
        self.commands.lock().unwrap().push(command);
        Ok(())
    }
}

fn engine() -> Engine<Utc> {
    Engine::new(TopicCodec::new("saver"), Utc)
}

#[tokio::test]
async fn commands_are_submitted_in_order_until_channel_closes() {
    let mut engine = engine();
    let sink = RecordingSink::default();
    let (tx, mut rx) = mpsc::unbounded_channel();

    tx.send(InboundMessage::new("/sys/saver/max/sysA/tempA", "24")).unwrap();
    tx.send(InboundMessage::new("/devices/sysA/controls/tempA", "3")).unwrap();
    tx.send(InboundMessage::new("/devices/sysA/controls/tempA", "not a number")).unwrap();
    tx.send(InboundMessage::new("/devices/sysA/controls/tempA", "8")).unwrap();
    drop(tx);

    let processed = run_engine(&mut engine, &mut rx, &sink, std::future::pending()).await;
    assert_eq!(processed, 4);
    assert_eq!(
        sink.taken(),
        vec![
            BusCommand::Subscribe("/devices/sysA/controls/tempA".into()),
            BusCommand::Subscribe("/devices/sysA/controls/tempA/meta/unit".into()),
            BusCommand::retained("/devices/sysA/controls/tempA max", "3"),
            BusCommand::retained("/devices/sysA/controls/tempA max", "8"),
        ]
    );
}

#[tokio::test]
async fn shutdown_stops_the_loop_with_the_channel_open() {
    let mut engine = engine();
    let sink = RecordingSink::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let feeder = tokio::spawn(async move {
        tx.send(InboundMessage::new("/sys/saver/min/sysA/tempA", "24")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = stop_tx.send(());
        // Keep the sender alive past the shutdown.
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);
    });

    let processed = run_engine(&mut engine, &mut rx, &sink, async {
        let _ = stop_rx.await;
    })
    .await;

    assert_eq!(processed, 1);
    assert_eq!(engine.registry().len(), 1);
    assert_eq!(sink.taken().len(), 2);
    feeder.await.unwrap();
}
