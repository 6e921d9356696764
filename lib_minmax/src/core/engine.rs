//! # Update Engine
//!
//! The saver's state-transition function. Every inbound bus message goes
//! through [`Engine::on_message`] exactly once; the engine decodes it, updates
//! the [`Registry`] and returns the subscribe/unsubscribe/publish requests the
//! gateway must carry out, in order.
//!
//! ## Rules
//! - **Register**: create or re-window the tracker, then (re)subscribe the
//!   control's measurement and unit topics.
//! - **Deregister**: drop the tracker, release the subscriptions if no tracker
//!   of the other kind still needs them, and erase its retained result and unit.
//! - **Measure**: roll over expired windows, then publish every strictly
//!   better value (or the first value of a window) as a retained result.
//! - **Unit**: republish the unit for every tracker of the control.
//!
//! The engine is not reentrant. The caller serializes all messages.

use chrono::{DateTime, Local, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::core::registry::{Reading, Registration, Registry};
use crate::core::reset_clock::{Window, WindowError};
use crate::core::topic::{Command, ControlId, TopicCodec, TopicError, TrackerKind};

/// A request for the bus gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCommand {
    Subscribe(String),
    Unsubscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
}

impl BusCommand {
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        BusCommand::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }
}

/// Per-message failures. None of them is fatal.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("payload on '{topic}' is not valid UTF-8")]
    InvalidUtf8 { topic: String },

    #[error("rejected {kind} tracker for {control}: {source}")]
    InvalidWindow {
        kind: TrackerKind,
        control: ControlId,
        #[source]
        source: WindowError,
    },

    #[error("measurement '{raw}' for {control} is not a finite number")]
    NotNumeric { control: ControlId, raw: String },
}

pub struct Engine<Tz: TimeZone = Local> {
    codec: TopicCodec,
    registry: Registry,
    tz: Tz,
}

impl Engine<Local> {
    /// Engine whose reset grid follows the host's local midnight.
    pub fn local(codec: TopicCodec) -> Self {
        Self::new(codec, Local)
    }
}

impl<Tz: TimeZone> Engine<Tz> {
    pub fn new(codec: TopicCodec, tz: Tz) -> Self {
        Self {
            codec,
            registry: Registry::new(),
            tz,
        }
    }

    pub fn codec(&self) -> &TopicCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Processes one inbound message. Failures are logged and produce no
    /// bus requests.
    pub fn on_message(&mut self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> Vec<BusCommand> {
        trace!(topic, payload = %String::from_utf8_lossy(payload), "message received");
        match self.try_message(topic, payload, now) {
            Ok(commands) => commands,
            Err(TrackerError::Topic(e @ TopicError::ForeignSystem { .. })) => {
                debug!("ignoring message: {}", e);
                Vec::new()
            }
            Err(e) => {
                warn!("dropping message on '{}': {}", topic, e);
                Vec::new()
            }
        }
    }

    pub fn try_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<BusCommand>, TrackerError> {
        let payload = std::str::from_utf8(payload).map_err(|_| TrackerError::InvalidUtf8 {
            topic: topic.to_string(),
        })?;
        let command = self.codec.decode(topic, payload)?;
        self.apply(command, now)
    }

    /// Applies an already decoded command.
    ///
    /// For a non-numeric measurement the window roll-over has already been
    /// applied when the error is returned.
    pub fn apply(&mut self, command: Command, now: DateTime<Utc>) -> Result<Vec<BusCommand>, TrackerError> {
        match command {
            Command::Register {
                kind,
                control,
                hours,
            } => self.register(kind, control, hours, now),
            Command::Deregister { kind, control } => Ok(self.deregister(kind, &control)),
            Command::Measure { control, raw } => self.measure(&control, &raw, now),
            Command::MeasureUnit { control, unit } => Ok(self.measure_unit(&control, &unit)),
        }
    }

    fn register(
        &mut self,
        kind: TrackerKind,
        control: ControlId,
        hours: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<BusCommand>, TrackerError> {
        let window = Window::from_hours(hours).map_err(|source| TrackerError::InvalidWindow {
            kind,
            control: control.clone(),
            source,
        })?;

        match self.registry.register(kind, &control, window, now, &self.tz) {
            Registration::Created => info!("adding {} saver for {} ({} h)", kind, control, hours),
            Registration::WindowUpdated { .. } => {
                info!("updating {} saver for {} ({} h)", kind, control, hours)
            }
        }

        Ok(vec![
            BusCommand::Subscribe(control.measurement_topic()),
            BusCommand::Subscribe(control.unit_topic()),
        ])
    }

    fn deregister(&mut self, kind: TrackerKind, control: &ControlId) -> Vec<BusCommand> {
        let Some(entry) = self.registry.deregister(kind, control) else {
            debug!("no {} saver registered for {}, nothing to remove", kind, control);
            return Vec::new();
        };
        info!("removing {} saver for {}", kind, control);

        let mut commands = Vec::with_capacity(4);
        if !self.registry.watches(control) {
            commands.push(BusCommand::Unsubscribe(control.measurement_topic()));
            commands.push(BusCommand::Unsubscribe(control.unit_topic()));
        }
        commands.push(BusCommand::retained(entry.result_topic(), ""));
        commands.push(BusCommand::retained(entry.result_unit_topic(), ""));
        commands
    }

    fn measure(
        &mut self,
        control: &ControlId,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<BusCommand>, TrackerError> {
        let mut tracked = false;
        for entry in self.registry.entries_for_mut(control) {
            tracked = true;
            if entry.roll_over(now) {
                debug!(
                    "{} saver for {} reset, next reset at {}",
                    entry.kind,
                    control,
                    entry
                        .next_reset
                        .with_timezone(&self.tz)
                        .naive_local()
                        .format("%a, %d %b %Y %H:%M:%S")
                );
            }
        }
        if !tracked {
            trace!("measurement for untracked control {}", control);
            return Ok(Vec::new());
        }

        let reading = parse_reading(raw).ok_or_else(|| TrackerError::NotNumeric {
            control: control.clone(),
            raw: raw.to_string(),
        })?;

        let mut commands = Vec::new();
        for entry in self.registry.entries_for_mut(control) {
            if entry.offer(&reading) {
                debug!("{} saver for {} updated to {}", entry.kind, control, reading.raw);
                commands.push(BusCommand::retained(entry.result_topic(), reading.raw.clone()));
            }
        }
        Ok(commands)
    }

    fn measure_unit(&mut self, control: &ControlId, unit: &str) -> Vec<BusCommand> {
        self.registry
            .entries_for_mut(control)
            .map(|entry| {
                debug!("{} saver for {} unit set to '{}'", entry.kind, control, unit);
                BusCommand::retained(entry.result_unit_topic(), unit)
            })
            .collect()
    }
}

fn parse_reading(raw: &str) -> Option<Reading> {
    let text = raw.trim();
    let value = text.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(Reading {
        value,
        raw: text.to_string(),
    })
}
