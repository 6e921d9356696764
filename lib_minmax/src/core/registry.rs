//! # Tracker Registry
//!
//! In-memory index of the active min/max trackers, keyed by control and then
//! by kind. The registry is owned by the engine and mutated only from the
//! single message-processing path, so it carries no locks. Nothing here is
//! persisted: after a restart the retained registration messages on the bus
//! rebuild it.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::core::reset_clock::{next_reset_boundary, Window};
use crate::core::topic::{ControlId, TrackerKind};

/// A numeric measurement together with the payload text it arrived as.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub raw: String,
}

/// The extremum accumulated in the current window.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Extremum {
    /// No measurement received since the last reset.
    #[default]
    Unavailable,
    Observed(Reading),
}

impl Extremum {
    pub fn value(&self) -> Option<f64> {
        match self {
            Extremum::Unavailable => None,
            Extremum::Observed(reading) => Some(reading.value),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Extremum::Unavailable)
    }
}

/// One (kind, system, control) tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerEntry {
    pub kind: TrackerKind,
    pub control: ControlId,
    pub window: Window,
    pub next_reset: DateTime<Utc>,
    pub value: Extremum,
}

impl TrackerEntry {
    /// Resets the extremum once `now` has passed the scheduled boundary.
    ///
    /// The schedule advances by a single window per call, even when several
    /// windows elapsed without a measurement.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        if now > self.next_reset {
            self.next_reset += self.window.as_delta();
            self.value = Extremum::Unavailable;
            true
        } else {
            false
        }
    }

    /// Stores `reading` if it is the first of the window or strictly better.
    pub fn offer(&mut self, reading: &Reading) -> bool {
        let accept = match &self.value {
            Extremum::Unavailable => true,
            Extremum::Observed(current) => self.kind.improves(reading.value, current.value),
        };
        if accept {
            self.value = Extremum::Observed(reading.clone());
        }
        accept
    }

    pub fn result_topic(&self) -> String {
        self.control.result_topic(self.kind)
    }

    pub fn result_unit_topic(&self) -> String {
        self.control.result_unit_topic(self.kind)
    }
}

/// Outcome of [`Registry::register`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Registration {
    Created,
    /// The tracker existed; only its window changed.
    WindowUpdated { previous: Window },
}

#[derive(Debug, Default)]
struct Slots {
    min: Option<TrackerEntry>,
    max: Option<TrackerEntry>,
}

impl Slots {
    fn get(&self, kind: TrackerKind) -> Option<&TrackerEntry> {
        match kind {
            TrackerKind::Min => self.min.as_ref(),
            TrackerKind::Max => self.max.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: TrackerKind) -> &mut Option<TrackerEntry> {
        match kind {
            TrackerKind::Min => &mut self.min,
            TrackerKind::Max => &mut self.max,
        }
    }

    fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// The tracker collection, at most one entry per (kind, system, control).
#[derive(Debug, Default)]
pub struct Registry {
    controls: HashMap<ControlId, Slots>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the tracker, or updates the window of an existing one without
    /// touching its value or schedule.
    pub fn register<Tz: TimeZone>(
        &mut self,
        kind: TrackerKind,
        control: &ControlId,
        window: Window,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Registration {
        let slot = self
            .controls
            .entry(control.clone())
            .or_default()
            .slot_mut(kind);

        if let Some(entry) = slot {
            let previous = entry.window;
            entry.window = window;
            debug!(%control, %kind, seconds = window.seconds(), "tracker window updated");
            return Registration::WindowUpdated { previous };
        }

        let next_reset = next_reset_boundary(window, now, tz);
        *slot = Some(TrackerEntry {
            kind,
            control: control.clone(),
            window,
            next_reset,
            value: Extremum::Unavailable,
        });
        debug!(%control, %kind, seconds = window.seconds(), %next_reset, "tracker added");
        Registration::Created
    }

    /// Removes and returns the tracker, if present.
    pub fn deregister(&mut self, kind: TrackerKind, control: &ControlId) -> Option<TrackerEntry> {
        let slots = self.controls.get_mut(control)?;
        let removed = slots.slot_mut(kind).take();
        if slots.is_empty() {
            self.controls.remove(control);
        }
        if removed.is_some() {
            debug!(%control, %kind, "tracker removed");
        }
        removed
    }

    pub fn find(&self, kind: TrackerKind, control: &ControlId) -> Option<&TrackerEntry> {
        self.controls.get(control)?.get(kind)
    }

    pub fn find_mut(&mut self, kind: TrackerKind, control: &ControlId) -> Option<&mut TrackerEntry> {
        self.controls.get_mut(control)?.slot_mut(kind).as_mut()
    }

    /// Every tracker (of either kind) watching `control`, min first.
    pub fn entries_for(&self, control: &ControlId) -> impl Iterator<Item = &TrackerEntry> {
        self.controls
            .get(control)
            .into_iter()
            .flat_map(|slots| slots.min.iter().chain(slots.max.iter()))
    }

    pub fn entries_for_mut(&mut self, control: &ControlId) -> impl Iterator<Item = &mut TrackerEntry> {
        self.controls
            .get_mut(control)
            .into_iter()
            .flat_map(|slots| slots.min.as_mut().into_iter().chain(slots.max.as_mut()))
    }

    /// `true` while any tracker still needs the control's subscriptions.
    pub fn watches(&self, control: &ControlId) -> bool {
        self.controls.contains_key(control)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackerEntry> {
        self.controls
            .values()
            .flat_map(|slots| slots.min.iter().chain(slots.max.iter()))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}
