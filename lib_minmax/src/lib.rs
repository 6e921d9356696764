//! # lib_minmax
//!
//! A windowed min/max saver for the HomA MQTT framework. It tracks the
//! minimum and/or maximum of arbitrary device controls over recurring windows
//! and republishes each extremum, with its unit, as a retained fact.
//!
//! Folder-based feature gating as in the rest of the workspace:
//!
//! - `core` (always built): topic codec, reset clock, registry, engine.
//! - `configs`: options file, environment and command line merging.
//! - `loggers`: `tracing` subscriber setup.
//! - `gateway`: the MQTT transport and the processing loop.

pub mod core;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use crate::core::{BusCommand, ControlId, Engine, TopicCodec, TrackerKind};
