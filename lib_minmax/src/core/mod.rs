//! # Core Engine Module
//!
//! The min/max saver proper. Everything in here is synchronous and free of
//! transport details; the gateway feeds it messages and executes what it
//! returns.
//!
//! ## Core Components:
//!
//! - **`topic`**: decodes HomA topics into [`Command`]s and builds the result
//!   topics.
//! - **`reset_clock`**: window validation and the midnight-anchored reset grid.
//! - **`registry`**: the typed tracker index, one entry per kind and control.
//! - **`engine`**: the single state-transition function producing
//!   [`BusCommand`]s.

#![forbid(unsafe_code)]

/// Topic decoding and result topic construction.
pub mod topic;
/// Reset windows and the boundary grid.
pub mod reset_clock;
/// The in-memory tracker index.
pub mod registry;
/// The update engine.
pub mod engine;

pub use engine::{BusCommand, Engine, TrackerError};
pub use registry::{Extremum, Reading, Registration, Registry, TrackerEntry};
pub use reset_clock::{next_reset_boundary, Window, WindowError};
pub use topic::{Command, ControlId, TopicCodec, TopicError, TrackerKind};
