//! Registration lists for the bootstrap utility.
//!
//! ```json
//! [
//!   { "kind": "min", "system": "123456-energy", "control": "Current Power", "hours": 24 },
//!   { "kind": "max", "system": "123456-vito", "control": "Aussentemperatur", "hours": 168 }
//! ]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core::{ControlId, TrackerKind, Window};

#[derive(Debug, Error)]
pub enum RegistrationFileError {
    #[error("failed to read registration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed registration file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("registration #{index}: {reason}")]
    Invalid { index: usize, reason: String },
}

#[derive(Deserialize, Debug, Clone)]
struct RawRegistration {
    kind: String,
    system: String,
    control: String,
    hours: f64,
}

/// A validated registration ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationEntry {
    pub kind: TrackerKind,
    pub control: ControlId,
    pub hours: f64,
}

impl RegistrationEntry {
    /// Payload announcing this registration; `f64` display keeps `24` as `24`.
    pub fn payload(&self) -> String {
        self.hours.to_string()
    }
}

pub fn load_registrations(path: &Path) -> Result<Vec<RegistrationEntry>, RegistrationFileError> {
    let text = fs::read_to_string(path).map_err(|source| RegistrationFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Vec<RawRegistration> =
        serde_json::from_str(&text).map_err(|source| RegistrationFileError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    raw.into_iter().enumerate().map(|(index, r)| validate(index, r)).collect()
}

fn validate(index: usize, raw: RawRegistration) -> Result<RegistrationEntry, RegistrationFileError> {
    let invalid = |reason: String| RegistrationFileError::Invalid { index, reason };

    let kind: TrackerKind = raw.kind.parse().map_err(|e| invalid(format!("{}", e)))?;
    if raw.system.is_empty() || raw.control.is_empty() || raw.system.contains('/') || raw.control.contains('/') {
        return Err(invalid(format!(
            "'{}/{}' is not a valid system/control pair",
            raw.system, raw.control
        )));
    }
    Window::from_hours(raw.hours).map_err(|e| invalid(e.to_string()))?;

    Ok(RegistrationEntry {
        kind,
        control: ControlId::new(raw.system, raw.control),
        hours: raw.hours,
    })
}
