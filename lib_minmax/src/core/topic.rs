//! # Topic Codec
//!
//! Converts HomA bus topics into typed tracker commands and builds the topics
//! the saver publishes on. The codec is pure: it never touches the registry or
//! the transport.
//!
//! ## Topic shapes
//!
//! | direction | topic | payload |
//! |---|---|---|
//! | in  | `/sys/<ownId>/<min\|max>/<system>/<control>` | hours, or empty to deregister |
//! | in  | `/devices/<system>/controls/<control>` | numeric value |
//! | in  | `/devices/<system>/controls/<control>/meta/unit` | unit |
//! | out | `/devices/<system>/controls/<control> <min\|max>` | extremum |
//! | out | `/devices/<system>/controls/<control> <min\|max>/meta/unit` | unit |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// First segment of the registration namespace.
pub const REGISTRATION_ROOT: &str = "sys";
/// First segment of the device/measurement namespace.
pub const DEVICES_ROOT: &str = "devices";

const CONTROLS: &str = "controls";
const META: &str = "meta";
const UNIT: &str = "unit";

/// Errors produced while decoding an inbound topic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopicError {
    #[error("unrecognized topic '{0}'")]
    Unrecognized(String),

    #[error("registration '{topic}' belongs to system '{system}'")]
    ForeignSystem { topic: String, system: String },

    #[error("unknown tracker kind '{0}'")]
    UnknownKind(String),

    #[error("registration '{topic}' carries a non-numeric window '{payload}'")]
    InvalidHours { topic: String, payload: String },
}

/// Which extremum a tracker accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackerKind {
    Min,
    Max,
}

impl TrackerKind {
    /// Both kinds, in publication order.
    pub const ALL: [TrackerKind; 2] = [TrackerKind::Min, TrackerKind::Max];

    /// The lowercase name used in topics.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerKind::Min => "min",
            TrackerKind::Max => "max",
        }
    }

    /// The opposite kind sharing the same control subscriptions.
    pub fn other(self) -> Self {
        match self {
            TrackerKind::Min => TrackerKind::Max,
            TrackerKind::Max => TrackerKind::Min,
        }
    }

    /// Returns `true` when `candidate` displaces `current` for this kind.
    ///
    /// Strict comparison: an equal value never replaces the stored extremum.
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        match self {
            TrackerKind::Min => candidate < current,
            TrackerKind::Max => candidate > current,
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(TrackerKind::Min),
            "max" => Ok(TrackerKind::Max),
            other => Err(TopicError::UnknownKind(other.to_string())),
        }
    }
}

/// A monitored control: the device system id plus the control name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId {
    pub system: String,
    pub control: String,
}

impl ControlId {
    pub fn new(system: impl Into<String>, control: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            control: control.into(),
        }
    }

    /// `/devices/<system>/controls/<control>`
    pub fn measurement_topic(&self) -> String {
        format!("/{}/{}/{}/{}", DEVICES_ROOT, self.system, CONTROLS, self.control)
    }

    /// `/devices/<system>/controls/<control>/meta/unit`
    pub fn unit_topic(&self) -> String {
        format!("{}/{}/{}", self.measurement_topic(), META, UNIT)
    }

    /// `/devices/<system>/controls/<control> <kind>`
    pub fn result_topic(&self, kind: TrackerKind) -> String {
        format!("{} {}", self.measurement_topic(), kind)
    }

    /// `/devices/<system>/controls/<control> <kind>/meta/unit`
    pub fn result_unit_topic(&self, kind: TrackerKind) -> String {
        format!("{}/{}/{}", self.result_topic(kind), META, UNIT)
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system, self.control)
    }
}

/// A decoded inbound bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Register {
        kind: TrackerKind,
        control: ControlId,
        hours: f64,
    },
    Deregister {
        kind: TrackerKind,
        control: ControlId,
    },
    Measure {
        control: ControlId,
        raw: String,
    },
    MeasureUnit {
        control: ControlId,
        unit: String,
    },
}

/// Topic codec bound to the saver's own HomA system id.
#[derive(Debug, Clone)]
pub struct TopicCodec {
    system_id: String,
}

impl TopicCodec {
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Wildcard filter matching every registration addressed to this saver.
    pub fn registration_filter(&self) -> String {
        format!("/{}/{}/+/+/+", REGISTRATION_ROOT, self.system_id)
    }

    /// `/sys/<ownId>/<kind>/<system>/<control>`
    pub fn registration_topic(&self, kind: TrackerKind, control: &ControlId) -> String {
        format!(
            "/{}/{}/{}/{}/{}",
            REGISTRATION_ROOT, self.system_id, kind, control.system, control.control
        )
    }

    /// Decodes a topic and its (already UTF-8 decoded) payload.
    pub fn decode(&self, topic: &str, payload: &str) -> Result<Command, TopicError> {
        let unrecognized = || TopicError::Unrecognized(topic.to_string());

        let segments: Vec<&str> = topic
            .strip_prefix('/')
            .ok_or_else(unrecognized)?
            .split('/')
            .collect();

        match segments.as_slice() {
            [REGISTRATION_ROOT, system_id, rest @ ..] => {
                if *system_id != self.system_id {
                    return Err(TopicError::ForeignSystem {
                        topic: topic.to_string(),
                        system: system_id.to_string(),
                    });
                }
                let [kind, system, control] = rest else {
                    return Err(unrecognized());
                };
                if system.is_empty() || control.is_empty() {
                    return Err(unrecognized());
                }
                let kind: TrackerKind = kind.parse()?;
                let control = ControlId::new(*system, *control);

                if payload.is_empty() {
                    return Ok(Command::Deregister { kind, control });
                }
                let hours = payload
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| TopicError::InvalidHours {
                        topic: topic.to_string(),
                        payload: payload.to_string(),
                    })?;
                Ok(Command::Register {
                    kind,
                    control,
                    hours,
                })
            }
            [DEVICES_ROOT, system, CONTROLS, control]
                if !system.is_empty() && !control.is_empty() =>
            {
                Ok(Command::Measure {
                    control: ControlId::new(*system, *control),
                    raw: payload.to_string(),
                })
            }
            [DEVICES_ROOT, system, CONTROLS, control, META, UNIT]
                if !system.is_empty() && !control.is_empty() =>
            {
                Ok(Command::MeasureUnit {
                    control: ControlId::new(*system, *control),
                    unit: payload.to_string(),
                })
            }
            _ => Err(unrecognized()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TopicCodec {
        TopicCodec::new("123456-min-max-saver")
    }

    #[test]
    fn decodes_registration_with_hours() {
        let cmd = codec()
            .decode("/sys/123456-min-max-saver/min/123456-energy/Current Power", "24")
            .unwrap();
        assert_eq!(
            cmd,
            Command::Register {
                kind: TrackerKind::Min,
                control: ControlId::new("123456-energy", "Current Power"),
                hours: 24.0,
            }
        );
    }

    #[test]
    fn empty_registration_payload_is_deregistration() {
        let cmd = codec()
            .decode("/sys/123456-min-max-saver/max/123456-vito/Aussentemperatur", "")
            .unwrap();
        assert_eq!(
            cmd,
            Command::Deregister {
                kind: TrackerKind::Max,
                control: ControlId::new("123456-vito", "Aussentemperatur"),
            }
        );
    }

    #[test]
    fn registration_for_other_system_is_foreign() {
        let err = codec().decode("/sys/other-saver/min/a/b", "24").unwrap_err();
        assert!(matches!(err, TopicError::ForeignSystem { system, .. } if system == "other-saver"));
    }

    #[test]
    fn rejects_unknown_kind_and_bad_hours() {
        assert_eq!(
            codec().decode("/sys/123456-min-max-saver/avg/a/b", "24"),
            Err(TopicError::UnknownKind("avg".to_string()))
        );
        assert!(matches!(
            codec().decode("/sys/123456-min-max-saver/min/a/b", "a day"),
            Err(TopicError::InvalidHours { .. })
        ));
    }

    #[test]
    fn decodes_measurement_and_unit() {
        let c = codec();
        assert_eq!(
            c.decode("/devices/sysA/controls/tempA", "21.5").unwrap(),
            Command::Measure {
                control: ControlId::new("sysA", "tempA"),
                raw: "21.5".to_string(),
            }
        );
        assert_eq!(
            c.decode("/devices/sysA/controls/tempA/meta/unit", " °C").unwrap(),
            Command::MeasureUnit {
                control: ControlId::new("sysA", "tempA"),
                unit: " °C".to_string(),
            }
        );
    }

    #[test]
    fn rejects_other_shapes() {
        let c = codec();
        for topic in [
            "devices/sysA/controls/tempA",
            "/devices/sysA/controls",
            "/devices/sysA/controls/tempA/meta/type",
            "/devices/sysA/other/tempA",
            "/devices//controls/tempA",
            "/sys/123456-min-max-saver/min/a",
            "/sys/123456-min-max-saver/min/a/b/c",
            "/weather/today",
        ] {
            assert!(
                matches!(c.decode(topic, "1"), Err(TopicError::Unrecognized(_))),
                "{topic} should be unrecognized"
            );
        }
    }

    #[test]
    fn builds_output_topics() {
        let c = codec();
        let control = ControlId::new("123456-energy", "Current Power");
        assert_eq!(c.registration_filter(), "/sys/123456-min-max-saver/+/+/+");
        assert_eq!(
            c.registration_topic(TrackerKind::Max, &control),
            "/sys/123456-min-max-saver/max/123456-energy/Current Power"
        );
        assert_eq!(
            control.result_topic(TrackerKind::Min),
            "/devices/123456-energy/controls/Current Power min"
        );
        assert_eq!(
            control.result_unit_topic(TrackerKind::Max),
            "/devices/123456-energy/controls/Current Power max/meta/unit"
        );
    }

    #[test]
    fn result_topic_decodes_as_distinct_control() {
        // "<control> min" is a different control name, never the tracked one.
        let control = ControlId::new("sysA", "tempA");
        let decoded = codec().decode(&control.result_topic(TrackerKind::Min), "3").unwrap();
        assert_eq!(
            decoded,
            Command::Measure {
                control: ControlId::new("sysA", "tempA min"),
                raw: "3".to_string(),
            }
        );
    }
}
