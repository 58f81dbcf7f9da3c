//! GRBL Status Report Parsing
//!
//! Parses `<State|MPos:x,y,z|FS:feed,speed|Pn:pins>` lines into a
//! [`DeviceStatus`] and keeps the latest one in a shared
//! [`DeviceStatusModel`]. Extraction is textual; a line without a usable
//! `MPos:` field is ignored and the previous status is retained.
//!
//! The state token alone is available through [`state_of`] for reports that
//! carry no machine position (`WPos:` when `$10=0`).

use grbllink_core::{thread_safe_rw, AppEvent, EventBus, MachineEvent, ThreadSafeRw};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::utils::format_axis;

/// Device state token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// Ready for commands
    Idle,
    /// Executing a program
    Run,
    /// Executing a jog motion
    Jog,
    /// Locked out by an alarm
    Alarm,
    /// Anything else (Hold, Door, Home, Check, Sleep, ...)
    #[default]
    Unknown,
}

impl MachineState {
    /// Map a state token; sub-states such as `Hold:0` map to `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "Idle" => Self::Idle,
            "Run" => Self::Run,
            "Jog" => Self::Jog,
            "Alarm" => Self::Alarm,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Run => write!(f, "Run"),
            Self::Jog => write!(f, "Jog"),
            Self::Alarm => write!(f, "Alarm"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// State token of a status report: the text between `<` and the first `|`
fn state_token(line: &str) -> Option<&str> {
    let body = line.trim().strip_prefix('<')?;
    let body = body.strip_suffix('>').unwrap_or(body);
    let token = body.split('|').next()?.trim();
    (!token.is_empty()).then_some(token)
}

/// State of a status report, whatever position fields it carries
pub fn state_of(line: &str) -> Option<MachineState> {
    state_token(line).map(MachineState::from_token)
}

/// Latest device status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Classified state
    pub state: MachineState,
    /// Raw state token as reported
    pub state_text: String,
    /// Machine X position
    pub x: Option<f64>,
    /// Machine Y position
    pub y: Option<f64>,
    /// Machine Z position
    pub z: Option<f64>,
    /// Feed and spindle speed (`FS:`)
    pub feed_speed: Option<(f64, f64)>,
    /// Input pin flags (`Pn:`), not decoded
    pub pins: Option<String>,
}

impl DeviceStatus {
    /// Parse a status line.
    ///
    /// Returns `None` unless the line carries a state token and an `MPos:`
    /// field of exactly three numbers.
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.trim();
        let body = body.strip_prefix('<').unwrap_or(body);
        let body = body.strip_suffix('>').unwrap_or(body);

        let (state_token, _) = body.split_once('|')?;
        let state_token = state_token.trim();
        if state_token.is_empty() {
            return None;
        }

        let mpos = extract_field(body, "MPos:")?;
        let coords = mpos
            .split(',')
            .map(|part| part.trim().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;
        let [x, y, z] = coords.as_slice() else {
            return None;
        };

        let feed_speed = extract_field(body, "FS:").and_then(|fs| {
            let (feed, speed) = fs.split_once(',')?;
            Some((feed.trim().parse().ok()?, speed.trim().parse().ok()?))
        });

        Some(Self {
            state: MachineState::from_token(state_token),
            state_text: state_token.to_string(),
            x: Some(*x),
            y: Some(*y),
            z: Some(*z),
            feed_speed,
            pins: extract_field(body, "Pn:").map(str::to_string),
        })
    }

    /// Axis readout, three decimals each, `-` for an absent axis.
    pub fn readout(&self) -> [String; 3] {
        [format_axis(self.x), format_axis(self.y), format_axis(self.z)]
    }

    fn to_event(&self) -> AppEvent {
        AppEvent::Machine(MachineEvent::StatusUpdated {
            state: self.state_text.clone(),
            x: self.x,
            y: self.y,
            z: self.z,
        })
    }
}

/// Field value between `prefix` and the next `|`
fn extract_field<'a>(body: &'a str, prefix: &str) -> Option<&'a str> {
    let start = body
        .split('|')
        .find_map(|field| field.trim().strip_prefix(prefix))?;
    Some(start)
}

/// Shared holder of the latest [`DeviceStatus`]
///
/// Written by the receive path, read by poll loops and displays. Every
/// successful update is published as `MachineEvent::StatusUpdated`.
#[derive(Clone)]
pub struct DeviceStatusModel {
    status: ThreadSafeRw<DeviceStatus>,
    bus: Arc<EventBus>,
}

impl DeviceStatusModel {
    /// Create a model with an all-absent status
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            status: thread_safe_rw(DeviceStatus::default()),
            bus,
        }
    }

    /// Parse `line` and replace the status; malformed lines are a no-op.
    pub fn apply_line(&self, line: &str) -> Option<DeviceStatus> {
        match DeviceStatus::parse(line) {
            Some(status) => {
                *self.status.write() = status.clone();
                self.bus.publish(status.to_event());
                Some(status)
            }
            None => {
                tracing::warn!("Ignoring malformed status line: {}", line);
                None
            }
        }
    }

    /// Copy of the current status
    pub fn snapshot(&self) -> DeviceStatus {
        self.status.read().clone()
    }

    /// Current state
    pub fn state(&self) -> MachineState {
        self.status.read().state
    }
}

impl std::fmt::Debug for DeviceStatusModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStatusModel")
            .field("status", &*self.status.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let status = DeviceStatus::parse("<Run|MPos:0.140,0.000,-1.5|FS:20,0|Pn:Z>").unwrap();
        assert_eq!(status.state, MachineState::Run);
        assert_eq!(status.x, Some(0.14));
        assert_eq!(status.z, Some(-1.5));
        assert_eq!(status.feed_speed, Some((20.0, 0.0)));
        assert_eq!(status.pins.as_deref(), Some("Z"));
    }

    #[test]
    fn test_parse_rejects_bad_mpos() {
        assert!(DeviceStatus::parse("<Idle|MPos:1.0,2.0|FS:0,0>").is_none());
        assert!(DeviceStatus::parse("<Idle|MPos:1.0,2.0,3.0,4.0|FS:0,0>").is_none());
        assert!(DeviceStatus::parse("<Idle|MPos:1.0,abc,3.0>").is_none());
        assert!(DeviceStatus::parse("<Idle|WPos:1.0,2.0,3.0>").is_none());
        assert!(DeviceStatus::parse("ok").is_none());
    }

    #[test]
    fn test_state_without_machine_position() {
        let line = "<Idle|WPos:1.000,2.000,3.000|FS:0,0>";
        assert!(DeviceStatus::parse(line).is_none());
        assert_eq!(state_of(line), Some(MachineState::Idle));
        assert_eq!(state_of("<Jog|WPos:0,0,0>"), Some(MachineState::Jog));
        assert_eq!(state_of("<Alarm>"), Some(MachineState::Alarm));
        assert_eq!(state_of("ok"), None);
        assert_eq!(state_of("<|MPos:0,0,0>"), None);
    }

    #[test]
    fn test_sub_state_maps_to_unknown() {
        let status = DeviceStatus::parse("<Hold:0|MPos:0,0,0|FS:0,0>").unwrap();
        assert_eq!(status.state, MachineState::Unknown);
        assert_eq!(status.state_text, "Hold:0");
    }

    #[test]
    fn test_readout() {
        let status = DeviceStatus {
            x: Some(1.0),
            z: Some(-2.5),
            ..Default::default()
        };
        assert_eq!(status.readout(), ["1.000", "-", "-2.500"]);
    }

    #[test]
    fn test_model_publishes_updates() {
        let bus = Arc::new(EventBus::new());
        let mut receiver = bus.receiver();
        let model = DeviceStatusModel::new(bus);

        model.apply_line("<Jog|MPos:1,2,3|FS:75,0>");
        assert_eq!(model.state(), MachineState::Jog);

        match receiver.try_recv() {
            Ok(AppEvent::Machine(MachineEvent::StatusUpdated { state, x, .. })) => {
                assert_eq!(state, "Jog");
                assert_eq!(x, Some(1.0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
