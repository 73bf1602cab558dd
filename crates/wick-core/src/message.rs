use serde::{Deserialize, Serialize};

use crate::state::Direction;

/// Messages exchanged over a device session, disambiguated by a `type` tag.
///
/// A frame with a missing or unrecognized tag fails to decode; both ends
/// treat that as a recoverable error (log and skip the frame) rather than
/// a reason to terminate the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Device → hub: snapshot of the commandable fields.
    Status(StatusPayload),
    /// Device → hub: liveness only, no payload.
    Heartbeat,
    /// Hub → device: partial update to apply.
    Command(CommandPayload),
}

impl WireMessage {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fields a device reports about itself.
///
/// Also doubles as the merge input for the hub's state updates: `program`,
/// `random` and `speed` apply only when present, while `direction` and
/// `color` overwrite unconditionally so a device can actively clear them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Partial instruction sent to a device. Absent fields are left alone on
/// the device; `speed` must stay within 1..=100.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CommandPayload {
    /// Whether the speed field, if present, is within the accepted range.
    pub fn speed_in_range(&self) -> bool {
        self.speed.map_or(true, |s| (1..=100).contains(&s))
    }

    /// The state update the hub mirrors locally after dispatching this
    /// command (optimistic echo). Commands never carry `random`.
    pub fn to_update(&self) -> StatusPayload {
        StatusPayload {
            program: self.program.clone(),
            random: None,
            speed: self.speed,
            direction: self.direction,
            color: self.color.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip_with_tag() {
        let msg = WireMessage::Status(StatusPayload {
            program: Some("wave".into()),
            random: Some(false),
            speed: Some(20),
            direction: Some(Direction::Left),
            color: None,
        });
        let json = msg.encode().unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"program\":\"wave\""));
        let parsed = WireMessage::decode(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn heartbeat_is_tag_only() {
        let json = WireMessage::Heartbeat.encode().unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
        assert_eq!(WireMessage::decode(&json).unwrap(), WireMessage::Heartbeat);
    }

    #[test]
    fn command_decodes_partial_fields() {
        let parsed =
            WireMessage::decode(r#"{"type":"command","program":"rb","speed":15}"#).unwrap();
        match parsed {
            WireMessage::Command(cmd) => {
                assert_eq!(cmd.program.as_deref(), Some("rb"));
                assert_eq!(cmd.speed, Some(15));
                assert!(cmd.direction.is_none());
                assert!(cmd.color.is_none());
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn missing_type_fails_to_decode() {
        assert!(WireMessage::decode(r#"{"program":"wave"}"#).is_err());
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        assert!(WireMessage::decode(r#"{"type":"telemetry","volts":12}"#).is_err());
    }

    #[test]
    fn absent_command_fields_are_omitted() {
        let msg = WireMessage::Command(CommandPayload {
            program: Some("cop".into()),
            ..Default::default()
        });
        let json = msg.encode().unwrap();
        assert_eq!(json, r#"{"type":"command","program":"cop"}"#);
    }

    #[test]
    fn speed_range_check() {
        let ok = CommandPayload {
            speed: Some(100),
            ..Default::default()
        };
        assert!(ok.speed_in_range());
        assert!(CommandPayload::default().speed_in_range());
        let low = CommandPayload {
            speed: Some(0),
            ..Default::default()
        };
        assert!(!low.speed_in_range());
    }

    #[test]
    fn command_echo_never_touches_random() {
        let cmd = CommandPayload {
            program: Some("wave".into()),
            speed: Some(30),
            direction: None,
            color: None,
        };
        let update = cmd.to_update();
        assert_eq!(update.program.as_deref(), Some("wave"));
        assert!(update.random.is_none());
        assert!(update.direction.is_none());
    }
}
