use serde::{Deserialize, Serialize};

/// One relayed telemetry value.  Sent both for live updates and for cache
/// replay, a client cannot tell the two apart and does not need to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub topic: String,
    pub data: String,
    pub timestamp: u64,
}

/// Control message, currently only the connection acknowledgment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
}

impl StatusEnvelope {
    pub fn connected() -> Self {
        StatusEnvelope {
            kind: "status".to_string(),
            msg: "connected to telemetry relay".to_string(),
        }
    }
}

/// Everything a client can receive over the socket.  There is no version
/// field on the wire, frames that match neither shape are dropped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Status(StatusEnvelope),
    Telemetry(RelayEnvelope),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_envelope_wire_shape() {
        let envelope = RelayEnvelope {
            topic: "teslamate/cars/1/speed".to_string(),
            data: "88".to_string(),
            timestamp: 1700000000000,
        };
        let frame = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            frame,
            r#"{"topic":"teslamate/cars/1/speed","data":"88","timestamp":1700000000000}"#
        );
    }

    #[test]
    fn status_envelope_uses_type_tag() {
        let frame = serde_json::to_string(&StatusEnvelope::connected()).unwrap();
        assert!(frame.starts_with(r#"{"type":"status""#));
    }

    #[test]
    fn wire_message_decodes_both_shapes() {
        let status: WireMessage =
            serde_json::from_str(r#"{"type":"status","msg":"hi"}"#).unwrap();
        assert!(matches!(status, WireMessage::Status(_)));

        let telemetry: WireMessage =
            serde_json::from_str(r#"{"topic":"t","data":"1","timestamp":2}"#).unwrap();
        assert!(matches!(telemetry, WireMessage::Telemetry(_)));
    }

    #[test]
    fn unknown_frame_is_an_error_not_a_panic() {
        assert!(serde_json::from_str::<WireMessage>(r#"{"hello":"world"}"#).is_err());
    }
}
