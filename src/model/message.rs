//! Signaling wire protocol
//!
//! Every frame on the socket is a JSON text frame of the form
//! `{"type": "<kind>", "payload": {...}}`. The kind decides the payload shape.
//! Log kinds are open-ended (`logs.<subtype>`) so the envelope is decoded first
//! and the payload second.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::metrics::MetricsUpdate;

pub const KIND_OFFER: &str = "webrtc.offer";
pub const KIND_ANSWER: &str = "webrtc.answer";
pub const KIND_CANDIDATE: &str = "webrtc.candidate";
pub const KIND_CONTROL_START: &str = "control.start";
pub const KIND_ML_DATA: &str = "ml_data";
pub const KIND_ERROR: &str = "error";
pub const LOGS_PREFIX: &str = "logs.";

#[derive(Debug, Error)]
pub enum MessageError {
    /// The frame is not a `{type, payload}` JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The envelope is fine but the payload does not match its kind.
    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as browsers serialise `RTCSessionDescription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// An ICE candidate in `RTCIceCandidate.toJSON()` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LogPayload {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// A decoded signaling frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    ControlStart,
    /// `logs.<subtype>`; informational only.
    Log { subtype: String, message: Option<String> },
    MlData(MetricsUpdate),
    /// The agent refused something we sent, usually the offer.
    Error { reason: String },
    /// Any kind this client does not act on (`pong`, ...).
    Other { kind: String },
}

impl SignalingMessage {
    pub fn kind(&self) -> &str {
        match self {
            SignalingMessage::Offer(_) => KIND_OFFER,
            SignalingMessage::Answer(_) => KIND_ANSWER,
            SignalingMessage::Candidate(_) => KIND_CANDIDATE,
            SignalingMessage::ControlStart => KIND_CONTROL_START,
            SignalingMessage::Log { .. } => "logs",
            SignalingMessage::MlData(_) => KIND_ML_DATA,
            SignalingMessage::Error { .. } => KIND_ERROR,
            SignalingMessage::Other { kind } => kind,
        }
    }

    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| MessageError::Malformed(e.to_string()))?;
        let Envelope { kind, payload } = envelope;

        if let Some(subtype) = kind.strip_prefix(LOGS_PREFIX) {
            let log: LogPayload = payload_or_default(&kind, payload)?;
            return Ok(SignalingMessage::Log {
                subtype: subtype.to_string(),
                message: log.message,
            });
        }

        let message = match kind.as_str() {
            KIND_OFFER => SignalingMessage::Offer(decode_payload(&kind, payload)?),
            KIND_ANSWER => SignalingMessage::Answer(decode_payload(&kind, payload)?),
            KIND_CANDIDATE => SignalingMessage::Candidate(decode_payload(&kind, payload)?),
            KIND_CONTROL_START => SignalingMessage::ControlStart,
            KIND_ML_DATA => SignalingMessage::MlData(payload_or_default(&kind, payload)?),
            KIND_ERROR => {
                let error: ErrorPayload = payload_or_default(&kind, payload)?;
                SignalingMessage::Error {
                    reason: error.reason.unwrap_or_else(|| "unspecified".to_string()),
                }
            }
            _ => SignalingMessage::Other { kind },
        };

        Ok(message)
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        let payload = match self {
            SignalingMessage::Offer(d) | SignalingMessage::Answer(d) => serde_json::to_value(d)?,
            SignalingMessage::Candidate(c) => serde_json::to_value(c)?,
            SignalingMessage::ControlStart | SignalingMessage::Other { .. } => {
                Value::Object(Default::default())
            }
            SignalingMessage::Log { message, .. } => serde_json::json!({ "message": message }),
            SignalingMessage::MlData(update) => serde_json::to_value(update)?,
            SignalingMessage::Error { reason } => serde_json::json!({ "reason": reason }),
        };

        let kind = match self {
            SignalingMessage::Log { subtype, .. } => format!("{LOGS_PREFIX}{subtype}"),
            other => other.kind().to_string(),
        };

        serde_json::to_string(&Envelope { kind, payload })
    }
}

fn decode_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, MessageError> {
    serde_json::from_value(payload).map_err(|e| MessageError::Payload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

// A missing payload is treated as `{}` for kinds whose fields are all optional.
fn payload_or_default<T: DeserializeOwned + Default>(
    kind: &str,
    payload: Value,
) -> Result<T, MessageError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    decode_payload(kind, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_is_encoded_in_browser_shape() {
        let text = SignalingMessage::Offer(SessionDescription::offer("v=0\r\n"))
            .to_text()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "webrtc.offer");
        assert_eq!(value["payload"]["type"], "offer");
        assert_eq!(value["payload"]["sdp"], "v=0\r\n");
    }

    #[test]
    fn control_start_has_empty_payload() {
        let text = SignalingMessage::ControlStart.to_text().unwrap();
        assert_eq!(text, r#"{"type":"control.start","payload":{}}"#);
    }

    #[test]
    fn candidate_uses_camel_case_fields() {
        let msg = SignalingMessage::Candidate(IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        });
        let value: Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();

        assert_eq!(value["type"], "webrtc.candidate");
        assert_eq!(value["payload"]["sdpMid"], "0");
        assert_eq!(value["payload"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn parses_answer() {
        let msg = SignalingMessage::parse(
            r#"{"type":"webrtc.answer","payload":{"type":"answer","sdp":"v=0"}}"#,
        )
        .unwrap();
        assert_eq!(msg, SignalingMessage::Answer(SessionDescription::answer("v=0")));
    }

    #[test]
    fn answer_without_sdp_is_a_payload_error() {
        let err = SignalingMessage::parse(r#"{"type":"webrtc.answer","payload":{"type":"answer"}}"#)
            .unwrap_err();
        match err {
            MessageError::Payload { kind, .. } => assert_eq!(kind, KIND_ANSWER),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn logs_prefix_matches_any_subtype() {
        let msg = SignalingMessage::parse(
            r#"{"type":"logs.agent_started","payload":{"message":"agent is up"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Log {
                subtype: "agent_started".into(),
                message: Some("agent is up".into()),
            }
        );
    }

    #[test]
    fn log_without_payload_is_accepted() {
        let msg = SignalingMessage::parse(r#"{"type":"logs.tick"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Log { subtype: "tick".into(), message: None });
    }

    #[test]
    fn ml_data_fields_are_optional() {
        let msg = SignalingMessage::parse(r#"{"type":"ml_data","payload":{"stress_level":42}}"#)
            .unwrap();
        let SignalingMessage::MlData(update) = msg else {
            panic!("expected ml_data");
        };
        assert_eq!(update.stress_level, Some(42.0));
        assert_eq!(update.breathing_rate, None);
        assert_eq!(update.confidence, None);
        assert_eq!(update.heart_rate, None);
    }

    #[test]
    fn ml_data_with_wrong_types_is_rejected() {
        let err = SignalingMessage::parse(r#"{"type":"ml_data","payload":{"stress_level":"high"}}"#)
            .unwrap_err();
        assert!(matches!(err, MessageError::Payload { .. }));
    }

    #[test]
    fn agent_error_carries_reason() {
        let msg = SignalingMessage::parse(
            r#"{"type":"error","payload":{"reason":"Invalid offer payload"}}"#,
        )
        .unwrap();
        assert_eq!(msg, SignalingMessage::Error { reason: "Invalid offer payload".into() });
    }

    #[test]
    fn unknown_kinds_are_kept_as_other() {
        let msg = SignalingMessage::parse(r#"{"type":"pong","payload":{"ts":1}}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Other { kind: "pong".into() });
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            SignalingMessage::parse("hello"),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            SignalingMessage::parse(r#"{"payload":{}}"#),
            Err(MessageError::Malformed(_))
        ));
    }
}
