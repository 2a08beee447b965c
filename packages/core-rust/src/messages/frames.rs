//! Inbound frame parsing and the closed control-frame schema.
//!
//! The parse boundary is strict about shape (a frame must be a JSON object,
//! `type` and `request_id` must be strings when present) and permissive
//! about vocabulary: an unrecognized `type` is an application frame, not an
//! error, so new client-side message kinds flow through to the response
//! sink without a broker release.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ClientRole;

// ---------------------------------------------------------------------------
// Control frames
// ---------------------------------------------------------------------------

/// Frames consumed by the hub itself rather than routed onward.
///
/// Internally tagged on `"type"` with `SCREAMING_SNAKE_CASE` variant names
/// to match the browser clients' wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlFrame {
    /// Liveness probe. Emitted periodically by the hub; a client may also
    /// probe the hub.
    Ping,
    /// Answer to a liveness probe.
    Pong,
    /// Client announces it is connected and ready to receive commands.
    ClientReady(ClientReadyPayload),
    /// The client's page scripting context is attached and observable.
    DomReady(DomReadyPayload),
}

/// Payload of a [`ControlFrame::ClientReady`] frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientReadyPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<ClientRole>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// Payload of a [`ControlFrame::DomReady`] frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomReadyPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
}

impl ControlFrame {
    /// Serializes the frame to its single-line JSON wire form.
    ///
    /// # Panics
    ///
    /// Never panics: control frames contain only JSON-representable data.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("control frame serialization cannot fail")
    }

    fn is_control_type(kind: &str) -> bool {
        matches!(kind, "PING" | "PONG" | "CLIENT_READY" | "DOM_READY")
    }
}

// ---------------------------------------------------------------------------
// Application frames
// ---------------------------------------------------------------------------

/// A well-formed frame that is not a control frame.
///
/// Only the routing fields are lifted out; `raw` retains the full original
/// object so the generic sink forwards exactly what the client sent.
#[derive(Debug, Clone, PartialEq)]
pub struct AppFrame {
    /// The frame's `type` field, if present.
    pub kind: Option<String>,
    /// Correlation id echoed from an earlier request, if present.
    pub request_id: Option<String>,
    /// The frame's `payload` field; `Null` when absent.
    pub payload: Value,
    /// The complete original frame object.
    pub raw: Value,
}

/// A parsed inbound frame, split at the control/application boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Control(ControlFrame),
    App(AppFrame),
}

/// Error produced when an inbound frame fails shape validation.
#[derive(Debug, thiserror::Error)]
pub enum FrameParseError {
    /// The text is not valid JSON at all.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The text is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The `type` field is present but not a string.
    #[error("frame `type` is not a string")]
    InvalidType,
    /// The `request_id` field is present but not a string.
    #[error("frame `request_id` is not a string")]
    InvalidRequestId,
    /// The `type` names a control frame but the payload does not match
    /// that frame's schema.
    #[error("malformed {kind} control frame: {source}")]
    InvalidControl {
        kind: String,
        source: serde_json::Error,
    },
}

impl InboundFrame {
    /// Parses one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameParseError`] when the text is not a JSON object,
    /// when `type`/`request_id` have the wrong JSON type, or when a control
    /// `type` carries a payload that does not match its schema. Callers
    /// log and drop such frames; a parse error is never fatal to the
    /// connection.
    pub fn parse(text: &str) -> Result<Self, FrameParseError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(FrameParseError::NotAnObject);
        };

        let kind = match object.get("type") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(FrameParseError::InvalidType),
        };

        if let Some(kind) = kind.as_deref() {
            if ControlFrame::is_control_type(kind) {
                let control = serde_json::from_value::<ControlFrame>(value.clone()).map_err(
                    |source| FrameParseError::InvalidControl {
                        kind: kind.to_string(),
                        source,
                    },
                )?;
                return Ok(Self::Control(control));
            }
        }

        let request_id = match object.get("request_id") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(FrameParseError::InvalidRequestId),
        };
        let payload = object.get("payload").cloned().unwrap_or(Value::Null);

        Ok(Self::App(AppFrame {
            kind,
            request_id,
            payload,
            raw: value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_and_pong_parse_as_control() {
        assert_eq!(
            InboundFrame::parse(r#"{"type":"PING"}"#).unwrap(),
            InboundFrame::Control(ControlFrame::Ping)
        );
        assert_eq!(
            InboundFrame::parse(r#"{"type":"PONG"}"#).unwrap(),
            InboundFrame::Control(ControlFrame::Pong)
        );
    }

    #[test]
    fn ping_wire_form_is_bare_type_object() {
        assert_eq!(ControlFrame::Ping.to_wire(), r#"{"type":"PING"}"#);
    }

    #[test]
    fn client_ready_carries_role() {
        let frame =
            InboundFrame::parse(r#"{"type":"CLIENT_READY","role":"extension"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Control(ControlFrame::ClientReady(ClientReadyPayload {
                role: Some(ClientRole::Extension),
                message: None,
            }))
        );
    }

    #[test]
    fn reply_without_type_is_an_app_frame() {
        // Replies only echo the correlation id; `type` is optional.
        let frame = InboundFrame::parse(r#"{"request_id":"r1","payload":"pong"}"#).unwrap();
        let InboundFrame::App(app) = frame else {
            panic!("expected app frame");
        };
        assert_eq!(app.kind, None);
        assert_eq!(app.request_id.as_deref(), Some("r1"));
        assert_eq!(app.payload, json!("pong"));
    }

    #[test]
    fn unknown_type_is_an_app_frame_not_an_error() {
        let frame =
            InboundFrame::parse(r#"{"type":"CHAT_OUTPUT","payload":{"text":"hi"}}"#).unwrap();
        let InboundFrame::App(app) = frame else {
            panic!("expected app frame");
        };
        assert_eq!(app.kind.as_deref(), Some("CHAT_OUTPUT"));
        assert_eq!(app.request_id, None);
        assert_eq!(app.raw["payload"]["text"], json!("hi"));
    }

    #[test]
    fn non_object_frames_are_rejected() {
        assert!(matches!(
            InboundFrame::parse("[1,2,3]"),
            Err(FrameParseError::NotAnObject)
        ));
        assert!(matches!(
            InboundFrame::parse("not json"),
            Err(FrameParseError::Json(_))
        ));
    }

    #[test]
    fn wrong_field_types_are_rejected() {
        assert!(matches!(
            InboundFrame::parse(r#"{"type":42}"#),
            Err(FrameParseError::InvalidType)
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"type":"X","request_id":7}"#),
            Err(FrameParseError::InvalidRequestId)
        ));
    }

    #[test]
    fn malformed_control_payload_is_rejected() {
        let err = InboundFrame::parse(r#"{"type":"CLIENT_READY","role":17}"#).unwrap_err();
        assert!(matches!(err, FrameParseError::InvalidControl { .. }));
    }
}
