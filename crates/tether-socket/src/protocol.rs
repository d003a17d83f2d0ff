//! Wire envelopes exchanged with the remote debugging endpoint.
//!
//! Outgoing commands are `{"id", "method", "params"?}` objects. Inbound
//! frames are decoded into a permissive [`Envelope`] and then classified as
//! a command response, an event, or a malformed message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::CommandError;
use crate::ids::CommandId;

/// An outgoing command payload.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPayload<'a> {
    /// Correlation id assigned at submission.
    pub id: CommandId,
    /// Method to invoke, e.g. `Page.navigate`.
    pub method: &'a str,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

/// Error object carried by a failed command response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code: {code})")]
pub struct ProtocolError {
    /// Error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// Optional additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    /// Message attached to envelopes that are neither responses nor events.
    pub const UNKNOWN_RESPONSE: &'static str = "Unknown response from web socket";

    /// Builds an error with no attached data.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Permissive decoding of one inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Envelope {
    /// Id of the command this frame answers; absent for events.
    #[serde(default)]
    pub id: Option<i64>,
    /// Event name; absent for responses.
    #[serde(default)]
    pub method: Option<String>,
    /// Event parameters.
    #[serde(default)]
    pub params: Option<Value>,
    /// Successful command result.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failed command error.
    #[serde(default)]
    pub error: Option<ProtocolError>,
}

impl Envelope {
    /// Decodes a JSON value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the value does not have envelope
    /// shape (for instance an array, or a string `id`).
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Routes the envelope by shape.
    ///
    /// A positive `id` marks a response even if `method` is also present. A
    /// non-empty `method` with a missing or zero `id` marks an event.
    /// Everything else is malformed.
    #[must_use]
    pub fn classify(self) -> Inbound {
        let id = self.id.unwrap_or(0);
        if let Ok(raw) = u64::try_from(id)
            && raw > 0
        {
            let outcome = match (self.error, self.result) {
                (Some(error), _) => Err(CommandError::Protocol(error)),
                (None, result) => Ok(result.unwrap_or(Value::Null)),
            };
            return Inbound::Response(Response {
                id: CommandId::from_raw(raw),
                outcome,
            });
        }

        match self.method {
            Some(method) if id == 0 && !method.is_empty() => Inbound::Event(Event {
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            method => Inbound::Malformed(Self { method, ..self }),
        }
    }
}

/// Classified inbound message.
#[derive(Debug)]
pub enum Inbound {
    /// Answer to a previously submitted command.
    Response(Response),
    /// Unsolicited notification.
    Event(Event),
    /// Frame with neither a usable id nor a method.
    Malformed(Envelope),
}

/// A decoded command response.
#[derive(Debug)]
pub struct Response {
    /// Id of the answered command.
    pub id: CommandId,
    /// Result payload or error.
    pub outcome: crate::CommandOutcome,
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name, e.g. `Page.loadEventFired`.
    pub method: String,
    /// Event payload; `null` when the frame carried none.
    pub params: Value,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn classify(value: Value) -> Inbound {
        Envelope::from_value(value)
            .expect("envelope should decode")
            .classify()
    }

    #[rstest]
    fn serialises_command_with_params() {
        let params = json!({"url": "about:blank"});
        let payload = CommandPayload {
            id: CommandId::from_raw(7),
            method: "Page.navigate",
            params: Some(&params),
        };
        let encoded = serde_json::to_value(&payload).expect("serialization failed");
        assert_eq!(
            encoded,
            json!({"id": 7, "method": "Page.navigate", "params": {"url": "about:blank"}})
        );
    }

    #[rstest]
    fn omits_absent_params() {
        let payload = CommandPayload {
            id: CommandId::from_raw(1),
            method: "Page.enable",
            params: None,
        };
        let encoded = serde_json::to_string(&payload).expect("serialization failed");
        assert_eq!(encoded, r#"{"id":1,"method":"Page.enable"}"#);
    }

    #[rstest]
    fn classifies_success_response() {
        match classify(json!({"id": 1, "result": {"ok": true}})) {
            Inbound::Response(response) => {
                assert_eq!(response.id, CommandId::from_raw(1));
                assert_eq!(response.outcome.expect("success"), json!({"ok": true}));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[rstest]
    fn response_without_result_resolves_to_null() {
        match classify(json!({"id": 3})) {
            Inbound::Response(response) => {
                assert_eq!(response.outcome.expect("success"), Value::Null);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[rstest]
    fn classifies_error_response() {
        let frame = json!({
            "id": 2,
            "error": {"code": -32601, "message": "'Foo.bar' wasn't found", "data": "detail"}
        });
        match classify(frame) {
            Inbound::Response(response) => match response.outcome {
                Err(CommandError::Protocol(error)) => {
                    assert_eq!(error.code, -32601);
                    assert_eq!(error.data, Some(json!("detail")));
                }
                other => panic!("expected protocol error, got {other:?}"),
            },
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[rstest]
    #[case(json!({"method": "Foo.changed", "params": {"x": 1}}), json!({"x": 1}))]
    #[case(json!({"id": 0, "method": "Foo.changed", "params": {"x": 1}}), json!({"x": 1}))]
    #[case(json!({"method": "Foo.changed"}), Value::Null)]
    fn classifies_events(#[case] frame: Value, #[case] params: Value) {
        match classify(frame) {
            Inbound::Event(event) => {
                assert_eq!(event.method, "Foo.changed");
                assert_eq!(event.params, params);
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!({"method": ""}))]
    #[case(json!({"id": -4, "method": "Foo.changed"}))]
    #[case(json!({"params": {"x": 1}}))]
    fn classifies_malformed_frames(#[case] frame: Value) {
        assert!(matches!(classify(frame), Inbound::Malformed(_)));
    }

    #[rstest]
    fn rejects_non_object_frames() {
        assert!(Envelope::from_value(json!([1, 2, 3])).is_err());
    }
}
