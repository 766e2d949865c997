/// Uniform result wrapper returned by every agent and aggregated per plan step.
///
/// On the wire it is `{"success": true, "result": ...}` or
/// `{"success": false, "error": "..."}`; exactly one of `result`/`error` is present.
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EnvelopeWire", try_from = "EnvelopeWire")]
pub enum Envelope {
    Success(Value),
    Failure(String),
}

impl Envelope {
    pub fn success(result: impl Into<Value>) -> Self {
        Envelope::Success(result.into())
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Envelope::Failure(error.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Envelope::Success(value) => Some(value),
            Envelope::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Envelope::Success(_) => None,
            Envelope::Failure(message) => Some(message),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Envelope> for EnvelopeWire {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Success(result) => EnvelopeWire {
                success: true,
                result: Some(result),
                error: None,
            },
            Envelope::Failure(error) => EnvelopeWire {
                success: false,
                result: None,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<EnvelopeWire> for Envelope {
    type Error = String;

    fn try_from(wire: EnvelopeWire) -> Result<Self, Self::Error> {
        match (wire.success, wire.result, wire.error) {
            (true, Some(result), None) => Ok(Envelope::Success(result)),
            // `result: null` deserializes to `None`.
            (true, None, None) => Ok(Envelope::Success(Value::Null)),
            (false, None, Some(error)) => Ok(Envelope::Failure(error)),
            (true, _, Some(_)) => Err("successful envelope must not carry an error".to_string()),
            (false, Some(_), _) => Err("failed envelope must not carry a result".to_string()),
            (false, None, None) => Err("failed envelope requires an error message".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_serializes_without_error_field() {
        let value = serde_json::to_value(Envelope::success(json!({"id": 1}))).unwrap();
        assert_eq!(value, json!({"success": true, "result": {"id": 1}}));
    }

    #[test]
    fn failure_serializes_without_result_field() {
        let value = serde_json::to_value(Envelope::failure("Agent 'x' not found")).unwrap();
        assert_eq!(
            value,
            json!({"success": false, "error": "Agent 'x' not found"})
        );
    }

    #[test]
    fn mixed_wire_shapes_are_rejected() {
        let parsed =
            serde_json::from_value::<Envelope>(json!({"success": false, "result": 1, "error": "x"}));
        assert!(parsed.is_err());
        let parsed = serde_json::from_value::<Envelope>(json!({"success": false}));
        assert!(parsed.is_err());
    }
}
