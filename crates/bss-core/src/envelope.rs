//! Structured event envelope (CloudEvents JSON format).
//!
//! Every message pushed by the backend event stream is one JSON-serialized
//! [`Envelope`]. The dispatcher only looks at [`Envelope::event_type`]; the
//! `data` payload stays opaque until a typed consumer interprets it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DecodeError;

/// CloudEvents spec version emitted by the backend.
pub const SPEC_VERSION: &str = "1.0";

/// Default content type of the `data` attribute.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The decoded unit of transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Producer-assigned identifier, used for logging and correlation only.
    pub id: String,
    /// Producer identity.
    pub source: String,
    /// Dot-namespaced, versioned event type (`<domain>.<aggregate>.<event>.v<N>`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// CloudEvents spec version.
    pub specversion: String,
    /// Content type of `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    /// ISO-8601 production timestamp. Informational; never used for ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Event payload, opaque to the dispatcher.
    #[serde(default)]
    pub data: Value,
    /// Extension attributes (`traceparent`, `correlationid`, ...).
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl Envelope {
    /// Build an envelope with spec version `1.0` and a JSON content type.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            event_type: event_type.into(),
            specversion: SPEC_VERSION.to_owned(),
            datacontenttype: Some(JSON_CONTENT_TYPE.to_owned()),
            time: None,
            data,
            extensions: Map::new(),
        }
    }

    /// Set the `time` attribute.
    #[must_use]
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    /// Decode a raw message body.
    ///
    /// Fails when the body is not a JSON object of the envelope shape or when
    /// one of `id`, `source`, `type`, `specversion` is empty.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope: Self = serde_json::from_str(raw)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize `data` into a typed payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Look up an extension attribute.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(name)
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let required = [
            ("id", &self.id),
            ("source", &self.source),
            ("type", &self.event_type),
            ("specversion", &self.specversion),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(DecodeError::EmptyAttribute(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn raw(value: &Value) -> String {
        serde_json::to_string(value).unwrap()
    }

    #[test]
    fn decode_full_envelope() {
        let body = raw(&json!({
            "id": "evt-1",
            "source": "urn:bss:billing",
            "type": "org.billing.payment.completed.v1",
            "specversion": "1.0",
            "datacontenttype": "application/json",
            "time": "2026-01-01T00:00:00Z",
            "data": {"amount": 10}
        }));
        let env = Envelope::decode(&body).unwrap();
        assert_eq!(env.id, "evt-1");
        assert_eq!(env.event_type, "org.billing.payment.completed.v1");
        assert_eq!(env.time.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(env.data["amount"], 10);
        assert!(env.extensions.is_empty());
    }

    #[test]
    fn decode_minimal_envelope() {
        let body = raw(&json!({
            "id": "1", "source": "s", "type": "a.b.created.v1", "specversion": "1.0"
        }));
        let env = Envelope::decode(&body).unwrap();
        assert_eq!(env.data, Value::Null);
        assert!(env.datacontenttype.is_none());
    }

    #[test]
    fn decode_keeps_extensions() {
        let body = raw(&json!({
            "id": "1", "source": "s", "type": "t", "specversion": "1.0",
            "correlationid": "corr-9"
        }));
        let env = Envelope::decode(&body).unwrap();
        assert_eq!(env.extension("correlationid"), Some(&json!("corr-9")));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert_matches!(Envelope::decode("not json"), Err(DecodeError::Json(_)));
    }

    #[test]
    fn decode_rejects_missing_type() {
        let body = raw(&json!({"id": "1", "source": "s", "specversion": "1.0"}));
        assert_matches!(Envelope::decode(&body), Err(DecodeError::Json(_)));
    }

    #[test]
    fn decode_rejects_empty_type() {
        let body = raw(&json!({"id": "1", "source": "s", "type": " ", "specversion": "1.0"}));
        assert_matches!(Envelope::decode(&body), Err(DecodeError::EmptyAttribute("type")));
    }

    #[test]
    fn decode_rejects_json_array() {
        assert_matches!(Envelope::decode("[1,2,3]"), Err(DecodeError::Json(_)));
    }

    #[test]
    fn encode_uses_wire_names() {
        let env = Envelope::new("1", "s", "a.b.created.v1", json!({"x": 1}))
            .with_time("2026-01-01T00:00:00Z");
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "a.b.created.v1");
        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["datacontenttype"], "application/json");
        assert!(value.get("event_type").is_none());
    }

    #[test]
    fn data_as_typed() {
        #[derive(Deserialize)]
        struct Payment {
            amount: u32,
        }
        let env = Envelope::new("1", "s", "pay.completed.v1", json!({"amount": 10}));
        let payment: Payment = env.data_as().unwrap();
        assert_eq!(payment.amount, 10);
    }
}
