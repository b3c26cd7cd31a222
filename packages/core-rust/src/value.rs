use serde::{Deserialize, Serialize};

/// Value of a single remote entry as returned by the datastore.
///
/// The remote store does not guarantee structured JSON for every key, so a
/// fetched body is either decoded JSON or the raw response text. Transforms
/// match on the variant they require and report a malformed entry otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntryValue {
    /// Body decoded as JSON (scalar, object, or array).
    Json(serde_json::Value),
    /// Body that was not JSON, kept verbatim.
    Text(String),
}

impl EntryValue {
    /// Decodes a response body according to its content type.
    ///
    /// Bodies with a JSON content type are parsed; a body that claims JSON
    /// but fails to parse falls back to `Text` rather than erroring.
    #[must_use]
    pub fn decode(content_type: Option<&str>, body: &str) -> Self {
        let is_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
        if is_json {
            if let Ok(value) = serde_json::from_str(body) {
                return Self::Json(value);
            }
        }
        Self::Text(body.to_string())
    }

    /// Returns the JSON value, if this entry decoded as JSON.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Converts the entry into a JSON value suitable for writing back.
    ///
    /// Text entries become JSON strings.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => serde_json::Value::String(text),
        }
    }

    /// Short shape name used in log and skip messages.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Json(serde_json::Value::Null) => "null",
            Self::Json(serde_json::Value::Bool(_)) => "bool",
            Self::Json(serde_json::Value::Number(_)) => "number",
            Self::Json(serde_json::Value::String(_)) => "string",
            Self::Json(serde_json::Value::Array(_)) => "array",
            Self::Json(serde_json::Value::Object(_)) => "object",
            Self::Text(_) => "text",
        }
    }
}

/// One key/value pair read from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: EntryValue,
}
