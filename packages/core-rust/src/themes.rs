//! Theme summary projection.
//!
//! Each theme entry is projected into a [`ThemeSummaryRecord`]; the full list
//! is written under [`SUMMARY_KEY`] once a store has been scanned, replacing
//! whatever aggregate was there before.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum length of a summarized description, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 300;

/// Well-known key the aggregate summary list is stored under.
pub const SUMMARY_KEY: &str = "ThemeSummaries";

/// Bounded projection of a theme entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ThemeSummaryRecord {
    /// Key of the source theme entry.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl ThemeSummaryRecord {
    /// Projects a theme object into its summary.
    #[must_use]
    pub fn from_theme(key: &str, theme: &Map<String, Value>) -> Self {
        let text = |field: &str| theme.get(field).and_then(Value::as_str).map(str::to_string);
        let present = |field: &str| theme.get(field).filter(|v| !v.is_null()).cloned();

        Self {
            key: key.to_string(),
            name: text("Name"),
            difficulty: text("Difficulty"),
            description: theme
                .get("Description")
                .and_then(Value::as_str)
                .map(truncate_description),
            creator: present("Creator"),
            code: present("Code"),
        }
    }
}

/// Returns the first [`DESCRIPTION_MAX_CHARS`] characters of `description`.
#[must_use]
pub fn truncate_description(description: &str) -> String {
    match description.char_indices().nth(DESCRIPTION_MAX_CHARS) {
        Some((byte_index, _)) => description[..byte_index].to_string(),
        None => description.to_string(),
    }
}
