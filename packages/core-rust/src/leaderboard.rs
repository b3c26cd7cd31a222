//! Top-play leaderboard records and the recompute rules applied to them.
//!
//! A top-plays entry holds a list of records. Each run assigns missing
//! UUIDs, recomputes `points` from `score` and the theme difficulty, sorts
//! descending by points, and keeps only the best [`MAX_TOP_PLAYS`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::TransformError;

/// Maximum number of records kept per leaderboard entry.
pub const MAX_TOP_PLAYS: usize = 3;

/// Theme difficulty, which scales a play's score into points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Interprets a raw `theme_difficulty` field.
    ///
    /// Absent, non-string, or unrecognized values fall back to `Medium`.
    #[must_use]
    pub fn from_field(raw: Option<&Value>) -> Self {
        match raw.and_then(Value::as_str) {
            Some("easy") => Self::Easy,
            Some("hard") => Self::Hard,
            _ => Self::Medium,
        }
    }

    #[must_use]
    pub fn multiplier(self) -> u8 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

/// One play in a top-plays list.
///
/// Fields the recompute does not own are carried through untouched in
/// `extra`, and `theme_difficulty` is preserved as written. A stored `uuid`
/// or `points` of the wrong type reads as absent: both are rewritten by
/// [`TopPlayRecord::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPlayRecord {
    pub score: Number,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_difficulty: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub uuid: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub points: Option<Number>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TopPlayRecord {
    /// Effective difficulty used for scoring.
    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        Difficulty::from_field(self.theme_difficulty.as_ref())
    }

    /// Computes `score * multiplier`, keeping integer scores integral.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Malformed`] if the product is not a finite number.
    pub fn compute_points(&self) -> Result<Number, TransformError> {
        let multiplier = self.difficulty().multiplier();
        if let Some(points) = self
            .score
            .as_i64()
            .and_then(|score| score.checked_mul(i64::from(multiplier)))
        {
            return Ok(Number::from(points));
        }
        self.score
            .as_f64()
            .and_then(|score| Number::from_f64(score * f64::from(multiplier)))
            .ok_or_else(|| {
                TransformError::malformed(format!("score {} is out of range", self.score))
            })
    }

    /// Assigns a UUID if absent and recomputes `points`.
    ///
    /// An existing non-empty UUID is never replaced.
    ///
    /// # Errors
    ///
    /// Propagates [`TopPlayRecord::compute_points`] failures.
    pub fn normalize(&mut self) -> Result<(), TransformError> {
        if self.uuid.as_deref().is_none_or(str::is_empty) {
            self.uuid = Some(uuid::Uuid::new_v4().to_string());
        }
        self.points = Some(self.compute_points()?);
        Ok(())
    }

    fn points_f64(&self) -> f64 {
        self.points.as_ref().and_then(Number::as_f64).unwrap_or(0.0)
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

/// Recomputes a top-plays list.
///
/// Every record is normalized, the list is sorted descending by points, and
/// only the first [`MAX_TOP_PLAYS`] survive. The sort is stable, so running
/// this on its own output returns the same list.
///
/// # Errors
///
/// Returns [`TransformError::Malformed`] if any element is not a record with
/// a numeric `score`.
pub fn recompute(records: &[Value]) -> Result<Vec<TopPlayRecord>, TransformError> {
    let mut plays = records
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut play: TopPlayRecord = serde_json::from_value(raw.clone())
                .map_err(|e| TransformError::malformed(format!("record {index}: {e}")))?;
            play.normalize()?;
            Ok(play)
        })
        .collect::<Result<Vec<_>, TransformError>>()?;

    plays.sort_by(|a, b| b.points_f64().total_cmp(&a.points_f64()));
    plays.truncate(MAX_TOP_PLAYS);
    Ok(plays)
}
