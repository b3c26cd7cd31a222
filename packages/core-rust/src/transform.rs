//! Per-key transforms applied by a store scan.
//!
//! A [`Transform`] maps a key and its current value to a [`TransformOutcome`].
//! Transforms must be idempotent: a rate-limited page is restarted from its
//! first key, so the same key may be transformed more than once per scan.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransformError;
use crate::leaderboard;
use crate::themes::{ThemeSummaryRecord, SUMMARY_KEY};
use crate::value::EntryValue;

/// Maintenance tasks the scan engine can run.
///
/// Every task writes remote state (mirror-ranking writes to the ranking map
/// rather than the scanned store), so every scan needs a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    Wipe,
    RecomputeLeaderboard,
    SummarizeThemes,
    MirrorRanking,
}

impl Task {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wipe => "wipe",
            Self::RecomputeLeaderboard => "recompute-leaderboard",
            Self::SummarizeThemes => "summarize-themes",
            Self::MirrorRanking => "mirror-ranking",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Update forwarded to the ranking collaborator by [`MirrorToRanking`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankUpdate {
    pub map_name: String,
    pub key: String,
    pub record: Value,
    pub sort_value: i64,
}

/// What the scan should do with a key after transforming it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// Overwrite the entry with this value.
    Write(Value),
    /// Delete the entry.
    Delete,
    /// Forward a ranked record to the ranking collaborator.
    Rank(RankUpdate),
    /// The value was absorbed into the transform's aggregate; nothing to write yet.
    Collected,
    /// Leave the entry alone.
    Skip { reason: String },
}

/// A single write emitted once a full store scan completes.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateWrite {
    /// Target store, or `None` for the store that was scanned.
    pub store: Option<String>,
    pub key: String,
    pub value: Value,
}

/// A per-key maintenance transform.
pub trait Transform: Send {
    fn task(&self) -> Task;

    /// Whether the entry value must be fetched before [`Transform::apply`].
    fn needs_value(&self) -> bool {
        true
    }

    /// Decides what to do with one key.
    ///
    /// `value` is `None` only when [`Transform::needs_value`] returns `false`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the value cannot be processed. The
    /// error is recorded against the key; the scan continues.
    fn apply(
        &mut self,
        key: &str,
        value: Option<&EntryValue>,
    ) -> Result<TransformOutcome, TransformError>;

    /// Called once after the last page of a completed scan.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] when the aggregate cannot be built. The
    /// scan then fails instead of completing without its aggregate.
    fn finish(&mut self) -> Result<Option<AggregateWrite>, TransformError> {
        Ok(None)
    }
}

fn skip(reason: impl Into<String>) -> TransformOutcome {
    TransformOutcome::Skip {
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Wipe
// ---------------------------------------------------------------------------

/// Deletes every key it is applied to.
#[derive(Debug, Default)]
pub struct Wipe;

impl Transform for Wipe {
    fn task(&self) -> Task {
        Task::Wipe
    }

    fn needs_value(&self) -> bool {
        false
    }

    fn apply(
        &mut self,
        _key: &str,
        _value: Option<&EntryValue>,
    ) -> Result<TransformOutcome, TransformError> {
        Ok(TransformOutcome::Delete)
    }
}

// ---------------------------------------------------------------------------
// RecomputeLeaderboard
// ---------------------------------------------------------------------------

/// Rewrites each top-plays list with fresh points, sorted and truncated.
#[derive(Debug, Default)]
pub struct RecomputeLeaderboard;

impl Transform for RecomputeLeaderboard {
    fn task(&self) -> Task {
        Task::RecomputeLeaderboard
    }

    fn apply(
        &mut self,
        _key: &str,
        value: Option<&EntryValue>,
    ) -> Result<TransformOutcome, TransformError> {
        let value = value.ok_or(TransformError::MissingValue)?;
        let Some(Value::Array(records)) = value.as_json() else {
            return Ok(skip(format!("expected a list of plays, found {}", value.shape())));
        };

        let plays = leaderboard::recompute(records)?;
        let encoded = serde_json::to_value(&plays)
            .map_err(|e| TransformError::malformed(format!("cannot encode plays: {e}")))?;
        Ok(TransformOutcome::Write(encoded))
    }
}

// ---------------------------------------------------------------------------
// SummarizeThemes
// ---------------------------------------------------------------------------

/// Collects a summary per theme and emits them as one aggregate write.
///
/// Summaries are keyed by entry key, so re-applying a key after a page
/// restart replaces its summary instead of duplicating it.
#[derive(Debug)]
pub struct SummarizeThemes {
    target_store: Option<String>,
    summaries: Vec<ThemeSummaryRecord>,
    index: HashMap<String, usize>,
}

impl SummarizeThemes {
    /// Creates a summarizer writing to `target_store`, or to the scanned
    /// store when `None`.
    #[must_use]
    pub fn new(target_store: Option<String>) -> Self {
        Self {
            target_store,
            summaries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Summaries collected so far, in first-seen order.
    #[must_use]
    pub fn summaries(&self) -> &[ThemeSummaryRecord] {
        &self.summaries
    }
}

impl Default for SummarizeThemes {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transform for SummarizeThemes {
    fn task(&self) -> Task {
        Task::SummarizeThemes
    }

    fn apply(
        &mut self,
        key: &str,
        value: Option<&EntryValue>,
    ) -> Result<TransformOutcome, TransformError> {
        if key == SUMMARY_KEY {
            return Ok(skip("aggregate summary key"));
        }
        let value = value.ok_or(TransformError::MissingValue)?;
        let Some(Value::Object(theme)) = value.as_json() else {
            return Ok(skip(format!("expected a theme object, found {}", value.shape())));
        };

        let summary = ThemeSummaryRecord::from_theme(key, theme);
        if let Some(&slot) = self.index.get(key) {
            tracing::debug!(key, "replacing previously collected theme summary");
            self.summaries[slot] = summary;
        } else {
            self.index.insert(key.to_string(), self.summaries.len());
            self.summaries.push(summary);
        }
        Ok(TransformOutcome::Collected)
    }

    fn finish(&mut self) -> Result<Option<AggregateWrite>, TransformError> {
        if self.summaries.is_empty() {
            return Ok(None);
        }
        let value = serde_json::to_value(&self.summaries)
            .map_err(|e| TransformError::malformed(format!("cannot encode summaries: {e}")))?;
        Ok(Some(AggregateWrite {
            store: self.target_store.clone(),
            key: SUMMARY_KEY.to_string(),
            value,
        }))
    }
}

// ---------------------------------------------------------------------------
// MirrorToRanking
// ---------------------------------------------------------------------------

/// Default sorted map that player points are mirrored into.
pub const DEFAULT_RANKING_MAP: &str = "TopPointsV2";

/// Field holding a player's total points.
pub const POINTS_FIELD: &str = "TotalPoints";

/// Record stored in the ranking map for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub uid: String,
    pub name: Option<String>,
    pub points: i64,
}

/// Extracts the player id from a key such as `Player_1234`.
///
/// The id is everything after the first `_`, so `Player_12_34` yields
/// `12_34` rather than only the segment up to the next `_`. Keys without a
/// `_` are used whole.
#[must_use]
pub fn player_id(key: &str) -> &str {
    key.split_once('_').map_or(key, |(_, id)| id)
}

/// Forwards each player's points to a ranking sorted map. Read-only on the
/// scanned store.
#[derive(Debug)]
pub struct MirrorToRanking {
    map_name: String,
}

impl MirrorToRanking {
    #[must_use]
    pub fn new(map_name: impl Into<String>) -> Self {
        Self {
            map_name: map_name.into(),
        }
    }
}

impl Default for MirrorToRanking {
    fn default() -> Self {
        Self::new(DEFAULT_RANKING_MAP)
    }
}

/// Reads an integral points value; whole-number floats are accepted.
fn integral_points(value: &Value) -> Option<i64> {
    if let Some(points) = value.as_i64() {
        return Some(points);
    }
    let points = value.as_f64()?;
    #[allow(clippy::cast_possible_truncation)]
    let whole = points as i64;
    #[allow(clippy::cast_precision_loss)]
    let exact = (whole as f64 - points).abs() < f64::EPSILON;
    (points.is_finite() && exact).then_some(whole)
}

impl Transform for MirrorToRanking {
    fn task(&self) -> Task {
        Task::MirrorRanking
    }

    fn apply(
        &mut self,
        key: &str,
        value: Option<&EntryValue>,
    ) -> Result<TransformOutcome, TransformError> {
        let value = value.ok_or(TransformError::MissingValue)?;
        let Some(Value::Object(player)) = value.as_json() else {
            return Ok(skip(format!("expected a player object, found {}", value.shape())));
        };
        let Some(points) = player.get(POINTS_FIELD).and_then(integral_points) else {
            return Ok(skip(format!("missing valid '{POINTS_FIELD}'")));
        };

        let record = RankedPlayer {
            uid: player_id(key).to_string(),
            name: player.get("Name").and_then(Value::as_str).map(str::to_string),
            points,
        };
        let record = serde_json::to_value(&record)
            .map_err(|e| TransformError::malformed(format!("cannot encode ranked player: {e}")))?;

        Ok(TransformOutcome::Rank(RankUpdate {
            map_name: self.map_name.clone(),
            key: key.to_string(),
            record,
            sort_value: points,
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn json(value: Value) -> EntryValue {
        EntryValue::Json(value)
    }

    #[test]
    fn wipe_deletes_without_value() {
        let mut wipe = Wipe;
        assert!(!wipe.needs_value());
        assert_eq!(wipe.apply("k", None).unwrap(), TransformOutcome::Delete);
    }

    #[test]
    fn leaderboard_writes_recomputed_list() {
        let mut t = RecomputeLeaderboard;
        let value = json(json!([
            {"score": 1, "uuid": "a"},
            {"score": 10, "theme_difficulty": "hard", "uuid": "b"},
        ]));
        let TransformOutcome::Write(out) = t.apply("p1", Some(&value)).unwrap() else {
            panic!("expected write");
        };
        assert_eq!(out[0]["uuid"], "b");
        assert_eq!(out[0]["points"], 30);
        assert_eq!(out[1]["points"], 2);
    }

    #[test]
    fn leaderboard_skips_non_list() {
        let mut t = RecomputeLeaderboard;
        let outcome = t.apply("p1", Some(&json(json!({"score": 1})))).unwrap();
        assert!(matches!(outcome, TransformOutcome::Skip { .. }));
        let outcome = t.apply("p1", Some(&EntryValue::Text("raw".into()))).unwrap();
        assert!(matches!(outcome, TransformOutcome::Skip { .. }));
    }

    #[test]
    fn leaderboard_bad_score_is_an_error() {
        let mut t = RecomputeLeaderboard;
        let err = t.apply("p1", Some(&json(json!([{"score": null}])))).unwrap_err();
        assert!(matches!(err, TransformError::Malformed { .. }));
    }

    #[test]
    fn leaderboard_requires_value() {
        let mut t = RecomputeLeaderboard;
        assert_eq!(t.apply("p1", None).unwrap_err(), TransformError::MissingValue);
    }

    #[test]
    fn summarize_collects_then_emits_once() {
        let mut t = SummarizeThemes::new(Some("Summaries".into()));
        assert_eq!(
            t.apply("a", Some(&json(json!({"Name": "A"})))).unwrap(),
            TransformOutcome::Collected
        );
        assert!(matches!(
            t.apply("b", Some(&json(json!("not a theme")))).unwrap(),
            TransformOutcome::Skip { .. }
        ));
        t.apply("c", Some(&json(json!({"Name": "C"})))).unwrap();

        let write = t.finish().unwrap().unwrap();
        assert_eq!(write.store.as_deref(), Some("Summaries"));
        assert_eq!(write.key, SUMMARY_KEY);
        assert_eq!(write.value, json!([{"Key": "a", "Name": "A"}, {"Key": "c", "Name": "C"}]));
    }

    #[test]
    fn summarize_reapplied_key_replaces_summary() {
        let mut t = SummarizeThemes::default();
        t.apply("a", Some(&json(json!({"Name": "old"})))).unwrap();
        t.apply("b", Some(&json(json!({"Name": "B"})))).unwrap();
        t.apply("a", Some(&json(json!({"Name": "new"})))).unwrap();
        assert_eq!(t.summaries().len(), 2);
        assert_eq!(t.summaries()[0].name.as_deref(), Some("new"));
    }

    #[test]
    fn summarize_ignores_its_own_aggregate() {
        let mut t = SummarizeThemes::default();
        let outcome = t.apply(SUMMARY_KEY, Some(&json(json!({"Name": "x"})))).unwrap();
        assert!(matches!(outcome, TransformOutcome::Skip { .. }));
        assert_eq!(t.finish().unwrap(), None);
    }

    #[test]
    fn summarize_without_themes_writes_nothing() {
        let mut t = SummarizeThemes::default();
        assert_eq!(t.finish().unwrap(), None);
    }

    #[test]
    fn mirror_forwards_points() {
        let mut t = MirrorToRanking::default();
        let value = json(json!({"TotalPoints": 42, "Name": "Cat"}));
        let TransformOutcome::Rank(update) = t.apply("Player_77", Some(&value)).unwrap() else {
            panic!("expected rank update");
        };
        assert_eq!(update.map_name, DEFAULT_RANKING_MAP);
        assert_eq!(update.key, "Player_77");
        assert_eq!(update.sort_value, 42);
        assert_eq!(update.record, json!({"uid": "77", "name": "Cat", "points": 42}));
    }

    #[test]
    fn mirror_skips_missing_or_invalid_points() {
        let mut t = MirrorToRanking::default();
        for value in [
            json!({"Name": "x"}),
            json!({"TotalPoints": "9"}),
            json!({"TotalPoints": 1.5}),
        ] {
            let outcome = t.apply("Player_1", Some(&json(value))).unwrap();
            assert!(matches!(outcome, TransformOutcome::Skip { .. }));
        }
    }

    #[test]
    fn mirror_accepts_whole_float_points() {
        let mut t = MirrorToRanking::new("Map");
        let outcome = t.apply("Player_1", Some(&json(json!({"TotalPoints": 12.0})))).unwrap();
        assert!(matches!(outcome, TransformOutcome::Rank(RankUpdate { sort_value: 12, .. })));
    }

    #[test]
    fn player_id_takes_suffix_after_first_underscore() {
        assert_eq!(player_id("Player_1234"), "1234");
        assert_eq!(player_id("Player_12_34"), "12_34");
        assert_eq!(player_id("plain"), "plain");
    }

    #[test]
    fn task_names_are_kebab_case() {
        assert_eq!(Task::RecomputeLeaderboard.to_string(), "recompute-leaderboard");
        assert_eq!(
            serde_json::to_value(Task::MirrorRanking).unwrap(),
            json!("mirror-ranking")
        );
    }
}
