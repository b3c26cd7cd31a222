//! End-to-end scans against the in-memory remote.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};
use serde_json::{json, Value};
use sweep_client::cli::Command;
use sweep_client::transport::{Fault, Route};
use sweep_client::{
    AbortController, AbortSignal, App, Confirmation, MemoryRemote, PacingConfig, RunStatus,
    ScanOutcome, ScanRunner, SortedMapClient, SweepConfig,
};
use sweep_core::{RecomputeLeaderboard, SummarizeThemes, Wipe, SUMMARY_KEY};

const API_KEY: &str = "test-key";

fn config(page_limit: u32) -> Arc<SweepConfig> {
    let mut config = SweepConfig::new("4242", API_KEY);
    config.page_limit = page_limit;
    config.pacing = PacingConfig::immediate();
    Arc::new(config)
}

fn runner(remote: &Arc<MemoryRemote>, page_limit: u32) -> ScanRunner {
    ScanRunner::new(remote.clone(), config(page_limit), AbortSignal::never())
}

fn plays(entries: &[(u64, &str)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(score, difficulty)| json!({"score": score, "theme_difficulty": difficulty}))
            .collect(),
    )
}

#[tokio::test]
async fn every_key_is_visited_exactly_once() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    for i in 0..250 {
        remote.insert_json("TopPlays", &format!("Player_{i:04}"), plays(&[(1, "easy")]));
    }

    let result = runner(&remote, 100)
        .run("TopPlays", &mut RecomputeLeaderboard, Confirmation::Confirmed)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.counts.pages, 3);
    assert_eq!(result.counts.processed, 250);
    assert_eq!(result.counts.updated, 250);

    let mut fetches: HashMap<String, usize> = HashMap::new();
    for call in remote.calls() {
        if call.method == Method::GET && call.route == Route::Entry {
            *fetches.entry(call.key.unwrap()).or_default() += 1;
        }
    }
    assert_eq!(fetches.len(), 250);
    assert!(fetches.values().all(|&n| n == 1));
}

#[tokio::test]
async fn one_failing_key_does_not_stop_the_scan() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    for key in ["k1", "k2", "k3", "k4", "k5"] {
        remote.insert_json("TopPlays", key, plays(&[(3, "medium")]));
    }
    remote.inject(Fault::entry(Method::GET, "TopPlays", "k3"));

    let result = runner(&remote, 100)
        .run("TopPlays", &mut RecomputeLeaderboard, Confirmation::Confirmed)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.counts.processed, 4);
    assert_eq!(result.counts.errors, 1);
    assert_eq!(result.key_errors[0].key, "k3");
}

#[tokio::test]
async fn wipe_empties_a_store_spanning_two_pages() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    for key in ["a", "b", "c"] {
        remote.insert_text("Players", key, "x");
    }

    let result = runner(&remote, 2)
        .run("Players", &mut Wipe, Confirmation::Confirmed)
        .await
        .unwrap();

    assert_eq!(result.counts.deleted, 3);
    assert_eq!(result.counts.pages, 2);
    assert!(remote.keys("Players").is_empty());
}

#[tokio::test]
async fn rate_limited_write_restarts_the_page_without_double_counting() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    for key in ["a", "b", "c", "d"] {
        remote.insert_json("TopPlays", key, plays(&[(5, "hard")]));
    }
    remote.inject(Fault::entry(Method::POST, "TopPlays", "c").rate_limited());

    let result = runner(&remote, 2)
        .run("TopPlays", &mut RecomputeLeaderboard, Confirmation::Confirmed)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.counts.processed, 4);
    assert_eq!(result.counts.updated, 4);
    assert_eq!(result.counts.rate_limited, 1);
    assert_eq!(result.counts.pages, 2);
    // The second page was listed twice from the same cursor.
    let cursors: Vec<Option<String>> = remote
        .calls()
        .into_iter()
        .filter(|c| c.route == Route::ListEntries)
        .map(|c| c.cursor)
        .collect();
    assert_eq!(
        cursors,
        vec![None, Some("b".to_string()), Some("b".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn backoff_waits_before_the_restart() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    remote.insert_json("TopPlays", "a", plays(&[(1, "easy")]));
    remote.inject(Fault::list("TopPlays").rate_limited());

    let mut config = (*config(10)).clone();
    config.pacing.rate_limit_backoff = Duration::from_secs(30);
    let runner = ScanRunner::new(remote.clone(), Arc::new(config), AbortSignal::never());

    let start = tokio::time::Instant::now();
    let result = runner
        .run("TopPlays", &mut RecomputeLeaderboard, Confirmation::Confirmed)
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert_eq!(result.counts.rate_limited, 1);
}

#[tokio::test]
async fn recompute_is_idempotent_end_to_end() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    remote.insert_json(
        "TopPlays",
        "Player_1",
        plays(&[(10, "hard"), (12, "easy"), (9, "medium"), (20, "bogus"), (1, "easy")]),
    );

    let runner = runner(&remote, 100);
    runner
        .run("TopPlays", &mut RecomputeLeaderboard, Confirmation::Confirmed)
        .await
        .unwrap();
    let first = remote.entry("TopPlays", "Player_1").unwrap().into_json();

    runner
        .run("TopPlays", &mut RecomputeLeaderboard, Confirmation::Confirmed)
        .await
        .unwrap();
    let second = remote.entry("TopPlays", "Player_1").unwrap().into_json();

    assert_eq!(first, second);
    let points: Vec<i64> = first
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["points"].as_i64().unwrap())
        .collect();
    assert_eq!(points, vec![40, 30, 18]);
}

#[tokio::test]
async fn summary_aggregate_is_replaced_and_not_summarized() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    let description = "d".repeat(500);
    remote.insert_json(
        "Themes",
        "Theme_1",
        json!({
            "Name": "Cats",
            "Description": description,
            "Creator": 7,
            "Code": "C1",
            "Words": ["x"],
        }),
    );
    remote.insert_json("Themes", "Theme_2", json!({"Name": "Dogs", "Difficulty": "hard"}));

    let runner = runner(&remote, 100);
    for _ in 0..2 {
        let result = runner
            .run("Themes", &mut SummarizeThemes::default(), Confirmation::Confirmed)
            .await
            .unwrap();
        assert!(result.is_success());
    }

    let aggregate = remote.entry("Themes", SUMMARY_KEY).unwrap().into_json();
    let summaries = aggregate.as_array().unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["Key"], "Theme_1");
    assert_eq!(summaries[0]["Description"].as_str().unwrap().len(), 300);
    assert!(summaries[0].get("Words").is_none());
    assert!(summaries[1].get("Description").is_none());
}

#[tokio::test]
async fn mirror_forwards_to_the_sorted_map() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    remote.insert_json("Players", "Player_11", json!({"TotalPoints": 120, "Name": "Ann"}));
    remote.insert_json("Players", "Player_12", json!({"TotalPoints": 80}));
    remote.insert_json("Players", "solo", json!({"TotalPoints": 5}));

    let config = config(100);
    let sink = Arc::new(SortedMapClient::new(remote.clone(), Arc::clone(&config)));
    let runner = ScanRunner::new(remote.clone(), config, AbortSignal::never()).with_ranking(sink);
    let result = runner
        .run(
            "Players",
            &mut sweep_core::MirrorToRanking::default(),
            Confirmation::Confirmed,
        )
        .await
        .unwrap();

    assert_eq!(result.counts.forwarded, 3);
    assert_eq!(
        remote.ranked("TopPointsV2", "Player_11"),
        Some((json!({"uid": "11", "name": "Ann", "points": 120}), 120))
    );
    assert_eq!(remote.ranked("TopPointsV2", "solo").unwrap().0["uid"], "solo");
    // The scanned store is untouched.
    assert_eq!(remote.count_calls(&Method::POST, &Route::Entry), 0);
}

#[tokio::test]
async fn fatal_page_error_fails_one_store_and_the_run_continues() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    for store in ["PlayerBestDrawings", "Players", "TopPlays"] {
        remote.insert_text(store, "k", "v");
    }
    remote.inject(Fault::list("Players").status(StatusCode::INTERNAL_SERVER_ERROR));

    let app = App::new(remote.clone(), config(100), AbortSignal::never());
    let command = Command::Wipe {
        stores: vec![
            "PlayerBestDrawings".to_string(),
            "Players".to_string(),
            "TopPlays".to_string(),
        ],
    };
    let mut out = Vec::new();
    let status = app
        .execute(&command, Confirmation::Confirmed, &mut out)
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Failed);
    assert!(remote.keys("PlayerBestDrawings").is_empty());
    assert_eq!(remote.keys("Players"), vec!["k"]);
    assert!(remote.keys("TopPlays").is_empty());
    let report = String::from_utf8(out).unwrap();
    assert!(report.contains("Players [wipe] FAILED"));
}

#[tokio::test(start_paused = true)]
async fn interrupt_ends_the_scan_as_aborted() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    for i in 0..10 {
        remote.insert_text("Players", &format!("k{i}"), "v");
    }

    let mut config = (*config(100)).clone();
    config.pacing.key_pace_min = Duration::from_secs(1);
    config.pacing.key_pace_max = Duration::from_secs(1);
    let controller = Arc::new(AbortController::new());
    let runner = ScanRunner::new(remote.clone(), Arc::new(config), controller.signal());

    let trigger = Arc::clone(&controller);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        trigger.trigger();
    });

    let result = runner
        .run("Players", &mut Wipe, Confirmation::Confirmed)
        .await
        .unwrap();

    assert_eq!(result.outcome, ScanOutcome::Aborted);
    assert!(result.counts.deleted >= 1);
    assert!(result.counts.deleted < 10);
    assert_eq!(
        remote.keys("Players").len() as u64,
        10 - result.counts.deleted
    );
}

#[tokio::test]
async fn body_bearing_delete_is_not_success() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    remote.insert_text("Players", "k", "v");
    remote.inject(
        Fault::entry(Method::DELETE, "Players", "k")
            .status(StatusCode::OK)
            .body(r#"{"deleted":true}"#),
    );

    let result = runner(&remote, 100)
        .run("Players", &mut Wipe, Confirmation::Confirmed)
        .await
        .unwrap();
    assert_eq!(result.counts.deleted, 0);
    assert_eq!(result.counts.errors, 1);
}

#[tokio::test]
async fn dump_lists_every_entry() {
    let remote = Arc::new(MemoryRemote::with_api_key(API_KEY));
    remote.insert_json("Themes", "a", json!({"Name": "A"}));
    remote.insert_text("Themes", "b", "plain");

    let app = App::new(remote.clone(), config(1), AbortSignal::never());
    let mut out = Vec::new();
    let status = app
        .execute(
            &Command::Dump {
                store: "Themes".to_string(),
            },
            Confirmation::NotConfirmed,
            &mut out,
        )
        .await
        .unwrap();

    assert_eq!(status, RunStatus::Success);
    let lines: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(
        lines,
        vec![
            json!({"key": "a", "value": {"Name": "A"}}),
            json!({"key": "b", "value": "plain"}),
        ]
    );
}
