//! End-to-end pipeline scenarios against an in-memory store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use sgo_ingestion::api::{AltLine, ApiEvent, BookmakerOdds, RawOdd, TeamSides};
use sgo_ingestion::dedup::DedupTracker;
use sgo_ingestion::normalize::{Classifier, NormalizedOddRecord};
use sgo_ingestion::pipeline::{ingest_batch, ingest_event, GameOutcome};
use sgo_ingestion::stats::RunStats;
use sgo_ingestion::store::{GameRow, OddsStore, StoreError};

/// In-memory store: games in a map, odds in a vec, with switches to force
/// the failure modes the pipeline must tolerate.
#[derive(Default)]
struct MemoryStore {
    games: Mutex<HashMap<String, GameRow>>,
    odds: Mutex<Vec<NormalizedOddRecord>>,
    /// When set, every insert fails with this message (classified by the
    /// same duplicate-substring rule as the real store).
    insert_failure: Option<String>,
    /// When set, upserting this game id fails.
    fail_upsert_for: Option<String>,
}

#[async_trait]
impl OddsStore for MemoryStore {
    async fn upsert_game(&self, game: &GameRow) -> Result<(), StoreError> {
        if self.fail_upsert_for.as_deref() == Some(game.event_id.as_str()) {
            return Err(StoreError::Backend("upsert refused".into()));
        }
        self.games
            .lock()
            .unwrap()
            .insert(game.event_id.clone(), game.clone());
        Ok(())
    }

    async fn game_status(&self, event_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .games
            .lock()
            .unwrap()
            .get(event_id)
            .map(|g| g.status.clone()))
    }

    async fn insert_odds(&self, records: &[NormalizedOddRecord]) -> Result<u64, StoreError> {
        if let Some(message) = &self.insert_failure {
            if message.to_lowercase().contains("duplicate") {
                return Err(StoreError::Duplicate(message.clone()));
            }
            return Err(StoreError::Backend(message.clone()));
        }
        let mut odds = self.odds.lock().unwrap();
        odds.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn count_odds(&self) -> Result<i64, StoreError> {
        Ok(self.odds.lock().unwrap().len() as i64)
    }
}

fn spread_odd() -> RawOdd {
    let by_bookmaker = vec![(
        "fanduel".to_string(),
        BookmakerOdds {
            odds: Some(json!(-105)),
            deeplink: Some("url".to_string()),
            alt_lines: vec![],
        },
    )];
    RawOdd {
        odd_id: Some("odd1".into()),
        market_name: Some("Point Spread".into()),
        bet_type_id: Some("sp".into()),
        side_id: Some("home".into()),
        book_odds: Some(json!("-110")),
        book_spread: Some(json!(-3.5)),
        by_bookmaker,
        ..Default::default()
    }
}

fn event_with(status: &str, odds: Vec<(&str, RawOdd)>) -> ApiEvent {
    ApiEvent {
        event_id: "evt-1".into(),
        league_id: "NFL".into(),
        teams: TeamSides::default(),
        start_time: None,
        status: Some(status.to_string()),
        odds: odds
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    }
}

#[tokio::test]
async fn scheduled_game_produces_one_normalized_record() {
    let store = MemoryStore::default();
    let event = event_with("scheduled", vec![("odd1", spread_odd())]);
    let mut stats = RunStats::new();

    let outcomes = ingest_batch(
        &store,
        &Classifier::default(),
        &[event],
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    assert!(matches!(
        outcomes[0],
        GameOutcome::Persisted {
            attempted: 1,
            inserted: 1,
            ..
        }
    ));

    let odds = store.odds.lock().unwrap();
    let record = &odds[0];
    assert_eq!(record.event_id, "evt-1");
    assert_eq!(record.odd_id, "odd1");
    assert_eq!(record.line, Some("-3.5".to_string()));
    assert_eq!(record.book_odds, Some(-110));
    assert_eq!(record.fanduel_odds, Some(-105));
    assert_eq!(record.fanduel_link.as_deref(), Some("url"));

    assert_eq!(stats.total_api_odds, 1);
    assert_eq!(stats.total_processed_odds, 1);
    assert_eq!(stats.main_line_count, 1);
    assert_eq!(stats.total_inserted, 1);
    assert_eq!(stats.games_processed, 1);
}

#[tokio::test]
async fn live_game_is_gated_out() {
    let store = MemoryStore::default();
    let event = event_with("live", vec![("odd1", spread_odd())]);
    let mut stats = RunStats::new();

    let outcomes = ingest_batch(
        &store,
        &Classifier::default(),
        &[event],
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    assert!(matches!(outcomes[0], GameOutcome::Skipped { .. }));
    assert!(store.odds.lock().unwrap().is_empty());

    // payload odds are counted before the gate; nothing gets processed
    assert_eq!(stats.total_api_odds, 1);
    assert_eq!(stats.total_processed_odds, 0);
    assert_eq!(stats.games_skipped, 1);
    assert_eq!(stats.games_processed, 0);
}

#[tokio::test]
async fn duplicate_batch_is_benign() {
    let store = MemoryStore {
        insert_failure: Some("duplicate key value violates unique constraint".into()),
        ..Default::default()
    };
    let event = event_with("scheduled", vec![("odd1", spread_odd())]);
    let mut stats = RunStats::new();

    let outcomes = ingest_batch(
        &store,
        &Classifier::default(),
        &[event],
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    assert!(matches!(
        outcomes[0],
        GameOutcome::DuplicateBatch { attempted: 1, .. }
    ));
    assert_eq!(stats.duplicate_batches, 1);
    assert!(stats.insertion_errors.is_empty());
    assert_eq!(stats.total_inserted, 0);
}

#[tokio::test]
async fn non_duplicate_insert_failure_is_recorded_and_run_continues() {
    let store = MemoryStore {
        insert_failure: Some("connection reset by peer".into()),
        ..Default::default()
    };
    let event = event_with("scheduled", vec![("odd1", spread_odd())]);
    let mut stats = RunStats::new();

    let outcomes = ingest_batch(
        &store,
        &Classifier::default(),
        &[event],
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    assert!(matches!(
        outcomes[0],
        GameOutcome::InsertFailed { attempted: 1, .. }
    ));
    assert_eq!(stats.duplicate_batches, 0);
    assert_eq!(stats.insertion_errors.len(), 1);
    assert_eq!(stats.insertion_errors[0].event_id, "evt-1");
    assert_eq!(stats.insertion_errors[0].attempted, 1);
}

#[tokio::test]
async fn alt_lines_expand_into_one_record_each() {
    let mut odd = spread_odd();
    odd.by_bookmaker[0].1.alt_lines = vec![
        AltLine {
            odds: Some(json!(-125)),
            spread: Some(json!(-2.5)),
            deeplink: Some("alt-url".to_string()),
            ..Default::default()
        },
        AltLine {
            odds: Some(json!(105)),
            spread: Some(json!(-4.5)),
            ..Default::default()
        },
    ];

    let store = MemoryStore::default();
    let event = event_with("scheduled", vec![("odd1", odd)]);
    let mut stats = RunStats::new();

    ingest_batch(
        &store,
        &Classifier::default(),
        &[event],
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    let odds = store.odds.lock().unwrap();
    assert_eq!(odds.len(), 3);
    assert_eq!(stats.total_processed_odds, 3);

    let alt = odds
        .iter()
        .find(|r| r.line == Some("-2.5".to_string()))
        .expect("alt line record");
    assert_eq!(alt.odd_id, "odd1");
    assert_eq!(alt.book_odds, Some(-125));
    assert_eq!(alt.fanduel_odds, Some(-125));
    assert_eq!(alt.fanduel_link.as_deref(), Some("alt-url"));
    // the parent's main line keeps the main bookmaker odds
    let main = odds
        .iter()
        .find(|r| r.line == Some("-3.5".to_string()))
        .expect("main line record");
    assert_eq!(main.fanduel_odds, Some(-105));
}

#[tokio::test]
async fn odds_are_processed_in_payload_order() {
    // 12 player props in a deliberately non-alphabetical order; processing,
    // storage, and the first-10 sample must all follow that order.
    let ids: Vec<String> = [7, 3, 11, 1, 9, 5, 12, 2, 10, 4, 8, 6]
        .iter()
        .map(|n| format!("rushing_yards-P{}_1_NFL-game-ou-over", n))
        .collect();
    let odds: Vec<(&str, RawOdd)> = ids
        .iter()
        .map(|id| {
            let mut odd = spread_odd();
            odd.odd_id = Some(id.clone());
            (id.as_str(), odd)
        })
        .collect();

    let store = MemoryStore::default();
    let event = event_with("scheduled", odds);
    let mut stats = RunStats::new();

    ingest_batch(
        &store,
        &Classifier::default(),
        &[event],
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    let stored: Vec<String> = store
        .odds
        .lock()
        .unwrap()
        .iter()
        .map(|record| record.odd_id.clone())
        .collect();
    assert_eq!(stored, ids);

    let sampled: Vec<&str> = stats
        .sampled_player_props
        .iter()
        .map(|prop| prop.odd_id.as_str())
        .collect();
    let expected: Vec<&str> = ids.iter().take(10).map(String::as_str).collect();
    assert_eq!(sampled, expected);
}

#[tokio::test]
async fn same_run_dedup_yields_one_record_per_odd() {
    let store = MemoryStore::default();
    let event = event_with("scheduled", vec![("odd1", spread_odd())]);
    let classifier = Classifier::default();
    let mut dedup = DedupTracker::new();
    let mut stats = RunStats::new();

    let first = ingest_event(&store, &classifier, &event, &mut dedup, &mut stats)
        .await
        .unwrap();
    let second = ingest_event(&store, &classifier, &event, &mut dedup, &mut stats)
        .await
        .unwrap();

    assert!(matches!(first, GameOutcome::Persisted { attempted: 1, .. }));
    assert!(matches!(
        second,
        GameOutcome::Persisted {
            attempted: 0,
            inserted: 0,
            ..
        }
    ));
    assert_eq!(store.odds.lock().unwrap().len(), 1);
    assert_eq!(stats.total_processed_odds, 1);
}

#[tokio::test]
async fn budget_is_checked_between_games() {
    let store = MemoryStore::default();
    let mut second = event_with("scheduled", vec![("odd2", spread_odd())]);
    second.event_id = "evt-2".into();
    let events = vec![event_with("scheduled", vec![("odd1", spread_odd())]), second];
    let mut stats = RunStats::new();

    let outcomes = ingest_batch(
        &store,
        &Classifier::default(),
        &events,
        Duration::ZERO,
        &mut stats,
    )
    .await;

    // the first game always finishes; the second is cut off
    assert_eq!(outcomes.len(), 1);
    assert!(stats.budget_exhausted);
    assert_eq!(stats.games_fetched, 2);
    assert_eq!(stats.games_processed, 1);
}

#[tokio::test]
async fn failed_game_save_does_not_abort_the_run() {
    let store = MemoryStore {
        fail_upsert_for: Some("evt-1".into()),
        ..Default::default()
    };
    let mut second = event_with("scheduled", vec![("odd2", spread_odd())]);
    second.event_id = "evt-2".into();
    let events = vec![event_with("scheduled", vec![("odd1", spread_odd())]), second];
    let mut stats = RunStats::new();

    let outcomes = ingest_batch(
        &store,
        &Classifier::default(),
        &events,
        Duration::from_secs(60),
        &mut stats,
    )
    .await;

    assert_eq!(stats.game_failures.len(), 1);
    assert_eq!(stats.game_failures[0].event_id, "evt-1");
    // the second game still went through
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        GameOutcome::Persisted {
            attempted: 1,
            inserted: 1,
            ..
        }
    ));
    assert_eq!(store.odds.lock().unwrap().len(), 1);
}
