//! Per-run orchestration: gate -> normalize -> dedup -> persist, one game at
//! a time, strictly sequential.
//!
//! Per-game failures never abort the run; every game yields an explicit
//! [`GameOutcome`] and the failure modes are visible in the stats the caller
//! reports at the end. The only fatal error is the initial fetch, handled by
//! the caller (see `IngestionService::run_once` in `main`).

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::api::{AltLine, ApiEvent, BookmakerOdds, OddsApiClient, RawOdd};
use crate::config::Config;
use crate::dedup::DedupTracker;
use crate::normalize::{normalize_line, normalize_odd, Classifier, NormalizedOddRecord};
use crate::stats::RunStats;
use crate::store::{game_underway, GameRow, OddsStore, StoreError};

/// Errors that fail one game's processing before the persist step.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("game upsert failed: {0}")]
    Save(#[source] StoreError),
    #[error("status read failed: {0}")]
    StatusRead(#[source] StoreError),
}

/// What happened to one game in this run.
#[derive(Debug)]
pub enum GameOutcome {
    /// Game already underway; odds were not normalized or persisted.
    Skipped { event_id: String, status: String },
    /// Records persisted (attempted may be 0 when dedup left nothing new).
    Persisted {
        event_id: String,
        attempted: usize,
        inserted: u64,
    },
    /// The whole batch hit the store's unique constraint. Benign.
    DuplicateBatch { event_id: String, attempted: usize },
    /// Insert failed for a non-duplicate reason; recorded, run continues.
    InsertFailed { event_id: String, attempted: usize },
}

/// Build the synthetic raw odd for one bookmaker's alternate line: the parent
/// odd's identity fields with the alt line's spread/total/odds substituted in
/// and `byBookmaker` reduced to that single bookmaker.
fn alt_line_variant(odd: &RawOdd, book: &str, alt: &AltLine) -> RawOdd {
    let mut variant = RawOdd {
        odd_id: odd.odd_id.clone(),
        market_name: odd.market_name.clone(),
        bet_type_id: odd.bet_type_id.clone(),
        side_id: odd.side_id.clone(),
        book_odds: alt.odds.clone(),
        book_spread: alt.spread.clone(),
        fair_spread: None,
        book_over_under: alt.over_under.clone(),
        fair_over_under: None,
        by_bookmaker: Default::default(),
    };
    variant.by_bookmaker.push((
        book.to_string(),
        BookmakerOdds {
            odds: alt.odds.clone(),
            deeplink: alt.deeplink.clone(),
            alt_lines: Vec::new(),
        },
    ));
    variant
}

/// The alt line's dedup token: its normalized spread or total, if it has one.
fn alt_line_token(alt: &AltLine) -> Option<String> {
    normalize_line(alt.spread.as_ref()).or_else(|| normalize_line(alt.over_under.as_ref()))
}

/// Process one game: upsert it, gate on its persisted status, then normalize
/// and persist every not-yet-seen odd and alternate line.
pub async fn ingest_event<S: OddsStore>(
    store: &S,
    classifier: &Classifier,
    event: &ApiEvent,
    dedup: &mut DedupTracker,
    stats: &mut RunStats,
) -> Result<GameOutcome, GameError> {
    let event_id = event.event_id.as_str();

    store
        .upsert_game(&GameRow::from_event(event))
        .await
        .map_err(GameError::Save)?;

    // Payload count is taken before the gate; a skipped game still shows up
    // in the fetched-odds total.
    stats.add_api_odds(event.odds.len());

    let status = store
        .game_status(event_id)
        .await
        .map_err(GameError::StatusRead)?;

    if game_underway(status.as_deref()) {
        let status = status.unwrap_or_default();
        info!(event_id, %status, "game already underway, skipping odds");
        stats.record_skip();
        return Ok(GameOutcome::Skipped {
            event_id: event_id.to_string(),
            status,
        });
    }

    stats.record_game_processed();

    let mut records: Vec<NormalizedOddRecord> = Vec::new();
    for (key, odd) in &event.odds {
        let odd_id = odd.odd_id.as_deref().unwrap_or(key.as_str());

        if dedup.try_claim_main(event_id, odd_id) {
            normalize_odd(classifier, event_id, odd_id, odd, &mut records, stats);
        }

        // One record per distinct alternate line per bookmaker, run through
        // the same normalizer with that bookmaker's data substituted in.
        for (book, entry) in &odd.by_bookmaker {
            for alt in &entry.alt_lines {
                let token = alt_line_token(alt);
                if dedup.try_claim_alt(event_id, odd_id, token.as_deref()) {
                    let variant = alt_line_variant(odd, book, alt);
                    normalize_odd(classifier, event_id, odd_id, &variant, &mut records, stats);
                }
            }
        }
    }

    let attempted = records.len();
    if attempted == 0 {
        return Ok(GameOutcome::Persisted {
            event_id: event_id.to_string(),
            attempted: 0,
            inserted: 0,
        });
    }

    match store.insert_odds(&records).await {
        Ok(inserted) => {
            stats.add_inserted(inserted);
            info!(event_id, attempted, inserted, "persisted odds batch");
            Ok(GameOutcome::Persisted {
                event_id: event_id.to_string(),
                attempted,
                inserted,
            })
        }
        Err(err) if err.is_duplicate() => {
            info!(event_id, attempted, "batch already in store (duplicate key)");
            stats.record_duplicate_batch();
            Ok(GameOutcome::DuplicateBatch {
                event_id: event_id.to_string(),
                attempted,
            })
        }
        Err(err) => {
            warn!(event_id, attempted, error = %err, "odds insert failed");
            stats.record_insertion_error(event_id, attempted, err.to_string());
            Ok(GameOutcome::InsertFailed {
                event_id: event_id.to_string(),
                attempted,
            })
        }
    }
}

/// Run the per-game pipeline over a fetched batch of events.
///
/// The wall-clock budget is checked between games only; a game in progress
/// always finishes. Per-game errors are recorded and the loop continues.
pub async fn ingest_batch<S: OddsStore>(
    store: &S,
    classifier: &Classifier,
    events: &[ApiEvent],
    budget: Duration,
    stats: &mut RunStats,
) -> Vec<GameOutcome> {
    stats.record_games_fetched(events.len());

    let mut dedup = DedupTracker::new();
    let mut outcomes = Vec::with_capacity(events.len());
    let start = Instant::now();

    for (index, event) in events.iter().enumerate() {
        if index > 0 && start.elapsed() >= budget {
            warn!(
                processed = index,
                remaining = events.len() - index,
                "wall-clock budget exhausted, stopping between games"
            );
            stats.mark_budget_exhausted();
            break;
        }

        match ingest_event(store, classifier, event, &mut dedup, stats).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                warn!(event_id = %event.event_id, error = %err, "game processing failed");
                stats.record_game_failure(&event.event_id, err.to_string());
            }
        }
    }

    outcomes
}

/// One full ingestion pass: fetch, per-game pipeline, final count, report.
///
/// A fetch failure aborts before any game is touched; the diagnostic report
/// still prints. Everything after the fetch is best-effort: per-game problems
/// land in the report, not in the return value.
pub async fn run_once<S: OddsStore>(
    client: &OddsApiClient,
    store: &S,
    config: &Config,
) -> anyhow::Result<RunStats> {
    let classifier = Classifier::default();
    let mut stats = RunStats::new();
    info!(run_id = %stats.run_id, league = %config.league_id, "starting ingestion run");

    let events = match client
        .fetch_upcoming_events(&config.league_id, config.event_limit, config.lookahead_days)
        .await
    {
        Ok(events) => events,
        Err(err) => {
            error!(error = %err, "event fetch failed, aborting run");
            stats.run_error = Some(err.to_string());
            stats.print_report(None);
            return Err(err.into());
        }
    };

    ingest_batch(
        store,
        &classifier,
        &events,
        Duration::from_secs(config.max_run_seconds),
        &mut stats,
    )
    .await;

    let total_rows = match store.count_odds().await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(error = %err, "final count query failed");
            None
        }
    };

    stats.print_report(total_rows);
    Ok(stats)
}
