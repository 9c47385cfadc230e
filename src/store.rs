//! Relational store: game upserts, the game-status gate read, and the
//! duplicate-tolerant batch insert of normalized odds.
//!
//! The `OddsStore` trait is the seam the pipeline runs against; `PgStore` is
//! the Postgres implementation. The odds table's unique index over
//! `(eventid, oddid, COALESCE(line, ''))` is the cross-run authority on
//! uniqueness — the in-memory dedup is only a same-run filter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::ApiEvent;
use crate::normalize::NormalizedOddRecord;

/// Game statuses that close a game to new odds. One-way: once a game is
/// underway its odds stop flowing, checked fresh per game per run.
pub const GAME_UNDERWAY_STATUSES: &[&str] = &["started", "live", "final"];

pub fn game_underway(status: Option<&str>) -> bool {
    match status {
        Some(s) => {
            let s = s.to_ascii_lowercase();
            GAME_UNDERWAY_STATUSES.iter().any(|&closed| s == closed)
        }
        None => false,
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store's unique constraint rejected the batch. Expected and benign.
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }

    /// Classify a database error by message: anything mentioning "duplicate"
    /// is the unique constraint doing its job.
    fn classify(err: sqlx::Error) -> Self {
        let message = err.to_string();
        if message.to_lowercase().contains("duplicate") {
            StoreError::Duplicate(message)
        } else {
            StoreError::Database(err)
        }
    }
}

/// Row upserted into `games` once per fetched event.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRow {
    pub event_id: String,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub sport: String,
    pub status: String,
    pub game_time: Option<DateTime<Utc>>,
}

impl GameRow {
    pub fn from_event(event: &ApiEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            home_team: event.teams.home.names.long.clone(),
            away_team: event.teams.away.names.long.clone(),
            league: event.league_id.clone(),
            sport: sport_for_league(&event.league_id).to_string(),
            status: event
                .status
                .clone()
                .unwrap_or_else(|| "scheduled".to_string()),
            game_time: event.start_time,
        }
    }
}

/// Sport tag for the leagues the tracker knows about.
pub fn sport_for_league(league: &str) -> &'static str {
    match league {
        "NFL" | "NCAAF" => "football",
        "NBA" | "NCAAB" => "basketball",
        "MLB" => "baseball",
        "NHL" => "hockey",
        _ => "other",
    }
}

#[async_trait]
pub trait OddsStore: Send + Sync {
    /// Create or refresh a game row, keyed by the API's event id.
    async fn upsert_game(&self, game: &GameRow) -> Result<(), StoreError>;

    /// Read the persisted status for the gate check. `None` when the game is
    /// unknown to the store.
    async fn game_status(&self, event_id: &str) -> Result<Option<String>, StoreError>;

    /// Bulk-insert one game's normalized records, returning the number of
    /// rows the store reports as inserted (which it may undercount if it
    /// dedupes silently).
    async fn insert_odds(&self, records: &[NormalizedOddRecord]) -> Result<u64, StoreError>;

    /// Total odds rows, for the end-of-run report.
    async fn count_odds(&self) -> Result<i64, StoreError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with bounded exponential backoff.
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Self, StoreError> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    info!("Connected to PostgreSQL");
                    return Ok(Self::new(pool));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(StoreError::Backend(format!(
                            "failed to connect to database after {} attempts: {}",
                            max_retries, e
                        )));
                    }
                    warn!(
                        "Database connection attempt {} failed: {}. Retrying...",
                        attempt, e
                    );
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    /// Create the tables and the unique index the persister relies on.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                home_team TEXT NOT NULL DEFAULT '',
                away_team TEXT NOT NULL DEFAULT '',
                league TEXT NOT NULL DEFAULT '',
                sport TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'scheduled',
                game_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS odds (
                id BIGSERIAL PRIMARY KEY,
                eventid TEXT NOT NULL REFERENCES games(id),
                sportsbook TEXT NOT NULL,
                marketname TEXT NOT NULL,
                bettypeid TEXT NOT NULL,
                sideid TEXT NOT NULL,
                oddid TEXT NOT NULL,
                bookodds INTEGER,
                line TEXT,
                fanduelodds INTEGER,
                fanduellink TEXT,
                draftkingsodds INTEGER,
                draftkingslink TEXT,
                caesarsodds INTEGER,
                caesarslink TEXT,
                betmgmodds INTEGER,
                betmgmlink TEXT,
                bovadaodds INTEGER,
                bovadalink TEXT,
                fetched_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS odds_event_odd_line_uniq
            ON odds (eventid, oddid, COALESCE(line, ''))
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OddsStore for PgStore {
    async fn upsert_game(&self, game: &GameRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO games (id, home_team, away_team, league, sport, status, game_time, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (id) DO UPDATE SET
                home_team = EXCLUDED.home_team,
                away_team = EXCLUDED.away_team,
                league = EXCLUDED.league,
                sport = EXCLUDED.sport,
                status = EXCLUDED.status,
                game_time = EXCLUDED.game_time,
                updated_at = now()
            "#,
        )
        .bind(&game.event_id)
        .bind(&game.home_team)
        .bind(&game.away_team)
        .bind(&game.league)
        .bind(&game.sport)
        .bind(&game.status)
        .bind(game.game_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn game_status(&self, event_id: &str) -> Result<Option<String>, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM games WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    async fn insert_odds(&self, records: &[NormalizedOddRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO odds (
                    eventid, sportsbook, marketname, bettypeid, sideid, oddid,
                    bookodds, line,
                    fanduelodds, fanduellink, draftkingsodds, draftkingslink,
                    caesarsodds, caesarslink, betmgmodds, betmgmlink,
                    bovadaodds, bovadalink,
                    fetched_at, created_at, updated_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21
                )
                "#,
            )
            .bind(&record.event_id)
            .bind(&record.sportsbook)
            .bind(&record.market_name)
            .bind(&record.bet_type_id)
            .bind(&record.side_id)
            .bind(&record.odd_id)
            .bind(record.book_odds)
            .bind(&record.line)
            .bind(record.fanduel_odds)
            .bind(&record.fanduel_link)
            .bind(record.draftkings_odds)
            .bind(&record.draftkings_link)
            .bind(record.caesars_odds)
            .bind(&record.caesars_link)
            .bind(record.betmgm_odds)
            .bind(&record.betmgm_link)
            .bind(record.bovada_odds)
            .bind(&record.bovada_link)
            .bind(record.fetched_at)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::classify)?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn count_odds(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM odds")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
