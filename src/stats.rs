//! Per-run counters and the end-of-run report.
//!
//! `RunStats` is an explicit value threaded through the pipeline stages and
//! read once at the very end, not a process-global. Each run gets a fresh one
//! with a v4 run id for log correlation.

use uuid::Uuid;

use crate::normalize::OddCategory;

/// How many player-prop classifications are retained verbatim for the report.
const MAX_SAMPLED_PROPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledProp {
    pub odd_id: String,
    pub market_name: String,
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionError {
    pub event_id: String,
    pub attempted: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFailure {
    pub event_id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunStats {
    pub run_id: Uuid,
    pub games_fetched: usize,
    pub games_processed: usize,
    pub games_skipped: usize,
    /// Odds seen in the API payload, counted before the game gate.
    pub total_api_odds: usize,
    /// Odds that made it through dedup and normalization.
    pub total_processed_odds: usize,
    /// Rows the store reported as inserted.
    pub total_inserted: u64,
    /// Batches rejected whole by the store's unique constraint. Expected,
    /// not an error: the in-run dedup can't see other runs.
    pub duplicate_batches: usize,
    pub main_line_count: usize,
    pub game_prop_count: usize,
    pub player_prop_count: usize,
    pub sampled_player_props: Vec<SampledProp>,
    pub insertion_errors: Vec<InsertionError>,
    pub game_failures: Vec<GameFailure>,
    pub budget_exhausted: bool,
    pub run_error: Option<String>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            games_fetched: 0,
            games_processed: 0,
            games_skipped: 0,
            total_api_odds: 0,
            total_processed_odds: 0,
            total_inserted: 0,
            duplicate_batches: 0,
            main_line_count: 0,
            game_prop_count: 0,
            player_prop_count: 0,
            sampled_player_props: Vec::new(),
            insertion_errors: Vec::new(),
            game_failures: Vec::new(),
            budget_exhausted: false,
            run_error: None,
        }
    }

    pub fn record_games_fetched(&mut self, count: usize) {
        self.games_fetched = count;
    }

    pub fn add_api_odds(&mut self, count: usize) {
        self.total_api_odds += count;
    }

    pub fn record_processed_odd(&mut self) {
        self.total_processed_odds += 1;
    }

    pub fn record_category(
        &mut self,
        category: OddCategory,
        odd_id: &str,
        market_name: &str,
        event_id: &str,
    ) {
        match category {
            OddCategory::MainLine => self.main_line_count += 1,
            OddCategory::GameProp => self.game_prop_count += 1,
            OddCategory::PlayerProp => {
                self.player_prop_count += 1;
                if self.sampled_player_props.len() < MAX_SAMPLED_PROPS {
                    self.sampled_player_props.push(SampledProp {
                        odd_id: odd_id.to_string(),
                        market_name: market_name.to_string(),
                        event_id: event_id.to_string(),
                    });
                }
            }
        }
    }

    pub fn record_skip(&mut self) {
        self.games_skipped += 1;
    }

    pub fn record_game_processed(&mut self) {
        self.games_processed += 1;
    }

    pub fn add_inserted(&mut self, count: u64) {
        self.total_inserted += count;
    }

    pub fn record_duplicate_batch(&mut self) {
        self.duplicate_batches += 1;
    }

    pub fn record_insertion_error(&mut self, event_id: &str, attempted: usize, message: String) {
        self.insertion_errors.push(InsertionError {
            event_id: event_id.to_string(),
            attempted,
            message,
        });
    }

    pub fn record_game_failure(&mut self, event_id: &str, message: String) {
        self.game_failures.push(GameFailure {
            event_id: event_id.to_string(),
            message,
        });
    }

    pub fn mark_budget_exhausted(&mut self) {
        self.budget_exhausted = true;
    }

    /// Processed / fetched, as a percentage. NaN when nothing was fetched.
    pub fn processing_efficiency(&self) -> f64 {
        (self.total_processed_odds as f64 / self.total_api_odds as f64) * 100.0
    }

    /// Inserted / processed, as a percentage. NaN when nothing was processed.
    pub fn insertion_success_rate(&self) -> f64 {
        (self.total_inserted as f64 / self.total_processed_odds as f64) * 100.0
    }

    /// Render the human-readable multi-section report. `total_rows` is the
    /// store's row count at the end of the run, when the query succeeded.
    pub fn render_report(&self, total_rows: Option<i64>) -> String {
        let mut out = String::new();

        out.push_str("==================================================\n");
        out.push_str(&format!("Ingestion run report (run {})\n", self.run_id));
        out.push_str("==================================================\n");
        if let Some(err) = &self.run_error {
            out.push_str(&format!("RUN ABORTED: {}\n", err));
        }
        if self.budget_exhausted {
            out.push_str("Wall-clock budget exhausted; remaining games were not processed\n");
        }

        out.push_str(&format!(
            "Games: {} fetched, {} processed, {} skipped (already underway)\n",
            self.games_fetched, self.games_processed, self.games_skipped
        ));
        out.push_str(&format!(
            "Odds: {} in payload, {} processed, {} inserted\n",
            self.total_api_odds, self.total_processed_odds, self.total_inserted
        ));
        out.push_str(&format!(
            "Processing efficiency: {:.1}%, insertion success: {:.1}%\n",
            self.processing_efficiency(),
            self.insertion_success_rate()
        ));

        out.push_str(&format!(
            "Categories: {} main lines, {} game props, {} player props\n",
            self.main_line_count, self.game_prop_count, self.player_prop_count
        ));

        if !self.sampled_player_props.is_empty() {
            out.push_str(&format!(
                "Sampled player props (first {}):\n",
                self.sampled_player_props.len()
            ));
            for prop in &self.sampled_player_props {
                out.push_str(&format!(
                    "  {} | {} | game {}\n",
                    prop.odd_id, prop.market_name, prop.event_id
                ));
            }
        }

        if self.duplicate_batches > 0 {
            out.push_str(&format!(
                "Duplicate batches (benign): {}\n",
                self.duplicate_batches
            ));
        }

        if !self.insertion_errors.is_empty() {
            out.push_str(&format!(
                "Insertion errors ({}):\n",
                self.insertion_errors.len()
            ));
            for err in &self.insertion_errors {
                out.push_str(&format!(
                    "  game {}: {} records attempted: {}\n",
                    err.event_id, err.attempted, err.message
                ));
            }
        }

        if !self.game_failures.is_empty() {
            out.push_str(&format!("Game failures ({}):\n", self.game_failures.len()));
            for failure in &self.game_failures {
                out.push_str(&format!("  game {}: {}\n", failure.event_id, failure.message));
            }
        }

        if let Some(rows) = total_rows {
            out.push_str(&format!("Odds rows in store: {}\n", rows));
        }
        out.push_str("==================================================\n");

        out
    }

    /// Print the report to stdout, the run's one machine-unfriendly output.
    pub fn print_report(&self, total_rows: Option<i64>) {
        print!("{}", self.render_report(total_rows));
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
