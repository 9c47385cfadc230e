//! Raw odd -> flat record normalization.
//!
//! One raw odd entry (or one synthesized alternate-line variant of it) plus
//! its parent event id becomes exactly one [`NormalizedOddRecord`]. The
//! normalizer appends to an accumulator and bumps the run's diagnostic
//! counters; it never returns a value.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::api::RawOdd;
use crate::stats::RunStats;

/// Constant source tag on every persisted record.
pub const SOURCE_SPORTSBOOK: &str = "SportsGameOdds";

/// Maximum stored length for market name, bet type and side id.
pub const MAX_FIELD_LEN: usize = 50;

/// Odds magnitudes above this are sensor garbage, not clampable values.
const ODDS_SANITY_LIMIT: f64 = 50_000.0;

/// Clamp range for American odds.
const ODDS_CLAMP: f64 = 9_999.0;

/// The bookmakers whose odds/links get dedicated columns. Exactly these
/// five; unknown bookmaker keys in `byBookmaker` are ignored for the
/// primary record (their alt lines still expand into their own records).
pub const KNOWN_BOOKMAKERS: &[&str] = &["fanduel", "draftkings", "caesars", "betmgm", "bovada"];

/// The persisted unit. Column names in the store drop the underscores
/// (`eventid`, `bookodds`, `fanduelodds`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOddRecord {
    pub event_id: String,
    pub sportsbook: String,
    pub market_name: String,
    pub bet_type_id: String,
    pub side_id: String,
    pub odd_id: String,
    pub book_odds: Option<i32>,
    pub line: Option<String>,
    pub fanduel_odds: Option<i32>,
    pub fanduel_link: Option<String>,
    pub draftkings_odds: Option<i32>,
    pub draftkings_link: Option<String>,
    pub caesars_odds: Option<i32>,
    pub caesars_link: Option<String>,
    pub betmgm_odds: Option<i32>,
    pub betmgm_link: Option<String>,
    pub bovada_odds: Option<i32>,
    pub bovada_link: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Diagnostic bucket for an odd record. Purely observational; nothing
/// downstream branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OddCategory {
    PlayerProp,
    GameProp,
    MainLine,
}

/// Substring-based diagnostic classifier for odd ids.
///
/// The default markers are NFL-shaped on purpose: player-prop odd ids carry
/// the league tag (`..._NFL...`) and game props carry `-all-`. Other leagues
/// may need different markers; configure, don't generalize.
#[derive(Debug, Clone)]
pub struct Classifier {
    pub player_prop_marker: String,
    pub game_prop_marker: String,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            player_prop_marker: "_NFL".to_string(),
            game_prop_marker: "-all-".to_string(),
        }
    }
}

impl Classifier {
    pub fn classify(&self, odd_id: &str) -> OddCategory {
        if odd_id.contains(&self.player_prop_marker) {
            OddCategory::PlayerProp
        } else if odd_id.contains(&self.game_prop_marker) {
            OddCategory::GameProp
        } else {
            OddCategory::MainLine
        }
    }
}

/// Parse a string-or-number odds value into a sane American-odds integer.
///
/// Non-numeric input is `None`. Magnitudes above 50000 are treated as a feed
/// error and dropped to `None` (with a log line) rather than clamped.
/// Everything else is clamped to `[-9999, 9999]` and rounded to the nearest
/// integer, ties toward positive infinity (so `-110.5` rounds to `-110`).
pub fn sanitize_odds(raw: Option<&Value>) -> Option<i32> {
    let parsed = match raw? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let x = match parsed {
        Some(x) if x.is_finite() => x,
        _ => return None,
    };
    if x.abs() > ODDS_SANITY_LIMIT {
        warn!(value = x, "odds value outside sane range, dropping");
        return None;
    }
    // Ties round toward +inf, not away from zero.
    Some((x.clamp(-ODDS_CLAMP, ODDS_CLAMP) + 0.5).floor() as i32)
}

/// Collapse the four "empty" line forms (missing, JSON null, `""`, the
/// literal string `"null"`) to `None`; stringify everything else. Lines are
/// stored as strings, never floats, so heterogeneous inputs keep their exact
/// representation.
pub fn normalize_line(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::Null => None,
        Value::String(s) if s.is_empty() || s == "null" => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Hard truncation to `max` characters. Oversized values are cut, not
/// rejected.
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn first_present<'a>(candidates: &[Option<&'a Value>]) -> Option<&'a Value> {
    candidates.iter().copied().flatten().next()
}

/// Pick the line value for a bet type.
///
/// * `ml` — moneylines never carry a line.
/// * `sp` — book spread, falling back to fair spread.
/// * `ou` — book total, falling back to fair total.
/// * anything else — first non-null of spread then total, book before fair.
fn select_line(bet_type: &str, odd: &RawOdd) -> Option<String> {
    let raw = match bet_type {
        "ml" => None,
        "sp" => first_present(&[odd.book_spread.as_ref(), odd.fair_spread.as_ref()]),
        "ou" => first_present(&[odd.book_over_under.as_ref(), odd.fair_over_under.as_ref()]),
        _ => first_present(&[
            odd.book_spread.as_ref(),
            odd.fair_spread.as_ref(),
            odd.book_over_under.as_ref(),
            odd.fair_over_under.as_ref(),
        ]),
    };
    normalize_line(raw)
}

fn apply_bookmaker(
    record: &mut NormalizedOddRecord,
    name: &str,
    odds: Option<i32>,
    link: Option<String>,
) {
    match name {
        "fanduel" => {
            record.fanduel_odds = odds;
            record.fanduel_link = link;
        }
        "draftkings" => {
            record.draftkings_odds = odds;
            record.draftkings_link = link;
        }
        "caesars" => {
            record.caesars_odds = odds;
            record.caesars_link = link;
        }
        "betmgm" => {
            record.betmgm_odds = odds;
            record.betmgm_link = link;
        }
        "bovada" => {
            record.bovada_odds = odds;
            record.bovada_link = link;
        }
        _ => {}
    }
}

/// Normalize one raw odd into a record, appending it to `out`.
///
/// `odd_id` is the identity key from the source (the caller resolves it from
/// the odd's own field or the odds-map key). Mutates `out` and the stats
/// categorization counters; returns nothing.
pub fn normalize_odd(
    classifier: &Classifier,
    event_id: &str,
    odd_id: &str,
    odd: &RawOdd,
    out: &mut Vec<NormalizedOddRecord>,
    stats: &mut RunStats,
) {
    let market_name = odd.market_name.as_deref().unwrap_or("unknown");
    let bet_type = odd.bet_type_id.as_deref().unwrap_or("unknown");
    let side_id = odd.side_id.as_deref().unwrap_or("");

    let line = select_line(bet_type, odd);
    let now = Utc::now();

    let mut record = NormalizedOddRecord {
        event_id: event_id.to_string(),
        sportsbook: SOURCE_SPORTSBOOK.to_string(),
        market_name: truncate(market_name, MAX_FIELD_LEN),
        bet_type_id: truncate(bet_type, MAX_FIELD_LEN),
        side_id: truncate(side_id, MAX_FIELD_LEN),
        odd_id: odd_id.to_string(),
        book_odds: sanitize_odds(odd.book_odds.as_ref()),
        line,
        fanduel_odds: None,
        fanduel_link: None,
        draftkings_odds: None,
        draftkings_link: None,
        caesars_odds: None,
        caesars_link: None,
        betmgm_odds: None,
        betmgm_link: None,
        bovada_odds: None,
        bovada_link: None,
        fetched_at: now,
        created_at: now,
        updated_at: now,
    };

    for &book in KNOWN_BOOKMAKERS {
        if let Some(entry) = odd.bookmaker(book) {
            apply_bookmaker(
                &mut record,
                book,
                sanitize_odds(entry.odds.as_ref()),
                entry.deeplink.clone(),
            );
        }
    }

    stats.record_category(classifier.classify(odd_id), odd_id, market_name, event_id);
    stats.record_processed_odd();
    out.push(record);
}
