//! SportsGameOdds API client.
//!
//! Fetches one page of upcoming events (with alternate lines included) for a
//! league and a `[today, today + lookahead]` date window. A non-2xx response
//! is fatal to the caller's run: no retry, no pagination.

use std::num::NonZeroU32;

use chrono::{DateTime, Duration, Utc};
use governor::{Quota, RateLimiter};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;
use tracing::info;

/// Requests per minute allowed against the odds API.
const API_REQUESTS_PER_MINUTE: u32 = 30;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("odds API error (status {status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to parse events response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One event in the API's `data` array.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiEvent {
    #[serde(rename = "eventID")]
    pub event_id: String,
    #[serde(rename = "leagueID")]
    pub league_id: String,
    pub teams: TeamSides,
    #[serde(rename = "startTime")]
    pub start_time: Option<DateTime<Utc>>,
    pub status: Option<String>,
    /// Odds entries keyed by opaque odd id, kept in payload order so that
    /// downstream processing and sampling are deterministic across runs.
    #[serde(deserialize_with = "ordered_entries")]
    pub odds: Vec<(String, RawOdd)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamSides {
    pub home: TeamEntry,
    pub away: TeamEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamEntry {
    pub names: TeamNames,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TeamNames {
    pub long: String,
}

/// One raw odd entry. Numeric-ish fields are kept as `Value` because the
/// feed mixes numbers and strings (`"bookOdds": "-110"` is common).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawOdd {
    #[serde(rename = "oddID")]
    pub odd_id: Option<String>,
    #[serde(rename = "marketName")]
    pub market_name: Option<String>,
    #[serde(rename = "betTypeID")]
    pub bet_type_id: Option<String>,
    #[serde(rename = "sideID")]
    pub side_id: Option<String>,
    #[serde(rename = "bookOdds")]
    pub book_odds: Option<Value>,
    #[serde(rename = "bookSpread")]
    pub book_spread: Option<Value>,
    #[serde(rename = "fairSpread")]
    pub fair_spread: Option<Value>,
    #[serde(rename = "bookOverUnder")]
    pub book_over_under: Option<Value>,
    #[serde(rename = "fairOverUnder")]
    pub fair_over_under: Option<Value>,
    #[serde(rename = "byBookmaker", deserialize_with = "ordered_entries")]
    pub by_bookmaker: Vec<(String, BookmakerOdds)>,
}

impl RawOdd {
    pub fn bookmaker(&self, name: &str) -> Option<&BookmakerOdds> {
        self.by_bookmaker
            .iter()
            .find(|(book, _)| book == name)
            .map(|(_, entry)| entry)
    }
}

/// Deserializes a JSON object into a `Vec` of entries, preserving the order
/// in which the keys appear in the payload.
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BookmakerOdds {
    pub odds: Option<Value>,
    pub deeplink: Option<String>,
    #[serde(rename = "altLines")]
    pub alt_lines: Vec<AltLine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AltLine {
    pub odds: Option<Value>,
    pub spread: Option<Value>,
    #[serde(rename = "overUnder")]
    pub over_under: Option<Value>,
    pub deeplink: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventsResponse {
    data: Vec<ApiEvent>,
}

pub struct OddsApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl OddsApiClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        let rate_limiter = RateLimiter::direct(Quota::per_minute(
            NonZeroU32::new(API_REQUESTS_PER_MINUTE).unwrap(),
        ));
        Self {
            http,
            base_url,
            api_key,
            rate_limiter,
        }
    }

    /// Fetch up to `limit` upcoming events for `league_id` starting within the
    /// next `lookahead_days` days, alternate lines included.
    pub async fn fetch_upcoming_events(
        &self,
        league_id: &str,
        limit: u32,
        lookahead_days: i64,
    ) -> Result<Vec<ApiEvent>, FetchError> {
        self.rate_limiter.until_ready().await;

        let today = Utc::now().date_naive();
        let until = today + Duration::days(lookahead_days);
        let url = format!("{}/v2/events", self.base_url);

        let response = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .query(&[
                ("leagueID", league_id.to_string()),
                ("type", "match".to_string()),
                ("startsAfter", today.format("%Y-%m-%d").to_string()),
                ("startsBefore", until.format("%Y-%m-%d").to_string()),
                ("limit", limit.to_string()),
                ("includeAltLines", "true".to_string()),
            ])
            .send()
            .await?;

        // Log API usage from headers when the upstream provides it
        if let Some(remaining) = response.headers().get("x-requests-remaining") {
            info!(
                "API requests remaining: {}",
                remaining.to_str().unwrap_or("?")
            );
        }

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status { status, body });
        }

        let parsed: EventsResponse = serde_json::from_str(&body)?;
        info!(
            "Fetched {} events for {} ({} to {})",
            parsed.data.len(),
            league_id,
            today,
            until
        );
        Ok(parsed.data)
    }
}
