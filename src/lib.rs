//! SportsGameOdds Ingestion Service
//!
//! Single-pass odds normalization and deduplication pipeline: fetch one page
//! of upcoming events, gate out games already underway, flatten each raw odd
//! (and its alternate lines) into normalized records, suppress same-run
//! duplicates, bulk-insert per game, and report counters at the end.

pub mod api;
pub mod config;
pub mod dedup;
pub mod normalize;
pub mod pipeline;
pub mod stats;
pub mod store;
