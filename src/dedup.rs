//! Run-scoped duplicate suppression.
//!
//! Tracks which `(event, odd)` and `(event, odd, line)` combinations have
//! already been emitted in this run. Keys are typed tuples, not concatenated
//! strings, so an id containing a delimiter can't collide with another key.
//!
//! This is a same-run optimization only. The store's unique constraint is the
//! authority across runs; the persister tolerates duplicate-key failures for
//! exactly that reason.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DedupTracker {
    main: HashSet<(String, String)>,
    alt: HashSet<(String, String, String)>,
    /// Sequence for alt lines with no line value at all; gives each of them
    /// a key that can never collide with a real line token.
    fallback_seq: u64,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a main-line odd. Returns true the first time a given
    /// `(event, odd)` pair is seen in this run.
    pub fn try_claim_main(&mut self, event_id: &str, odd_id: &str) -> bool {
        self.main
            .insert((event_id.to_string(), odd_id.to_string()))
    }

    /// Claim an alternate line. `line` is the normalized line token; an alt
    /// line with no spread and no total gets a synthesized unique token so it
    /// is never accidentally deduplicated against another alt line.
    pub fn try_claim_alt(&mut self, event_id: &str, odd_id: &str, line: Option<&str>) -> bool {
        let token = match line {
            Some(l) => l.to_string(),
            None => {
                self.fallback_seq += 1;
                format!("noline-{}", self.fallback_seq)
            }
        };
        self.alt
            .insert((event_id.to_string(), odd_id.to_string(), token))
    }
}
