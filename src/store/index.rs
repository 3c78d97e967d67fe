//! Search Index
//!
//! Inverted index over stored records: message tokens (lowercased,
//! whitespace-split) and exact field pairs each map to the sequence
//! numbers of the records containing them. Queries are conjunctive;
//! the time window and result limit are applied after intersection.

use dashmap::DashMap;

use crate::domain::model::LogRecord;
use crate::store::ingest::StoredRecord;

/// A search over the stored records. All constraints are ANDed.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Message tokens that must all be present.
    pub tokens: Vec<String>,
    /// Field pairs that must all match exactly.
    pub fields: Vec<(String, String)>,
    /// Inclusive window start, milliseconds since the epoch.
    pub start_ms: Option<i64>,
    /// Inclusive window end.
    pub end_ms: Option<i64>,
    /// Keep only the most recent matches.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Query on message tokens alone.
    pub fn tokens(text: &str) -> Self {
        Self {
            tokens: tokenize(text),
            ..Self::default()
        }
    }

    /// Builder-style field constraint.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Split a message into lowercase search tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Inverted index from tokens and field pairs to record sequences.
///
/// Postings stay sorted because records are indexed in sequence order.
pub struct SearchIndex {
    token_postings: DashMap<String, Vec<u64>>,
    field_postings: DashMap<(String, String), Vec<u64>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self {
            token_postings: DashMap::new(),
            field_postings: DashMap::new(),
        }
    }

    /// Index one accepted record under its sequence number.
    pub fn add(&self, seq: u64, record: &LogRecord) {
        for token in tokenize(&record.message) {
            let mut postings = self.token_postings.entry(token).or_default();
            if postings.last() != Some(&seq) {
                postings.push(seq);
            }
        }
        for (name, value) in &record.fields {
            self.field_postings
                .entry((name.clone(), value.clone()))
                .or_default()
                .push(seq);
        }
    }

    /// Sequence numbers matching the query, ascending.
    ///
    /// `records` supplies timestamps for the window filter; it is the
    /// store's full record vector, indexable by sequence.
    pub fn search(&self, query: &LogQuery, records: &[StoredRecord]) -> Vec<u64> {
        let mut candidate: Option<Vec<u64>> = None;

        for token in &query.tokens {
            let postings = self
                .token_postings
                .get(&token.to_lowercase())
                .map(|p| p.clone())
                .unwrap_or_default();
            candidate = Some(match candidate {
                Some(current) => intersect(&current, &postings),
                None => postings,
            });
            if candidate.as_ref().is_some_and(Vec::is_empty) {
                return vec![];
            }
        }

        for (name, value) in &query.fields {
            let postings = self
                .field_postings
                .get(&(name.clone(), value.clone()))
                .map(|p| p.clone())
                .unwrap_or_default();
            candidate = Some(match candidate {
                Some(current) => intersect(&current, &postings),
                None => postings,
            });
            if candidate.as_ref().is_some_and(Vec::is_empty) {
                return vec![];
            }
        }

        // An unconstrained query scans everything in the window
        let mut seqs =
            candidate.unwrap_or_else(|| records.iter().map(|r| r.seq).collect());

        if query.start_ms.is_some() || query.end_ms.is_some() {
            let start = query.start_ms.unwrap_or(i64::MIN);
            let end = query.end_ms.unwrap_or(i64::MAX);
            seqs.retain(|&seq| {
                records
                    .get(seq as usize)
                    .map(|r| {
                        let ts = r.record.timestamp.timestamp_millis();
                        ts >= start && ts <= end
                    })
                    .unwrap_or(false)
            });
        }

        if let Some(limit) = query.limit {
            if seqs.len() > limit {
                // Keep the most recent matches, still in ascending order
                seqs.drain(..seqs.len() - limit);
            }
        }

        seqs
    }
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Intersection of two sorted sequence lists.
fn intersect(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
