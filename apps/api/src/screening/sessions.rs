//! Batch sessions and the repository that keeps them retrievable for export.
//!
//! Eviction policy: sessions live for a fixed time-to-live after they are
//! stored, and the repository holds at most `capacity` sessions (least
//! recently used go first). An evicted or expired session reads as not found.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;
use uuid::Uuid;

use crate::screening::models::{ScoreResult, ScreeningMode};

/// Summary cut for the dashboard count. Deliberately coarser than the
/// per-candidate shortlist verdict.
pub const SUMMARY_SHORTLIST_SCORE: u8 = 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub shortlisted: usize,
    pub avg_score: f64,
}

impl BatchSummary {
    pub fn compute(total: usize, results: &[ScoreResult]) -> Self {
        let processed = results.len();
        let shortlisted = results
            .iter()
            .filter(|r| r.score >= SUMMARY_SHORTLIST_SCORE)
            .count();
        let sum: u64 = results.iter().map(|r| u64::from(r.score)).sum();
        let mean = sum as f64 / processed.max(1) as f64;

        Self {
            total,
            processed,
            shortlisted,
            avg_score: (mean * 10.0).round() / 10.0,
        }
    }
}

/// The retrievable record of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSession {
    pub session_id: Uuid,
    pub account_id: String,
    pub mode: ScreeningMode,
    /// Results in completion order.
    pub results: Vec<ScoreResult>,
    pub summary: BatchSummary,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchSession {
    pub fn new(account_id: impl Into<String>, mode: ScreeningMode, total: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            account_id: account_id.into(),
            mode,
            results: Vec::with_capacity(total),
            summary: BatchSummary {
                total,
                ..BatchSummary::default()
            },
            complete: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Appends a result, stamping it with the next 1-based ordinal.
    pub fn record(&mut self, mut result: ScoreResult) -> &ScoreResult {
        result.rank = self.results.len() + 1;
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    /// Computes the final summary and marks the session read-only.
    pub fn finalize(&mut self) -> &BatchSummary {
        self.summary = BatchSummary::compute(self.summary.total, &self.results);
        self.complete = true;
        self.completed_at = Some(Utc::now());
        &self.summary
    }
}

/// Storage for finalized sessions.
pub trait SessionRepository: Send + Sync {
    fn get(&self, session_id: Uuid) -> Option<Arc<BatchSession>>;
    fn put(&self, session: BatchSession);
    fn evict(&self, session_id: Uuid);
}

pub struct InMemorySessionRepository {
    cache: Cache<Uuid, Arc<BatchSession>>,
}

impl InMemorySessionRepository {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl SessionRepository for InMemorySessionRepository {
    fn get(&self, session_id: Uuid) -> Option<Arc<BatchSession>> {
        self.cache.get(&session_id)
    }

    fn put(&self, session: BatchSession) {
        self.cache.insert(session.session_id, Arc::new(session));
    }

    fn evict(&self, session_id: Uuid) {
        self.cache.invalidate(&session_id);
    }
}
