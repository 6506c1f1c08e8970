//! Result aggregator: drains a batch's score stream into its session,
//! forwards each result to the live event sink, then finalizes the session
//! and settles credits once.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::screening::ledger::CreditLedger;
use crate::screening::models::ScoreResult;
use crate::screening::sessions::{BatchSession, BatchSummary, SessionRepository};

/// Events streamed to a client for one batch, in this order: one `start`,
/// one `result` per item, one `complete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Start {
        total: usize,
        session_id: Uuid,
    },
    Result {
        result: ScoreResult,
        /// Results delivered so far, including this one.
        processed: usize,
        total: usize,
    },
    Complete {
        total: usize,
        processed: usize,
        shortlisted: usize,
        avg_score: f64,
        session_id: Uuid,
        /// `None` when the ledger could not be settled.
        credits_remaining: Option<i64>,
    },
}

impl BatchEvent {
    /// Event name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::Start { .. } => "start",
            BatchEvent::Result { .. } => "result",
            BatchEvent::Complete { .. } => "complete",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum AggregateOutcome {
    Completed(BatchSummary),
    /// The event sink closed before the batch finished.
    Abandoned { processed: usize },
}

pub struct ResultAggregator {
    sessions: Arc<dyn SessionRepository>,
    ledger: Arc<dyn CreditLedger>,
}

impl ResultAggregator {
    pub fn new(sessions: Arc<dyn SessionRepository>, ledger: Arc<dyn CreditLedger>) -> Self {
        Self { sessions, ledger }
    }

    /// Drains `results` into `session`, forwarding events to `sink`.
    ///
    /// If the sink closes mid-batch the stream is dropped as soon as that is
    /// noticed, even while waiting on a result, so no further scoring starts.
    /// The session is not stored and no credits are charged.
    pub async fn run<S>(
        &self,
        mut session: BatchSession,
        results: S,
        sink: mpsc::Sender<BatchEvent>,
    ) -> AggregateOutcome
    where
        S: Stream<Item = ScoreResult> + Send,
    {
        let session_id = session.session_id;
        let total = session.summary.total;
        let mut results = std::pin::pin!(results);

        if sink
            .send(BatchEvent::Start { total, session_id })
            .await
            .is_err()
        {
            warn!("Session {session_id}: client left before the batch started");
            return AggregateOutcome::Abandoned { processed: 0 };
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => {
                    let processed = session.results.len();
                    warn!("Session {session_id}: client left after {processed}/{total} results");
                    return AggregateOutcome::Abandoned { processed };
                }
                next = results.next() => next,
            };
            let Some(result) = next else { break };

            let result = session.record(result).clone();
            let processed = session.results.len();
            let event = BatchEvent::Result {
                result,
                processed,
                total,
            };
            if sink.send(event).await.is_err() {
                warn!("Session {session_id}: client left after {processed}/{total} results");
                return AggregateOutcome::Abandoned { processed };
            }
        }

        let summary = session.finalize().clone();
        let account_id = session.account_id.clone();
        self.sessions.put(session);

        let credits_remaining = match self
            .ledger
            .debit(&account_id, summary.processed as u64)
            .await
        {
            Ok(remaining) => Some(remaining),
            Err(e) => {
                error!("Session {session_id}: failed to debit {account_id}: {e:?}");
                None
            }
        };

        info!(
            "Session {session_id} complete: {}/{} processed, {} shortlisted, avg {}",
            summary.processed, summary.total, summary.shortlisted, summary.avg_score
        );

        let _ = sink
            .send(BatchEvent::Complete {
                total: summary.total,
                processed: summary.processed,
                shortlisted: summary.shortlisted,
                avg_score: summary.avg_score,
                session_id,
                credits_remaining,
            })
            .await;

        AggregateOutcome::Completed(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::screening::ledger::InMemoryCreditLedger;
    use crate::screening::models::{ScreeningMode, Verdict, WorkItem};
    use crate::screening::scheduler::{run_batch, BatchOptions, ReferenceText};
    use crate::screening::scorer::testing::FakeScorer;
    use crate::screening::sessions::InMemorySessionRepository;

    struct Harness {
        aggregator: ResultAggregator,
        sessions: Arc<InMemorySessionRepository>,
        ledger: Arc<InMemoryCreditLedger>,
    }

    fn harness() -> Harness {
        let sessions = Arc::new(InMemorySessionRepository::new(Duration::from_secs(60), 10));
        let ledger = Arc::new(InMemoryCreditLedger::new(10));
        Harness {
            aggregator: ResultAggregator::new(sessions.clone(), ledger.clone()),
            sessions,
            ledger,
        }
    }

    fn scored(label: &str, score: u8) -> ScoreResult {
        ScoreResult {
            score,
            verdict: Verdict::from_score(score),
            reason: String::new(),
            matching_skills: vec![],
            missing_skills: vec![],
            summary: String::new(),
            filename: label.to_string(),
            error: false,
            rank: 0,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<BatchEvent>) -> Vec<BatchEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_events_follow_start_results_complete() {
        let h = harness();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 3);
        let session_id = session.session_id;
        let results = stream::iter(vec![scored("b", 80), scored("a", 40), scored("c", 65)]);
        let (tx, rx) = mpsc::channel(16);

        let outcome = h.aggregator.run(session, results, tx).await;
        let events = drain(rx).await;

        assert_eq!(events.len(), 5);
        assert_eq!(events[0], BatchEvent::Start { total: 3, session_id });
        let ranks: Vec<_> = events[1..4]
            .iter()
            .map(|e| match e {
                BatchEvent::Result { result, processed, .. } => (result.rank, *processed),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ranks, vec![(1, 1), (2, 2), (3, 3)]);

        match &events[4] {
            BatchEvent::Complete {
                processed,
                shortlisted,
                avg_score,
                credits_remaining,
                ..
            } => {
                assert_eq!(*processed, 3);
                assert_eq!(*shortlisted, 2);
                assert_eq!(*avg_score, 61.7);
                assert_eq!(*credits_remaining, Some(7));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(outcome, AggregateOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_completed_session_is_retrievable() {
        let h = harness();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 2);
        let session_id = session.session_id;
        let (tx, rx) = mpsc::channel(16);

        h.aggregator
            .run(session, stream::iter(vec![scored("x", 10), scored("y", 90)]), tx)
            .await;
        drop(rx);

        let stored = h.sessions.get(session_id).expect("session stored");
        assert!(stored.complete);
        let labels: Vec<_> = stored.results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(labels, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_failed_items_are_still_charged() {
        let h = harness();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 2);
        let (tx, _rx) = mpsc::channel(16);
        let results = stream::iter(vec![scored("ok", 75), ScoreResult::failed("bad", "boom")]);

        h.aggregator.run(session, results, tx).await;
        assert_eq!(h.ledger.balance("acct").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_closed_sink_abandons_without_charge() {
        let h = harness();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 2);
        let session_id = session.session_id;
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let outcome = h
            .aggregator
            .run(session, stream::iter(vec![scored("a", 50), scored("b", 60)]), tx)
            .await;

        assert_eq!(outcome, AggregateOutcome::Abandoned { processed: 0 });
        assert!(h.sessions.get(session_id).is_none());
        assert_eq!(h.ledger.balance("acct").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_empty_stream_still_completes() {
        let h = harness();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 0);
        let (tx, rx) = mpsc::channel(4);

        let outcome = h.aggregator.run(session, stream::iter(Vec::<ScoreResult>::new()), tx).await;
        let events = drain(rx).await;

        assert_eq!(events.len(), 2);
        match outcome {
            AggregateOutcome::Completed(summary) => assert_eq!(summary.avg_score, 0.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_items_one_failure_end_to_end() {
        let h = harness();
        let scorer = Arc::new(FakeScorer::default().failing_on("r3 delay=20"));
        let items: Vec<_> = ["r0 delay=50", "r1 delay=10", "r2 delay=30", "r3 delay=20", "r4 delay=5"]
            .iter()
            .enumerate()
            .map(|(i, t)| WorkItem::new(format!("cv{i}.pdf"), *t))
            .collect();
        let stream = run_batch(
            scorer,
            items,
            ReferenceText::new("jd", ScreeningMode::ResumesAgainstJob),
            BatchOptions {
                concurrency: 2,
                call_timeout: Duration::from_secs(30),
            },
        )
        .unwrap();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 5);
        let (tx, rx) = mpsc::channel(16);

        h.aggregator.run(session, stream, tx).await;
        let events = drain(rx).await;

        let results: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Result { result, .. } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.error).count(), 1);
        match events.last().unwrap() {
            BatchEvent::Complete { processed, total, .. } => {
                assert_eq!(*processed, 5);
                assert_eq!(*total, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_waiting_stops_admissions() {
        let h = harness();
        let scorer = Arc::new(FakeScorer::default());
        let items: Vec<_> = (0..4)
            .map(|i| WorkItem::new(format!("cv{i}.pdf"), format!("r{i} delay=100")))
            .collect();
        let stream = run_batch(
            scorer.clone(),
            items,
            ReferenceText::new("jd", ScreeningMode::ResumesAgainstJob),
            BatchOptions {
                concurrency: 1,
                call_timeout: Duration::from_secs(30),
            },
        )
        .unwrap();
        let session = BatchSession::new("acct", ScreeningMode::ResumesAgainstJob, 4);
        let session_id = session.session_id;
        let (tx, mut rx) = mpsc::channel(16);

        let aggregator = h.aggregator;
        let run = tokio::spawn(async move { aggregator.run(session, stream, tx).await });

        assert!(matches!(rx.recv().await, Some(BatchEvent::Start { .. })));
        while scorer.calls() == 0 {
            tokio::task::yield_now().await;
        }
        drop(rx);

        let outcome = run.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(outcome, AggregateOutcome::Abandoned { processed: 0 });
        assert_eq!(scorer.calls(), 1);
        assert!(h.sessions.get(session_id).is_none());
        assert_eq!(h.ledger.balance("acct").await.unwrap(), 10);
    }

    #[test]
    fn test_event_wire_shape() {
        let id = Uuid::nil();
        let value = serde_json::to_value(BatchEvent::Start {
            total: 2,
            session_id: id,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "start", "total": 2, "session_id": id.to_string()})
        );

        let complete = BatchEvent::Complete {
            total: 1,
            processed: 1,
            shortlisted: 0,
            avg_score: 12.5,
            session_id: id,
            credits_remaining: Some(2),
        };
        assert_eq!(complete.name(), "complete");
        let value = serde_json::to_value(complete).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["avg_score"], 12.5);
    }
}
