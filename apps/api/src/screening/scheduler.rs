//! Concurrency scheduler: bounded fan-out of scoring calls with
//! completion-order fan-in.
//!
//! `run_batch` returns a lazy `ScoreStream`. The first poll spawns a driver
//! task that walks the work items in submission order, takes an admission from
//! the gate for each one, and spawns a scoring task holding that admission.
//! Finished results go into a completion channel, so the stream yields them in
//! the order they finish. Dropping the stream stops new admissions; tasks
//! already running finish and their results are discarded.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

use crate::screening::models::{ScoreResult, ScreeningMode, WorkItem};
use crate::screening::scorer::{score_work_item, ScoreError, Scorer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("concurrency limit must be at least 1, got {0}")]
    InvalidConcurrency(i64),
}

/// The text every work item in a batch is compared against.
#[derive(Debug, Clone)]
pub struct ReferenceText {
    pub text: Arc<str>,
    pub mode: ScreeningMode,
}

impl ReferenceText {
    pub fn new(text: impl Into<Arc<str>>, mode: ScreeningMode) -> Self {
        Self {
            text: text.into(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub call_timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Admission gate
// ────────────────────────────────────────────────────────────────────────────

/// Counting gate bounding how many scoring calls run at once.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    limit: usize,
}

/// Held for the lifetime of one scoring call.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so the counter never
        // exceeds the number of outstanding permits.
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Result<Self, SchedulerError> {
        if limit == 0 {
            return Err(SchedulerError::InvalidConcurrency(0));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            limit,
        })
    }

    /// Waits until a slot is free.
    pub async fn admit(&self) -> Result<Admission, AcquireError> {
        let permit = self.permits.clone().acquire_owned().await?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Admission {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Batch driver
// ────────────────────────────────────────────────────────────────────────────

struct Launch {
    scorer: Arc<dyn Scorer>,
    items: Vec<WorkItem>,
    reference: ReferenceText,
    gate: AdmissionGate,
    call_timeout: Duration,
    completed: mpsc::Sender<ScoreResult>,
}

impl Launch {
    async fn drive(self) {
        let Launch {
            scorer,
            items,
            reference,
            gate,
            call_timeout,
            completed,
        } = self;

        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            let admission = tokio::select! {
                biased;
                _ = completed.closed() => {
                    debug!("Result consumer left; stopping after {index}/{total} admissions");
                    return;
                }
                admission = gate.admit() => match admission {
                    Ok(admission) => admission,
                    Err(e) => {
                        error!("Admission gate closed unexpectedly: {e}");
                        return;
                    }
                },
            };

            debug!(
                "Admitted '{}' ({}/{} in flight)",
                item.label,
                gate.in_flight(),
                gate.limit()
            );

            let scorer = scorer.clone();
            let reference = reference.clone();
            let completed = completed.clone();
            tokio::spawn(async move {
                let label = item.label.clone();
                // Scored on its own task so a panicking backend still yields a result.
                let scoring = tokio::spawn(async move {
                    score_work_item(
                        scorer.as_ref(),
                        &item,
                        &reference.text,
                        reference.mode,
                        call_timeout,
                    )
                    .await
                });
                let result = match scoring.await {
                    Ok(result) => result,
                    Err(e) => ScoreResult::failed(&label, &ScoreError::Aborted(e.to_string()).to_string()),
                };
                drop(admission);
                // Err only when the consumer has gone away.
                let _ = completed.send(result).await;
            });
        }
    }
}

/// Lazy, single-pass stream of results in completion order.
pub struct ScoreStream {
    launch: Option<Launch>,
    results: mpsc::Receiver<ScoreResult>,
    remaining: usize,
}

impl Stream for ScoreStream {
    type Item = ScoreResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(launch) = self.launch.take() {
            tokio::spawn(launch.drive());
        }
        match self.results.poll_recv(cx) {
            Poll::Ready(Some(result)) => {
                self.remaining = self.remaining.saturating_sub(1);
                Poll::Ready(Some(result))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Scores every item against `reference` with at most `options.concurrency`
/// calls in flight. Fails fast on an invalid limit; nothing runs until the
/// returned stream is polled.
pub fn run_batch(
    scorer: Arc<dyn Scorer>,
    items: Vec<WorkItem>,
    reference: ReferenceText,
    options: BatchOptions,
) -> Result<ScoreStream, SchedulerError> {
    let gate = AdmissionGate::new(options.concurrency)?;
    let (completed, results) = mpsc::channel(gate.limit());
    let remaining = items.len();

    let launch = if items.is_empty() {
        None
    } else {
        Some(Launch {
            scorer,
            items,
            reference,
            gate,
            call_timeout: options.call_timeout,
            completed,
        })
    };

    Ok(ScoreStream {
        launch,
        results,
        remaining,
    })
}
