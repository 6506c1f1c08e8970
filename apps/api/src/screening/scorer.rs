//! Scorer: pluggable judgment backend plus the wrapper that turns every
//! outcome into a `ScoreResult`.
//!
//! `AppState` holds an `Arc<dyn Scorer>`. Callers never see a `ScoreError`:
//! `score_work_item` folds failures into an error-flagged result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::llm_client::prompts::{EVIDENCE_INSTRUCTION, JSON_ONLY_SYSTEM};
use crate::llm_client::{LlmClient, LlmError};
use crate::screening::models::{ScoreResult, ScreeningMode, Verdict, WorkItem};
use crate::screening::prompts::{SCREENING_PERSONA, SCREENING_PROMPT_TEMPLATE};

/// Documents longer than this are cut before being sent for judgment.
const MAX_DOCUMENT_CHARS: usize = 50_000;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("judgment service error: {0}")]
    Llm(#[from] LlmError),

    #[error("judgment timed out after {0:?}")]
    Timeout(Duration),

    #[error("scoring task aborted: {0}")]
    Aborted(String),
}

/// Raw verdict as returned by the judgment service, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub score: i64,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub matching_skills: Vec<String>,
    #[serde(default)]
    pub missing_skills: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// The judgment backend. Implement this to swap backends without touching
/// the scheduler, aggregator, or handlers.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn judge(&self, resume: &str, job_description: &str) -> Result<Judgment, ScoreError>;
}

/// Judgment via the LLM client.
pub struct LlmScorer {
    llm: LlmClient,
    system: String,
}

impl LlmScorer {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            system: build_system(),
        }
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    async fn judge(&self, resume: &str, job_description: &str) -> Result<Judgment, ScoreError> {
        let prompt = build_prompt(resume, job_description);
        let judgment = self
            .llm
            .call_json::<Judgment>(&prompt, &self.system)
            .await?;
        Ok(judgment)
    }
}

fn build_system() -> String {
    format!("{SCREENING_PERSONA} {JSON_ONLY_SYSTEM}")
}

fn build_prompt(resume: &str, job_description: &str) -> String {
    SCREENING_PROMPT_TEMPLATE
        .replace("{evidence_instruction}", EVIDENCE_INSTRUCTION)
        .replace("{job_description}", &clip(job_description))
        .replace("{resume_text}", &clip(resume))
}

fn clip(text: &str) -> String {
    match text.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// A judgment after validation: either usable or a parse failure with its cause.
#[derive(Debug)]
pub enum ScoreOutcome {
    Scored(Judgment),
    ParseFailure(String),
}

impl ScoreOutcome {
    /// Validates a raw judgment result. Scores outside 0–100 are rejected.
    pub fn from_judgment(judgment: Result<Judgment, ScoreError>) -> Self {
        match judgment {
            Ok(j) if (0..=100).contains(&j.score) => ScoreOutcome::Scored(j),
            Ok(j) => ScoreOutcome::ParseFailure(format!("score {} is outside 0-100", j.score)),
            Err(e) => ScoreOutcome::ParseFailure(e.to_string()),
        }
    }

    pub fn into_result(self, label: &str) -> ScoreResult {
        match self {
            ScoreOutcome::Scored(j) => {
                let score = j.score.clamp(0, 100) as u8;
                ScoreResult {
                    score,
                    // A reported verdict is kept even if it disagrees with the bands.
                    verdict: j.verdict.unwrap_or_else(|| Verdict::from_score(score)),
                    reason: j.reason,
                    matching_skills: j.matching_skills,
                    missing_skills: j.missing_skills,
                    summary: j.summary,
                    filename: label.to_string(),
                    error: false,
                    rank: 0,
                }
            }
            ScoreOutcome::ParseFailure(cause) => ScoreResult::failed(label, &cause),
        }
    }
}

/// Scores one work item against the reference text. Never fails: timeouts,
/// service errors and invalid judgments come back as error-flagged results.
pub async fn score_work_item(
    scorer: &dyn Scorer,
    item: &WorkItem,
    reference: &str,
    mode: ScreeningMode,
    call_timeout: Duration,
) -> ScoreResult {
    let (resume, job_description) = mode.resume_and_job(&item.text, reference);

    let judgment = match tokio::time::timeout(call_timeout, scorer.judge(resume, job_description))
        .await
    {
        Ok(judgment) => judgment,
        Err(_) => Err(ScoreError::Timeout(call_timeout)),
    };

    let outcome = ScoreOutcome::from_judgment(judgment);
    if let ScoreOutcome::ParseFailure(cause) = &outcome {
        warn!("Scoring '{}' failed: {cause}", item.label);
    }
    outcome.into_result(&item.label)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake scorers shared by scheduler, aggregator and handler tests.

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Scores by looking the resume text up in a fixed table; unknown text
    /// scores 50. Texts in `failing` return an error. Every call sleeps for
    /// the delay encoded as `delay=<ms>` in the text, if any.
    #[derive(Default)]
    pub struct FakeScorer {
        pub scores: Vec<(String, i64)>,
        pub failing: HashSet<String>,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
        pub seen: Mutex<Vec<(String, String)>>,
    }

    impl FakeScorer {
        pub fn with_scores(scores: &[(&str, i64)]) -> Self {
            Self {
                scores: scores.iter().map(|(t, s)| (t.to_string(), *s)).collect(),
                ..Self::default()
            }
        }

        pub fn failing_on(mut self, text: &str) -> Self {
            self.failing.insert(text.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn peak(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    pub fn delay_of(text: &str) -> Option<Duration> {
        text.split_whitespace()
            .find_map(|w| w.strip_prefix("delay="))
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
    }

    #[async_trait]
    impl Scorer for FakeScorer {
        async fn judge(&self, resume: &str, job_description: &str) -> Result<Judgment, ScoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((resume.to_string(), job_description.to_string()));

            if let Some(delay) = delay_of(resume) {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(resume) {
                return Err(ScoreError::Aborted("injected failure".to_string()));
            }
            let score = self
                .scores
                .iter()
                .find(|(t, _)| t == resume)
                .map(|(_, s)| *s)
                .unwrap_or(50);
            Ok(Judgment {
                score,
                verdict: None,
                reason: "fake".to_string(),
                matching_skills: vec!["Rust".to_string()],
                missing_skills: vec![],
                summary: format!("summary of {resume}"),
            })
        }
    }
}
