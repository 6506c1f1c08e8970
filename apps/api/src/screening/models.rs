//! Core data model for a screening batch.

use serde::{Deserialize, Serialize};

/// Score at or above which a candidate is shortlisted.
pub const SHORTLIST_SCORE: u8 = 70;
/// Score at or above which a candidate is a maybe.
pub const MAYBE_SCORE: u8 = 50;

/// One candidate document in a batch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Opaque label, usually the uploaded file name.
    pub label: String,
    pub text: String,
}

impl WorkItem {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// Which side of the comparison the batch fans out over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningMode {
    /// Many resumes, one job description.
    #[default]
    ResumesAgainstJob,
    /// Many job descriptions, one resume.
    JobsAgainstResume,
}

impl ScreeningMode {
    /// Parses the `mode` form field: `resumes` or `jobs`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "resumes" | "resumes_against_job" => Some(ScreeningMode::ResumesAgainstJob),
            "jobs" | "jobs_against_resume" => Some(ScreeningMode::JobsAgainstResume),
            _ => None,
        }
    }

    /// Orders a (work item, reference) pair as (resume, job description).
    pub fn resume_and_job<'a>(&self, item: &'a str, reference: &'a str) -> (&'a str, &'a str) {
        match self {
            ScreeningMode::ResumesAgainstJob => (item, reference),
            ScreeningMode::JobsAgainstResume => (reference, item),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Shortlisted,
    Maybe,
    Rejected,
}

impl Verdict {
    /// Maps a 0–100 score onto the verdict bands.
    pub fn from_score(score: u8) -> Self {
        if score >= SHORTLIST_SCORE {
            Verdict::Shortlisted
        } else if score >= MAYBE_SCORE {
            Verdict::Maybe
        } else {
            Verdict::Rejected
        }
    }
}

/// The outcome of scoring one work item, successful or synthesized from a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8,
    pub verdict: Verdict,
    pub reason: String,
    pub matching_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub summary: String,
    /// Label of the originating work item.
    pub filename: String,
    pub error: bool,
    /// 1-based completion position; 0 until the aggregator assigns it.
    pub rank: usize,
}

impl ScoreResult {
    /// Builds the result reported for an item whose scoring failed.
    pub fn failed(label: &str, cause: &str) -> Self {
        Self {
            score: 0,
            verdict: Verdict::Rejected,
            reason: format!("Scoring failed: {cause}"),
            matching_skills: vec![],
            missing_skills: vec![],
            summary: String::new(),
            filename: label.to_string(),
            error: true,
            rank: 0,
        }
    }
}
