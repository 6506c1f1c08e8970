//! Axum route handlers for the Screening API.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRequestParts, Multipart, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::screening::aggregator::{BatchEvent, ResultAggregator};
use crate::screening::export::export_csv;
use crate::screening::extract::{extract_document, extract_upload};
use crate::screening::ledger::can_afford;
use crate::screening::models::{ScoreResult, ScreeningMode, WorkItem};
use crate::screening::scheduler::{run_batch, BatchOptions, ReferenceText, SchedulerError};
use crate::screening::scorer::score_work_item;
use crate::screening::sessions::BatchSession;
use crate::state::AppState;

/// Header carrying the caller's account, set by the upstream identity layer.
pub const ACCOUNT_HEADER: &str = "x-account-id";
/// Events buffered between the aggregator and a slow client.
const EVENT_BUFFER: usize = 32;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// The caller's account id.
pub struct AccountId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AccountId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| AccountId(v.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}

/// Multipart form shared by the batch and single-document endpoints.
#[derive(Debug, Default)]
struct ScreeningUpload {
    files: Vec<(String, Bytes)>,
    reference_text: Option<String>,
    reference_file: Option<(String, Bytes)>,
    mode: ScreeningMode,
    concurrency: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub result: ScoreResult,
    pub credits_remaining: i64,
}

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub account_id: String,
    pub credits: i64,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/screenings
///
/// Scores every uploaded document against one reference text and streams
/// `start`, `result` and `complete` events as server-sent events.
pub async fn handle_screen_batch(
    State(state): State<AppState>,
    AccountId(account_id): AccountId,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let upload = read_upload(multipart).await?;
    let concurrency = resolve_concurrency(upload.concurrency, &state.config)?;
    let reference = resolve_reference(&upload).await?;

    let mut items: Vec<WorkItem> = Vec::new();
    for (label, bytes) in upload.files {
        items.extend(extract_upload(label, bytes).await);
    }
    if items.is_empty() {
        return Err(AppError::Validation(
            "No readable documents found in the upload.".to_string(),
        ));
    }

    ensure_credits(&state, &account_id, items.len()).await?;

    let session = BatchSession::new(account_id, upload.mode, items.len());
    info!(
        "Session {}: screening {} documents ({:?}, concurrency {})",
        session.session_id,
        items.len(),
        upload.mode,
        concurrency
    );

    let results = run_batch(
        state.scorer.clone(),
        items,
        ReferenceText::new(reference, upload.mode),
        BatchOptions {
            concurrency,
            call_timeout: Duration::from_secs(state.config.llm_timeout_secs),
        },
    )?;

    let (sink, events) = mpsc::channel(EVENT_BUFFER);
    let aggregator = ResultAggregator::new(state.sessions.clone(), state.ledger.clone());
    tokio::spawn(async move {
        aggregator.run(session, results, sink).await;
    });

    let stream = ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /api/v1/screenings/analyze
///
/// Scores a single document and returns the result directly.
pub async fn handle_analyze(
    State(state): State<AppState>,
    AccountId(account_id): AccountId,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let reference = resolve_reference(&upload).await?;

    let (label, bytes) = match upload.files.as_slice() {
        [single] => single.clone(),
        [] => return Err(AppError::Validation("A document is required.".to_string())),
        _ => {
            return Err(AppError::Validation(
                "Upload exactly one document; use /api/v1/screenings for batches.".to_string(),
            ))
        }
    };
    let text = extract_blocking(label.clone(), bytes).await?;

    ensure_credits(&state, &account_id, 1).await?;

    let item = WorkItem::new(label, text);
    let mut result = score_work_item(
        state.scorer.as_ref(),
        &item,
        &reference,
        upload.mode,
        Duration::from_secs(state.config.llm_timeout_secs),
    )
    .await;
    result.rank = 1;

    let credits_remaining = state.ledger.debit(&account_id, 1).await?;

    Ok(Json(AnalyzeResponse {
        result,
        credits_remaining,
    }))
}

/// GET /api/v1/screenings/:session_id
pub async fn handle_get_session(
    State(state): State<AppState>,
    AccountId(account_id): AccountId,
    Path(session_id): Path<Uuid>,
) -> Result<Json<BatchSession>, AppError> {
    let session = find_session(&state, &account_id, session_id)?;
    Ok(Json(session))
}

/// DELETE /api/v1/screenings/:session_id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    AccountId(account_id): AccountId,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    find_session(&state, &account_id, session_id)?;
    state.sessions.evict(session_id);
    info!("Session {session_id} discarded by {account_id}");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/screenings/:session_id/export
///
/// Returns the finished batch as a CSV attachment, best score first.
pub async fn handle_export(
    State(state): State<AppState>,
    AccountId(account_id): AccountId,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = find_session(&state, &account_id, session_id)?;
    let csv = export_csv(&session.results).map_err(|e| AppError::Internal(e.into()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"screening-{session_id}.csv\""),
            ),
        ],
        csv,
    ))
}

/// GET /api/v1/credits
pub async fn handle_get_credits(
    State(state): State<AppState>,
    AccountId(account_id): AccountId,
) -> Result<Json<CreditsResponse>, AppError> {
    let credits = state.ledger.balance(&account_id).await?;
    Ok(Json(CreditsResponse {
        account_id,
        credits,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn read_upload(mut multipart: Multipart) -> Result<ScreeningUpload, AppError> {
    let mut upload = ScreeningUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed upload field '{name}': {e}")))?;

        match name.as_str() {
            "files" | "file" | "resumes" | "resume_files" => {
                let label = file_name.unwrap_or_else(|| "upload".to_string());
                upload.files.push((label, bytes));
            }
            "job_description" | "resume" | "reference" => {
                upload.reference_text = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            "job_description_file" | "resume_file" | "reference_file" => {
                let label = file_name.unwrap_or_else(|| "reference".to_string());
                upload.reference_file = Some((label, bytes));
            }
            "mode" => {
                let raw = String::from_utf8_lossy(&bytes);
                upload.mode = ScreeningMode::parse(&raw).ok_or_else(|| {
                    AppError::Validation(format!("Unknown mode '{raw}'; use 'resumes' or 'jobs'"))
                })?;
            }
            "concurrency" => {
                let raw = String::from_utf8_lossy(&bytes);
                let value = raw.trim().parse::<i64>().map_err(|_| {
                    AppError::Validation(format!("concurrency must be an integer, got '{raw}'"))
                })?;
                upload.concurrency = Some(value);
            }
            _ => {}
        }
    }

    Ok(upload)
}

/// Picks the reference text: an uploaded file wins over pasted text.
async fn resolve_reference(upload: &ScreeningUpload) -> Result<String, AppError> {
    let reference = match &upload.reference_file {
        Some((label, bytes)) => Some(extract_blocking(label.clone(), bytes.clone()).await?),
        None => upload.reference_text.clone(),
    };

    let reference = reference.map(|r| r.trim().to_string()).unwrap_or_default();
    if reference.is_empty() {
        let what = match upload.mode {
            ScreeningMode::ResumesAgainstJob => "Job description",
            ScreeningMode::JobsAgainstResume => "Resume",
        };
        return Err(AppError::Validation(format!(
            "{what} text or file is required."
        )));
    }
    Ok(reference)
}

async fn extract_blocking(label: String, bytes: Bytes) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || extract_document(&label, &bytes))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(AppError::from)
}

/// Applies the configured default and cap to a requested concurrency.
fn resolve_concurrency(requested: Option<i64>, config: &Config) -> Result<usize, SchedulerError> {
    match requested {
        None => Ok(config.screening_concurrency),
        Some(n) if n < 1 => Err(SchedulerError::InvalidConcurrency(n)),
        Some(n) => Ok(usize::try_from(n)
            .unwrap_or(usize::MAX)
            .min(config.max_concurrency)),
    }
}

async fn ensure_credits(state: &AppState, account_id: &str, required: usize) -> Result<(), AppError> {
    let available = state.ledger.balance(account_id).await?;
    if !can_afford(available, required) {
        return Err(AppError::InsufficientCredits {
            required: required as i64,
            available,
        });
    }
    Ok(())
}

fn find_session(
    state: &AppState,
    account_id: &str,
    session_id: Uuid,
) -> Result<BatchSession, AppError> {
    state
        .sessions
        .get(session_id)
        // Another account's session reads as missing.
        .filter(|s| s.account_id == account_id)
        .map(|s| (*s).clone())
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Session {session_id} not found or its results have expired"
            ))
        })
}

fn to_sse_event(event: &BatchEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_defaults_and_caps() {
        let config = Config::for_tests();
        assert_eq!(resolve_concurrency(None, &config), Ok(2));
        assert_eq!(resolve_concurrency(Some(3), &config), Ok(3));
        assert_eq!(resolve_concurrency(Some(500), &config), Ok(4));
    }

    #[test]
    fn test_non_positive_concurrency_is_rejected() {
        let config = Config::for_tests();
        assert_eq!(
            resolve_concurrency(Some(0), &config),
            Err(SchedulerError::InvalidConcurrency(0))
        );
        assert_eq!(
            resolve_concurrency(Some(-3), &config),
            Err(SchedulerError::InvalidConcurrency(-3))
        );
    }
}
