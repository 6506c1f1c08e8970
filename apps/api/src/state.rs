use std::sync::Arc;

use crate::config::Config;
use crate::screening::ledger::CreditLedger;
use crate::screening::scorer::Scorer;
use crate::screening::sessions::SessionRepository;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Pluggable scorer. Production uses `LlmScorer`; tests swap in a fake.
    pub scorer: Arc<dyn Scorer>,
    /// Finished batch sessions, retrievable until their TTL lapses.
    pub sessions: Arc<dyn SessionRepository>,
    pub ledger: Arc<dyn CreditLedger>,
}
