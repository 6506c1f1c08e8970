pub mod aggregator;
pub mod export;
pub mod extract;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod prompts;
pub mod scheduler;
pub mod scorer;
pub mod sessions;
