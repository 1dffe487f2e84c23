//! Cloud-drive share-link aggregation
//!
//! Posts from Telegram channels (live) or channel exports (offline) are
//! parsed into titled records keyed by their share links and stored in
//! SQLite, with per-channel suppression rules and a small read/admin API.

use std::sync::Arc;

pub mod channels;
pub mod cleaning;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod db;
pub mod importer;
pub mod maintenance;
pub mod models;
pub mod parser;
pub mod providers;
pub mod refresh;
pub mod retry;
pub mod rules;
pub mod store;

use channels::{MessageDispatcher, SourceList};
use config::Config;
use db::Database;
use refresh::RefreshSignals;
use rules::RuleCache;

/// Shared state handed to the HTTP controllers
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub rules: Arc<RuleCache>,
    pub sources: Arc<SourceList>,
    pub signals: Arc<RefreshSignals>,
    pub dispatcher: Arc<MessageDispatcher>,
}
