use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::models::UpsertOutcome;
use crate::parser::RichAnnotations;

/// Platform-independent view of one incoming post
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub text: String,
    /// Username of the posting channel, without '@'
    pub channel: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub is_reply: bool,
    pub is_service: bool,
    pub annotations: RichAnnotations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    Paused,
    Reply,
    Service,
    EmptyText,
    UnmonitoredChannel,
}

/// What happened to a dispatched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored(IgnoreReason),
    NoLinks,
    Suppressed(String),
    Stored(UpsertOutcome),
    Failed(String),
}

/// Handle for a running listener
pub struct ListenerHandle {
    pub name: String,
    pub shutdown_tx: oneshot::Sender<()>,
}
