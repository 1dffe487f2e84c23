use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::channels::sources::SourceList;
use crate::channels::types::{DispatchOutcome, IgnoreReason, IncomingMessage};
use crate::clock;
use crate::models::{normalize_channel, IngestStats, UpsertOutcome};
use crate::parser::{MessageParser, RedirectResolver, StrictExtractor};
use crate::rules::RuleCache;
use crate::store::LinkStore;

/// Routes live posts through parsing, strict link extraction, channel rules
/// and the link-identity store.
pub struct MessageDispatcher {
    parser: Arc<MessageParser>,
    strict: StrictExtractor,
    resolver: Option<Arc<dyn RedirectResolver>>,
    rules: Arc<RuleCache>,
    sources: Arc<SourceList>,
    store: LinkStore,
    paused: Arc<AtomicBool>,
    stats: Mutex<IngestStats>,
}

impl MessageDispatcher {
    pub fn new(
        parser: Arc<MessageParser>,
        store: LinkStore,
        rules: Arc<RuleCache>,
        sources: Arc<SourceList>,
        paused: Arc<AtomicBool>,
    ) -> Self {
        let strict = StrictExtractor::new(parser.catalog().clone());
        Self {
            parser,
            strict,
            resolver: None,
            rules,
            sources,
            store,
            paused,
            stats: Mutex::new(IngestStats::default()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn RedirectResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn stats(&self) -> IngestStats {
        *self.stats.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn precheck(&self, msg: &IncomingMessage) -> Option<IgnoreReason> {
        if self.is_paused() {
            Some(IgnoreReason::Paused)
        } else if msg.is_service {
            Some(IgnoreReason::Service)
        } else if msg.is_reply {
            Some(IgnoreReason::Reply)
        } else if msg.text.trim().is_empty() {
            Some(IgnoreReason::EmptyText)
        } else if !self.sources.accepts(msg.channel.as_deref()) {
            Some(IgnoreReason::UnmonitoredChannel)
        } else {
            None
        }
    }

    /// Handle one post. Never fails; problems are reported in the outcome.
    pub async fn dispatch(&self, msg: IncomingMessage) -> DispatchOutcome {
        if let Some(reason) = self.precheck(&msg) {
            log::debug!("[dispatcher] Ignored post from {:?}: {:?}", msg.channel, reason);
            return DispatchOutcome::Ignored(reason);
        }
        self.stats.lock().processed += 1;

        let mut record = self.parser.parse(&msg.text);
        record.links = self
            .strict
            .extract(&msg.text, &msg.annotations, self.resolver.as_deref())
            .await;

        if !record.has_links() {
            log::debug!("[dispatcher] No recognised share links in post from {:?}", msg.channel);
            self.stats.lock().skipped += 1;
            return DispatchOutcome::NoLinks;
        }

        // The event's own channel is authoritative over any signature line
        if let Some(channel) = msg.channel.as_deref() {
            record.channel = Some(normalize_channel(channel));
        }

        if let Some(channel) = record.channel.as_deref() {
            self.rules.ensure_loaded(self.store.db());
            if let Some(reason) = self.rules.suppression(channel, &record) {
                log::debug!("[dispatcher] Suppressed post from {} ({})", channel, reason);
                self.stats.lock().suppressed += 1;
                return DispatchOutcome::Suppressed(reason);
            }
        }

        let timestamp = msg.date.map(clock::to_storage).unwrap_or_else(clock::now);
        match self.store.upsert(&record, &timestamp).await {
            Ok(outcome) => {
                self.stats.lock().record(outcome);
                match outcome {
                    UpsertOutcome::Inserted(id) => {
                        log::info!("[dispatcher] Stored '{}' as #{} ({} links)", record.title, id, record.links.len())
                    }
                    UpsertOutcome::Updated(id) => {
                        log::info!("[dispatcher] Updated #{} with '{}'", id, record.title)
                    }
                    UpsertOutcome::Skipped => {}
                }
                DispatchOutcome::Stored(outcome)
            }
            Err(e) => {
                log::error!("[dispatcher] Failed to store post from {:?}: {}", record.channel, e);
                self.stats.lock().failed += 1;
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}
