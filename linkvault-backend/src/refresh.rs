//! Background refresh of rules, source list and the pause switch
//!
//! Other processes signal through files: a channels flag, a rules flag and
//! a JSON control file `{"paused": bool}`. Flags are deleted once acted on.
//! In-process callers (the HTTP API) use `RefreshSignals` instead.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::channels::SourceList;
use crate::db::Database;
use crate::rules::RuleCache;

#[derive(Default)]
pub struct RefreshSignals {
    pub rules: Notify,
    pub channels: Notify,
}

impl RefreshSignals {
    pub fn rules_changed(&self) {
        self.rules.notify_one();
    }

    pub fn channels_changed(&self) {
        self.channels.notify_one();
    }
}

#[derive(Debug, Deserialize)]
struct ControlFile {
    #[serde(default)]
    paused: bool,
}

/// Paused state from the control file; a missing or unreadable file means
/// not paused.
pub fn read_paused(path: &Path) -> bool {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return false,
    };
    match serde_json::from_str::<ControlFile>(&content) {
        Ok(control) => control.paused,
        Err(e) => {
            log::warn!("[refresh] Ignoring malformed control file {:?}: {}", path, e);
            false
        }
    }
}

/// Write the control file (used by the CLI)
pub fn write_paused(path: &Path, paused: bool) -> std::io::Result<()> {
    std::fs::write(path, serde_json::json!({ "paused": paused }).to_string())
}

/// Create a flag file for the watcher to pick up
pub fn touch_flag(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, b"1")
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub channels_reloaded: bool,
    pub rules_reloaded: bool,
    pub pause_changed: bool,
}

pub struct RefreshWatcher {
    db: Arc<Database>,
    rules: Arc<RuleCache>,
    sources: Arc<SourceList>,
    paused: Arc<AtomicBool>,
    signals: Arc<RefreshSignals>,
    channels_flag: PathBuf,
    rules_flag: PathBuf,
    control_file: PathBuf,
    poll_interval: Duration,
}

impl RefreshWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        rules: Arc<RuleCache>,
        sources: Arc<SourceList>,
        paused: Arc<AtomicBool>,
        signals: Arc<RefreshSignals>,
        channels_flag: PathBuf,
        rules_flag: PathBuf,
        control_file: PathBuf,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            rules,
            sources,
            paused,
            signals,
            channels_flag,
            rules_flag,
            control_file,
            poll_interval,
        }
    }

    fn consume_flag(path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("[refresh] Could not remove flag {:?}: {}", path, e);
        }
        true
    }

    fn reload_rules(&self) {
        match self.rules.reload(&self.db) {
            Ok(n) => log::info!("[refresh] Rule cache reloaded ({} channels)", n),
            Err(e) => log::error!("[refresh] Rule reload failed: {}", e),
        }
    }

    fn reload_sources(&self) {
        let n = self.sources.reload(&self.db);
        log::info!("[refresh] Source list reloaded ({} channels)", n);
    }

    /// One pass over the control file and both flags
    pub fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();

        let paused = read_paused(&self.control_file);
        if self.paused.swap(paused, Ordering::SeqCst) != paused {
            log::info!("[refresh] Ingestion {}", if paused { "paused" } else { "resumed" });
            report.pause_changed = true;
        }

        if Self::consume_flag(&self.channels_flag) {
            self.reload_sources();
            report.channels_reloaded = true;
        }
        if Self::consume_flag(&self.rules_flag) {
            self.reload_rules();
            report.rules_reloaded = true;
        }
        report
    }

    pub async fn run(self, cancel: CancellationToken) {
        log::info!(
            "[refresh] Watching {:?}, {:?} and {:?} every {:?}",
            self.channels_flag,
            self.rules_flag,
            self.control_file,
            self.poll_interval
        );
        let signals = self.signals.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = signals.rules.notified() => self.reload_rules(),
                _ = signals.channels.notified() => self.reload_sources(),
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_once();
                }
            }
        }
        log::info!("[refresh] Watcher stopped");
    }
}
