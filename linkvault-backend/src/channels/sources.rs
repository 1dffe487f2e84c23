//! Source list: the channels the live listener accepts posts from
//!
//! The union of the `channels` table, `DEFAULT_CHANNELS` and the channels
//! file. Entries coming from the environment or the file are written back
//! to the table on every reload. An empty list accepts every channel.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::split_channel_list;
use crate::db::Database;
use crate::models::normalize_channel;

pub struct SourceList {
    names: RwLock<BTreeSet<String>>,
    defaults: Vec<String>,
    channels_file: Option<PathBuf>,
}

fn read_channels_file(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default())
            .flat_map(split_channel_list)
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            log::warn!("[sources] Could not read {:?}: {}", path, e);
            Vec::new()
        }
    }
}

impl SourceList {
    pub fn new(defaults: Vec<String>, channels_file: Option<PathBuf>) -> Self {
        Self {
            names: RwLock::new(BTreeSet::new()),
            defaults,
            channels_file,
        }
    }

    /// Rebuild from the database plus configured extras; returns the count
    pub fn reload(&self, db: &Database) -> usize {
        let mut extras = self.defaults.clone();
        if let Some(path) = &self.channels_file {
            extras.extend(read_channels_file(path));
        }

        for name in &extras {
            if let Err(e) = db.add_monitored_channel(name) {
                log::warn!("[sources] Could not persist channel '{}': {}", name, e);
            }
        }

        let mut names: BTreeSet<String> = extras
            .iter()
            .map(|n| normalize_channel(n))
            .filter(|n| !n.is_empty())
            .collect();
        match db.list_monitored_channels() {
            Ok(rows) => names.extend(rows.into_iter().map(|c| c.username)),
            Err(e) => log::error!("[sources] Failed to list channels: {}", e),
        }

        let count = names.len();
        *self.names.write() = names;
        log::info!("[sources] Monitoring {} channels", count);
        count
    }

    /// Empty list means every channel is accepted
    pub fn accepts(&self, channel: Option<&str>) -> bool {
        let names = self.names.read();
        if names.is_empty() {
            return true;
        }
        channel
            .map(|c| names.contains(&normalize_channel(c)))
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }
}
