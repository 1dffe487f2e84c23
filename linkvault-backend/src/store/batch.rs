//! Bulk writes: one transaction per `commit_every` records, a savepoint per
//! record so a failed record rolls back alone.

use chrono::{DateTime, FixedOffset};
use parking_lot::MutexGuard;
use rusqlite::{Connection, Result as SqliteResult};
use std::collections::HashSet;

use super::StoreError;
use crate::db::tables::messages::upsert_on;
use crate::db::Database;
use crate::models::{ParsedMessage, UpsertOutcome, UpsertPolicy};
use crate::retry::{is_transient_sqlite_error, RetryPolicy};

/// Link URLs already seen in the current batch; the first record wins.
#[derive(Debug, Default)]
pub struct SeenLinks {
    urls: HashSet<String>,
}

impl SeenLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the record's URLs. Returns false if any of them was seen
    /// before, in which case nothing is recorded.
    pub fn admit<'a>(&mut self, urls: impl IntoIterator<Item = &'a str>) -> bool {
        let urls: Vec<&str> = urls.into_iter().collect();
        if urls.iter().any(|u| self.urls.contains(*u)) {
            return false;
        }
        self.urls.extend(urls.into_iter().map(str::to_string));
        true
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

pub struct BatchWriter<'a> {
    conn: MutexGuard<'a, Connection>,
    commit_every: usize,
    pending: usize,
    in_transaction: bool,
    retry: RetryPolicy,
    policy: UpsertPolicy,
    committed: u64,
}

impl Database {
    /// Holds the connection until `finish` (or drop, which rolls back
    /// anything uncommitted).
    pub fn batch_writer(&self, commit_every: usize) -> BatchWriter<'_> {
        BatchWriter {
            conn: self.conn.lock(),
            commit_every: commit_every.max(1),
            pending: 0,
            in_transaction: false,
            retry: RetryPolicy::default(),
            policy: UpsertPolicy::RequireLinks,
            committed: 0,
        }
    }
}

impl<'a> BatchWriter<'a> {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: UpsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn begin(&mut self) -> SqliteResult<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn attempt(&mut self, record: &ParsedMessage, timestamp: &DateTime<FixedOffset>) -> SqliteResult<UpsertOutcome> {
        self.begin()?;
        self.conn.execute_batch("SAVEPOINT record")?;
        match upsert_on(&self.conn, record, timestamp, self.policy) {
            Ok(outcome) => {
                self.conn.execute_batch("RELEASE record")?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK TO record; RELEASE record") {
                    log::error!("[batch] Savepoint rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Upsert one record, committing when the batch is full
    pub fn upsert(
        &mut self,
        record: &ParsedMessage,
        timestamp: &DateTime<FixedOffset>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut attempt = 0;
        let outcome = loop {
            match self.attempt(record, timestamp) {
                Ok(outcome) => break outcome,
                Err(e) if is_transient_sqlite_error(&e) && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!("[batch] Database busy, retrying in {:?}: {}", delay, e);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(StoreError::classify(e, attempt + 1)),
            }
        };

        if outcome != UpsertOutcome::Skipped {
            self.pending += 1;
        }
        if self.pending >= self.commit_every {
            self.commit().map_err(|e| StoreError::classify(e, 1))?;
        }
        Ok(outcome)
    }

    pub fn commit(&mut self) -> SqliteResult<()> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
            self.committed += self.pending as u64;
            log::debug!("[batch] Committed {} records ({} total)", self.pending, self.committed);
            self.pending = 0;
        }
        Ok(())
    }

    /// Commit the tail of the batch; returns the number of committed writes
    pub fn finish(mut self) -> SqliteResult<u64> {
        self.commit()?;
        Ok(self.committed)
    }
}

impl Drop for BatchWriter<'_> {
    fn drop(&mut self) {
        if self.in_transaction {
            log::warn!("[batch] Dropping unfinished batch, rolling back {} records", self.pending);
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::error!("[batch] Rollback failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkMap, Provider};

    fn quark(code: &str) -> ParsedMessage {
        let mut links = LinkMap::new();
        links.insert(Provider::Quark, format!("https://pan.quark.cn/s/{}", code));
        ParsedMessage {
            title: code.to_string(),
            links,
            ..Default::default()
        }
    }

    #[test]
    fn test_seen_links_first_wins() {
        let mut seen = SeenLinks::new();
        assert!(seen.admit(["a", "b"]));
        assert!(!seen.admit(["c", "b"]));
        assert!(seen.admit(["c"]));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_batch_commits_and_finishes() {
        let db = Database::new(":memory:").unwrap();
        let ts = crate::clock::now();
        {
            let mut batch = db.batch_writer(2);
            for code in ["a", "b", "c", "a"] {
                batch.upsert(&quark(code), &ts).unwrap();
            }
            batch.upsert(&ParsedMessage::default(), &ts).unwrap();
            assert_eq!(batch.finish().unwrap(), 4);
        }
        assert_eq!(db.count_messages().unwrap(), 3);
    }

    #[test]
    fn test_dropped_batch_rolls_back_pending() {
        let db = Database::new(":memory:").unwrap();
        let ts = crate::clock::now();
        {
            let mut batch = db.batch_writer(2);
            batch.upsert(&quark("a"), &ts).unwrap();
            batch.upsert(&quark("b"), &ts).unwrap();
            batch.upsert(&quark("c"), &ts).unwrap();
        }
        assert_eq!(db.count_messages().unwrap(), 2);
    }
}
