//! Retrying write path over `Database`
//!
//! Transient lock errors (another process writing the same file) are
//! retried with exponential backoff; anything else surfaces immediately as
//! an integrity failure.

mod batch;

use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use thiserror::Error;

use crate::db::Database;
use crate::models::{ParsedMessage, UpsertOutcome, UpsertPolicy};
use crate::retry::{is_transient_sqlite_error, RetryPolicy};

pub use batch::{BatchWriter, SeenLinks};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage still busy after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("storage integrity error: {0}")]
    Integrity(#[source] rusqlite::Error),
    #[error("record could not be serialized: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn classify(err: rusqlite::Error, attempts: u32) -> Self {
        match err {
            rusqlite::Error::ToSqlConversionFailure(e) => StoreError::Serialization(e.to_string()),
            err if is_transient_sqlite_error(&err) => StoreError::Exhausted { attempts, source: err },
            err => StoreError::Integrity(err),
        }
    }
}

#[derive(Clone)]
pub struct LinkStore {
    db: Arc<Database>,
    retry: RetryPolicy,
    policy: UpsertPolicy,
}

impl LinkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            retry: RetryPolicy::default(),
            policy: UpsertPolicy::RequireLinks,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: UpsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Link-overlap upsert with bounded retries on lock contention
    pub async fn upsert(
        &self,
        record: &ParsedMessage,
        timestamp: &DateTime<FixedOffset>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            let result = self.db.upsert_message(record, timestamp, self.policy);
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_transient_sqlite_error(&e) && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "[store] Database busy (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        self.retry.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(StoreError::classify(e, attempt + 1)),
            }
        }
    }

    /// Blocking twin of `upsert` for synchronous batch jobs
    pub fn upsert_blocking(
        &self,
        record: &ParsedMessage,
        timestamp: &DateTime<FixedOffset>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            match self.db.upsert_message(record, timestamp, self.policy) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_transient_sqlite_error(&e) && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!("[store] Database busy, retrying in {:?}: {}", delay, e);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(StoreError::classify(e, attempt + 1)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    fn quark(title: &str, code: &str) -> ParsedMessage {
        let mut links = crate::models::LinkMap::new();
        links.insert(Provider::Quark, format!("https://pan.quark.cn/s/{}", code));
        ParsedMessage {
            title: title.to_string(),
            links,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_yields_one_row() {
        let store = LinkStore::new(Arc::new(Database::new(":memory:").unwrap()));
        let ts = crate::clock::now();
        let first = store.upsert(&quark("a", "x"), &ts).await.unwrap();
        let second = store.upsert(&quark("b", "x"), &ts).await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id().unwrap()));
        assert_eq!(store.db().count_messages().unwrap(), 1);
    }

    #[test]
    fn test_blocking_upsert_skips_linkless() {
        let store = LinkStore::new(Arc::new(Database::new(":memory:").unwrap()));
        let outcome = store
            .upsert_blocking(&ParsedMessage::default(), &crate::clock::now())
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped);
    }

    #[test]
    fn test_busy_database_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let path = path.to_str().unwrap();
        let db = Database::with_busy_timeout(path, std::time::Duration::from_millis(10)).unwrap();
        let store = LinkStore::new(Arc::new(db)).with_retry(RetryPolicy::immediate(2));

        let blocker = rusqlite::Connection::open(path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let err = store
            .upsert_blocking(&quark("a", "busy"), &crate::clock::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Exhausted { attempts: 2, .. }));

        blocker.execute_batch("ROLLBACK").unwrap();
        assert!(store.upsert_blocking(&quark("a", "busy"), &crate::clock::now()).is_ok());
    }
}
