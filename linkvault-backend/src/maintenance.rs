use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::Database;

/// Remove rows whose links also appear on a newer row
pub fn run_dedup(db: &Database) -> Result<usize, String> {
    let removed = db.dedup_links().map_err(|e| format!("dedup failed: {}", e))?;
    if removed > 0 {
        log::info!("[maintenance] Removed {} messages with duplicate links", removed);
    } else {
        log::debug!("[maintenance] No duplicate links found");
    }
    Ok(removed)
}

/// Periodic dedup pass, compensating for writers that raced on the same link
pub fn spawn_dedup_task(db: Arc<Database>, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        log::info!("[maintenance] Link dedup every {:?}", interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let db = db.clone();
                    match tokio::task::spawn_blocking(move || run_dedup(&db)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => log::error!("[maintenance] {}", e),
                        Err(e) => log::error!("[maintenance] Dedup task panicked: {}", e),
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_dedup_on_empty_db() {
        let db = Database::new(":memory:").unwrap();
        assert_eq!(run_dedup(&db).unwrap(), 0);
    }
}
