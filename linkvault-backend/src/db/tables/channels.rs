//! Monitored channel database operations

use chrono::{DateTime, Utc};
use rusqlite::Result as SqliteResult;

use super::super::Database;
use crate::models::{normalize_channel, MonitoredChannel};

impl Database {
    pub fn list_monitored_channels(&self) -> SqliteResult<Vec<MonitoredChannel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, username, created_at FROM channels ORDER BY username")?;
        let channels = stmt
            .query_map([], |row| {
                let created_at: String = row.get(2)?;
                Ok(MonitoredChannel {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(channels)
    }

    /// Returns true if the channel was not already present
    pub fn add_monitored_channel(&self, username: &str) -> SqliteResult<bool> {
        let username = normalize_channel(username);
        if username.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let rows_affected = conn.execute(
            "INSERT OR IGNORE INTO channels (username, created_at) VALUES (?1, ?2)",
            [username, Utc::now().to_rfc3339()],
        )?;
        Ok(rows_affected > 0)
    }

    pub fn remove_monitored_channel(&self, username: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock();
        let rows_affected = conn.execute(
            "DELETE FROM channels WHERE username = ?1",
            [normalize_channel(username)],
        )?;
        Ok(rows_affected > 0)
    }
}
