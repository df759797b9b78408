//! Durable retry queue for orders that failed to reach the server.
//!
//! At most one entry exists per frontend id; a repeated failure bumps the
//! existing entry's retry count and pushes its next attempt further out on
//! a capped exponential schedule.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::DbState;
use crate::error::StoreResult;
use crate::models::{format_ts, parse_ts};

/// Default backoff schedule in seconds, indexed by retry count.
pub const DEFAULT_BACKOFF_SECS: [u64; 5] = [30, 60, 120, 300, 600];

const QUEUE_COLUMNS: &str = "id, frontend_id, created_at, retry_count, next_retry_at, last_error";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueEntry {
    pub id: i64,
    pub frontend_id: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct RetryQueue {
    db: Arc<DbState>,
    backoff_secs: Vec<u64>,
}

impl RetryQueue {
    pub fn new(db: Arc<DbState>) -> Self {
        Self {
            db,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }

    /// Replace the backoff schedule. An empty schedule keeps the default.
    pub fn with_backoff(mut self, backoff_secs: Vec<u64>) -> Self {
        if !backoff_secs.is_empty() {
            self.backoff_secs = backoff_secs;
        }
        self
    }

    /// Delay before the next attempt for an entry at `retry_count`, capped at
    /// the last step of the schedule.
    pub fn backoff_delay(&self, retry_count: u32) -> ChronoDuration {
        let idx = (retry_count as usize).min(self.backoff_secs.len() - 1);
        ChronoDuration::seconds(self.backoff_secs[idx] as i64)
    }

    /// Record a failed attempt for `frontend_id`.
    pub fn enqueue(&self, frontend_id: &str, error: &str) -> StoreResult<RetryQueueEntry> {
        self.enqueue_at(frontend_id, error, Utc::now())
    }

    pub(crate) fn enqueue_at(
        &self,
        frontend_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RetryQueueEntry> {
        let conn = self.db.lock()?;

        let entry = match load_entry(&conn, frontend_id)? {
            Some(mut existing) => {
                existing.retry_count = existing.retry_count.saturating_add(1);
                existing.next_retry_at = now + self.backoff_delay(existing.retry_count);
                existing.last_error = Some(error.to_string());
                conn.execute(
                    "UPDATE sync_queue
                     SET retry_count = ?2, next_retry_at = ?3, last_error = ?4
                     WHERE id = ?1",
                    params![
                        existing.id,
                        existing.retry_count,
                        format_ts(&existing.next_retry_at),
                        &existing.last_error,
                    ],
                )?;
                existing
            }
            None => {
                let next_retry_at = now + self.backoff_delay(0);
                conn.execute(
                    "INSERT INTO sync_queue (frontend_id, created_at, retry_count, next_retry_at, last_error)
                     VALUES (?1, ?2, 0, ?3, ?4)",
                    params![frontend_id, format_ts(&now), format_ts(&next_retry_at), error],
                )?;
                RetryQueueEntry {
                    id: conn.last_insert_rowid(),
                    frontend_id: frontend_id.to_string(),
                    created_at: now,
                    retry_count: 0,
                    next_retry_at,
                    last_error: Some(error.to_string()),
                }
            }
        };

        info!(
            frontend_id = %frontend_id,
            retry_count = entry.retry_count,
            next_retry_at = %format_ts(&entry.next_retry_at),
            "Order queued for sync retry"
        );
        Ok(entry)
    }

    /// Remove the entry after a confirmed successful sync.
    pub fn dequeue(&self, frontend_id: &str) -> StoreResult<bool> {
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_queue WHERE frontend_id = ?1",
            params![frontend_id],
        )?;
        if removed > 0 {
            debug!(frontend_id = %frontend_id, "Removed sync retry entry");
        }
        Ok(removed > 0)
    }

    /// Entries whose next attempt is at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<RetryQueueEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE next_retry_at <= ?1
             ORDER BY next_retry_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![format_ts(&now)], QueueRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(QueueRow::into_entry).collect()
    }

    pub fn get(&self, frontend_id: &str) -> StoreResult<Option<RetryQueueEntry>> {
        let conn = self.db.lock()?;
        load_entry(&conn, frontend_id)
    }

    pub fn list(&self) -> StoreResult<Vec<RetryQueueEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY next_retry_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map([], QueueRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(QueueRow::into_entry).collect()
    }

    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

struct QueueRow {
    id: i64,
    frontend_id: String,
    created_at: String,
    retry_count: u32,
    next_retry_at: String,
    last_error: Option<String>,
}

impl QueueRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            frontend_id: row.get(1)?,
            created_at: row.get(2)?,
            retry_count: row.get(3)?,
            next_retry_at: row.get(4)?,
            last_error: row.get(5)?,
        })
    }

    fn into_entry(self) -> StoreResult<RetryQueueEntry> {
        Ok(RetryQueueEntry {
            id: self.id,
            created_at: parse_ts("created_at", &self.created_at)?,
            retry_count: self.retry_count,
            next_retry_at: parse_ts("next_retry_at", &self.next_retry_at)?,
            last_error: self.last_error,
            frontend_id: self.frontend_id,
        })
    }
}

fn load_entry(conn: &Connection, frontend_id: &str) -> StoreResult<Option<RetryQueueEntry>> {
    let row = conn
        .query_row(
            &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE frontend_id = ?1"),
            params![frontend_id],
            QueueRow::read,
        )
        .optional()?;
    row.map(QueueRow::into_entry).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> RetryQueue {
        RetryQueue::new(Arc::new(DbState::open_in_memory().expect("open db")))
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let queue = test_queue();
        let expected = [30, 60, 120, 300, 600, 600, 600];
        for (count, secs) in expected.iter().enumerate() {
            assert_eq!(
                queue.backoff_delay(count as u32),
                ChronoDuration::seconds(*secs),
                "retry_count {count}"
            );
        }
        assert_eq!(queue.backoff_delay(u32::MAX), ChronoDuration::seconds(600));
    }

    #[test]
    fn test_enqueue_schedules_from_retry_count() {
        let queue = test_queue();
        let now = Utc::now();

        let expected = [30, 60, 120, 300, 600, 600];
        for (attempt, secs) in expected.iter().enumerate() {
            let entry = queue.enqueue_at("AB12CD", "offline", now).unwrap();
            assert_eq!(entry.retry_count, attempt as u32);
            assert_eq!(entry.next_retry_at - now, ChronoDuration::seconds(*secs));
        }
    }

    #[test]
    fn test_enqueue_updates_in_place() {
        let queue = test_queue();
        let first = queue.enqueue("AB12CD", "timeout").unwrap();
        let second = queue.enqueue("AB12CD", "HTTP 502").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(queue.len().unwrap(), 1);
        let stored = queue.get("AB12CD").unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 502"));
        assert_eq!(
            stored.created_at.timestamp_millis(),
            first.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_due_only_returns_elapsed_entries() {
        let queue = test_queue();
        let t = Utc::now();
        queue.enqueue_at("EARLY1", "x", t - ChronoDuration::seconds(30)).unwrap();
        queue.enqueue_at("LATER1", "x", t + ChronoDuration::seconds(30)).unwrap();

        let due: Vec<String> = queue
            .due(t)
            .unwrap()
            .into_iter()
            .map(|e| e.frontend_id)
            .collect();
        assert_eq!(due, vec!["EARLY1".to_string()]);

        let later = queue.due(t + ChronoDuration::seconds(60)).unwrap();
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn test_dequeue_removes_entry() {
        let queue = test_queue();
        queue.enqueue("AB12CD", "x").unwrap();
        assert!(queue.dequeue("AB12CD").unwrap());
        assert!(!queue.dequeue("AB12CD").unwrap());
        assert!(queue.is_empty().unwrap());
        assert!(queue.list().unwrap().is_empty());
    }

    #[test]
    fn test_custom_backoff_schedule() {
        let queue = test_queue().with_backoff(vec![5, 10]);
        assert_eq!(queue.backoff_delay(0), ChronoDuration::seconds(5));
        assert_eq!(queue.backoff_delay(7), ChronoDuration::seconds(10));

        let queue = test_queue().with_backoff(Vec::new());
        assert_eq!(queue.backoff_delay(0), ChronoDuration::seconds(30));
    }
}
