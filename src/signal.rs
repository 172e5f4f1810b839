//! Cache invalidation signal.
//!
//! A single `refresh_state` row (key `pb`) records when the last ingestion
//! batch started and completed. Read-side caches store the completion
//! signature next to their payload and rebuild when it changes. The
//! signature only moves forward; it is written inside the same transaction
//! as the changes it announces.

use anyhow::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};

const STATE_KEY: &str = "pb";

/// Mark a completed mutation inside the enclosing transaction.
/// `last_refresh_at` is left untouched; the batch job maintains it.
pub async fn touch(tx: &mut Transaction<'_, Sqlite>, now: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_state (key, last_refresh_at, last_completed_at) VALUES (?, NULL, ?)
        ON CONFLICT(key) DO UPDATE SET last_completed_at = excluded.last_completed_at
        "#,
    )
    .bind(STATE_KEY)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Start-of-last-run timestamp used by the batch job to skip unchanged files.
pub async fn last_refresh_at(pool: &SqlitePool) -> Result<Option<i64>> {
    let row: Option<Option<i64>> =
        sqlx::query_scalar("SELECT last_refresh_at FROM refresh_state WHERE key = ?")
            .bind(STATE_KEY)
            .fetch_optional(pool)
            .await?;
    Ok(row.flatten())
}

/// Record a completed batch run inside its final transaction: both the
/// start-of-run and completion timestamps are persisted.
pub async fn save_refresh(
    tx: &mut Transaction<'_, Sqlite>,
    started: i64,
    completed: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_state (key, last_refresh_at, last_completed_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            last_refresh_at = excluded.last_refresh_at,
            last_completed_at = excluded.last_completed_at
        "#,
    )
    .bind(STATE_KEY)
    .bind(started)
    .bind(completed)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// The signature read-side caches compare against: ISO-8601 of the last
/// completed mutation, or None before the first one.
pub async fn signature(pool: &SqlitePool) -> Result<Option<String>> {
    let row: Option<Option<i64>> =
        sqlx::query_scalar("SELECT last_completed_at FROM refresh_state WHERE key = ?")
            .bind(STATE_KEY)
            .fetch_optional(pool)
            .await?;
    Ok(row.flatten().map(format_signature))
}

pub fn format_signature(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// A cached payload tagged with the signature it was built under.
///
/// Replaces hidden process-wide caches with an explicit, testable
/// dependency: callers fetch the current signature and either reuse the
/// payload or rebuild it.
#[derive(Debug, Default)]
pub struct SignedCache<T> {
    state: Option<(Option<String>, T)>,
}

impl<T> SignedCache<T> {
    pub fn new() -> Self {
        Self { state: None }
    }

    /// Cached payload if it was built under `signature`.
    pub fn get(&self, signature: &Option<String>) -> Option<&T> {
        match &self.state {
            Some((sig, payload)) if sig == signature => Some(payload),
            _ => None,
        }
    }

    pub fn insert(&mut self, signature: Option<String>, payload: T) {
        self.state = Some((signature, payload));
    }

    /// Return the cached payload for `signature`, rebuilding via `rebuild`
    /// when absent or built under a different signature.
    #[allow(dead_code)]
    pub fn get_or_rebuild<F>(&mut self, signature: Option<String>, rebuild: F) -> &T
    where
        F: FnOnce() -> T,
    {
        let stale = self.get(&signature).is_none();
        if stale {
            let payload = rebuild();
            self.insert(signature, payload);
        }
        &self.state.as_ref().expect("cache populated above").1
    }

    #[allow(dead_code)]
    pub fn invalidate(&mut self) {
        self.state = None;
    }
}
