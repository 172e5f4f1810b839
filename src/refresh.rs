//! Batch refresh of the canonical store.
//!
//! Scans the store for `.pb` files, ingests everything modified since the
//! last run (or everything with `--full`), then repairs the current-record
//! invariant per touched identity: among all versions of an identity,
//! exactly the row with the newest file mtime (ties broken by highest id)
//! stays current, and child rows mirror the parent's current-ness.
//! Current rows whose backing file disappeared from disk are deactivated.
//!
//! Failures are isolated per file; one bad file never halts the run. The
//! result is a structured summary suitable for CLI JSON output.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::config::Config;
use crate::db;
use crate::ingest::{find_current_by_identity, insert_children, insert_version};
use crate::migrate;
use crate::models::RefreshSummary;
use crate::parser::parse_pb_lines;
use crate::signal;
use crate::store;
use crate::tile::derive_tile;

pub async fn run_refresh(config: &Config, full: bool) -> Result<RefreshSummary> {
    migrate::run_migrations(config).await?;
    let pool = db::connect(config).await?;

    let files = store::scan_store(&config.store.root)?;
    let total = files.len();
    let started = Utc::now();
    let last = if full {
        None
    } else {
        signal::last_refresh_at(&pool).await?
    };

    println!(
        "[INFO] Found {} PB files in {}.",
        total,
        config.store.root.display()
    );
    match last {
        Some(ts) => println!(
            "[INFO] Last refresh at {} — only newer files will be processed.",
            signal::format_signature(ts)
        ),
        None => println!("[INFO] Full refresh (processing all files)."),
    }

    let mut processed = 0u64;
    let mut skipped = 0u64;
    let mut failed = 0u64;
    let mut touched: BTreeSet<String> = BTreeSet::new();

    for (i, path) in files.iter().enumerate() {
        let idx = i + 1;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mtime = match store::file_mtime(path) {
            Ok(m) => m,
            Err(e) => {
                failed += 1;
                println!("[ERR]  {}/{} {} -> {:#}", idx, total, name, e);
                continue;
            }
        };
        if last.map(|l| mtime <= l).unwrap_or(false) {
            skipped += 1;
            println!("[SKIP] {}/{} {} (unchanged)", idx, total, name);
            continue;
        }

        println!("[LOAD] {}/{} {}", idx, total, name);
        match ingest_scanned(config, &pool, path, mtime, started.timestamp()).await {
            Ok(webpage_name) => {
                touched.insert(webpage_name);
                processed += 1;
                println!("[OK]   {}/{} {}", idx, total, name);
            }
            Err(e) => {
                failed += 1;
                println!("[ERR]  {}/{} {} -> {:#}", idx, total, name, e);
            }
        }
    }

    // Repair pass: enforce one current row per touched identity, sync child
    // activity, and deactivate rows whose files vanished from the store.
    if !touched.is_empty() {
        println!(
            "[INFO] Marking current versions for {} identities...",
            touched.len()
        );
    }

    let present: HashSet<String> = files
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();

    let completed = Utc::now();
    let mut tx = pool.begin().await?;
    for identity in &touched {
        mark_identity_current(&mut tx, identity).await?;
    }
    deactivate_missing(&mut tx, &present).await?;
    signal::save_refresh(&mut tx, started.timestamp(), completed.timestamp()).await?;
    tx.commit().await?;

    pool.close().await;

    Ok(RefreshSummary {
        processed,
        skipped,
        failed,
        total: total as u64,
        last_refresh_prev: last.map(signal::format_signature),
        refreshed_at: signal::format_signature(started.timestamp()),
    })
}

/// Ingest one already-canonical file: insert a new version row and its
/// children, linking supersession to the identity's current row. The
/// current flag is repaired afterwards by the batch's mark-current pass.
async fn ingest_scanned(
    config: &Config,
    pool: &SqlitePool,
    path: &Path,
    mtime: i64,
    now: i64,
) -> Result<String> {
    let lines = store::read_file_lines(path)?;
    let raw = parse_pb_lines(&lines)?;
    let tile = derive_tile(&raw, path, &config.quality_weights());

    let prev = find_current_by_identity(pool, &tile.identity.webpage_name).await?;

    let mut tx = pool.begin().await?;
    let id = insert_version(&mut tx, &tile, mtime, now, true, prev.map(|p| p.id)).await?;
    insert_children(&mut tx, id, &tile).await?;
    tx.commit().await?;

    Ok(tile.identity.webpage_name)
}

/// Mark only the newest version of an identity as current and mirror the
/// flag onto child rows.
async fn mark_identity_current(
    tx: &mut Transaction<'_, Sqlite>,
    webpage_name: &str,
) -> Result<()> {
    let latest: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM pb_files WHERE webpage_name = ? ORDER BY file_mtime DESC, id DESC LIMIT 1",
    )
    .bind(webpage_name)
    .fetch_optional(&mut **tx)
    .await?;

    let latest = match latest {
        Some(id) => id,
        None => return Ok(()),
    };

    sqlx::query(
        "UPDATE pb_files SET is_current = CASE WHEN id = ? THEN 1 ELSE 0 END WHERE webpage_name = ?",
    )
    .bind(latest)
    .bind(webpage_name)
    .execute(&mut **tx)
    .await?;

    for table in ["pb_comments", "pb_categories", "pb_targets"] {
        sqlx::query(&format!(
            "UPDATE {} SET is_active = 0 WHERE file_id IN (SELECT id FROM pb_files WHERE webpage_name = ? AND is_current = 0)",
            table
        ))
        .bind(webpage_name)
        .execute(&mut **tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE {} SET is_active = 1 WHERE file_id IN (SELECT id FROM pb_files WHERE webpage_name = ? AND is_current = 1)",
            table
        ))
        .bind(webpage_name)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Deactivate current rows whose backing file is no longer on disk.
async fn deactivate_missing(
    tx: &mut Transaction<'_, Sqlite>,
    present: &HashSet<String>,
) -> Result<()> {
    let rows = sqlx::query("SELECT id, file_name FROM pb_files WHERE is_current = 1")
        .fetch_all(&mut **tx)
        .await?;

    for row in rows {
        let file_name: String = row.get("file_name");
        if present.contains(&file_name) {
            continue;
        }
        let id: i64 = row.get("id");
        sqlx::query("UPDATE pb_files SET is_current = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        for table in ["pb_comments", "pb_categories", "pb_targets"] {
            sqlx::query(&format!(
                "UPDATE {} SET is_active = 0 WHERE file_id = ?",
                table
            ))
            .bind(id)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}
