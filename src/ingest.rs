//! Interactive ingestion and versioning orchestration.
//!
//! Coordinates the full flow for a single file: parse → derive → conflict
//! check → archive the superseded version → move the new file into the
//! canonical store → flip the current flag inside one transaction.
//!
//! Ordering is fixed: filesystem moves happen first, the DB transaction
//! commits second, and the moves are reversed best-effort if the
//! transaction fails. A parse failure aborts before anything is mutated.
//!
//! The conflict check is a deliberate two-phase UX: an unconfirmed ingest
//! against an existing identity reports the conflict and changes nothing;
//! the caller re-invokes with confirmation to supersede.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::config::Config;
use crate::db;
use crate::models::{IngestOutcome, Tile};
use crate::parser::parse_pb_lines;
use crate::signal;
use crate::store;
use crate::tile::{derive_tile, QualityWeights};

/// The current row an incoming file may supersede.
#[derive(Debug, Clone)]
pub struct CurrentRow {
    pub id: i64,
    pub file_name: String,
    pub path: String,
    pub file_mtime: i64,
}

/// Parse and derive without touching any state. The parse error carries the
/// underlying cause verbatim for operator diagnosis.
pub fn parse_and_derive(path: &Path, weights: &QualityWeights) -> Result<Tile> {
    let lines = store::read_file_lines(path)?;
    let raw = parse_pb_lines(&lines)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(derive_tile(&raw, path, weights))
}

/// Ingest a single file interactively.
///
/// Without `confirm`, an existing current record for the same identity
/// halts the ingestion with [`IngestOutcome::RequiresConfirm`] and nothing
/// is mutated. With `confirm`, the existing version is archived and
/// superseded.
pub async fn ingest_file(
    config: &Config,
    pool: &SqlitePool,
    path: &Path,
    confirm: bool,
) -> Result<IngestOutcome> {
    // Fail fast on parse errors before any filesystem or DB mutation.
    let mut tile = parse_and_derive(path, &config.quality_weights())?;
    let mtime = store::file_mtime(path)?;

    let existing = find_current_by_identity(pool, &tile.identity.webpage_name).await?;

    if let Some(cur) = &existing {
        if !confirm {
            return Ok(IngestOutcome::RequiresConfirm {
                existing_id: cur.id,
                existing_file: cur.file_name.clone(),
                existing_mtime: cur.file_mtime,
            });
        }
    }

    let now = Utc::now();
    let mut undo: Vec<(PathBuf, PathBuf)> = Vec::new();

    // Archive the superseded file first. A version whose backing file has
    // already disappeared is superseded without an archive copy.
    let archived_path = match &existing {
        Some(cur) if Path::new(&cur.path).exists() => {
            let stamp = store::archive_stamp(now);
            let src = PathBuf::from(&cur.path);
            let dest = store::archive_file(&config.store.archive_dir(), "", &stamp, &src)?;
            undo.push((src, dest.clone()));
            Some(dest)
        }
        _ => None,
    };

    // Move the incoming file into the canonical store.
    let canonical = store::store_path(&config.store.root, &tile.file_name);
    if path != canonical {
        if let Err(e) = store::move_file(path, &canonical) {
            restore_moves(&undo);
            return Err(e);
        }
        undo.push((path.to_path_buf(), canonical.clone()));
    }
    tile.path = canonical.to_string_lossy().to_string();

    let result = commit_version(pool, &tile, mtime, now.timestamp(), existing.as_ref(), archived_path).await;
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            restore_moves(&undo);
            Err(e)
        }
    }
}

/// Replace the current version of `file_name` with new content, keeping the
/// original file name. Equivalent to a confirmed re-ingestion.
pub async fn replace_file(
    config: &Config,
    pool: &SqlitePool,
    file_name: &str,
    new_path: &Path,
) -> Result<IngestOutcome> {
    let cur = find_current_by_file_name(pool, file_name)
        .await?
        .with_context(|| format!("No current record for file {}", file_name))?;

    let mut tile = parse_and_derive(new_path, &config.quality_weights())?;
    let mtime = store::file_mtime(new_path)?;

    let now = Utc::now();
    let mut undo: Vec<(PathBuf, PathBuf)> = Vec::new();

    let archived_path = if Path::new(&cur.path).exists() {
        let stamp = store::archive_stamp(now);
        let src = PathBuf::from(&cur.path);
        let dest = store::archive_file(&config.store.archive_dir(), "replaced_", &stamp, &src)?;
        undo.push((src, dest.clone()));
        Some(dest)
    } else {
        None
    };

    let canonical = store::store_path(&config.store.root, file_name);
    if let Err(e) = store::move_file(new_path, &canonical) {
        restore_moves(&undo);
        return Err(e);
    }
    undo.push((new_path.to_path_buf(), canonical.clone()));

    tile.file_name = file_name.to_string();
    tile.path = canonical.to_string_lossy().to_string();

    let result = commit_version(pool, &tile, mtime, now.timestamp(), Some(&cur), archived_path).await;
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            restore_moves(&undo);
            Err(e)
        }
    }
}

/// Soft-delete all current versions of an identity. Files are archived
/// best-effort: the DB rows are flipped even when a move fails, since
/// soft-deletion must not be blocked by a missing file.
pub async fn delete_current(
    config: &Config,
    pool: &SqlitePool,
    webpage_name: &str,
) -> Result<u64> {
    let rows = sqlx::query(
        "SELECT id, file_name, path, file_mtime FROM pb_files WHERE webpage_name = ? AND is_current = 1",
    )
    .bind(webpage_name)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(0);
    }

    let now = Utc::now();
    let stamp = store::archive_stamp(now);
    let mut archived: Vec<(i64, Option<PathBuf>)> = Vec::new();

    for row in &rows {
        let id: i64 = row.get("id");
        let path: String = row.get("path");
        let src = PathBuf::from(&path);
        let dest = if src.exists() {
            match store::archive_file(&config.store.archive_dir(), "", &stamp, &src) {
                Ok(d) => Some(d),
                Err(e) => {
                    eprintln!("[WARN] Failed to archive {}: {:#}", src.display(), e);
                    None
                }
            }
        } else {
            None
        };
        archived.push((id, dest));
    }

    let mut tx = pool.begin().await?;
    for (id, dest) in &archived {
        match dest {
            Some(d) => {
                sqlx::query("UPDATE pb_files SET is_current = 0, path = ? WHERE id = ?")
                    .bind(d.to_string_lossy().to_string())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE pb_files SET is_current = 0 WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        deactivate_children(&mut tx, *id).await?;
    }
    signal::touch(&mut tx, now.timestamp()).await?;
    tx.commit().await?;

    Ok(archived.len() as u64)
}

/// Insert the new version and flip the superseded one in a single
/// transaction, announcing the change through the refresh signal.
async fn commit_version(
    pool: &SqlitePool,
    tile: &Tile,
    mtime: i64,
    now: i64,
    existing: Option<&CurrentRow>,
    archived_path: Option<PathBuf>,
) -> Result<IngestOutcome> {
    let mut tx = pool.begin().await?;

    if let Some(cur) = existing {
        match &archived_path {
            Some(dest) => {
                sqlx::query("UPDATE pb_files SET is_current = 0, path = ? WHERE id = ?")
                    .bind(dest.to_string_lossy().to_string())
                    .bind(cur.id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE pb_files SET is_current = 0 WHERE id = ?")
                    .bind(cur.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        deactivate_children(&mut tx, cur.id).await?;
    }

    let supersedes = existing.map(|c| c.id);
    let new_id = insert_version(&mut tx, tile, mtime, now, true, supersedes).await?;
    insert_children(&mut tx, new_id, tile).await?;
    signal::touch(&mut tx, now).await?;
    tx.commit().await?;

    Ok(match supersedes {
        Some(old) => IngestOutcome::Superseded {
            id: new_id,
            supersedes: old,
        },
        None => IngestOutcome::Created { id: new_id },
    })
}

/// Insert one pb_files row from a derived tile.
pub(crate) async fn insert_version(
    tx: &mut Transaction<'_, Sqlite>,
    tile: &Tile,
    mtime: i64,
    ingested_at: i64,
    is_current: bool,
    supersedes_id: Option<i64>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO pb_files (
            file_name, path, country, unit, instance, subunit, webpage_name,
            year, description, currency, num_votes, num_projects,
            num_selected_projects, budget, vote_type, vote_length,
            vote_rule_label, knapsack, fully_funded, has_selected_col,
            experimental, rule, edition, language, quality,
            has_geo, has_category, has_target,
            file_mtime, ingested_at, is_current, supersedes_id, group_key
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&tile.file_name)
    .bind(&tile.path)
    .bind(&tile.identity.country)
    .bind(&tile.identity.unit)
    .bind(&tile.identity.instance)
    .bind(&tile.identity.subunit)
    .bind(&tile.identity.webpage_name)
    .bind(tile.year)
    .bind(&tile.description)
    .bind(&tile.currency)
    .bind(tile.num_votes)
    .bind(tile.num_projects)
    .bind(tile.num_selected_projects)
    .bind(tile.budget)
    .bind(&tile.vote_type)
    .bind(tile.vote_length)
    .bind(&tile.vote_rule_label)
    .bind(tile.knapsack)
    .bind(tile.fully_funded)
    .bind(tile.has_selected_col)
    .bind(tile.experimental)
    .bind(&tile.rule)
    .bind(&tile.edition)
    .bind(&tile.language)
    .bind(tile.quality)
    .bind(tile.has_geo)
    .bind(tile.has_category)
    .bind(tile.has_target)
    .bind(mtime)
    .bind(ingested_at)
    .bind(is_current)
    .bind(supersedes_id)
    .bind(&tile.group_key)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert the comment/category/target child rows for a new version.
pub(crate) async fn insert_children(
    tx: &mut Transaction<'_, Sqlite>,
    file_id: i64,
    tile: &Tile,
) -> Result<()> {
    for (idx, text) in tile.comments.iter().enumerate() {
        sqlx::query(
            "INSERT INTO pb_comments (file_id, idx, text, is_active) VALUES (?, ?, ?, 1)",
        )
        .bind(file_id)
        .bind((idx + 1) as i64)
        .bind(text)
        .execute(&mut **tx)
        .await?;
    }
    for (norm, stat) in &tile.categories {
        sqlx::query(
            "INSERT INTO pb_categories (file_id, value, norm, count_in_file, is_active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(file_id)
        .bind(&stat.display)
        .bind(norm)
        .bind(stat.count)
        .execute(&mut **tx)
        .await?;
    }
    for (norm, stat) in &tile.targets {
        sqlx::query(
            "INSERT INTO pb_targets (file_id, value, norm, count_in_file, is_active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(file_id)
        .bind(&stat.display)
        .bind(norm)
        .bind(stat.count)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub(crate) async fn deactivate_children(
    tx: &mut Transaction<'_, Sqlite>,
    file_id: i64,
) -> Result<()> {
    for table in ["pb_comments", "pb_categories", "pb_targets"] {
        sqlx::query(&format!(
            "UPDATE {} SET is_active = 0 WHERE file_id = ?",
            table
        ))
        .bind(file_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Current row for an identity, if any.
pub(crate) async fn find_current_by_identity(
    pool: &SqlitePool,
    webpage_name: &str,
) -> Result<Option<CurrentRow>> {
    let row = sqlx::query(
        "SELECT id, file_name, path, file_mtime FROM pb_files WHERE webpage_name = ? AND is_current = 1 ORDER BY id DESC LIMIT 1",
    )
    .bind(webpage_name)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| CurrentRow {
        id: r.get("id"),
        file_name: r.get("file_name"),
        path: r.get("path"),
        file_mtime: r.get("file_mtime"),
    }))
}

async fn find_current_by_file_name(
    pool: &SqlitePool,
    file_name: &str,
) -> Result<Option<CurrentRow>> {
    let row = sqlx::query(
        "SELECT id, file_name, path, file_mtime FROM pb_files WHERE file_name = ? AND is_current = 1 ORDER BY id DESC LIMIT 1",
    )
    .bind(file_name)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| CurrentRow {
        id: r.get("id"),
        file_name: r.get("file_name"),
        path: r.get("path"),
        file_mtime: r.get("file_mtime"),
    }))
}

/// Reverse completed filesystem moves after a failed transaction.
fn restore_moves(undo: &[(PathBuf, PathBuf)]) {
    for (original, moved_to) in undo.iter().rev() {
        if let Err(e) = store::move_file(moved_to, original) {
            eprintln!(
                "[WARN] Failed to restore {} to {}: {:#}",
                moved_to.display(),
                original.display(),
                e
            );
        }
    }
}

/// CLI entry point for `pbcat ingest`.
pub async fn run_ingest(config: &Config, path: &Path, confirm: bool) -> Result<()> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    let pool = db::connect(config).await?;
    let outcome = ingest_file(config, &pool, path, confirm).await;
    pool.close().await;

    match outcome? {
        IngestOutcome::Created { id } => {
            println!("ingested {} (id {})", path.display(), id);
        }
        IngestOutcome::Superseded { id, supersedes } => {
            println!(
                "ingested {} (id {}, supersedes {})",
                path.display(),
                id,
                supersedes
            );
        }
        IngestOutcome::RequiresConfirm {
            existing_id,
            existing_file,
            existing_mtime,
        } => {
            println!("confirmation required");
            println!(
                "  a current version already exists: {} (id {}, mtime {})",
                existing_file,
                existing_id,
                signal::format_signature(existing_mtime)
            );
            println!("  re-run with --confirm to archive it and ingest this file");
        }
    }
    Ok(())
}

/// CLI entry point for `pbcat replace`.
pub async fn run_replace(config: &Config, file_name: &str, new_path: &Path) -> Result<()> {
    if !new_path.exists() {
        bail!("File not found: {}", new_path.display());
    }
    let pool = db::connect(config).await?;
    let outcome = replace_file(config, &pool, file_name, new_path).await;
    pool.close().await;

    if let IngestOutcome::Superseded { id, supersedes } = outcome? {
        println!("replaced {} (id {}, supersedes {})", file_name, id, supersedes);
    }
    Ok(())
}

/// CLI entry point for `pbcat delete`.
pub async fn run_delete(config: &Config, webpage_name: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let deleted = delete_current(config, &pool, webpage_name).await;
    pool.close().await;

    let deleted = deleted?;
    if deleted == 0 {
        println!("no current records for {}", webpage_name);
    } else {
        println!("deleted {} record(s) for {}", deleted, webpage_name);
    }
    Ok(())
}
