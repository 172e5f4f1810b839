use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // One row per ingested file version; soft-deleted, never removed.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pb_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            path TEXT NOT NULL,
            country TEXT,
            unit TEXT,
            instance TEXT,
            subunit TEXT,
            webpage_name TEXT NOT NULL DEFAULT '',
            year INTEGER,
            description TEXT,
            currency TEXT,
            num_votes INTEGER NOT NULL DEFAULT 0,
            num_projects INTEGER NOT NULL DEFAULT 0,
            num_selected_projects INTEGER,
            budget INTEGER,
            vote_type TEXT,
            vote_length REAL,
            vote_rule_label TEXT,
            knapsack INTEGER NOT NULL DEFAULT 0,
            fully_funded INTEGER NOT NULL DEFAULT 0,
            has_selected_col INTEGER NOT NULL DEFAULT 0,
            experimental INTEGER NOT NULL DEFAULT 0,
            rule TEXT,
            edition TEXT,
            language TEXT,
            quality REAL NOT NULL DEFAULT 0,
            has_geo INTEGER NOT NULL DEFAULT 0,
            has_category INTEGER NOT NULL DEFAULT 0,
            has_target INTEGER NOT NULL DEFAULT 0,
            file_mtime INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 1,
            supersedes_id INTEGER,
            group_key TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (supersedes_id) REFERENCES pb_files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Ordered comments extracted from META, mirroring the parent's
    // current-ness via is_active.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pb_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            text TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            UNIQUE(file_id, idx),
            FOREIGN KEY (file_id) REFERENCES pb_files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pb_categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            value TEXT NOT NULL,
            norm TEXT NOT NULL,
            count_in_file INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (file_id) REFERENCES pb_files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pb_targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL,
            value TEXT NOT NULL,
            norm TEXT NOT NULL,
            count_in_file INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (file_id) REFERENCES pb_files(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Singleton signature row compared by read-side caches.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_state (
            key TEXT PRIMARY KEY,
            last_refresh_at INTEGER,
            last_completed_at INTEGER
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pb_files_webpage_current ON pb_files(webpage_name, is_current)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_files_group_key ON pb_files(group_key)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_files_file_name ON pb_files(file_name)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_files_is_current ON pb_files(is_current)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_comments_file_id ON pb_comments(file_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_categories_file_id ON pb_categories(file_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_targets_file_id ON pb_targets(file_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
