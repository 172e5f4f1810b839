//! Read-side catalog tiles.
//!
//! Loads the current catalog (one tile per `is_current` row) with both raw
//! and display-formatted values, through a [`SignedCache`] keyed by the
//! refresh signature so repeated reads skip the database until an ingestion
//! completes.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::format::{format_budget, format_int, format_short_number, format_vote_length};
use crate::signal::{self, SignedCache};

/// One catalog entry, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogTile {
    pub file_name: String,
    pub title: String,
    pub webpage_name: String,
    pub description: String,
    pub currency: String,
    pub num_votes: String,
    pub num_votes_raw: i64,
    pub num_projects: String,
    pub num_projects_raw: i64,
    pub num_selected_projects: String,
    pub num_selected_projects_raw: Option<i64>,
    pub budget: String,
    pub budget_raw: Option<i64>,
    pub vote_type: String,
    pub vote_length: String,
    pub vote_length_raw: Option<f64>,
    pub vote_rule_label: Option<String>,
    pub knapsack: bool,
    pub country: String,
    pub unit: String,
    pub instance: String,
    pub subunit: String,
    pub year: Option<i32>,
    pub fully_funded: bool,
    pub experimental: bool,
    pub has_geo: bool,
    pub has_category: bool,
    pub has_target: bool,
    pub quality: f64,
    pub quality_short: String,
    pub rule: String,
    pub edition: String,
    pub language: String,
}

/// Load all current tiles ordered by country, unit, instance, subunit and
/// file name.
pub async fn load_current_tiles(pool: &SqlitePool) -> Result<Vec<CatalogTile>> {
    let rows = sqlx::query(
        r#"
        SELECT file_name, webpage_name, description, currency, num_votes,
               num_projects, num_selected_projects, budget, vote_type,
               vote_length, vote_rule_label, knapsack, country, unit,
               instance, subunit, year, fully_funded, experimental, quality,
               rule, edition, language, has_geo, has_category, has_target
        FROM pb_files
        WHERE is_current = 1
        ORDER BY country, unit, instance, subunit, file_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let tiles = rows
        .iter()
        .map(|r| {
            let file_name: String = r.get("file_name");
            let webpage_name: String = r.get::<Option<String>, _>("webpage_name").unwrap_or_default();
            let currency: String = r.get::<Option<String>, _>("currency").unwrap_or_default();
            let num_votes: i64 = r.get::<Option<i64>, _>("num_votes").unwrap_or(0);
            let num_projects: i64 = r.get::<Option<i64>, _>("num_projects").unwrap_or(0);
            let num_selected: Option<i64> = r.get("num_selected_projects");
            let budget: Option<i64> = r.get("budget");
            let vote_length: Option<f64> = r.get("vote_length");
            let quality: f64 = r.get::<Option<f64>, _>("quality").unwrap_or(0.0);

            let title = if webpage_name.is_empty() {
                file_name.replace('_', " ")
            } else {
                webpage_name.replace('_', " ")
            };

            CatalogTile {
                title,
                num_votes: format_int(num_votes),
                num_votes_raw: num_votes,
                num_projects: format_int(num_projects),
                num_projects_raw: num_projects,
                num_selected_projects: num_selected.map(format_int).unwrap_or_else(|| "—".into()),
                num_selected_projects_raw: num_selected,
                budget: budget
                    .map(|b| format_budget(&currency, b))
                    .unwrap_or_else(|| "—".into()),
                budget_raw: budget,
                vote_length: format_vote_length(vote_length),
                vote_length_raw: vote_length,
                vote_rule_label: r.get("vote_rule_label"),
                knapsack: r.get("knapsack"),
                quality_short: format_short_number(quality),
                quality,
                file_name,
                webpage_name,
                description: r.get::<Option<String>, _>("description").unwrap_or_default(),
                currency,
                vote_type: r.get::<Option<String>, _>("vote_type").unwrap_or_default(),
                country: r.get::<Option<String>, _>("country").unwrap_or_default(),
                unit: r.get::<Option<String>, _>("unit").unwrap_or_default(),
                instance: r.get::<Option<String>, _>("instance").unwrap_or_default(),
                subunit: r.get::<Option<String>, _>("subunit").unwrap_or_default(),
                year: r.get("year"),
                fully_funded: r.get("fully_funded"),
                experimental: r.get("experimental"),
                has_geo: r.get("has_geo"),
                has_category: r.get("has_category"),
                has_target: r.get("has_target"),
                rule: r.get::<Option<String>, _>("rule").unwrap_or_default(),
                edition: r.get::<Option<String>, _>("edition").unwrap_or_default(),
                language: r.get::<Option<String>, _>("language").unwrap_or_default(),
            }
        })
        .collect();

    Ok(tiles)
}

/// Signature-checked tile cache for long-lived readers.
#[derive(Debug, Default)]
pub struct TileCache {
    cache: SignedCache<Vec<CatalogTile>>,
}

impl TileCache {
    pub fn new() -> Self {
        Self {
            cache: SignedCache::new(),
        }
    }

    /// Current tiles, rebuilt only when the refresh signature moved.
    pub async fn current(&mut self, pool: &SqlitePool) -> Result<&[CatalogTile]> {
        let sig = signal::signature(pool).await?;
        if self.cache.get(&sig).is_none() {
            let tiles = load_current_tiles(pool).await?;
            self.cache.insert(sig.clone(), tiles);
        }
        Ok(self
            .cache
            .get(&sig)
            .map(Vec::as_slice)
            .expect("cache populated above"))
    }
}

/// CLI entry point for `pbcat list`.
pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut cache = TileCache::new();
    let tiles = cache.current(&pool).await?.to_vec();
    pool.close().await;

    if tiles.is_empty() {
        println!("No current datasets.");
        return Ok(());
    }

    println!(
        "{:<44} {:>9} {:>9} {:>14} {:>8}  {}",
        "FILE", "VOTES", "PROJECTS", "BUDGET", "QUALITY", "RULE"
    );
    println!("{}", "-".repeat(96));
    for t in &tiles {
        println!(
            "{:<44} {:>9} {:>9} {:>14} {:>8}  {}",
            t.file_name,
            t.num_votes,
            t.num_projects,
            t.budget,
            t.quality_short,
            t.vote_rule_label.as_deref().unwrap_or("")
        );
    }
    println!();
    println!("{} current dataset(s)", tiles.len());

    Ok(())
}
