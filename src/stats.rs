//! Catalog statistics and comment aggregation.
//!
//! Summarizes the current datasets: totals, per-year and per-country
//! series, vote-type breakdowns, and the distinct active comments with the
//! files they appear in. Used by `pbcat stats` and `pbcat comments` to give
//! confidence that ingestion and versioning are behaving.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::format::{format_int, format_short_number};

/// Catalog-wide totals over current rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    pub total_files: i64,
    pub total_countries: i64,
    pub total_cities: i64,
    pub total_projects: i64,
    pub total_votes: i64,
    pub total_selected_projects: i64,
    pub total_budget: i64,
    pub budget_by_currency: BTreeMap<String, i64>,
}

/// One labelled value in a ranked series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Series {
    pub files_per_year: Vec<SeriesPoint>,
    pub votes_per_country: Vec<SeriesPoint>,
    pub budget_per_country: Vec<SeriesPoint>,
    pub vote_types: Vec<SeriesPoint>,
    pub top_cities_by_votes: Vec<SeriesPoint>,
}

/// Aggregate totals and series over all current rows.
pub async fn aggregate_statistics(pool: &SqlitePool) -> Result<(Totals, Series)> {
    let rows = sqlx::query(
        r#"
        SELECT country, unit, year, num_projects, num_votes,
               num_selected_projects, budget, currency, vote_type
        FROM pb_files WHERE is_current = 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut totals = Totals::default();
    let mut countries: BTreeSet<String> = BTreeSet::new();
    let mut cities: BTreeSet<(String, String)> = BTreeSet::new();
    let mut by_year: BTreeMap<i32, i64> = BTreeMap::new();
    let mut votes_by_country: HashMap<String, i64> = HashMap::new();
    let mut budget_by_country: HashMap<String, i64> = HashMap::new();
    let mut vote_types: HashMap<String, i64> = HashMap::new();
    let mut votes_by_city: HashMap<String, i64> = HashMap::new();

    for r in &rows {
        let country: String = r.get::<Option<String>, _>("country").unwrap_or_default();
        let city: String = r.get::<Option<String>, _>("unit").unwrap_or_default();
        let year: Option<i32> = r.get("year");
        let num_projects: i64 = r.get::<Option<i64>, _>("num_projects").unwrap_or(0);
        let num_votes: i64 = r.get::<Option<i64>, _>("num_votes").unwrap_or(0);
        let num_selected: i64 = r.get::<Option<i64>, _>("num_selected_projects").unwrap_or(0);
        let budget: Option<i64> = r.get("budget");
        let currency = {
            let c: String = r.get::<Option<String>, _>("currency").unwrap_or_default();
            let c = c.trim().to_string();
            if c.is_empty() {
                "—".to_string()
            } else {
                c
            }
        };
        let vtype = {
            let v: String = r.get::<Option<String>, _>("vote_type").unwrap_or_default();
            let v = v.trim().to_lowercase();
            if v.is_empty() {
                "unknown".to_string()
            } else {
                v
            }
        };

        totals.total_files += 1;
        if !country.is_empty() {
            countries.insert(country.clone());
        }
        if !country.is_empty() || !city.is_empty() {
            cities.insert((country.clone(), city.clone()));
        }
        totals.total_projects += num_projects;
        totals.total_votes += num_votes;
        totals.total_selected_projects += num_selected;
        if let Some(b) = budget {
            totals.total_budget += b;
            *totals.budget_by_currency.entry(currency).or_insert(0) += b;
            if !country.is_empty() {
                *budget_by_country.entry(country.clone()).or_insert(0) += b;
            }
        }
        if let Some(y) = year {
            *by_year.entry(y).or_insert(0) += 1;
        }
        if !country.is_empty() {
            *votes_by_country.entry(country.clone()).or_insert(0) += num_votes;
        }
        *vote_types.entry(vtype).or_insert(0) += 1;

        let label = match (country.is_empty(), city.is_empty()) {
            (false, false) => format!("{} – {}", country, city),
            (false, true) => country.clone(),
            (true, false) => city.clone(),
            (true, true) => "—".to_string(),
        };
        *votes_by_city.entry(label).or_insert(0) += num_votes;
    }

    totals.total_countries = countries.len() as i64;
    totals.total_cities = cities.len() as i64;

    let series = Series {
        files_per_year: by_year
            .into_iter()
            .map(|(y, v)| SeriesPoint {
                label: y.to_string(),
                value: v,
            })
            .collect(),
        votes_per_country: ranked(votes_by_country),
        budget_per_country: ranked(budget_by_country),
        vote_types: ranked(vote_types),
        top_cities_by_votes: ranked(votes_by_city).into_iter().take(15).collect(),
    };

    Ok((totals, series))
}

/// Sort a labelled map by value descending, ties by label.
fn ranked(map: HashMap<String, i64>) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = map
        .into_iter()
        .map(|(label, value)| SeriesPoint { label, value })
        .collect();
    points.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    points
}

/// One distinct active comment with the current files carrying it.
#[derive(Debug, Clone, Serialize)]
pub struct CommentGroup {
    pub text: String,
    pub count: i64,
    pub files: Vec<String>,
}

/// Aggregate distinct active comment texts over current files, most
/// frequent first.
pub async fn aggregate_comments(pool: &SqlitePool) -> Result<Vec<CommentGroup>> {
    let rows = sqlx::query(
        r#"
        SELECT c.text, f.file_name
        FROM pb_comments c
        JOIN pb_files f ON f.id = c.file_id
        WHERE f.is_current = 1 AND c.is_active = 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut mapping: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for r in &rows {
        let text: String = r.get("text");
        let text = text.trim().to_string();
        if text.is_empty() {
            continue;
        }
        mapping.entry(text).or_default().push(r.get("file_name"));
    }

    let mut groups: Vec<CommentGroup> = mapping
        .into_iter()
        .map(|(text, mut files)| {
            files.sort();
            CommentGroup {
                count: files.len() as i64,
                text,
                files,
            }
        })
        .collect();
    groups.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.text.to_lowercase().cmp(&b.text.to_lowercase()))
    });
    Ok(groups)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let (totals, series) = aggregate_statistics(&pool).await?;
    pool.close().await;

    println!("PB Catalog — Statistics");
    println!("=======================");
    println!();
    println!("  Datasets:          {}", format_int(totals.total_files));
    println!("  Countries:         {}", format_int(totals.total_countries));
    println!("  Cities:            {}", format_int(totals.total_cities));
    println!("  Projects:          {}", format_int(totals.total_projects));
    println!("  Votes:             {}", format_int(totals.total_votes));
    println!(
        "  Selected projects: {}",
        format_int(totals.total_selected_projects)
    );

    if !totals.budget_by_currency.is_empty() {
        println!();
        println!("  Budget by currency:");
        for (currency, amount) in &totals.budget_by_currency {
            println!(
                "    {:<8} {:>12}",
                currency,
                format_short_number(*amount as f64)
            );
        }
    }

    if !series.files_per_year.is_empty() {
        println!();
        println!("  Datasets per year:");
        for p in &series.files_per_year {
            println!("    {:<8} {:>8}", p.label, p.value);
        }
    }

    if !series.vote_types.is_empty() {
        println!();
        println!("  Vote types:");
        for p in &series.vote_types {
            println!("    {:<12} {:>6}", p.label, p.value);
        }
    }

    if !series.top_cities_by_votes.is_empty() {
        println!();
        println!("  Top cities by votes:");
        for p in &series.top_cities_by_votes {
            println!("    {:<32} {:>10}", p.label, format_int(p.value));
        }
    }

    println!();
    Ok(())
}

/// Run the comments command: print distinct active comments with counts.
pub async fn run_comments(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let groups = aggregate_comments(&pool).await?;
    pool.close().await;

    if groups.is_empty() {
        println!("No active comments.");
        return Ok(());
    }

    for g in &groups {
        println!("[{}] {}", g.count, g.text);
        for f in &g.files {
            println!("      {}", f);
        }
    }
    println!();
    println!("{} distinct comment(s)", groups.len());
    Ok(())
}
