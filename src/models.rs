//! Core data models used throughout the PB catalog.
//!
//! These types represent the parsed PB files, derived tiles, and versioning
//! outcomes that flow through the ingestion pipeline.

use std::collections::BTreeMap;

use serde::Serialize;

/// Raw parse output of a single `.pb` file before derivation.
///
/// `projects` and `votes` preserve file order; project rows with a repeated
/// id replace the earlier row in place, matching the source format's
/// last-wins semantics. A repeated voter id is a parse error instead.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub meta: BTreeMap<String, String>,
    pub projects: Vec<(String, BTreeMap<String, String>)>,
    pub votes: Vec<(String, BTreeMap<String, String>)>,
    /// PROJECTS header carried an inlined `votes` column.
    pub votes_in_projects: bool,
    /// PROJECTS header carried an inlined `score` column.
    pub scores_in_projects: bool,
}

/// Logical dataset identity a sequence of file versions belongs to.
///
/// `webpage_name` (case-preserving, underscore-joined) is the operative
/// identity for current-record decisions; the lowercased bounded `group_key`
/// derived from the same parts is kept for analytics grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub country: String,
    pub unit: String,
    pub instance: String,
    pub subunit: String,
    pub webpage_name: String,
}

/// Occurrence stats for one normalized category/target token within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStat {
    /// First-seen casing, used for display.
    pub display: String,
    pub count: i64,
}

/// The flattened summary record derived from a parsed PB file.
///
/// Every numeric field defaults deterministically when the source data is
/// absent or unparsable; derivation never fails on optional fields.
#[derive(Debug, Clone)]
pub struct Tile {
    pub file_name: String,
    pub path: String,
    pub title: String,
    pub identity: Identity,
    pub group_key: String,
    pub description: String,
    pub comments: Vec<String>,
    pub currency: String,
    pub num_votes: i64,
    pub num_projects: i64,
    /// None when the PROJECTS section has no `selected` column at all.
    pub num_selected_projects: Option<i64>,
    /// Integer budget in the file's currency unit.
    pub budget: Option<i64>,
    pub vote_type: String,
    pub vote_length: Option<f64>,
    pub year: Option<i32>,
    pub fully_funded: bool,
    pub has_selected_col: bool,
    pub experimental: bool,
    pub quality: f64,
    pub rule: String,
    pub edition: String,
    pub language: String,
    /// Compact ballot-size constraint label, e.g. `k=5` or `2≤k≤10`.
    pub vote_rule_label: Option<String>,
    pub knapsack: bool,
    pub has_geo: bool,
    pub has_category: bool,
    pub has_target: bool,
    /// Normalized token → occurrence stats, across all project rows.
    pub categories: BTreeMap<String, TokenStat>,
    pub targets: BTreeMap<String, TokenStat>,
}

/// Result of a single interactive ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No current record existed for the identity; a fresh row was created.
    Created { id: i64 },
    /// An existing current record was archived and superseded.
    Superseded { id: i64, supersedes: i64 },
    /// A current record exists and the caller did not confirm the overwrite.
    /// Nothing was mutated; re-invoke with confirmation to proceed.
    RequiresConfirm {
        existing_id: i64,
        existing_file: String,
        existing_mtime: i64,
    },
}

/// Structured summary of a batch refresh run, printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total: u64,
    pub last_refresh_prev: Option<String>,
    pub refreshed_at: String,
}
