//! Tile derivation — the flattened summary record computed from a parsed
//! PB file.
//!
//! Every derivation here is independently failure-tolerant: a missing or
//! unparsable optional field defaults (0, None, empty) instead of failing
//! the file. Only the parser rejects files; the deriver never does.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::comments::extract_comments;
use crate::identity::{build_group_key, compute_identity, resolve_alias};
use crate::models::{RawRecord, Tile, TokenStat};

/// Exponents of the quality ranking heuristic
/// `quality = vote_length^a × num_projects^b × num_votes^c`.
///
/// The defaults match the catalog's historical ranking. They are exposed in
/// the config so ingestion and any ranking collaborator stay consistent.
#[derive(Debug, Clone, Copy)]
pub struct QualityWeights {
    pub vote_length_exp: f64,
    pub projects_exp: f64,
    pub votes_exp: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            vote_length_exp: 2.0,
            projects_exp: 1.0,
            votes_exp: 0.5,
        }
    }
}

/// Derive a [`Tile`] from a parsed record and its source path.
pub fn derive_tile(raw: &RawRecord, path: &Path, weights: &QualityWeights) -> Tile {
    let meta = &raw.meta;
    let identity = compute_identity(meta);
    let group_key = build_group_key(&identity);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let title = if identity.webpage_name.is_empty() {
        stem.replace('_', " ")
    } else {
        identity.webpage_name.replace('_', " ")
    };

    let description = meta_str(meta, "description");
    let currency = meta_str(meta, "currency");
    let comments = extract_comments(meta.get("comment").map(String::as_str).unwrap_or(""));

    let num_votes = parse_int(meta.get("num_votes")).unwrap_or(raw.votes.len() as i64);
    let num_projects = parse_int(meta.get("num_projects")).unwrap_or(raw.projects.len() as i64);
    let budget = meta.get("budget").and_then(|b| parse_float(b)).map(|f| f as i64);

    let vote_type = resolve_alias(meta, &["vote_type", "rule"])
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let vote_length = average_vote_length(raw);
    let (fully_funded, num_selected_projects, has_selected_col) =
        funding_status(raw, budget);
    let year = detect_year(meta, &identity.instance);

    let vlen = vote_length.unwrap_or(0.0);
    let quality = vlen.powf(weights.vote_length_exp)
        * (num_projects as f64).powf(weights.projects_exp)
        * (num_votes as f64).powf(weights.votes_exp);

    let rule = meta_str(meta, "rule");
    let edition = meta_str(meta, "edition");
    let language = meta_str(meta, "language");
    let experimental = matches!(
        meta_str(meta, "experimental").to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    );

    let (vote_rule_label, knapsack) = vote_rule_label(meta, &vote_type, &identity.subunit);

    let facets = scan_facets(raw);

    Tile {
        file_name,
        path: path.to_string_lossy().to_string(),
        title,
        identity,
        group_key,
        description,
        comments,
        currency,
        num_votes,
        num_projects,
        num_selected_projects,
        budget,
        vote_type,
        vote_length,
        year,
        fully_funded,
        has_selected_col,
        experimental,
        quality,
        rule,
        edition,
        language,
        vote_rule_label,
        knapsack,
        has_geo: facets.has_geo,
        has_category: !facets.categories.is_empty(),
        has_target: !facets.targets.is_empty(),
        categories: facets.categories,
        targets: facets.targets,
    }
}

fn meta_str(meta: &BTreeMap<String, String>, key: &str) -> String {
    meta.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

/// Strict integer parse of a trimmed string.
fn parse_int(val: Option<&String>) -> Option<i64> {
    val.and_then(|v| v.trim().parse::<i64>().ok())
}

/// Permissive numeric parse: accepts integer-like and float-like strings.
fn parse_float(val: &str) -> Option<f64> {
    let s = val.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Cost parse additionally accepting a decimal comma, truncated to integer.
fn parse_cost(val: &str) -> Option<i64> {
    parse_float(&val.trim().replace(',', ".")).map(|f| f as i64)
}

/// Average ballot length over voters with at least one non-empty selection.
/// Only the `vote` field contributes; other voter columns are ignored.
fn average_vote_length(raw: &RawRecord) -> Option<f64> {
    let mut lengths: Vec<usize> = Vec::new();
    for (_, fields) in &raw.votes {
        let sel = fields.get("vote").map(String::as_str).unwrap_or("").trim();
        if sel.is_empty() {
            continue;
        }
        lengths.push(sel.split(',').filter(|t| !t.is_empty()).count());
    }
    if lengths.is_empty() {
        return None;
    }
    Some(lengths.iter().sum::<usize>() as f64 / lengths.len() as f64)
}

/// Fully-funded heuristic plus selected-project bookkeeping.
///
/// A file is fully funded when every project row is selected, or when the
/// summed cost of selected projects reaches the budget. Non-parsable costs
/// are skipped, not counted.
fn funding_status(raw: &RawRecord, budget: Option<i64>) -> (bool, Option<i64>, bool) {
    let mut has_selected_col = false;
    let mut selected_count: i64 = 0;
    let mut sum_selected_cost: i64 = 0;
    let mut all_selected = !raw.projects.is_empty();

    for (_, fields) in &raw.projects {
        if fields.contains_key("selected") {
            has_selected_col = true;
        }
        let flag = fields.get("selected").map(String::as_str).unwrap_or("0").trim();
        if flag != "1" {
            all_selected = false;
            continue;
        }
        selected_count += 1;
        if let Some(cost) = fields.get("cost").and_then(|c| parse_cost(c)) {
            sum_selected_cost += cost;
        }
    }

    let fully_funded =
        all_selected || budget.map(|b| sum_selected_cost >= b).unwrap_or(false);
    let num_selected = if has_selected_col {
        Some(selected_count)
    } else {
        None
    };
    (fully_funded, num_selected, has_selected_col)
}

/// Prefer a 4-digit year embedded in `date_begin`; fall back to `year` or
/// the instance when purely numeric. Accepted range is [1900, 2100].
fn detect_year(meta: &BTreeMap<String, String>, instance: &str) -> Option<i32> {
    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = YEAR_RE.get_or_init(|| Regex::new(r"(\d{4})").unwrap());

    let date_begin = meta_str(meta, "date_begin");
    if let Some(cap) = re.captures(&date_begin) {
        if let Ok(y) = cap[1].parse::<i32>() {
            if (1900..=2100).contains(&y) {
                return Some(y);
            }
        }
    }

    let year_meta = meta.get("year").map(|v| v.trim().to_string());
    for cand in [year_meta.as_deref(), Some(instance)].into_iter().flatten() {
        let s = cand.trim();
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(y) = s.parse::<i32>() {
                if (1900..=2100).contains(&y) {
                    return Some(y);
                }
            }
        }
    }
    None
}

/// Meta keys whose presence marks an approval ballot as knapsack-style.
const KNAPSACK_KEYS: [&str; 3] = ["max_sum_cost", "max_sum_cost_per_category", "max_total_cost"];

/// Compute the ballot-size constraint label and the knapsack flag for the
/// given vote rule. Approval ballots with cost-sum constraints (or a
/// "knapsack" subunit) suppress the label entirely.
fn vote_rule_label(
    meta: &BTreeMap<String, String>,
    vote_type: &str,
    subunit: &str,
) -> (Option<String>, bool) {
    match vote_type {
        "approval" => {
            let knapsack = KNAPSACK_KEYS.iter().any(|k| meta.contains_key(*k))
                || subunit.to_lowercase().contains("knapsack");
            if knapsack {
                (None, true)
            } else {
                (
                    Some(bounds_label(
                        parse_int(meta.get("min_length")),
                        parse_int(meta.get("max_length")),
                        "k",
                    )),
                    false,
                )
            }
        }
        "ordinal" => (
            Some(bounds_label(
                parse_int(meta.get("min_length")),
                parse_int(meta.get("max_length")),
                "k",
            )),
            false,
        ),
        "cumulative" => (
            Some(bounds_label(
                parse_int(meta.get("min_sum_points")),
                parse_int(meta.get("max_sum_points")),
                "pts",
            )),
            false,
        ),
        _ => (None, false),
    }
}

/// Normalize a (min, max) bound pair into a compact display label.
/// Equal bounds collapse to `k=n`; a lower bound of exactly 1 is trivial
/// and omitted; no bounds at all reads `Any k`.
fn bounds_label(min: Option<i64>, max: Option<i64>, unit: &str) -> String {
    if let (Some(m), Some(n)) = (min, max) {
        if m == n {
            return format!("{}={}", unit, n);
        }
    }
    let min = min.filter(|m| *m != 1);
    match (min, max) {
        (Some(m), Some(n)) => format!("{}≤{}≤{}", m, unit, n),
        (Some(m), None) => format!("{}≤{}", m, unit),
        (None, Some(n)) => format!("{}≤{}", unit, n),
        (None, None) => format!("Any {}", unit),
    }
}

struct Facets {
    has_geo: bool,
    categories: BTreeMap<String, TokenStat>,
    targets: BTreeMap<String, TokenStat>,
}

/// Scan project rows for geographic coordinates and category/target tokens.
/// Header casing varies across exports, so keys are matched lowercased.
fn scan_facets(raw: &RawRecord) -> Facets {
    let mut facets = Facets {
        has_geo: false,
        categories: BTreeMap::new(),
        targets: BTreeMap::new(),
    };

    for (_, fields) in &raw.projects {
        let lower: BTreeMap<String, &str> = fields
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.as_str()))
            .collect();

        if !facets.has_geo {
            let lat = ["latitude", "lat"]
                .iter()
                .find_map(|k| lower.get(*k).and_then(|v| coerce_float(v)));
            let lon = ["longitude", "lon", "long"]
                .iter()
                .find_map(|k| lower.get(*k).and_then(|v| coerce_float(v)));
            if let (Some(lat), Some(lon)) = (lat, lon) {
                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
                    facets.has_geo = true;
                }
            }
        }

        for key in ["category", "categories"] {
            if let Some(val) = lower.get(key) {
                accumulate_tokens(&mut facets.categories, val);
            }
        }
        for key in ["target", "targets"] {
            if let Some(val) = lower.get(key) {
                accumulate_tokens(&mut facets.targets, val);
            }
        }
    }

    facets
}

/// Float coercion accepting a decimal comma.
fn coerce_float(val: &str) -> Option<f64> {
    parse_float(&val.trim().replace(',', "."))
}

/// Split a comma-separated token list and accumulate per-normalized-token
/// counts, keeping the first-seen casing for display.
fn accumulate_tokens(into: &mut BTreeMap<String, TokenStat>, val: &str) {
    for token in val.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let norm = token.to_lowercase();
        into.entry(norm)
            .and_modify(|s| s.count += 1)
            .or_insert_with(|| TokenStat {
                display: token.to_string(),
                count: 1,
            });
    }
}
