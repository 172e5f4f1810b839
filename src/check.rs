//! Structural check of a PB file without persistence.
//!
//! Parses and derives the file exactly as ingestion would, then prints a
//! report instead of writing anything. A structural parse error is surfaced
//! verbatim and fails the command.

use std::path::Path;

use anyhow::{Context, Result};

use crate::format::{format_int, format_vote_length};
use crate::parser::parse_pb_lines;
use crate::store;
use crate::tile::{derive_tile, QualityWeights};

pub fn run_check(path: &Path, weights: &QualityWeights) -> Result<()> {
    let lines = store::read_file_lines(path)?;
    let raw = parse_pb_lines(&lines)
        .with_context(|| format!("{} is not structurally valid", path.display()))?;
    let tile = derive_tile(&raw, path, weights);

    println!("{}: file looks structurally correct", path.display());
    println!();
    println!("  meta keys:   {}", raw.meta.len());
    println!("  projects:    {}", format_int(raw.projects.len() as i64));
    println!("  votes:       {}", format_int(raw.votes.len() as i64));
    if raw.votes_in_projects {
        println!("  note:        PROJECTS rows carry inlined votes");
    }
    if raw.scores_in_projects {
        println!("  note:        PROJECTS rows carry inlined scores");
    }
    println!();
    println!(
        "  identity:    {}",
        if tile.identity.webpage_name.is_empty() {
            "(none)"
        } else {
            tile.identity.webpage_name.as_str()
        }
    );
    println!("  title:       {}", tile.title);
    if let Some(year) = tile.year {
        println!("  year:        {}", year);
    }
    println!(
        "  vote type:   {}",
        if tile.vote_type.is_empty() {
            "(unknown)"
        } else {
            tile.vote_type.as_str()
        }
    );
    if let Some(label) = &tile.vote_rule_label {
        println!("  ballot size: {}", label);
    }
    if tile.knapsack {
        println!("  ballot size: knapsack");
    }
    println!("  vote length: {}", format_vote_length(tile.vote_length));
    match tile.budget {
        Some(b) => println!("  budget:      {}", format_int(b)),
        None => println!("  budget:      —"),
    }
    println!("  quality:     {:.1}", tile.quality);

    let mut flags = Vec::new();
    if tile.fully_funded {
        flags.push("fully-funded");
    }
    if tile.experimental {
        flags.push("experimental");
    }
    if tile.has_geo {
        flags.push("geo");
    }
    if tile.has_category {
        flags.push("categories");
    }
    if tile.has_target {
        flags.push("targets");
    }
    if !flags.is_empty() {
        println!("  flags:       {}", flags.join(", "));
    }
    if !tile.comments.is_empty() {
        println!("  comments:    {}", tile.comments.len());
    }

    Ok(())
}
