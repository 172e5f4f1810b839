//! Line-record parser for the semicolon-delimited PB file format.
//!
//! A file holds up to three sections, each introduced by a bare-word line
//! (`META`, `PROJECTS`, `VOTES`, case-insensitive) followed immediately by a
//! header row. META rows are key/value pairs; PROJECTS and VOTES rows are
//! keyed by their first column and zipped against the section header.
//!
//! Structural problems (wrong header first column, repeated voter id) fail
//! the parse; everything else is tolerated — blank lines are skipped and a
//! missing section simply yields an empty map.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::models::RawRecord;

/// Parse failures that make a file unusable. Anything softer than these is
/// handled downstream by catch-and-default derivation.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A PROJECTS/VOTES header row does not start with the id column the
    /// positional format requires.
    #[error("first value in {section} section is not '{expected}': {found}")]
    StructuralFormat {
        section: &'static str,
        expected: &'static str,
        found: String,
    },
    /// The VOTES section repeats a ballot id, which indicates a corrupt
    /// export rather than a tolerable data quirk.
    #[error("duplicated voter id: {0}")]
    DuplicateVoter(String),
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Meta,
    Projects,
    Votes,
}

/// Split one line into `;`-delimited cells. Values keep interior whitespace;
/// trimming happens where the format prescribes it.
fn split_row(line: &str) -> Vec<&str> {
    line.split(';').collect()
}

fn is_blank(cells: &[&str]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

/// Parse the lines of a PB file into its raw sections.
pub fn parse_pb_lines<S: AsRef<str>>(lines: &[S]) -> Result<RawRecord, ParseError> {
    let mut record = RawRecord::default();
    let mut section = Section::None;
    let mut header: Vec<String> = Vec::new();

    // Positional indices for replace-in-place on duplicate project ids and
    // O(1) duplicate detection on voter ids.
    let mut project_pos: HashMap<String, usize> = HashMap::new();
    let mut voter_seen: HashSet<String> = HashSet::new();

    let mut iter = lines.iter().map(|l| l.as_ref());
    while let Some(line) = iter.next() {
        let cells = split_row(line);
        if is_blank(&cells) {
            continue;
        }

        let first = cells[0].trim().to_lowercase();
        if matches!(first.as_str(), "meta" | "projects" | "votes") {
            section = match first.as_str() {
                "meta" => Section::Meta,
                "projects" => Section::Projects,
                _ => Section::Votes,
            };
            // The next line is this section's header row.
            header = iter
                .next()
                .map(|h| split_row(h).iter().map(|c| c.to_string()).collect())
                .unwrap_or_default();
            if let Some(first_col) = header.first() {
                let check = first_col.trim().to_lowercase();
                if section == Section::Projects && check != "project_id" {
                    return Err(ParseError::StructuralFormat {
                        section: "PROJECTS",
                        expected: "project_id",
                        found: check,
                    });
                }
                if section == Section::Votes && check != "voter_id" {
                    return Err(ParseError::StructuralFormat {
                        section: "VOTES",
                        expected: "voter_id",
                        found: check,
                    });
                }
            }
            continue;
        }

        match section {
            Section::None => {}
            Section::Meta => {
                if cells.len() >= 2 {
                    record
                        .meta
                        .insert(cells[0].to_string(), cells[1].trim().to_string());
                }
            }
            Section::Projects => {
                if header.iter().any(|k| k == "votes") {
                    record.votes_in_projects = true;
                }
                if header.iter().any(|k| k == "score") {
                    record.scores_in_projects = true;
                }
                let pid = cells[0].to_string();
                let fields = zip_row(&header, &cells);
                match project_pos.get(&pid) {
                    Some(&pos) => record.projects[pos].1 = fields,
                    None => {
                        project_pos.insert(pid.clone(), record.projects.len());
                        record.projects.push((pid, fields));
                    }
                }
            }
            Section::Votes => {
                let vid = cells[0].to_string();
                if !voter_seen.insert(vid.clone()) {
                    return Err(ParseError::DuplicateVoter(vid));
                }
                let fields = zip_row(&header, &cells);
                record.votes.push((vid, fields));
            }
        }
    }

    Ok(record)
}

/// Zip a body row against the section header, skipping the id column.
/// Short rows simply omit the trailing keys.
fn zip_row(header: &[String], cells: &[&str]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (it, key) in header.iter().skip(1).enumerate() {
        if it + 1 < cells.len() {
            out.insert(key.trim().to_string(), cells[it + 1].trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_three_sections_round_trip() {
        let input = lines(
            "META\nkey;value\ncountry;Poland\nbudget;100000\n\
             PROJECTS\nproject_id;cost;name\n1;60000;Park\n2;40000;Library\n\
             VOTES\nvoter_id;vote\na;1\nb;1,2\nc;2",
        );
        let rec = parse_pb_lines(&input).unwrap();
        assert_eq!(rec.meta.get("country").map(String::as_str), Some("Poland"));
        assert_eq!(rec.projects.len(), 2);
        assert_eq!(rec.votes.len(), 3);
        assert_eq!(
            rec.projects[0].1.get("cost").map(String::as_str),
            Some("60000")
        );
        assert_eq!(rec.votes[1].0, "b");
        assert_eq!(rec.votes[1].1.get("vote").map(String::as_str), Some("1,2"));
    }

    #[test]
    fn test_missing_sections_are_empty() {
        let input = lines("META\nkey;value\ncountry;France");
        let rec = parse_pb_lines(&input).unwrap();
        assert!(rec.projects.is_empty());
        assert!(rec.votes.is_empty());
    }

    #[test]
    fn test_bad_projects_header_fails() {
        let input = lines("PROJECTS\nid;cost\n1;500");
        let err = parse_pb_lines(&input).unwrap_err();
        assert!(matches!(err, ParseError::StructuralFormat { .. }));
        assert!(err.to_string().contains("project_id"));
    }

    #[test]
    fn test_bad_votes_header_fails() {
        let input = lines("VOTES\nballot;vote\nx;1");
        let err = parse_pb_lines(&input).unwrap_err();
        assert!(err.to_string().contains("voter_id"));
    }

    #[test]
    fn test_duplicate_voter_id_fails() {
        let input = lines("VOTES\nvoter_id;vote\na;1\nb;2\na;3");
        let err = parse_pb_lines(&input).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateVoter(ref v) if v == "a"));
    }

    #[test]
    fn test_duplicate_project_id_replaces_in_place() {
        let input = lines("PROJECTS\nproject_id;cost\n1;100\n2;200\n1;999");
        let rec = parse_pb_lines(&input).unwrap();
        assert_eq!(rec.projects.len(), 2);
        assert_eq!(rec.projects[0].0, "1");
        assert_eq!(
            rec.projects[0].1.get("cost").map(String::as_str),
            Some("999")
        );
    }

    #[test]
    fn test_blank_lines_ignored() {
        let input = lines("META\nkey;value\n\ncountry;Spain\n\n\nVOTES\nvoter_id;vote\n\nv1;1");
        let rec = parse_pb_lines(&input).unwrap();
        assert_eq!(rec.meta.get("country").map(String::as_str), Some("Spain"));
        assert_eq!(rec.votes.len(), 1);
    }

    #[test]
    fn test_inlined_vote_and_score_flags() {
        let input = lines("PROJECTS\nproject_id;cost;votes;score\n1;100;12;3.5");
        let rec = parse_pb_lines(&input).unwrap();
        assert!(rec.votes_in_projects);
        assert!(rec.scores_in_projects);
    }

    #[test]
    fn test_values_are_trimmed() {
        let input = lines("META\nkey;value\ncurrency;  EUR  \nVOTES\nvoter_id;vote\nv; 1,2 ");
        let rec = parse_pb_lines(&input).unwrap();
        assert_eq!(rec.meta.get("currency").map(String::as_str), Some("EUR"));
        assert_eq!(rec.votes[0].1.get("vote").map(String::as_str), Some("1,2"));
    }

    #[test]
    fn test_short_rows_omit_trailing_keys() {
        let input = lines("PROJECTS\nproject_id;cost;name\n1;500");
        let rec = parse_pb_lines(&input).unwrap();
        assert_eq!(
            rec.projects[0].1.get("cost").map(String::as_str),
            Some("500")
        );
        assert!(rec.projects[0].1.get("name").is_none());
    }
}
