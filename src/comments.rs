//! Comment extraction from the META `comment` field.
//!
//! A single META value may hold several discrete comments marked with
//! sequential `#1:`, `#2:`, ... markers, possibly spread across lines.
//! Extraction yields the plain texts in marker order, without trailing
//! punctuation; a marker-less non-empty string is a single comment.

/// Extract the ordered comment list from a raw `comment` value.
pub fn extract_comments(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    // Normalize to a single line to simplify marker search.
    let s = trimmed.replace('\n', " ");

    let mut parts = Vec::new();
    let mut expecting = 1usize;
    loop {
        let marker = format!("#{}:", expecting);
        let next_marker = format!("#{}:", expecting + 1);
        let start = match s.find(&marker) {
            Some(pos) => pos,
            None => {
                // No marker at all: the whole string is one comment.
                if expecting == 1 {
                    let txt = clean_segment(&s);
                    if !txt.is_empty() {
                        parts.push(txt);
                    }
                }
                break;
            }
        };
        let start_text = start + marker.len();
        let end = s[start_text..].find(&next_marker).map(|p| start_text + p);
        let chunk = match end {
            Some(e) => &s[start_text..e],
            None => &s[start_text..],
        };
        let txt = clean_segment(chunk);
        if !txt.is_empty() {
            parts.push(txt);
        }
        expecting += 1;
        if end.is_none() {
            break;
        }
    }
    parts
}

/// Trim whitespace and strip trailing `;`/`.` punctuation.
fn clean_segment(chunk: &str) -> String {
    chunk
        .trim()
        .trim_end_matches(|c| c == ';' || c == '.')
        .trim()
        .to_string()
}

/// Re-serialize a comment list into the `#n:` marker form. Round-tripping
/// through [`extract_comments`] is stable.
#[allow(dead_code)]
pub fn join_with_markers(comments: &[String]) -> String {
    comments
        .iter()
        .enumerate()
        .map(|(i, c)| format!("#{}: {}", i + 1, c))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(extract_comments("").is_empty());
        assert!(extract_comments("   ").is_empty());
    }

    #[test]
    fn test_no_markers_single_comment() {
        let got = extract_comments("Vote counts were corrected after audit.;");
        assert_eq!(got, vec!["Vote counts were corrected after audit"]);
    }

    #[test]
    fn test_sequential_markers() {
        let got = extract_comments("#1: First note. #2: Second note; #3: Third note");
        assert_eq!(got, vec!["First note", "Second note", "Third note"]);
    }

    #[test]
    fn test_markers_across_lines() {
        let got = extract_comments("#1: Line one\n#2: Line two");
        assert_eq!(got, vec!["Line one", "Line two"]);
    }

    #[test]
    fn test_gap_stops_extraction() {
        // #3 without #2 is never reached; extraction stops after #1.
        let got = extract_comments("#1: only this #3: unreachable");
        assert_eq!(got.len(), 1);
        assert!(got[0].starts_with("only this"));
    }

    #[test]
    fn test_empty_segments_dropped() {
        let got = extract_comments("#1: ; #2: kept");
        assert_eq!(got, vec!["kept"]);
    }

    #[test]
    fn test_round_trip_stable() {
        let inputs = [
            "#1: Budget revised mid-cycle. #2: Two districts merged",
            "plain single comment.",
            "#1: a #2: b #3: c",
        ];
        for s in inputs {
            let once = extract_comments(s);
            let twice = extract_comments(&join_with_markers(&once));
            assert_eq!(once, twice, "unstable for {:?}", s);
        }
    }

    #[test]
    fn test_k_markers_yield_k_comments() {
        for k in 1..=6 {
            let s = (1..=k)
                .map(|n| format!("#{}: comment number {}", n, n))
                .collect::<Vec<_>>()
                .join(" ");
            assert_eq!(extract_comments(&s).len(), k);
        }
    }
}
