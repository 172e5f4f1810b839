//! Dataset identity and bounded grouping key.
//!
//! A dataset is identified by (country, unit, instance, subunit) read from
//! META with fallback aliases. Two keys are derived from the same parts:
//! `webpage_name` (case-preserving, underscore-joined) drives current-record
//! decisions, and `group_key` (lowercased, `|`-joined, length-bounded for
//! index safety) is kept for analytics grouping.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::models::Identity;

/// Upper bound on `group_key` length, chosen for utf8mb4-safe indexing.
const GROUP_KEY_MAX_CHARS: usize = 191;
const GROUP_KEY_HASH_CHARS: usize = 12;

/// Return the value of the first alias key present in `meta`. Presence wins
/// over content: an empty value under an earlier alias shadows later ones.
pub fn resolve_alias<'a>(meta: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| meta.get(*k).map(String::as_str))
}

/// Read the dataset identity from META, applying the fallback aliases
/// `unit` → `city` → `district` and `instance` → `year`.
pub fn compute_identity(meta: &BTreeMap<String, String>) -> Identity {
    let country = meta.get("country").map(String::as_str).unwrap_or("").trim();
    let unit = resolve_alias(meta, &["unit", "city", "district"])
        .unwrap_or("")
        .trim();
    let instance = resolve_alias(meta, &["instance", "year"])
        .unwrap_or("")
        .trim();
    let subunit = meta.get("subunit").map(String::as_str).unwrap_or("").trim();

    let webpage_name = [country, unit, instance, subunit]
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("_");

    Identity {
        country: country.to_string(),
        unit: unit.to_string(),
        instance: instance.to_string(),
        subunit: subunit.to_string(),
        webpage_name,
    }
}

/// Build the bounded grouping key for an identity.
///
/// Parts are trimmed, lowercased and `|`-joined. Keys longer than the index
/// bound are truncated with a stable hash suffix so distinct identities stay
/// distinct.
pub fn build_group_key(identity: &Identity) -> String {
    let key = [
        identity.country.as_str(),
        identity.unit.as_str(),
        identity.instance.as_str(),
        identity.subunit.as_str(),
    ]
    .iter()
    .map(|p| p.trim().to_lowercase())
    .collect::<Vec<_>>()
    .join("|");

    if key.chars().count() <= GROUP_KEY_MAX_CHARS {
        return key;
    }

    let digest = Sha256::digest(key.as_bytes());
    let hash: String = format!("{:x}", digest)
        .chars()
        .take(GROUP_KEY_HASH_CHARS)
        .collect();
    let prefix: String = key
        .chars()
        .take(GROUP_KEY_MAX_CHARS - 1 - GROUP_KEY_HASH_CHARS)
        .collect();
    format!("{}_{}", prefix, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_webpage_name_skips_empty_parts() {
        let id = compute_identity(&meta(&[
            ("country", "Poland"),
            ("unit", "Warszawa"),
            ("instance", "2023"),
        ]));
        assert_eq!(id.webpage_name, "Poland_Warszawa_2023");
        assert_eq!(id.subunit, "");
    }

    #[test]
    fn test_unit_falls_back_to_city_then_district() {
        let id = compute_identity(&meta(&[("country", "France"), ("city", "Paris")]));
        assert_eq!(id.unit, "Paris");
        let id = compute_identity(&meta(&[("country", "France"), ("district", "11e")]));
        assert_eq!(id.unit, "11e");
    }

    #[test]
    fn test_instance_falls_back_to_year() {
        let id = compute_identity(&meta(&[("country", "France"), ("year", "2021")]));
        assert_eq!(id.instance, "2021");
    }

    #[test]
    fn test_alias_presence_wins_over_content() {
        // An empty `unit` key shadows a populated `city` key.
        let id = compute_identity(&meta(&[("unit", ""), ("city", "Lyon")]));
        assert_eq!(id.unit, "");
    }

    #[test]
    fn test_group_key_normalizes_case() {
        let a = compute_identity(&meta(&[("country", "Poland"), ("unit", "Kraków")]));
        let b = compute_identity(&meta(&[("country", "POLAND"), ("unit", "kraków")]));
        assert_eq!(build_group_key(&a), build_group_key(&b));
        assert_ne!(a.webpage_name, b.webpage_name);
    }

    #[test]
    fn test_group_key_deterministic_and_bounded() {
        let long = "x".repeat(400);
        let id = Identity {
            country: long.clone(),
            unit: long.clone(),
            instance: "2020".to_string(),
            subunit: String::new(),
            webpage_name: String::new(),
        };
        let k1 = build_group_key(&id);
        let k2 = build_group_key(&id);
        assert_eq!(k1, k2);
        assert!(k1.chars().count() <= 191);
    }

    #[test]
    fn test_long_distinct_identities_stay_distinct() {
        let base = "y".repeat(300);
        let mk = |inst: &str| Identity {
            country: base.clone(),
            unit: base.clone(),
            instance: inst.to_string(),
            subunit: String::new(),
            webpage_name: String::new(),
        };
        assert_ne!(build_group_key(&mk("2020")), build_group_key(&mk("2021")));
    }

    #[test]
    fn test_short_key_passes_through() {
        let id = compute_identity(&meta(&[("country", "Poland"), ("unit", "Łódź")]));
        assert_eq!(build_group_key(&id), "poland|łódź||");
    }
}
