use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lowercase, trim, and collapse internal whitespace runs into single spaces.
/// Idempotent; used as the comparison key for store and aisle names.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Coarse proximity bucket: latitude and longitude rounded independently to
/// 3 decimal places (~110m at the equator) and joined into one key. Two
/// coordinates share a cell iff they round identically.
pub fn geo_cell(lat: f64, lng: f64) -> String {
    format!("{:.3},{:.3}", round3(lat), round3(lng))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Stable remote document id derived from a normalized product name, so two
/// clients independently adding the same product converge on one remote
/// record without a coordination round-trip.
pub fn content_hash(normalized_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trim, drop entries with fewer than 3 letter characters, lowercase,
/// de-duplicate, and sort. Raw casing is discarded at this boundary.
pub fn sanitize_keywords<I, S>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::BTreeSet::new();
    for candidate in candidates {
        let trimmed = candidate.as_ref().trim();
        let letter_count = trimmed.chars().filter(|ch| ch.is_alphabetic()).count();
        if letter_count < 3 {
            continue;
        }
        seen.insert(trimmed.to_lowercase());
    }
    seen.into_iter().collect()
}

pub fn new_local_id() -> String {
    Uuid::now_v7().to_string()
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

#[cfg(test)]
mod tests {
    use super::{content_hash, geo_cell, normalize_name, sanitize_keywords};

    #[test]
    fn normalization_lowercases_trims_and_collapses() {
        assert_eq!(normalize_name("  Dairy   Products "), "dairy products");
        assert_eq!(normalize_name("MILK"), "milk");
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["  Dairy   Products ", "MILK", "a\tb\nc", "déjà  Vu"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn geo_cells_collide_iff_rounding_matches() {
        assert_eq!(geo_cell(32.0851, 34.7818), geo_cell(32.08512, 34.78177));
        assert_ne!(geo_cell(32.0851, 34.7818), geo_cell(32.0861, 34.7818));
        assert_eq!(geo_cell(32.0851, 34.7818), "32.085,34.782");
    }

    #[test]
    fn content_hash_is_stable_and_input_sensitive() {
        let first = content_hash("milk");
        assert_eq!(first, content_hash("milk"));
        assert_eq!(first.len(), 64);
        assert_ne!(content_hash("milk"), content_hash("Milk"));
    }

    #[test]
    fn keyword_sanitation_filters_noise_and_sorts() {
        let cleaned = sanitize_keywords(["12", "A!", "milk", " Milk ", "Dairy"]);
        assert_eq!(cleaned, vec!["dairy".to_string(), "milk".to_string()]);
    }

    #[test]
    fn keyword_sanitation_counts_letters_not_length() {
        assert_eq!(sanitize_keywords(["a1b2c3"]), vec!["a1b2c3".to_string()]);
        assert!(sanitize_keywords(["ab12345"]).is_empty());
        assert!(sanitize_keywords(["  ", ""]).is_empty());
    }
}
