//! Term generation and query matching.

use std::collections::BTreeSet;

use super::types::SearchIndexEntry;

/// Shortest term that is indexed or queried.
pub const MIN_TERM_LEN: usize = 2;

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Words of a normalized query that take part in matching.
pub fn query_words(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .filter(|word| word.chars().count() >= MIN_TERM_LEN)
        .collect()
}

/// Every term that should resolve to `entry`.
///
/// Covers the model name, the brand name and both together: each full
/// string, each of its words and every prefix of at least two characters
/// of each word.
pub fn terms_for(entry: &SearchIndexEntry) -> BTreeSet<String> {
    let combined = format!("{} {}", entry.brand_name, entry.name);
    let mut terms = BTreeSet::new();

    for source in [entry.name.as_str(), entry.brand_name.as_str(), combined.as_str()] {
        let normalized = normalize(source);
        if normalized.chars().count() >= MIN_TERM_LEN {
            terms.insert(normalized.clone());
        }
        for word in normalized.split(' ') {
            for (end, _) in word.char_indices().skip(MIN_TERM_LEN - 1) {
                let prefix_end = end + word[end..].chars().next().map_or(0, char::len_utf8);
                terms.insert(word[..prefix_end].to_string());
            }
        }
    }

    terms
}

fn haystack(entry: &SearchIndexEntry) -> String {
    normalize(&format!("{} {}", entry.brand_name, entry.name))
}

/// Filter `entries` to those containing every query word and rank them.
///
/// Entries whose name or brand starts with the query come first; ties are
/// ordered by name.
pub fn match_entries<'a>(
    entries: impl IntoIterator<Item = &'a SearchIndexEntry>,
    normalized: &str,
    limit: usize,
) -> Vec<SearchIndexEntry> {
    let words = query_words(normalized);
    if words.is_empty() {
        return Vec::new();
    }

    let mut matched: Vec<(bool, &SearchIndexEntry)> = entries
        .into_iter()
        .filter(|entry| {
            let haystack = haystack(entry);
            words.iter().all(|word| haystack.contains(word))
        })
        .map(|entry| {
            let leading = entry.name.to_lowercase().starts_with(normalized)
                || entry.brand_name.to_lowercase().starts_with(normalized);
            (leading, entry)
        })
        .collect();

    matched.sort_by(|(a_leading, a), (b_leading, b)| {
        b_leading
            .cmp(a_leading)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    matched
        .into_iter()
        .take(limit)
        .map(|(_, entry)| entry.clone())
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(id: &str, brand: &str, name: &str) -> SearchIndexEntry {
        let brand_slug = slug::slugify(brand);
        let model_slug = slug::slugify(name);
        SearchIndexEntry {
            id: id.to_string(),
            name: name.to_string(),
            brand_name: brand.to_string(),
            slug: format!("{brand_slug}-{model_slug}"),
            brand_slug,
            model_slug,
            hero_image: None,
        }
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Hyundai   CRETA "), "hyundai creta");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn terms_cover_words_prefixes_and_full_strings() {
        let terms = terms_for(&entry("m-1", "Hyundai", "Creta"));
        for expected in ["cr", "cre", "cret", "creta", "hy", "hyundai", "hyundai creta"] {
            assert!(terms.contains(expected), "missing term {expected}");
        }
        assert!(terms.iter().all(|term| term.chars().count() >= 2));
        assert!(!terms.contains("c"));
    }

    #[test]
    fn multibyte_prefixes_stay_on_char_boundaries() {
        let terms = terms_for(&entry("m-1", "Škoda", "Kušaq"));
        assert!(terms.contains("šk"));
        assert!(terms.contains("kuš"));
    }

    #[test]
    fn single_char_words_are_not_terms() {
        let terms = terms_for(&entry("m-1", "BMW", "X 1"));
        assert!(!terms.contains("x"));
        assert!(!terms.contains("1"));
        assert!(terms.contains("x 1"));
    }

    #[test]
    fn matching_requires_every_word() {
        let entries = [
            entry("m-1", "Hyundai", "Creta"),
            entry("m-2", "Hyundai", "Venue"),
            entry("m-3", "Kia", "Seltos"),
        ];
        let names = |query: &str| {
            match_entries(&entries, query, 10)
                .into_iter()
                .map(|e| e.name)
                .collect::<Vec<_>>()
        };

        assert_eq!(names("hyundai"), vec!["Creta", "Venue"]);
        assert_eq!(names("hyundai creta"), vec!["Creta"]);
        assert_eq!(names("cr"), vec!["Creta"]);
        assert_eq!(names("hy cr"), vec!["Creta"]);
        assert!(names("x").is_empty());
    }

    #[test]
    fn leading_matches_rank_first() {
        let entries = [
            entry("m-1", "Tata", "Nexon"),
            entry("m-2", "Nissan", "Magnite"),
            entry("m-3", "Honda", "Amaze"),
        ];
        let ranked: Vec<_> = match_entries(&entries, "ma", 10)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(ranked, vec!["Magnite", "Amaze"]);
    }

    #[test]
    fn results_are_truncated() {
        let entries: Vec<_> = (0..5)
            .map(|i| entry(&format!("m-{i}"), "Kia", &format!("Model {i}")))
            .collect();
        assert_eq!(match_entries(&entries, "kia", 2).len(), 2);
    }
}
