//! Text and tag normalization shared by matching, resolution and dedup.

use std::collections::BTreeSet;

/// Normalize task text into a comparison key.
///
/// Lowercases, strips leading list/checkbox markup and collapses whitespace.
/// If stripping would leave nothing, the trimmed lowercased raw text is used
/// so distinct short strings never share a key.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped = strip_markup(&lowered);
    let collapsed = collapse_whitespace(stripped);
    if collapsed.is_empty() {
        collapse_whitespace(&lowered)
    } else {
        collapsed
    }
}

/// Normalize a tag: trim, drop a leading `#`, lowercase.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Normalized, de-duplicated tag set.
pub fn tag_set(tags: &[String]) -> BTreeSet<String> {
    tags.iter()
        .map(|tag| normalize_tag(tag))
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Similarity of two task texts in `[0, 1]`.
///
/// Equal normalized text scores 1.0 (this includes two empty strings and
/// identical bare URLs). Otherwise the Jaccard overlap of word tokens.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let left = normalize_text(a);
    let right = normalize_text(b);
    if left == right {
        return 1.0;
    }

    let left_tokens = tokens(&left);
    let right_tokens = tokens(&right);
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0.0;
    }

    let shared = left_tokens.intersection(&right_tokens).count();
    let union = left_tokens.union(&right_tokens).count();
    shared as f64 / union as f64
}

fn strip_markup(text: &str) -> &str {
    let mut rest = text.trim_start();
    loop {
        let before = rest;
        for bullet in ["- ", "* ", "+ "] {
            if let Some(stripped) = rest.strip_prefix(bullet) {
                rest = stripped.trim_start();
            }
        }
        for checkbox in ["[ ]", "[x]", "[-]", "[/]"] {
            if let Some(stripped) = rest.strip_prefix(checkbox) {
                rest = stripped.trim_start();
            }
        }
        rest = strip_ordinal(rest);
        if rest == before {
            return rest;
        }
    }
}

fn strip_ordinal(text: &str) -> &str {
    let digits = text.chars().take_while(|ch| ch.is_ascii_digit()).count();
    if digits == 0 {
        return text;
    }
    match text[digits..].strip_prefix(". ") {
        Some(rest) => rest.trim_start(),
        None => text,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokens(text: &str) -> BTreeSet<&str> {
    text.split_whitespace()
        .map(|token| {
            let trimmed = token.trim_matches(|ch: char| ch.is_ascii_punctuation());
            if trimmed.is_empty() {
                token
            } else {
                trimmed
            }
        })
        .collect()
}
