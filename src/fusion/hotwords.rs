//! Hotword matching (spec §4.5 criterion C) and the hotword surface fix
//! applied to merged transcripts (spec §4.6).

use crate::fusion::levenshtein::levenshtein;

const PUNCTUATION_TO_TRIM: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '-', '\u{2013}', '\u{2014}'];

fn normalize(word: &str) -> String {
    word.trim_matches(|c| PUNCTUATION_TO_TRIM.contains(&c)).to_lowercase()
}

/// Maximum edit distance tolerated for a criterion-C hotword match (spec
/// §4.5): `max(1, floor(|hotword| / 5))`.
fn criterion_c_max_distance(hotword_len: usize) -> usize {
    (hotword_len / 5).max(1)
}

/// True if `word` matches any `hotwords` entry after normalisation, either
/// exactly or within the criterion-C distance bound (spec §4.5, §8 scenario
/// 6: `matchesHotword`).
pub fn matches_hotword(word: &str, hotwords: &[String]) -> bool {
    let normalized_word = normalize(word);
    hotwords.iter().any(|h| {
        let normalized_hotword = normalize(h);
        if normalized_word == normalized_hotword {
            return true;
        }
        levenshtein(&normalized_word, &normalized_hotword) <= criterion_c_max_distance(normalized_hotword.len())
    })
}

/// Surface-fix distance bound (spec §4.6): `|h| ≤ 4 ⇒ 1; 5–8 ⇒ ⌊|h|·0.20⌋;
/// > 8 ⇒ ⌊|h|·0.25⌋`.
fn surface_fix_max_distance(hotword_len: usize) -> usize {
    match hotword_len {
        0..=4 => 1,
        5..=8 => ((hotword_len as f32) * 0.20) as usize,
        _ => ((hotword_len as f32) * 0.25) as usize,
    }
}

/// Replaces `word` with the best-matching hotword's canonical spelling if it
/// is within the length-banded distance threshold, and (for short hotwords)
/// shares the first character (spec §4.6).
pub fn surface_fix(word: &str, hotwords: &[String]) -> Option<String> {
    let normalized_word = normalize(word);
    if normalized_word.is_empty() {
        return None;
    }

    hotwords
        .iter()
        .filter_map(|h| {
            let normalized_hotword = normalize(h);
            let max_dist = surface_fix_max_distance(normalized_hotword.len());
            let dist = levenshtein(&normalized_word, &normalized_hotword);
            if dist == 0 {
                return None; // already correct, nothing to fix
            }
            if dist > max_dist {
                return None;
            }
            if normalized_hotword.len() <= 5 {
                let same_first_char = normalized_word.chars().next() == normalized_hotword.chars().next();
                if !same_first_char {
                    return None;
                }
            }
            Some((dist, h.clone()))
        })
        .min_by_key(|(dist, _)| *dist)
        .map(|(_, h)| h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotwords(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn spec_scenario_6_matches() {
        assert!(!matches_hotword("Gen", &hotwords(&["Genesis"])));
        assert!(matches_hotword("Genisis", &hotwords(&["Genesis"])));
    }

    #[test]
    fn exact_match_after_normalisation() {
        assert!(matches_hotword("Genesis,", &hotwords(&["genesis"])));
    }

    #[test]
    fn surface_fix_replaces_close_misspelling() {
        let fixed = surface_fix("Genisis", &hotwords(&["Genesis"]));
        assert_eq!(fixed, Some("Genesis".to_string()));
    }

    #[test]
    fn surface_fix_declines_when_first_char_differs_for_short_hotword() {
        // "Iris" has length 4 (<= 5), so the first-character guard applies.
        let fixed = surface_fix("xris", &hotwords(&["Iris"]));
        assert_eq!(fixed, None);
    }

    #[test]
    fn surface_fix_is_noop_for_exact_match() {
        assert_eq!(surface_fix("Genesis", &hotwords(&["Genesis"])), None);
    }
}
