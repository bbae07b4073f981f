//! Grammar checker (spec §4.12, C12): embedded per-language word
//! dictionaries used by voting criterion D (spec §4.5).
//!
//! Grounded on the teacher's pattern of compiling static tables into the
//! binary (spec §9: "per-file init side effects... constant tables compiled
//! into the binary") rather than shipping loose data files.

use crate::asr::types::{detect_script_language, ScriptLanguage};
use std::collections::HashSet;
use std::sync::RwLock;

const EN_WORDLIST: &str = include_str!("wordlists/en.txt");
const RU_WORDLIST: &str = include_str!("wordlists/ru.txt");

const PUNCTUATION_TO_TRIM: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '-', '\u{2013}', '\u{2014}'];

fn normalize(word: &str) -> String {
    word.trim_matches(|c| PUNCTUATION_TO_TRIM.contains(&c))
        .to_lowercase()
}

fn is_numeric_or_empty(word: &str) -> bool {
    word.is_empty() || word.chars().all(|c| c.is_ascii_digit())
}

/// A mutable, process-local dictionary for one language (spec §4.12:
/// "dictionaries may be mutated at runtime ... mutations are process-local
/// and non-persistent").
struct Dictionary {
    words: RwLock<HashSet<String>>,
}

impl Dictionary {
    fn from_embedded(text: &str) -> Self {
        let words = text.lines().map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty()).collect();
        Self { words: RwLock::new(words) }
    }

    fn contains(&self, word: &str) -> bool {
        self.words.read().unwrap().contains(word)
    }

    fn add_word(&self, word: &str) {
        self.words.write().unwrap().insert(word.to_lowercase());
    }
}

/// Embedded dictionary checker for the two supported languages (spec §4.12).
pub struct GrammarChecker {
    en: Dictionary,
    ru: Dictionary,
}

impl Default for GrammarChecker {
    fn default() -> Self {
        Self {
            en: Dictionary::from_embedded(EN_WORDLIST),
            ru: Dictionary::from_embedded(RU_WORDLIST),
        }
    }
}

impl GrammarChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks validity of `word`. `language` wins if given; otherwise the
    /// language is inferred from the word's script (spec §4.12).
    pub fn is_valid(&self, word: &str, language: Option<ScriptLanguage>) -> bool {
        let normalized = normalize(word);
        if is_numeric_or_empty(&normalized) {
            return true;
        }
        let lang = language.unwrap_or_else(|| detect_script_language(&normalized));
        match lang {
            ScriptLanguage::En => self.en.contains(&normalized),
            ScriptLanguage::Ru => self.ru.contains(&normalized),
        }
    }

    pub fn add_word(&self, word: &str, language: ScriptLanguage) {
        let normalized = normalize(word);
        match language {
            ScriptLanguage::En => self.en.add_word(&normalized),
            ScriptLanguage::Ru => self.ru.add_word(&normalized),
        }
    }

    pub fn add_words(&self, words: &[&str], language: ScriptLanguage) {
        for word in words {
            self.add_word(word, language);
        }
    }
}
