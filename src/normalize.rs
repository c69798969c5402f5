use anyhow::{Context, Result};
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// English function words dropped during normalization.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "aren", "as", "at", "be", "became", "because", "been", "before", "being", "below",
    "between", "both", "but", "by", "came", "can", "cannot", "could", "couldn", "did", "didn",
    "do", "does", "doesn", "doing", "don", "done", "down", "during", "each", "either", "else",
    "ever", "every", "few", "for", "from", "further", "get", "got", "had", "hadn", "has", "hasn",
    "have", "haven", "having", "he", "hence", "her", "here", "hers", "herself", "him", "himself",
    "his", "how", "however", "i", "if", "in", "into", "is", "isn", "it", "its", "itself", "just",
    "let", "may", "me", "might", "more", "most", "much", "must", "mustn", "my", "myself",
    "neither", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "onto", "or",
    "other", "otherwise", "ought", "our", "ours", "ourselves", "out", "over", "own", "per",
    "same", "shall", "shan", "she", "should", "shouldn", "since", "so", "some", "such", "than",
    "that", "the", "their", "theirs", "them", "themselves", "then", "there", "therefore",
    "these", "they", "this", "those", "though", "through", "thus", "till", "to", "too", "under",
    "until", "unto", "up", "upon", "us", "very", "was", "wasn", "we", "were", "weren", "what",
    "when", "whenever", "where", "wherever", "whether", "which", "while", "who", "whoever",
    "whom", "whose", "why", "will", "with", "within", "without", "won", "would", "wouldn",
    "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Irregular forms resolved before the suffix rules.
const IRREGULAR_LEMMAS: &[(&str, &str)] = &[
    ("bought", "buy"),
    ("broken", "break"),
    ("brought", "bring"),
    ("built", "build"),
    ("burnt", "burn"),
    ("caught", "catch"),
    ("children", "child"),
    ("dug", "dig"),
    ("fallen", "fall"),
    ("feet", "foot"),
    ("fell", "fall"),
    ("found", "find"),
    ("given", "give"),
    ("gone", "go"),
    ("kept", "keep"),
    ("left", "leave"),
    ("lost", "lose"),
    ("made", "make"),
    ("men", "man"),
    ("paid", "pay"),
    ("said", "say"),
    ("seen", "see"),
    ("sent", "send"),
    ("spoken", "speak"),
    ("stolen", "steal"),
    ("taken", "take"),
    ("told", "tell"),
    ("torn", "tear"),
    ("went", "go"),
    ("women", "woman"),
    ("written", "write"),
];

/// Ordered suffix rules: (suffix, replacement, minimum token length).
/// The first matching rule fires; at most one per token.
const SUFFIX_RULES: &[(&str, &str, usize)] = &[
    ("ications", "icate", 10),
    ("ization", "ize", 9),
    ("ational", "ate", 9),
    ("fulness", "ful", 9),
    ("iveness", "ive", 9),
    ("ousness", "ous", 9),
    ("tional", "tion", 8),
    ("iness", "y", 7),
    ("ation", "ate", 7),
    ("ities", "ity", 7),
    ("ings", "", 7),
    ("ness", "", 6),
    ("ing", "", 6),
    ("ied", "y", 5),
    ("ies", "y", 5),
    ("ed", "", 5),
    ("s", "", 4),
];

/// Fixed normalization pipeline: unicode fold, case fold, URL/email/phone
/// sweep, punctuation fold, stop-word removal, rule-based lemmatization.
/// Deterministic and idempotent; no I/O.
#[derive(Debug)]
pub struct TextNormalizer {
    url: Regex,
    email: Regex,
    phone: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            url: Regex::new(r"(?:https?://|www\.)\S+").context("failed to compile url regex")?,
            email: Regex::new(r"[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}")
                .context("failed to compile email regex")?,
            phone: Regex::new(r"\+?\d[\d\-\s]{8,}\d").context("failed to compile phone regex")?,
        })
    }

    pub fn normalize(&self, input: &str) -> String {
        let folded: String = input.nfd().filter(|ch| !is_combining_mark(*ch)).collect();
        let lowered = folded.to_lowercase();

        let swept = self.url.replace_all(&lowered, " ");
        let swept = self.email.replace_all(&swept, " ");
        let swept = self.phone.replace_all(&swept, " ");

        let cleaned: String = swept
            .chars()
            .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
            .collect();

        let mut tokens = Vec::new();
        for token in cleaned.split_whitespace() {
            if token.chars().count() <= 1 || is_stop_word(token) {
                continue;
            }
            let lemma = lemmatize(token);
            if lemma.chars().count() <= 1 || is_stop_word(&lemma) {
                continue;
            }
            tokens.push(lemma);
        }

        tokens.join(" ")
    }
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Irregular map first, then the first matching suffix rule. A candidate
/// that would itself lemmatize further is discarded so that repeated
/// normalization cannot drift.
pub fn lemmatize(token: &str) -> String {
    if let Some(mapped) = irregular_lemma(token) {
        return mapped.to_string();
    }

    if let Some(candidate) = apply_first_suffix_rule(token) {
        if irregular_lemma(&candidate).is_none() && apply_first_suffix_rule(&candidate).is_none() {
            return candidate;
        }
    }

    token.to_string()
}

fn irregular_lemma(token: &str) -> Option<&'static str> {
    IRREGULAR_LEMMAS
        .binary_search_by_key(&token, |(form, _)| form)
        .ok()
        .map(|index| IRREGULAR_LEMMAS[index].1)
}

fn apply_first_suffix_rule(token: &str) -> Option<String> {
    if !token.is_ascii() {
        return None;
    }

    for (suffix, replacement, min_len) in SUFFIX_RULES {
        if token.len() < *min_len || !token.ends_with(suffix) {
            continue;
        }
        if *suffix == "s" && (token.ends_with("ss") || token.ends_with("us") || token.ends_with("is"))
        {
            return None;
        }
        let stem = &token[..token.len() - suffix.len()];
        return Some(format!("{stem}{replacement}"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::new().expect("normalizer regexes compile")
    }

    #[test]
    fn stop_word_table_is_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);

        let mut lemmas = IRREGULAR_LEMMAS.to_vec();
        lemmas.sort_unstable_by_key(|(form, _)| *form);
        assert_eq!(lemmas, IRREGULAR_LEMMAS);
    }

    #[test]
    fn strips_urls_emails_and_phone_numbers() {
        let n = normalizer();
        let out = n.normalize(
            "Complaint sent to helpdesk@city.gov.in via https://portal.city.gov \
             call 98765 43210 about the broken streetlight",
        );
        assert!(!out.contains('@'));
        assert!(!out.contains("portal"));
        assert!(!out.contains("98765"));
        assert!(out.contains("streetlight"));
        assert!(out.contains("break"));
    }

    #[test]
    fn folds_unicode_and_case() {
        let n = normalizer();
        assert_eq!(n.normalize("Pothole at Colonía"), "pothole colonia");
    }

    #[test]
    fn drops_stop_words_and_single_characters() {
        let n = normalizer();
        let out = n.normalize("The water supply in our area is not working at all");
        assert_eq!(out, "water supply area work");
    }

    #[test]
    fn lemmatizer_applies_irregulars_and_suffix_rules() {
        assert_eq!(lemmatize("broken"), "break");
        assert_eq!(lemmatize("children"), "child");
        assert_eq!(lemmatize("leaking"), "leak");
        assert_eq!(lemmatize("damaged"), "damag");
        assert_eq!(lemmatize("supplied"), "supply");
        assert_eq!(lemmatize("bodies"), "body");
        assert_eq!(lemmatize("facilities"), "facility");
        assert_eq!(lemmatize("roads"), "road");
        assert_eq!(lemmatize("operational"), "operate");
        assert_eq!(lemmatize("buildings"), "build");
        // guards: too short, or protected endings
        assert_eq!(lemmatize("gas"), "gas");
        assert_eq!(lemmatize("address"), "address");
        assert_eq!(lemmatize("status"), "status");
    }

    #[test]
    fn lemmatizer_rejects_unstable_candidates() {
        // "hundreds" -> "hundred" would strip again on a later pass
        assert_eq!(lemmatize("hundreds"), "hundreds");
        assert_eq!(lemmatize(&lemmatize("hundreds")), "hundreds");
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = normalizer();
        let inputs = [
            "Water supply has been disrupted in Sector 15 for the last ten days.",
            "GRIEVANCE 2: Streetlights broken, wires hanging; contact 98765 43210!",
            "The closing of the drain near the buildings caused flooding again.",
            "Garbage collection wills and supplies — utterly failed in Ward 12.",
        ];
        for input in inputs {
            let once = n.normalize(input);
            let twice = n.normalize(&once);
            assert_eq!(once, twice, "normalize must be idempotent for {input:?}");
        }
    }
}
