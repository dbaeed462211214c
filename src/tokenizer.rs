//! Code-aware tokenization.
//!
//! Source code is not prose: the interesting "words" are identifiers, and an
//! identifier like `getUserAuth` should match queries for `user` or `auth`.
//! The tokenizer therefore splits text on non-identifier characters, then
//! splits identifiers on camelCase, snake_case, and letter/digit boundaries,
//! emitting both the compound form and its parts.
//!
//! Compound forms are lowercased with underscores removed, so `get_user` and
//! `getUser` normalize to the same term.
//!
//! Tokenization is deterministic: the same input always yields the same
//! sequence of terms.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Minimum length of an emitted term.
const MIN_TERM_LEN: usize = 2;

/// Words too common to be worth indexing, regardless of language.
static COMMON_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "of", "to", "in", "is", "for", "on", "with", "as", "at",
        "by", "it", "be", "this", "that", "not",
    ]
    .into_iter()
    .collect()
});

/// Per-language keyword stopwords. Intentionally small: keywords carry no
/// ranking signal but dominate term frequencies if kept.
static LANGUAGE_STOPWORDS: Lazy<HashMap<&'static str, HashSet<&'static str>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
    map.insert(
        "rust",
        ["fn", "let", "mut", "pub", "use", "impl", "mod", "self"]
            .into_iter()
            .collect(),
    );
    let js: HashSet<&'static str> = [
        "const", "var", "let", "function", "return", "import", "export", "new",
    ]
    .into_iter()
    .collect();
    map.insert("javascript", js.clone());
    map.insert("typescript", js);
    map.insert(
        "python",
        ["def", "self", "import", "from", "return", "pass", "none"]
            .into_iter()
            .collect(),
    );
    map.insert(
        "go",
        ["func", "var", "package", "import", "return", "nil"]
            .into_iter()
            .collect(),
    );
    map
});

/// Tokenizer configuration. The defaults use the built-in stopword tables;
/// callers with unusual corpora can supply their own.
#[derive(Debug, Clone, Default)]
pub struct TokenizerConfig {
    /// Extra stopwords applied to every language.
    pub extra_stopwords: Vec<String>,
}

/// Code-aware tokenizer. Cheap to construct and `Sync`, so one instance is
/// shared across tokenization workers.
#[derive(Debug, Default)]
pub struct Tokenizer {
    extra_stopwords: HashSet<String>,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self {
            extra_stopwords: config.extra_stopwords.into_iter().collect(),
        }
    }

    fn is_stopword(&self, term: &str, language: Option<&str>) -> bool {
        if COMMON_STOPWORDS.contains(term) || self.extra_stopwords.contains(term) {
            return true;
        }
        language
            .and_then(|lang| LANGUAGE_STOPWORDS.get(lang))
            .is_some_and(|set| set.contains(term))
    }

    /// Lazily yields lowercased terms from `text`.
    ///
    /// Each identifier produces its compound form plus its camelCase /
    /// snake_case / digit-boundary parts (when it has more than one). Terms
    /// shorter than two characters and stopwords are dropped.
    pub fn tokenize<'a>(
        &'a self,
        text: &'a str,
        language: Option<&'a str>,
    ) -> impl Iterator<Item = String> + 'a {
        text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|word| !word.is_empty())
            .flat_map(move |word| {
                let parts = split_identifier(word);
                let compound: String = word
                    .chars()
                    .filter(|&c| c != '_')
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                let mut terms = Vec::with_capacity(parts.len() + 1);
                if parts.len() > 1 {
                    terms.push(compound);
                    terms.extend(parts);
                } else {
                    // Single-part identifiers: compound and part coincide.
                    terms.push(compound);
                }
                terms.into_iter()
            })
            .filter(move |term| term.len() >= MIN_TERM_LEN && !self.is_stopword(term, language))
    }

    /// Term-frequency map and document length (total term count) for `text`.
    pub fn term_frequencies(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> (HashMap<String, u32>, u64) {
        let mut tf: HashMap<String, u32> = HashMap::new();
        let mut length: u64 = 0;
        for term in self.tokenize(text, language) {
            *tf.entry(term).or_insert(0) += 1;
            length += 1;
        }
        (tf, length)
    }
}

/// Splits an identifier into lowercased parts at underscore, camelCase, and
/// letter/digit boundaries. `HTTPServer` splits as `http`, `server`.
fn split_identifier(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for i in 0..chars.len() {
        let c = chars[i];
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            let prev = chars[i - 1];
            let lower_to_upper = c.is_ascii_uppercase() && prev.is_ascii_lowercase();
            // End of an acronym run: "HTTPServer" breaks before the 'S'.
            let acronym_end = c.is_ascii_uppercase()
                && prev.is_ascii_uppercase()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let digit_boundary = prev != '_' && (c.is_ascii_digit() != prev.is_ascii_digit());
            if lower_to_upper || acronym_end || digit_boundary {
                parts.push(std::mem::take(&mut current));
            }
        }
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(text: &str, language: Option<&str>) -> Vec<String> {
        Tokenizer::default().tokenize(text, language).collect()
    }

    #[test]
    fn test_camel_case_emits_compound_and_parts() {
        let t = terms("getUserAuth", None);
        assert_eq!(t, vec!["getuserauth", "get", "user", "auth"]);
    }

    #[test]
    fn test_snake_case_normalizes_like_camel() {
        let t = terms("get_user_auth", None);
        assert_eq!(t, vec!["getuserauth", "get", "user", "auth"]);
    }

    #[test]
    fn test_acronym_boundary() {
        let t = terms("HTTPServer", None);
        assert_eq!(t, vec!["httpserver", "http", "server"]);
    }

    #[test]
    fn test_digit_boundary() {
        let t = terms("sha256sum", None);
        assert_eq!(t, vec!["sha256sum", "sha", "256", "sum"]);
    }

    #[test]
    fn test_short_terms_dropped() {
        // "u" is below the length floor; the compound survives.
        let t = terms("u8Value", None);
        assert!(!t.contains(&"u".to_string()));
        assert!(t.contains(&"value".to_string()));
    }

    #[test]
    fn test_single_part_not_duplicated() {
        let t = terms("user", None);
        assert_eq!(t, vec!["user"]);
    }

    #[test]
    fn test_language_stopwords() {
        let rust = terms("pub fn connect", Some("rust"));
        assert_eq!(rust, vec!["connect"]);
        // Without the language tag the keywords are ordinary terms.
        let plain = terms("pub fn connect", None);
        assert!(plain.contains(&"pub".to_string()));
    }

    #[test]
    fn test_common_stopwords_filtered() {
        let t = terms("the quick and the dead", None);
        assert_eq!(t, vec!["quick", "dead"]);
    }

    #[test]
    fn test_punctuation_splits() {
        let t = terms("login(user.credentials);", None);
        assert_eq!(t, vec!["login", "user", "credentials"]);
    }

    #[test]
    fn test_deterministic() {
        let a = terms("fooBar baz_qux XMLHttpRequest", None);
        let b = terms("fooBar baz_qux XMLHttpRequest", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_term_frequencies_counts_and_length() {
        let tokenizer = Tokenizer::default();
        let (tf, len) = tokenizer.term_frequencies("user user login", None);
        assert_eq!(tf.get("user"), Some(&2));
        assert_eq!(tf.get("login"), Some(&1));
        assert_eq!(len, 3);
    }

    #[test]
    fn test_empty_input() {
        let tokenizer = Tokenizer::default();
        let (tf, len) = tokenizer.term_frequencies("", None);
        assert!(tf.is_empty());
        assert_eq!(len, 0);
    }

    #[test]
    fn test_extra_stopwords() {
        let tokenizer = Tokenizer::new(TokenizerConfig {
            extra_stopwords: vec!["widget".into()],
        });
        let t: Vec<String> = tokenizer.tokenize("widget gadget", None).collect();
        assert_eq!(t, vec!["gadget"]);
    }
}
