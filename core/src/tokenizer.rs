use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{AnalysisConfig, StopWords};

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref URL_RE: Regex = Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("valid regex");
    static ref EMAIL_RE: Regex = Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
    static ref DEFAULT_TOKENIZER: Tokenizer = Tokenizer::new(&AnalysisConfig::default());
}

/// Text → (term, position) pipeline: NFKC, lowercase, URL/e-mail stripping,
/// word extraction, length and stop-word filtering, English stemming.
///
/// Positions count every extracted word, including the ones that are
/// dropped, so "hello the world" puts "hello" and "world" two apart.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: Arc<HashSet<String>>,
    stemming: bool,
    min_len: usize,
    max_len: usize,
    strip_urls_and_emails: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        DEFAULT_TOKENIZER.clone()
    }
}

impl Tokenizer {
    pub fn new(config: &AnalysisConfig) -> Self {
        let mut stop_words: HashSet<String> = match &config.stop_words {
            StopWords::Default => STOPWORDS.iter().map(|w| w.to_string()).collect(),
            StopWords::None => HashSet::new(),
            StopWords::Custom(words) => words.iter().map(|w| w.to_lowercase()).collect(),
        };
        stop_words.extend(config.extra_stop_words.iter().map(|w| w.to_lowercase()));
        Self {
            stop_words: Arc::new(stop_words),
            stemming: config.stemming,
            min_len: config.min_term_len,
            max_len: config.max_term_len,
            strip_urls_and_emails: config.strip_urls_and_emails,
        }
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    /// Lazy token stream over `text`. Identical input always yields the same
    /// stream; clone it before consuming to replay, or call `tokens` again.
    pub fn tokens(&self, text: &str) -> Tokens<'_> {
        Tokens { tokenizer: self, text: self.normalize(text), cursor: 0, position: 0 }
    }

    /// Same as [`tokens`](Self::tokens) for raw bytes; invalid UTF-8 is
    /// replaced with U+FFFD rather than rejected.
    pub fn tokens_from_bytes(&self, bytes: &[u8]) -> Tokens<'_> {
        self.tokens(&String::from_utf8_lossy(bytes))
    }

    pub fn tokenize(&self, text: &str) -> Vec<(String, u32)> {
        self.tokens(text).collect()
    }

    fn normalize(&self, text: &str) -> String {
        let mut normalized = text
            .nfkc()
            .map(|c| if c == '\u{2019}' { '\'' } else { c })
            .collect::<String>()
            .to_lowercase();
        if self.strip_urls_and_emails {
            normalized = URL_RE.replace_all(&normalized, " ").into_owned();
            normalized = EMAIL_RE.replace_all(&normalized, " ").into_owned();
        }
        normalized
    }

    fn analyze(&self, token: &str) -> Option<String> {
        let token = token.trim_end_matches('\'');
        let len = token.chars().count();
        if len < self.min_len || len > self.max_len {
            return None;
        }
        if self.is_stopword(token) {
            return None;
        }
        if self.stemming {
            Some(STEMMER.stem(token).into_owned())
        } else {
            Some(token.to_string())
        }
    }
}

/// Iterator returned by [`Tokenizer::tokens`].
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    tokenizer: &'a Tokenizer,
    text: String,
    cursor: usize,
    position: u32,
}

impl Iterator for Tokens<'_> {
    type Item = (String, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(mat) = RE.find_at(&self.text, self.cursor) {
            self.cursor = mat.end();
            let pos = self.position;
            self.position += 1;
            if let Some(term) = self.tokenizer.analyze(mat.as_str()) {
                return Some((term, pos));
            }
        }
        self.cursor = self.text.len();
        None
    }
}

/// Tokenize text into (term, position) with the default analysis settings.
pub fn tokenize(text: &str) -> Vec<(String, u32)> {
    DEFAULT_TOKENIZER.tokenize(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Running, runner's run!");
        assert!(t.iter().any(|(w, _)| w == "run"));
    }

    #[test]
    fn positions_skip_dropped_words() {
        let t = tokenize("hello the world");
        assert_eq!(t, vec![("hello".to_string(), 0), ("world".to_string(), 2)]);
    }

    #[test]
    fn short_tokens_are_dropped() {
        let t = tokenize("x marks spot");
        assert!(t.iter().all(|(w, _)| w != "x"));
        assert_eq!(t[0].1, 1);
    }

    #[test]
    fn urls_and_emails_are_stripped() {
        let t = tokenize("see https://example.com/page or mail bob@example.org today");
        let words: Vec<&str> = t.iter().map(|(w, _)| w.as_str()).collect();
        assert!(!words.contains(&"exampl"));
        assert!(!words.contains(&"bob"));
        assert!(words.contains(&"today"));
    }

    #[test]
    fn stream_is_lazy_and_replayable() {
        let tok = Tokenizer::default();
        let stream = tok.tokens("graphs rank pages");
        let replay = stream.clone();
        assert_eq!(stream.collect::<Vec<_>>(), replay.collect::<Vec<_>>());
    }

    #[test]
    fn invalid_utf8_is_repaired() {
        let tok = Tokenizer::default();
        let terms: Vec<String> = tok.tokens_from_bytes(b"cats \xff\xfe dogs").map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn custom_config_disables_stemming_and_stopwords() {
        let cfg = AnalysisConfig {
            stemming: false,
            stop_words: StopWords::None,
            extra_stop_words: vec![],
            ..AnalysisConfig::default()
        };
        let tok = Tokenizer::new(&cfg);
        let terms: Vec<String> = tok.tokens("The runners").map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["the".to_string(), "runners".to_string()]);
    }
}
