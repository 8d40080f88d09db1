use linkdex_core::config::{AnalysisConfig, StopWords};
use linkdex_core::tokenizer::{tokenize, Tokenizer};

fn words(toks: Vec<(String, u32)>) -> Vec<String> {
    toks.into_iter().map(|(w, _)| w).collect()
}

#[test]
fn it_normalizes_and_stems() {
    let words = words(tokenize("Running Runners RUN! The café's menu."));
    assert!(words.contains(&"run".to_string()));
    assert!(words.contains(&"menu".to_string()));
    assert!(!words.iter().any(|w| w.ends_with("'s")));
}

#[test]
fn composed_and_decomposed_forms_agree() {
    assert_eq!(tokenize("caf\u{e9} cr\u{e8}me"), tokenize("cafe\u{301} cre\u{300}me"));
}

#[test]
fn it_filters_stopwords() {
    let words = words(tokenize("The quick brown fox and the lazy dog"));
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert!(words.contains(&"fox".to_string()));
}

#[test]
fn positions_survive_dropped_words() {
    let toks = tokenize("state of the art");
    assert_eq!(toks, vec![("state".to_string(), 0), ("art".to_string(), 3)]);
}

#[test]
fn urls_and_emails_are_stripped() {
    let words = words(tokenize("see https://example.com/page or mail admin@example.org today"));
    assert_eq!(words, vec!["see".to_string(), "mail".to_string(), "today".to_string()]);
}

#[test]
fn custom_analysis_settings() {
    let config = AnalysisConfig {
        stemming: false,
        stop_words: StopWords::Custom(vec!["Fox".into()]),
        extra_stop_words: Vec::new(),
        min_term_len: 1,
        ..AnalysisConfig::default()
    };
    let tokenizer = Tokenizer::new(&config);
    let words = words(tokenizer.tokenize("The running fox a"));
    assert_eq!(words, vec!["the".to_string(), "running".to_string(), "a".to_string()]);
}

#[test]
fn stream_is_restartable_and_deterministic() {
    let tokenizer = Tokenizer::default();
    let stream = tokenizer.tokens("alpha beta gamma");
    let first: Vec<_> = stream.clone().collect();
    let second: Vec<_> = stream.collect();
    assert_eq!(first, second);
    assert_eq!(first, tokenizer.tokenize("alpha beta gamma"));
}

#[test]
fn malformed_bytes_are_repaired() {
    let tokenizer = Tokenizer::default();
    let toks: Vec<_> = tokenizer.tokens_from_bytes(b"alpha \xc3\x28 beta").collect();
    assert_eq!(words(toks), vec!["alpha".to_string(), "beta".to_string()]);
}
