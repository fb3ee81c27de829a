//! TF-IDF topic extraction.
//!
//! [`TopicCorpus`] is an explicit, resettable term-frequency accumulator.
//! Documents are keyed (the indexer uses the relative path), so scoring the
//! same file twice replaces its previous counts instead of inflating document
//! frequencies. How long the corpus lives is decided by [`CorpusScope`].
//!
//! Scoring follows the classic formulation:
//!
//! ```text
//! tf(t, d)  = raw count of t in d
//! idf(t)    = 1 + ln(N / (1 + df(t)))
//! tfidf     = tf * idf
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::{CorpusScope, TopicsConfig};

/// Tokens are ASCII alphanumeric runs of the lowercased text.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").unwrap());

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "because", "been", "before", "being",
    "below", "between", "both", "cannot", "could", "does", "doing", "down", "during", "each",
    "from", "further", "have", "having", "here", "into", "itself", "just", "more", "most",
    "myself", "once", "only", "other", "ought", "ours", "ourselves", "over", "same", "should",
    "some", "such", "than", "that", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "under", "until", "very", "were", "what",
    "when", "where", "which", "while", "whom", "will", "with", "would", "your", "yours",
    "yourself", "yourselves", "a", "an", "and", "are", "as", "at", "be", "but", "by", "for",
    "he", "her", "him", "his", "how", "i", "if", "in", "is", "it", "its", "me", "my", "no",
    "nor", "not", "of", "off", "on", "or", "our", "out", "own", "she", "so", "the", "to", "too",
    "up", "was", "we", "who", "why", "you",
];

static STOP_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| STOP_WORDS.iter().copied().collect());

/// Keyword label and the pattern that detects it in lowercased text.
static TECH_KEYWORDS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("angular", r"\bangular\b"),
        ("react", r"\breact\b"),
        ("vue", r"\bvue\b"),
        ("node", r"\bnode\b"),
        ("typescript", r"\btypescript\b"),
        ("javascript", r"\bjavascript\b"),
        ("python", r"\bpython\b"),
        ("database", r"\bdatabase\b"),
        ("api", r"\bapi\b"),
        ("docker", r"\bdocker\b"),
        ("git", r"\bgit\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

type TermCounts = HashMap<String, usize>;

/// Sliding-window TF-IDF corpus.
#[derive(Debug, Clone)]
pub struct TopicCorpus {
    documents: VecDeque<(String, TermCounts)>,
    doc_freq: HashMap<String, usize>,
    max_documents: usize,
}

impl TopicCorpus {
    pub fn new(max_documents: usize) -> Self {
        Self {
            documents: VecDeque::new(),
            doc_freq: HashMap::new(),
            max_documents: max_documents.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.doc_freq.clear();
    }

    /// Adds `text` under `key` (replacing any earlier document with that key)
    /// and returns its terms scored against the corpus, highest first with
    /// ties broken alphabetically.
    pub fn add_document(&mut self, key: &str, text: &str) -> Vec<(String, f64)> {
        if let Some(pos) = self.documents.iter().position(|(k, _)| k == key) {
            if let Some((_, previous)) = self.documents.remove(pos) {
                self.forget(&previous);
            }
        }

        let counts = tokenize(text);
        for term in counts.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.documents.push_back((key.to_string(), counts));

        while self.documents.len() > self.max_documents {
            if let Some((_, evicted)) = self.documents.pop_front() {
                self.forget(&evicted);
            }
        }

        let Some((_, latest)) = self.documents.back() else {
            return Vec::new();
        };

        let mut scored: Vec<(String, f64)> = latest
            .iter()
            .map(|(term, tf)| (term.clone(), *tf as f64 * self.idf(term)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.documents.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        1.0 + (n / (1.0 + df)).ln()
    }

    fn forget(&mut self, counts: &TermCounts) {
        for term in counts.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
    }
}

fn tokenize(text: &str) -> TermCounts {
    let mut counts = TermCounts::new();
    for m in TOKEN_RE.find_iter(text) {
        let token = m.as_str();
        if STOP_SET.contains(token) || token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        *counts.entry(token.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Technology keywords present in `lowercase_text`, in fixed detector order.
pub fn detect_tech_keywords(lowercase_text: &str) -> Vec<String> {
    TECH_KEYWORDS
        .iter()
        .filter(|(_, re)| re.is_match(lowercase_text))
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Scope-aware wrapper around a [`TopicCorpus`].
#[derive(Debug, Clone)]
pub struct TopicExtractor {
    corpus: TopicCorpus,
    config: TopicsConfig,
    anonymous: u64,
}

impl TopicExtractor {
    pub fn new(config: TopicsConfig) -> Self {
        Self {
            corpus: TopicCorpus::new(config.max_documents),
            config,
            anonymous: 0,
        }
    }

    pub fn scope(&self) -> CorpusScope {
        self.config.scope
    }

    pub fn corpus(&self) -> &TopicCorpus {
        &self.corpus
    }

    /// Marks the start of a full scan. Only `run`-scoped corpora reset here.
    pub fn begin_run(&mut self) {
        if self.config.scope == CorpusScope::Run {
            self.corpus.clear();
        }
    }

    /// Scores text that has no stable identity; every call is a new document.
    pub fn extract(&mut self, plain_text: &str) -> Vec<String> {
        self.anonymous += 1;
        let key = format!("\0anonymous-{}", self.anonymous);
        self.extract_keyed(&key, plain_text)
    }

    pub fn extract_keyed(&mut self, key: &str, plain_text: &str) -> Vec<String> {
        let lowered = plain_text.to_lowercase();

        if self.config.scope == CorpusScope::Document {
            self.corpus.clear();
        }

        let mut topics: Vec<String> = self
            .corpus
            .add_document(key, &lowered)
            .into_iter()
            .filter(|(term, score)| {
                term.chars().count() >= self.config.min_term_len && *score > self.config.min_score
            })
            .take(self.config.top_n)
            .map(|(term, _)| term)
            .collect();

        for keyword in detect_tech_keywords(&lowered) {
            if !topics.contains(&keyword) {
                topics.push(keyword);
            }
        }
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(scope: CorpusScope) -> TopicsConfig {
        TopicsConfig {
            scope,
            ..TopicsConfig::default()
        }
    }

    #[test]
    fn single_document_idf() {
        let mut corpus = TopicCorpus::new(10);
        let scored = corpus.add_document("a", "kernel kernel kernel scheduler");
        assert_eq!(scored[0].0, "kernel");
        let expected = 3.0 * (1.0 + (1.0f64 / 2.0).ln());
        assert!((scored[0].1 - expected).abs() < 1e-9);
    }

    #[test]
    fn stop_words_and_numbers_are_ignored() {
        let mut corpus = TopicCorpus::new(10);
        let scored = corpus.add_document("a", "the the the 2024 2024 rust");
        let terms: Vec<&str> = scored.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(terms, vec!["rust"]);
    }

    #[test]
    fn window_evicts_oldest_document() {
        let mut corpus = TopicCorpus::new(2);
        corpus.add_document("a", "alpha");
        corpus.add_document("b", "beta");
        corpus.add_document("c", "gamma");
        assert_eq!(corpus.len(), 2);
        assert!(!corpus.doc_freq.contains_key("alpha"));
    }

    #[test]
    fn same_key_replaces_previous_counts() {
        let mut corpus = TopicCorpus::new(10);
        corpus.add_document("other", "scheduler");
        let first = corpus.add_document("a", "kernel scheduler");
        let second = corpus.add_document("a", "kernel scheduler");
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.doc_freq["kernel"], 1);
        assert_eq!(first, second);
    }

    #[test]
    fn topics_include_tech_keywords_without_duplicates() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Document));
        let topics = extractor
            .extract("Docker docker docker docker compose compose compose with Python scripts");
        assert_eq!(topics[0], "docker");
        assert!(topics.contains(&"python".to_string()));
        assert_eq!(topics.iter().filter(|t| *t == "docker").count(), 1);
    }

    #[test]
    fn keywords_match_only_themselves() {
        assert!(detect_tech_keywords("i need some rest after the trip to the containers port").is_empty());
        assert!(detect_tech_keywords("mysql and github and graphql and dockerfile").is_empty());
        assert_eq!(
            detect_tech_keywords("the api talks to a database; node.js and git run in docker"),
            vec!["node", "database", "api", "docker", "git"]
        );
    }

    #[test]
    fn prose_without_keywords_has_no_keyword_topics() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Document));
        let topics = extractor.extract("Some rest near the shipping containers.");
        for keyword in ["api", "docker", "database", "git"] {
            assert!(!topics.contains(&keyword.to_string()), "false keyword in {:?}", topics);
        }
    }

    #[test]
    fn tokens_are_ascii_alphanumeric_runs() {
        let counts = tokenize("snake_case café x86_64");
        let mut terms: Vec<&str> = counts.keys().map(String::as_str).collect();
        terms.sort_unstable();
        assert_eq!(terms, vec!["caf", "case", "snake", "x86"]);
    }

    #[test]
    fn short_terms_are_not_topics() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Document));
        let topics = extractor.extract("cat cat cat cat dog dog dog dog");
        assert!(topics.is_empty());
    }

    #[test]
    fn at_most_top_n_scored_terms() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Document));
        let text = "aaaa aaaa bbbb bbbb cccc cccc dddd dddd eeee eeee ffff ffff";
        assert_eq!(extractor.extract(text).len(), 5);
    }

    #[test]
    fn document_scope_does_not_accumulate() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Document));
        extractor.extract("first document body");
        extractor.extract("second document body");
        assert_eq!(extractor.corpus().len(), 1);
    }

    #[test]
    fn run_scope_resets_on_begin_run() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Run));
        extractor.extract("first document body");
        extractor.extract("second document body");
        assert_eq!(extractor.corpus().len(), 2);
        extractor.begin_run();
        assert!(extractor.corpus().is_empty());
    }

    #[test]
    fn cumulative_scope_survives_begin_run() {
        let mut extractor = TopicExtractor::new(config(CorpusScope::Cumulative));
        extractor.extract("first document body");
        extractor.begin_run();
        assert_eq!(extractor.corpus().len(), 1);
    }
}
