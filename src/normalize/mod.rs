//! Markdown-to-plain-text normalization and metadata extraction.
//!
//! [`MarkdownNormalizer::process`] turns a markdown body plus its parsed
//! frontmatter into everything the indexer stores alongside the raw text:
//! a title, searchable plain text, tags, TF-IDF topics, and a word count.

pub mod topics;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::TopicsConfig;
use topics::TopicExtractor;

/// Maximum characters kept when the title falls back to the first line.
const TITLE_FALLBACK_CHARS: usize = 100;

static FENCED_BACKTICK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static FENCED_TILDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)~~~.*?~~~").unwrap());
static STRAY_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```+|~~~+").unwrap());
static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]*`").unwrap());
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:#{1,6}(?:[ \t]+|$))+").unwrap());
static BOLD_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").unwrap());
static BOLD_UNDERSCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__([^_\n]+)__").unwrap());
static ITALIC_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static ITALIC_UNDERSCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_[^_\n]+_").unwrap());
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z!][^>]*>").unwrap());
static HR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$").unwrap());
static TRAILING_WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[ \t]+$").unwrap());
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static H1_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#[ \t]+(.+)$").unwrap());
static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w&#/])#([A-Za-z][\w-]*)").unwrap());

/// Output of [`MarkdownNormalizer::process`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedText {
    pub title: String,
    pub plain_text: String,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub word_count: usize,
}

/// Stateful normalizer; the only state is the topic corpus.
#[derive(Debug, Clone)]
pub struct MarkdownNormalizer {
    topics: TopicExtractor,
}

impl MarkdownNormalizer {
    pub fn new(config: TopicsConfig) -> Self {
        Self {
            topics: TopicExtractor::new(config),
        }
    }

    pub fn topics(&self) -> &TopicExtractor {
        &self.topics
    }

    /// Called by the indexer before a full scan.
    pub fn begin_run(&mut self) {
        self.topics.begin_run();
    }

    /// Normalizes a body with no stable identity. Each call adds a fresh
    /// document to the topic corpus.
    pub fn process(&mut self, body: &str, frontmatter: &Map<String, Value>) -> NormalizedText {
        let plain_text = strip_markdown(body);
        let topics = self.topics.extract(&plain_text);
        build(body, frontmatter, plain_text, topics)
    }

    /// Like [`process`](Self::process), but re-processing the same `key`
    /// replaces its corpus entry, so repeated calls yield the same topics.
    pub fn process_keyed(
        &mut self,
        key: &str,
        body: &str,
        frontmatter: &Map<String, Value>,
    ) -> NormalizedText {
        let plain_text = strip_markdown(body);
        let topics = self.topics.extract_keyed(key, &plain_text);
        build(body, frontmatter, plain_text, topics)
    }
}

fn build(
    body: &str,
    frontmatter: &Map<String, Value>,
    plain_text: String,
    topics: Vec<String>,
) -> NormalizedText {
    NormalizedText {
        title: extract_title(body, frontmatter),
        tags: extract_tags(body, frontmatter),
        word_count: count_words(&plain_text),
        topics,
        plain_text,
    }
}

/// Removes markdown and HTML markup, keeping the readable text.
///
/// Code is removed before any other rule so that markup-looking characters
/// inside code never leak into later substitutions. A single pass can expose
/// new markup (`<p># Title</p>`, adjacent `_a_ _b_` spans), so passes repeat
/// until the text stops changing. Every rule only deletes characters, which
/// bounds the loop and makes the result a fixed point.
pub fn strip_markdown(text: &str) -> String {
    let mut current = strip_pass(text);
    loop {
        let next = strip_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_pass(text: &str) -> String {
    let text = FENCED_BACKTICK_RE.replace_all(text, "");
    let text = FENCED_TILDE_RE.replace_all(&text, "");
    let text = STRAY_FENCE_RE.replace_all(&text, "");
    let text = INLINE_CODE_RE.replace_all(&text, "");
    let text = HTML_TAG_RE.replace_all(&text, "");
    let text = IMAGE_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = HEADING_RE.replace_all(&text, "");
    let text = BOLD_STAR_RE.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORE_RE.replace_all(&text, "$1");
    let text = ITALIC_STAR_RE.replace_all(&text, "$1");
    let text = strip_underscore_emphasis(&text);
    let text = HR_RE.replace_all(&text, "");
    let text = TRAILING_WS_RE.replace_all(&text, "");
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// `_word_` emphasis whose underscores sit on word boundaries. Boundary
/// characters are checked, not consumed, so adjacent spans all match.
fn strip_underscore_emphasis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut pos = 0;
    while let Some(m) = ITALIC_UNDERSCORE_RE.find_at(text, pos) {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
            // Retry from the next underscore; the closing one may open a span.
            pos = m.start() + 1;
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push_str(&text[m.start() + 1..m.end() - 1]);
        last = m.end();
        pos = m.end();
    }
    out.push_str(&text[last..]);
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Frontmatter `title`, else the first `# ` heading, else the first
/// non-empty line (truncated), else `"Untitled"`.
pub fn extract_title(body: &str, frontmatter: &Map<String, Value>) -> String {
    if let Some(title) = frontmatter.get("title").and_then(scalar_to_string) {
        let title = title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }

    if let Some(caps) = H1_RE.captures(body) {
        let heading = caps[1].trim().trim_end_matches('#').trim();
        if !heading.is_empty() {
            return heading.to_string();
        }
    }

    if let Some(line) = body.lines().map(str::trim).find(|l| !l.is_empty()) {
        return line.chars().take(TITLE_FALLBACK_CHARS).collect();
    }

    "Untitled".to_string()
}

/// Lowercased union of frontmatter tags and inline `#hashtags`,
/// deduplicated in first-seen order.
///
/// Frontmatter `tags` may be a sequence or a comma-separated string.
/// Numeric and boolean entries are stringified; nested values are ignored.
pub fn extract_tags(body: &str, frontmatter: &Map<String, Value>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let tag = raw.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    match frontmatter.get("tags") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(s) = scalar_to_string(item) {
                    push(&s);
                }
            }
        }
        Some(Value::String(list)) => {
            for part in list.split(',') {
                push(part);
            }
        }
        Some(other) => {
            if let Some(s) = scalar_to_string(other) {
                push(&s);
            }
        }
        None => {}
    }

    for caps in HASHTAG_RE.captures_iter(body) {
        push(caps[1].trim_end_matches('-'));
    }

    tags
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fm(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn strips_common_markup() {
        let md = "# Title\n\nSome **bold** and *italic* with `code`.\n\n\
                  ```rust\nfn main() { # not a heading }\n```\n\n\
                  See [the docs](https://example.com) and ![a cat](cat.png).\n\n\
                  ---\n\n<div>html</div>";
        let plain = strip_markdown(md);
        assert!(!plain.contains('#'));
        assert!(!plain.contains("```"));
        assert!(!plain.contains("<div>"));
        assert!(!plain.contains("fn main"));
        assert!(plain.contains("Some bold and italic with ."));
        assert!(plain.contains("See the docs and a cat."));
        assert!(plain.starts_with("Title"));
        assert!(plain.ends_with("html"));
    }

    #[test]
    fn strip_is_idempotent() {
        let inputs = [
            "## Notes\n\n- item *one*\n- item __two__\n\n\n\n> quote with [link](x)\n\n***\n\nend",
            "_a_ _b_",
            "_a_ _b_ _c_ and _d_",
            "<p># Title</p>",
            "<h2>## Double</h2>\n<div>### Third</div>",
            "<em>_inner_</em> <strong>**bold**</strong>",
            "# # nested heading",
            "[![badge](b.svg)](https://ci)",
            "**_mixed_** and __*other*__",
            "a_b _c_ d",
            "some_function_name and _real_",
            "```\ncode\n```\n# after code",
            "`tick` then ~~~\nfenced\n~~~ tail",
            "<a href=\"x\">[link](y)</a>",
            "line   \n\n\n\n\nnext   ",
            "- - -\n\ntext\n\n___",
            "#hashtag stays #here",
            "<<p>>weird<</p>>",
            "",
        ];
        for md in inputs {
            let once = strip_markdown(md);
            assert_eq!(strip_markdown(&once), once, "not idempotent for {:?}", md);
        }
    }

    #[test]
    fn adjacent_underscore_spans_strip_in_one_call() {
        assert_eq!(strip_markdown("_a_ _b_"), "a b");
        assert_eq!(strip_markdown("a_b _c_ d"), "a_b c d");
    }

    #[test]
    fn headings_inside_html_lose_their_markers() {
        assert_eq!(strip_markdown("<p># Title</p>"), "Title");
        for md in ["<p># Title</p>", "<div>\n## Sub\n</div>", "<h1># One</h1>"] {
            let plain = strip_markdown(md);
            assert!(
                plain.lines().all(|l| !l.trim_start().starts_with('#')),
                "heading marker left in {:?}",
                plain
            );
        }
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(strip_markdown("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn snake_case_survives() {
        assert_eq!(strip_markdown("call some_function_name now"), "call some_function_name now");
    }

    #[test]
    fn title_from_heading() {
        assert_eq!(extract_title("# Hello\nbody", &Map::new()), "Hello");
    }

    #[test]
    fn title_from_frontmatter_wins() {
        let meta = fm(json!({ "title": "Explicit" }));
        assert_eq!(extract_title("no heading here", &meta), "Explicit");
    }

    #[test]
    fn title_falls_back_to_first_line_truncated() {
        let long = "x".repeat(150);
        assert_eq!(extract_title(&long, &Map::new()).len(), 100);
        assert_eq!(extract_title("\n\nfirst\nsecond", &Map::new()), "first");
    }

    #[test]
    fn title_untitled_when_empty() {
        assert_eq!(extract_title("   \n", &Map::new()), "Untitled");
    }

    #[test]
    fn second_level_heading_is_not_title() {
        assert_eq!(extract_title("intro\n## Sub\n# Main", &Map::new()), "Main");
    }

    #[test]
    fn hashtags_are_case_folded() {
        let tags = extract_tags("Loving #angular and #React!", &Map::new());
        assert!(tags.contains(&"angular".to_string()));
        assert!(tags.contains(&"react".to_string()));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn frontmatter_tags_sequence_and_string() {
        let seq = fm(json!({ "tags": ["Rust", "notes", 2024] }));
        assert_eq!(extract_tags("", &seq), vec!["rust", "notes", "2024"]);

        let csv = fm(json!({ "tags": "Rust, notes ,  ,rust" }));
        assert_eq!(extract_tags("", &csv), vec!["rust", "notes"]);
    }

    #[test]
    fn tags_union_without_duplicates() {
        let meta = fm(json!({ "tags": ["rust"] }));
        let tags = extract_tags("learning #Rust and #tokio", &meta);
        assert_eq!(tags, vec!["rust", "tokio"]);
    }

    #[test]
    fn headings_and_anchors_are_not_tags() {
        let tags = extract_tags("# Heading\nsee page#section and &#39;", &Map::new());
        assert!(tags.is_empty());
    }

    #[test]
    fn nested_frontmatter_tags_are_ignored() {
        let meta = fm(json!({ "tags": [{ "nested": true }, ["x"]] }));
        assert!(extract_tags("", &meta).is_empty());
    }

    #[test]
    fn word_count_splits_whitespace() {
        assert_eq!(count_words("  one two\tthree\n\nfour "), 4);
        assert_eq!(count_words(""), 0);
    }

    #[test]
    fn process_combines_everything() {
        let mut normalizer = MarkdownNormalizer::new(TopicsConfig::default());
        let out = normalizer.process("# Docker Notes\n\nUsing #docker daily.", &Map::new());
        assert_eq!(out.title, "Docker Notes");
        assert_eq!(out.tags, vec!["docker"]);
        assert_eq!(out.plain_text, "Docker Notes\n\nUsing #docker daily.");
        assert_eq!(out.word_count, 5);
        assert!(out.topics.contains(&"docker".to_string()));
    }

    #[test]
    fn keyed_processing_is_stable() {
        let mut normalizer = MarkdownNormalizer::new(TopicsConfig::default());
        let body = "kernel scheduler kernel interrupts";
        let first = normalizer.process_keyed("a.md", body, &Map::new());
        let second = normalizer.process_keyed("a.md", body, &Map::new());
        assert_eq!(first, second);
        assert_eq!(normalizer.topics().corpus().len(), 1);
    }
}
