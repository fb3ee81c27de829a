//! HTML → markdown rule engine.
//!
//! HTML is parsed with `scraper` (html5ever, so unclosed tags, stray end
//! tags and every named entity are handled as a browser would), copied into
//! a small owned element tree, and rendered block by block. Output uses ATX
//! headings, fenced code blocks, `*`/`**` emphasis, `-` bullets and `---`
//! rules by default; see [`HtmlToMarkdownOptions`].

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node as DomNode, Selector};

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static SELF_CLOSING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Za-z][A-Za-z0-9:-]*)(\s[^<>]*?)?\s*/>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "noscript", "template", "title"];

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "body", "center", "dd", "details", "dialog", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "header", "html", "main", "nav", "p",
    "section", "summary",
];

/// Rendering choices for [`html_to_markdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlToMarkdownOptions {
    pub bullet_marker: char,
    pub emphasis_delimiter: &'static str,
    pub strong_delimiter: &'static str,
    pub code_fence: &'static str,
    pub horizontal_rule: &'static str,
}

impl Default for HtmlToMarkdownOptions {
    fn default() -> Self {
        Self {
            bullet_marker: '-',
            emphasis_delimiter: "*",
            strong_delimiter: "**",
            code_fence: "```",
            horizontal_rule: "---",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child_elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter_map(move |child| match child {
            Node::Element(el) if el.name == name => Some(el),
            _ => None,
        })
    }
}

/// Converts an HTML document or fragment to markdown.
///
/// Only the `<body>` contents are rendered.
pub fn html_to_markdown(html: &str, options: &HtmlToMarkdownOptions) -> String {
    render_document(&parse_body(html), options)
}

/// Parses `html` the way a browser would and returns the `<body>` element.
/// Entities are decoded, and comments and processing instructions are
/// dropped.
pub(crate) fn parse_body(html: &str) -> Element {
    let document = Html::parse_document(html);
    let body = document
        .select(&BODY_SELECTOR)
        .next()
        .unwrap_or_else(|| document.root_element());
    convert_element(body)
}

/// Like [`parse_body`], for XHTML. Self-closing non-void elements such as
/// `<a id="x"/>` are expanded first; an HTML parser would otherwise leave
/// them open.
pub(crate) fn parse_xhtml_body(xhtml: &str) -> Element {
    let expanded = SELF_CLOSING_RE.replace_all(xhtml, |caps: &regex::Captures| {
        let name = &caps[1];
        let attrs = caps.get(2).map_or("", |m| m.as_str());
        if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
            format!("<{name}{attrs}>")
        } else {
            format!("<{name}{attrs}></{name}>")
        }
    });
    parse_body(&expanded)
}

pub(crate) fn render_document(root: &Element, options: &HtmlToMarkdownOptions) -> String {
    let renderer = Renderer { options };
    let mut writer = BlockWriter::new("\n\n");
    renderer.render_children(&root.children, &mut writer);
    let markdown = writer.finish();
    BLANK_RUN_RE.replace_all(&markdown, "\n\n").trim().to_string()
}

/// Copies a parsed DOM subtree into the owned tree the renderer works on.
fn convert_element(dom: ElementRef<'_>) -> Element {
    let value = dom.value();
    let mut element = Element {
        name: value.name().to_ascii_lowercase(),
        attrs: value
            .attrs()
            .map(|(key, val)| (key.to_ascii_lowercase(), val.to_string()))
            .collect(),
        children: Vec::new(),
    };

    for child in dom.children() {
        match child.value() {
            DomNode::Text(text) => {
                let text: &str = text;
                element.children.push(Node::Text(text.to_string()));
            }
            DomNode::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    element.children.push(Node::Element(convert_element(child)));
                }
            }
            _ => {}
        }
    }
    element
}

/// Accumulates inline text into paragraphs and collects finished blocks.
struct BlockWriter {
    separator: &'static str,
    blocks: Vec<String>,
    inline: String,
}

impl BlockWriter {
    fn new(separator: &'static str) -> Self {
        Self {
            separator,
            blocks: Vec::new(),
            inline: String::new(),
        }
    }

    fn text(&mut self, text: &str) {
        let collapsed = WS_RE.replace_all(text, " ");
        let at_boundary = self.inline.is_empty() || self.inline.ends_with(char::is_whitespace);
        let piece = if at_boundary {
            collapsed.trim_start()
        } else {
            &collapsed[..]
        };
        self.inline.push_str(piece);
    }

    fn raw(&mut self, text: &str) {
        self.inline.push_str(text);
    }

    fn line_break(&mut self) {
        if !self.inline.trim().is_empty() {
            let trimmed = self.inline.trim_end().len();
            self.inline.truncate(trimmed);
            self.inline.push_str("  \n");
        }
    }

    fn flush(&mut self) {
        let paragraph = self.inline.trim();
        if !paragraph.is_empty() {
            self.blocks.push(paragraph.to_string());
        }
        self.inline.clear();
    }

    fn block(&mut self, block: String) {
        self.flush();
        if !block.trim().is_empty() {
            self.blocks.push(block);
        }
    }

    fn finish(mut self) -> String {
        self.flush();
        self.blocks.join(self.separator)
    }
}

struct Renderer<'a> {
    options: &'a HtmlToMarkdownOptions,
}

impl Renderer<'_> {
    fn render_children(&self, children: &[Node], w: &mut BlockWriter) {
        for child in children {
            self.render_node(child, w);
        }
    }

    fn render_node(&self, node: &Node, w: &mut BlockWriter) {
        let el = match node {
            Node::Text(text) => return w.text(text),
            Node::Element(el) => el,
        };

        match el.name.as_str() {
            name if SKIPPED_ELEMENTS.contains(&name) => {}
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = el.name[1..].parse::<usize>().unwrap_or(1);
                let text = self.inline(&el.children).replace('\n', " ");
                let text = text.trim();
                if !text.is_empty() {
                    w.block(format!("{} {}", "#".repeat(level), text));
                } else {
                    w.flush();
                }
            }
            "blockquote" => {
                let mut inner = BlockWriter::new("\n\n");
                self.render_children(&el.children, &mut inner);
                let quoted = inner
                    .finish()
                    .lines()
                    .map(|line| {
                        if line.is_empty() {
                            ">".to_string()
                        } else {
                            format!("> {}", line)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                w.block(quoted);
            }
            "pre" => w.block(self.code_block(el)),
            "ul" | "ol" => w.block(self.list(el)),
            "table" => w.block(self.table(el)),
            "hr" => w.block(self.options.horizontal_rule.to_string()),
            "br" => w.line_break(),
            "img" => {
                if let Some(src) = el.attr("src").filter(|s| !s.is_empty()) {
                    let alt = el.attr("alt").unwrap_or("");
                    w.raw(&format!("![{}]({})", alt.trim(), src));
                }
            }
            "a" => {
                let text = self.inline(&el.children);
                match el.attr("href").filter(|h| !h.is_empty()) {
                    Some(href) if !text.is_empty() => {
                        self.wrap_spaced(el, w, &format!("[{}]({})", text, href))
                    }
                    _ => self.wrap_spaced(el, w, &text),
                }
            }
            "strong" | "b" => self.delimited(el, w, self.options.strong_delimiter),
            "em" | "i" | "cite" | "var" => self.delimited(el, w, self.options.emphasis_delimiter),
            "code" | "kbd" | "samp" | "tt" => {
                let code = text_content(el);
                let code = WS_RE.replace_all(&code, " ");
                if !code.trim().is_empty() {
                    let fence = if code.contains('`') { "``" } else { "`" };
                    w.raw(&format!("{fence}{}{fence}", code));
                }
            }
            name if BLOCK_ELEMENTS.contains(&name) || name == "li" => {
                w.flush();
                self.render_children(&el.children, w);
                w.flush();
            }
            _ => self.render_children(&el.children, w),
        }
    }

    /// Renders children as a single inline string.
    fn inline(&self, children: &[Node]) -> String {
        let mut inner = BlockWriter::new(" ");
        self.render_children(children, &mut inner);
        inner.finish()
    }

    fn delimited(&self, el: &Element, w: &mut BlockWriter, delimiter: &str) {
        let text = self.inline(&el.children);
        if text.is_empty() {
            return;
        }
        self.wrap_spaced(el, w, &format!("{delimiter}{text}{delimiter}"));
    }

    /// Emits `rendered`, keeping whitespace that surrounded the element's
    /// text outside of any markup.
    fn wrap_spaced(&self, el: &Element, w: &mut BlockWriter, rendered: &str) {
        let raw = text_content(el);
        if raw.starts_with(char::is_whitespace) {
            w.text(" ");
        }
        w.raw(rendered);
        if raw.ends_with(char::is_whitespace) && !rendered.is_empty() {
            w.raw(" ");
        }
    }

    fn code_block(&self, el: &Element) -> String {
        let language = el
            .child_elements("code")
            .next()
            .and_then(|code| code.attr("class"))
            .and_then(|class| {
                class.split_whitespace().find_map(|c| {
                    c.strip_prefix("language-")
                        .or_else(|| c.strip_prefix("lang-"))
                })
            })
            .unwrap_or("");

        let code = text_content(el);
        let code = code.strip_prefix('\n').unwrap_or(&code);
        let code = code.trim_end_matches('\n');
        let fence = self.options.code_fence;
        format!("{fence}{language}\n{code}\n{fence}")
    }

    fn list(&self, el: &Element) -> String {
        let ordered = el.name == "ol";
        let mut number = el
            .attr("start")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(1);

        let mut items = Vec::new();
        for item in el.child_elements("li") {
            let mut inner = BlockWriter::new("\n");
            self.render_children(&item.children, &mut inner);
            let content = inner.finish();

            let marker = if ordered {
                let marker = format!("{}. ", number);
                number += 1;
                marker
            } else {
                format!("{} ", self.options.bullet_marker)
            };
            let indent = " ".repeat(marker.len());

            let mut lines = content.lines();
            let mut rendered = format!("{}{}", marker, lines.next().unwrap_or("")).trim_end().to_string();
            for line in lines {
                rendered.push('\n');
                if !line.is_empty() {
                    rendered.push_str(&indent);
                    rendered.push_str(line);
                }
            }
            items.push(rendered);
        }
        items.join("\n")
    }

    fn table(&self, el: &Element) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        collect_rows(el, &mut |row: &Element| {
            let cells = row
                .children
                .iter()
                .filter_map(|child| match child {
                    Node::Element(cell) if cell.name == "td" || cell.name == "th" => {
                        Some(self.inline(&cell.children).replace('|', "\\|").replace('\n', " "))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>();
            if !cells.is_empty() {
                rows.push(cells);
            }
        });

        let Some(columns) = rows.iter().map(Vec::len).max() else {
            return String::new();
        };

        let mut lines = Vec::with_capacity(rows.len() + 1);
        for (i, row) in rows.iter().enumerate() {
            let mut cells = row.clone();
            cells.resize(columns, String::new());
            lines.push(format!("| {} |", cells.join(" | ")));
            if i == 0 {
                lines.push(format!("|{}", " --- |".repeat(columns)));
            }
        }
        lines.join("\n")
    }
}

fn collect_rows<'a>(el: &'a Element, visit: &mut dyn FnMut(&'a Element)) {
    for child in &el.children {
        if let Node::Element(child) = child {
            match child.name.as_str() {
                "tr" => visit(child),
                "thead" | "tbody" | "tfoot" => collect_rows(child, visit),
                _ => {}
            }
        }
    }
}

/// Concatenated descendant text, whitespace preserved.
pub(crate) fn text_content(el: &Element) -> String {
    let mut out = String::new();
    fn walk(el: &Element, out: &mut String) {
        for child in &el.children {
            match child {
                Node::Text(text) => out.push_str(text),
                Node::Element(e) if e.name == "br" => out.push('\n'),
                Node::Element(e) => walk(e, out),
            }
        }
    }
    walk(el, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(html: &str) -> String {
        html_to_markdown(html, &HtmlToMarkdownOptions::default())
    }

    #[test]
    fn headings_paragraphs_and_emphasis() {
        assert_eq!(
            md("<h1>Title</h1><p>Hello <strong>world</strong> and <em>you</em>.</p>"),
            "# Title\n\nHello **world** and *you*."
        );
    }

    #[test]
    fn uses_body_when_present() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><h2>Inside</h2><script>alert(1)</script></body></html>";
        assert_eq!(md(html), "## Inside");
    }

    #[test]
    fn lists_are_rendered_with_markers() {
        assert_eq!(md("<ul>\n  <li>One</li>\n  <li>Two</li>\n</ul>"), "- One\n- Two");
        assert_eq!(md("<ol start=\"3\"><li>a</li><li>b</li></ol>"), "3. a\n4. b");
    }

    #[test]
    fn nested_lists_are_indented() {
        assert_eq!(
            md("<ul><li>Parent<ul><li>Child</li></ul></li><li>Next</li></ul>"),
            "- Parent\n  - Child\n- Next"
        );
    }

    #[test]
    fn links_images_and_inline_code() {
        assert_eq!(
            md(r#"<p>See <a href="https://example.com">the site</a>, <img src="cat.png" alt="A cat"> and <code>x &lt; y</code>.</p>"#),
            "See [the site](https://example.com), ![A cat](cat.png) and `x < y`."
        );
    }

    #[test]
    fn fenced_code_keeps_whitespace_and_language() {
        let html = "<pre><code class=\"language-rust\">fn main() {\n    println!();\n}\n</code></pre>";
        assert_eq!(md(html), "```rust\nfn main() {\n    println!();\n}\n```");
    }

    #[test]
    fn blockquote_and_rule() {
        assert_eq!(
            md("<blockquote><p>First</p><p>Second</p></blockquote><hr><p>After</p>"),
            "> First\n>\n> Second\n\n---\n\nAfter"
        );
    }

    #[test]
    fn whitespace_collapses_outside_pre() {
        assert_eq!(md("<p>  lots   of\n\n   space  </p>"), "lots of space");
    }

    #[test]
    fn tolerates_unclosed_and_stray_tags() {
        assert_eq!(md("<p>one<p>two</span></div>"), "one\n\ntwo");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(md("<p>a&nbsp;&amp;&#160;b &mdash; &#x41;</p>"), "a & b \u{2014} A");
    }

    #[test]
    fn named_entities_outside_ascii_are_decoded() {
        assert_eq!(md("<p>caf&eacute; &euro;5 &frac12;</p>"), "café €5 ½");
        assert_eq!(md("<p>&alpha;&beta; &rarr; &hearts; &Ouml;l</p>"), "αβ → ♥ Öl");
    }

    #[test]
    fn comments_and_bare_text_are_handled() {
        assert_eq!(md("plain <!-- hidden --> text"), "plain text");
    }

    #[test]
    fn xhtml_self_closing_anchor_does_not_swallow_content() {
        let xhtml = r#"<html xmlns="http://www.w3.org/1999/xhtml"><body><p><a id="p1"/>First</p><p>Second<br/>line</p></body></html>"#;
        let root = parse_xhtml_body(xhtml);
        assert_eq!(
            render_document(&root, &HtmlToMarkdownOptions::default()),
            "First\n\nSecond  \nline"
        );
    }

    #[test]
    fn tables_become_pipe_tables() {
        let html = "<table><tr><th>Name</th><th>Qty</th></tr><tr><td>Apple</td><td>3</td></tr></table>";
        assert_eq!(md(html), "| Name | Qty |\n| --- | --- |\n| Apple | 3 |");
    }

    #[test]
    fn custom_options_are_honoured() {
        let options = HtmlToMarkdownOptions {
            bullet_marker: '*',
            emphasis_delimiter: "_",
            ..HtmlToMarkdownOptions::default()
        };
        assert_eq!(
            html_to_markdown("<ul><li><em>x</em></li></ul>", &options),
            "* _x_"
        );
    }
}
