//! DOCX → markdown.
//!
//! `word/document.xml` is reduced to simple HTML (headings, paragraphs, bold
//! and italic runs, list items, hyperlinks) which then goes through the HTML
//! engine. Hyperlink targets are resolved through
//! `word/_rels/document.xml.rels`.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::Cursor;
use tracing::warn;

use super::html::{html_to_markdown, HtmlToMarkdownOptions};
use super::read_zip_entry;
use crate::error::ConvertError;

const FORMAT: &str = "docx";

/// Paragraph styles that map onto markup without a warning.
const KNOWN_STYLES: &[&str] = &[
    "Normal",
    "Title",
    "Subtitle",
    "ListParagraph",
    "ListBullet",
    "ListNumber",
    "Quote",
    "BodyText",
    "NoSpacing",
];

#[derive(Debug, Default)]
struct Paragraph {
    style: Option<String>,
    list: bool,
    html: String,
}

#[derive(Debug, Default)]
struct Run {
    bold: bool,
    italic: bool,
    text: String,
}

/// Converted markdown plus the paragraph styles that had no mapping.
#[derive(Debug)]
pub struct DocxConversion {
    pub markdown: String,
    pub warnings: Vec<String>,
}

pub fn docx_to_markdown(
    bytes: &[u8],
    options: &HtmlToMarkdownOptions,
) -> Result<DocxConversion, ConvertError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ConvertError::conversion(FORMAT, e))?;

    let document_xml = read_zip_entry(&mut archive, "word/document.xml", FORMAT)?;
    let links = match read_zip_entry(&mut archive, "word/_rels/document.xml.rels", FORMAT) {
        Ok(rels) => parse_relationships(&rels)?,
        Err(_) => HashMap::new(),
    };

    let (html, warnings) = document_to_html(&document_xml, &links)?;
    for warning in &warnings {
        warn!(warning = %warning, "DOCX conversion warning");
    }

    Ok(DocxConversion {
        markdown: html_to_markdown(&html, options),
        warnings,
    })
}

/// Relationship id → target for every relationship in a `.rels` part.
fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ConvertError> {
    let mut links = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    links.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::conversion(FORMAT, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(links)
}

fn document_to_html(
    xml: &[u8],
    links: &HashMap<String, String>,
) -> Result<(String, Vec<String>), ConvertError> {
    let mut html = String::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut in_list = false;

    let mut paragraph: Option<Paragraph> = None;
    let mut run: Option<Run> = None;
    let mut in_text = false;

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ConvertError::conversion(FORMAT, e))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => paragraph = Some(Paragraph::default()),
                b"r" => run = Some(Run::default()),
                b"t" => in_text = true,
                b"hyperlink" => {
                    if let Some(p) = paragraph.as_mut() {
                        match attr(&e, b"id").and_then(|id| links.get(&id)) {
                            Some(href) => {
                                p.html.push_str(&format!("<a href=\"{}\">", escape(href.as_str())))
                            }
                            None => p.html.push_str("<a>"),
                        }
                    }
                }
                _ => apply_property(&e, paragraph.as_mut(), run.as_mut()),
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"br" | b"cr" => {
                    if let Some(r) = run.as_mut() {
                        r.text.push_str("<br>");
                    }
                }
                b"tab" => {
                    if let Some(r) = run.as_mut() {
                        r.text.push(' ');
                    }
                }
                _ => apply_property(&e, paragraph.as_mut(), run.as_mut()),
            },
            Event::Text(t) if in_text => {
                if let Some(r) = run.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| ConvertError::conversion(FORMAT, e))?;
                    r.text.push_str(&escape(&*text));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => {
                    if let (Some(r), Some(p)) = (run.take(), paragraph.as_mut()) {
                        p.html.push_str(&run_to_html(r));
                    }
                }
                b"hyperlink" => {
                    if let Some(p) = paragraph.as_mut() {
                        p.html.push_str("</a>");
                    }
                }
                b"p" => {
                    if let Some(p) = paragraph.take() {
                        emit_paragraph(p, &mut html, &mut in_list, &mut warnings);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if in_list {
        html.push_str("</ul>");
    }
    Ok((html, warnings))
}

/// Paragraph and run properties arrive as children of `w:pPr` / `w:rPr`.
fn apply_property(e: &BytesStart<'_>, paragraph: Option<&mut Paragraph>, run: Option<&mut Run>) {
    match (e.local_name().as_ref(), run, paragraph) {
        (b"b", Some(r), _) => r.bold = toggle_on(e),
        (b"i", Some(r), _) => r.italic = toggle_on(e),
        (b"pStyle", None, Some(p)) => p.style = attr(e, b"val"),
        (b"numPr", None, Some(p)) => p.list = true,
        _ => {}
    }
}

/// `<w:b/>` is on; `<w:b w:val="0"/>` or `"false"` is off.
fn toggle_on(e: &BytesStart<'_>) -> bool {
    !matches!(attr(e, b"val").as_deref(), Some("0") | Some("false"))
}

fn run_to_html(run: Run) -> String {
    if run.text.trim().is_empty() {
        return run.text;
    }
    let mut text = run.text;
    if run.italic {
        text = format!("<em>{}</em>", text);
    }
    if run.bold {
        text = format!("<strong>{}</strong>", text);
    }
    text
}

fn emit_paragraph(p: Paragraph, html: &mut String, in_list: &mut bool, warnings: &mut Vec<String>) {
    let style = p.style.as_deref().unwrap_or("Normal");
    let heading = match style {
        "Title" => Some(1),
        s => s
            .strip_prefix("Heading")
            .and_then(|level| level.parse::<usize>().ok())
            .filter(|level| (1..=6).contains(level)),
    };
    let list = p.list || style.starts_with("List");

    if heading.is_none() && !KNOWN_STYLES.contains(&style) {
        let warning = format!("Unrecognised paragraph style: {}", style);
        if !warnings.contains(&warning) {
            warnings.push(warning);
        }
    }

    if list && heading.is_none() {
        if !*in_list {
            html.push_str("<ul>");
            *in_list = true;
        }
        html.push_str(&format!("<li>{}</li>", p.html));
        return;
    }

    if *in_list {
        html.push_str("</ul>");
        *in_list = false;
    }

    match heading {
        Some(level) => html.push_str(&format!("<h{level}>{}</h{level}>", p.html)),
        None if style == "Quote" => html.push_str(&format!("<blockquote><p>{}</p></blockquote>", p.html)),
        None => html.push_str(&format!("<p>{}</p>", p.html)),
    }
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| match a.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Builds a minimal `.docx` around the given `w:body` inner XML.
    pub(crate) fn build_docx(body: &str, rels: Option<&str>) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{}</w:body></w:document>"#,
            body
        )
        .unwrap();
        if let Some(rels) = rels {
            zip.start_file("word/_rels/document.xml.rels", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(rels.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn convert(body: &str) -> DocxConversion {
        docx_to_markdown(&build_docx(body, None), &HtmlToMarkdownOptions::default()).unwrap()
    }

    #[test]
    fn headings_and_runs() {
        let out = convert(
            r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Report</w:t></w:r></w:p>
               <w:p><w:r><w:t xml:space="preserve">Plain </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>bold</w:t></w:r><w:r><w:t xml:space="preserve"> and </w:t></w:r><w:r><w:rPr><w:i/></w:rPr><w:t>italic</w:t></w:r></w:p>"#,
        );
        assert_eq!(out.markdown, "# Report\n\nPlain **bold** and *italic*");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn bold_off_is_respected() {
        let out = convert(r#"<w:p><w:r><w:rPr><w:b w:val="0"/></w:rPr><w:t>calm</w:t></w:r></w:p>"#);
        assert_eq!(out.markdown, "calm");
    }

    #[test]
    fn numbered_paragraphs_become_list_items() {
        let item = |text: &str| {
            format!(
                r#"<w:p><w:pPr><w:pStyle w:val="ListParagraph"/><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>"#,
                text
            )
        };
        let out = convert(&format!(
            "{}{}<w:p><w:r><w:t>after</w:t></w:r></w:p>",
            item("one"),
            item("two")
        ));
        assert_eq!(out.markdown, "- one\n- two\n\nafter");
    }

    #[test]
    fn hyperlinks_resolve_through_relationships() {
        let rels = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId7" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/a?b=1&amp;c=2" TargetMode="External"/></Relationships>"#;
        let body = r#"<w:p><w:r><w:t xml:space="preserve">Visit </w:t></w:r><w:hyperlink r:id="rId7"><w:r><w:t>the site</w:t></w:r></w:hyperlink></w:p>"#;
        let out = docx_to_markdown(&build_docx(body, Some(rels)), &HtmlToMarkdownOptions::default())
            .unwrap();
        assert_eq!(out.markdown, "Visit [the site](https://example.com/a?b=1&c=2)");
    }

    #[test]
    fn unknown_styles_are_reported_once() {
        let out = convert(
            r#"<w:p><w:pPr><w:pStyle w:val="Fancy"/></w:pPr><w:r><w:t>a</w:t></w:r></w:p><w:p><w:pPr><w:pStyle w:val="Fancy"/></w:pPr><w:r><w:t>b</w:t></w:r></w:p>"#,
        );
        assert_eq!(out.markdown, "a\n\nb");
        assert_eq!(out.warnings, vec!["Unrecognised paragraph style: Fancy"]);
    }

    #[test]
    fn escaped_text_survives() {
        let out = convert(r#"<w:p><w:r><w:t>a &lt;tag&gt; &amp; more</w:t></w:r></w:p>"#);
        assert_eq!(out.markdown, "a <tag> & more");
    }

    #[test]
    fn not_a_zip_is_a_conversion_error() {
        let err = docx_to_markdown(b"not a zip", &HtmlToMarkdownOptions::default()).unwrap_err();
        assert!(matches!(err, ConvertError::Conversion { format: "docx", .. }));
    }
}
