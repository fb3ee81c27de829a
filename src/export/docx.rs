//! Markdown → minimal WordprocessingML package.
//!
//! Works line by line: blank lines become empty paragraphs, `#` to `####`
//! become Heading1..Heading4, everything else is scanned for inline
//! emphasis and code.

use once_cell::sync::Lazy;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use regex::Regex;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

use crate::error::ConvertError;

const FORMAT: &str = "docx";

const NS_MAIN: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const CODE_FONT: &str = "Courier New";

static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,4})\s+(.*)$").unwrap());

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:pPr><w:spacing w:after="120"/></w:pPr><w:rPr><w:sz w:val="22"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="360" w:after="120"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:sz w:val="36"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:sz w:val="30"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading3"><w:name w:val="heading 3"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="80"/><w:outlineLvl w:val="2"/></w:pPr><w:rPr><w:b/><w:sz w:val="26"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading4"><w:name w:val="heading 4"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="200" w:after="80"/><w:outlineLvl w:val="3"/></w:pPr><w:rPr><w:b/><w:i/><w:sz w:val="24"/></w:rPr></w:style></w:styles>"#;

/// A styled span of text inside one paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
}

impl TextRun {
    fn plain(text: String) -> Self {
        Self {
            text,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Empty,
    Heading(u8, Vec<TextRun>),
    Paragraph(Vec<TextRun>),
}

#[derive(Clone, Copy)]
enum Marker {
    Bold(&'static str),
    Italic(&'static str),
    Code,
}

impl Marker {
    fn delimiter(self) -> &'static str {
        match self {
            Marker::Bold(d) | Marker::Italic(d) => d,
            Marker::Code => "`",
        }
    }
}

fn marker_at(rest: &str, prev: Option<char>) -> Option<Marker> {
    if rest.starts_with("**") {
        Some(Marker::Bold("**"))
    } else if rest.starts_with("__") {
        Some(Marker::Bold("__"))
    } else if rest.starts_with('`') {
        Some(Marker::Code)
    } else if rest.starts_with('*') {
        Some(Marker::Italic("*"))
    } else if rest.starts_with('_') && !prev.is_some_and(char::is_alphanumeric) {
        Some(Marker::Italic("_"))
    } else {
        None
    }
}

/// Splits one line into runs. An opener without a closer on the same line
/// is kept as literal text.
pub fn scan_inline(line: &str) -> Vec<TextRun> {
    let mut runs = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < line.len() {
        let rest = &line[i..];
        let prev = line[..i].chars().next_back();

        if let Some(marker) = marker_at(rest, prev) {
            let delimiter = marker.delimiter();
            let body = &rest[delimiter.len()..];
            if let Some(end) = body.find(delimiter).filter(|&end| end > 0) {
                if !plain.is_empty() {
                    runs.push(TextRun::plain(std::mem::take(&mut plain)));
                }
                let text = body[..end].to_string();
                runs.push(match marker {
                    Marker::Bold(_) => TextRun {
                        text,
                        bold: true,
                        ..Default::default()
                    },
                    Marker::Italic(_) => TextRun {
                        text,
                        italic: true,
                        ..Default::default()
                    },
                    Marker::Code => TextRun {
                        text,
                        code: true,
                        ..Default::default()
                    },
                });
                i += delimiter.len() * 2 + end;
                continue;
            }
            plain.push_str(delimiter);
            i += delimiter.len();
            continue;
        }

        // Safe: `i` always sits on a char boundary.
        let c = rest.chars().next().unwrap_or_default();
        plain.push(c);
        i += c.len_utf8();
    }

    if !plain.is_empty() {
        runs.push(TextRun::plain(plain));
    }
    runs
}

fn parse_blocks(markdown: &str) -> Vec<Block> {
    markdown
        .lines()
        .map(|line| {
            let line = line.trim_end();
            if line.trim().is_empty() {
                Block::Empty
            } else if let Some(caps) = HEADING_RE.captures(line) {
                Block::Heading(caps[1].len() as u8, scan_inline(caps[2].trim()))
            } else {
                Block::Paragraph(scan_inline(line))
            }
        })
        .collect()
}

pub fn markdown_to_docx(markdown: &str, title: &str) -> Result<Vec<u8>, ConvertError> {
    let document = document_xml(&parse_blocks(markdown))?;
    let core = core_xml(title)?;

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let parts: [(&str, &[u8]); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", PACKAGE_RELS.as_bytes()),
        ("docProps/core.xml", core.as_slice()),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS.as_bytes()),
        ("word/styles.xml", STYLES.as_bytes()),
        ("word/document.xml", document.as_slice()),
    ];
    for (name, bytes) in parts {
        zip.start_file(name, SimpleFileOptions::default())
            .map_err(|e| ConvertError::conversion(FORMAT, e))?;
        zip.write_all(bytes)?;
    }
    let cursor = zip.finish().map_err(|e| ConvertError::conversion(FORMAT, e))?;
    Ok(cursor.into_inner())
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn emit<'a>(writer: &mut XmlWriter, event: impl Into<Event<'a>>) -> Result<(), ConvertError> {
    writer
        .write_event(event)
        .map_err(|e| ConvertError::conversion(FORMAT, e))
}

fn start_xml() -> Result<XmlWriter, ConvertError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))),
    )?;
    Ok(writer)
}

fn core_xml(title: &str) -> Result<Vec<u8>, ConvertError> {
    let mut w = start_xml()?;
    emit(
        &mut w,
        Event::Start(BytesStart::new("cp:coreProperties").with_attributes([
            (
                "xmlns:cp",
                "http://schemas.openxmlformats.org/package/2006/metadata/core-properties",
            ),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
        ])),
    )?;
    emit(&mut w, Event::Start(BytesStart::new("dc:title")))?;
    emit(&mut w, Event::Text(BytesText::new(title)))?;
    emit(&mut w, Event::End(BytesEnd::new("dc:title")))?;
    emit(&mut w, Event::End(BytesEnd::new("cp:coreProperties")))?;
    Ok(w.into_inner().into_inner())
}

fn document_xml(blocks: &[Block]) -> Result<Vec<u8>, ConvertError> {
    let mut w = start_xml()?;
    emit(
        &mut w,
        Event::Start(BytesStart::new("w:document").with_attributes([("xmlns:w", NS_MAIN)])),
    )?;
    emit(&mut w, Event::Start(BytesStart::new("w:body")))?;

    for block in blocks {
        match block {
            Block::Empty => emit(&mut w, Event::Empty(BytesStart::new("w:p")))?,
            Block::Heading(level, runs) => {
                write_paragraph(&mut w, Some(&format!("Heading{}", level)), runs)?
            }
            Block::Paragraph(runs) => write_paragraph(&mut w, None, runs)?,
        }
    }

    emit(&mut w, Event::End(BytesEnd::new("w:body")))?;
    emit(&mut w, Event::End(BytesEnd::new("w:document")))?;
    Ok(w.into_inner().into_inner())
}

fn write_paragraph(
    w: &mut XmlWriter,
    style: Option<&str>,
    runs: &[TextRun],
) -> Result<(), ConvertError> {
    emit(w, Event::Start(BytesStart::new("w:p")))?;
    if let Some(style) = style {
        emit(w, Event::Start(BytesStart::new("w:pPr")))?;
        emit(
            w,
            Event::Empty(BytesStart::new("w:pStyle").with_attributes([("w:val", style)])),
        )?;
        emit(w, Event::End(BytesEnd::new("w:pPr")))?;
    }
    for run in runs {
        write_run(w, run)?;
    }
    emit(w, Event::End(BytesEnd::new("w:p")))
}

fn write_run(w: &mut XmlWriter, run: &TextRun) -> Result<(), ConvertError> {
    emit(w, Event::Start(BytesStart::new("w:r")))?;
    if run.bold || run.italic || run.code {
        emit(w, Event::Start(BytesStart::new("w:rPr")))?;
        if run.code {
            emit(
                w,
                Event::Empty(BytesStart::new("w:rFonts").with_attributes([
                    ("w:ascii", CODE_FONT),
                    ("w:hAnsi", CODE_FONT),
                    ("w:cs", CODE_FONT),
                ])),
            )?;
        }
        if run.bold {
            emit(w, Event::Empty(BytesStart::new("w:b")))?;
        }
        if run.italic {
            emit(w, Event::Empty(BytesStart::new("w:i")))?;
        }
        emit(w, Event::End(BytesEnd::new("w:rPr")))?;
    }
    emit(
        w,
        Event::Start(BytesStart::new("w:t").with_attributes([("xml:space", "preserve")])),
    )?;
    emit(w, Event::Text(BytesText::new(&run.text)))?;
    emit(w, Event::End(BytesEnd::new("w:t")))?;
    emit(w, Event::End(BytesEnd::new("w:r")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::docx::docx_to_markdown;
    use crate::import::html::HtmlToMarkdownOptions;
    use std::io::Read;

    fn bold(text: &str) -> TextRun {
        TextRun {
            text: text.into(),
            bold: true,
            ..Default::default()
        }
    }

    fn plain(text: &str) -> TextRun {
        TextRun::plain(text.into())
    }

    #[test]
    fn scans_all_inline_markers() {
        let runs = scan_inline("a **b** __c__ *d* _e_ `f`");
        let styled: Vec<_> = runs
            .iter()
            .filter(|r| r.bold || r.italic || r.code)
            .map(|r| (r.text.as_str(), r.bold, r.italic, r.code))
            .collect();
        assert_eq!(
            styled,
            vec![
                ("b", true, false, false),
                ("c", true, false, false),
                ("d", false, true, false),
                ("e", false, true, false),
                ("f", false, false, true),
            ]
        );
    }

    #[test]
    fn unterminated_opener_is_literal() {
        assert_eq!(
            scan_inline("This is *unterminated"),
            vec![plain("This is *unterminated")]
        );
        assert_eq!(
            scan_inline("**open and **closed**"),
            vec![bold("open and "), plain("closed**")]
        );
    }

    #[test]
    fn underscores_inside_words_are_text() {
        assert_eq!(scan_inline("snake_case_name"), vec![plain("snake_case_name")]);
    }

    #[test]
    fn blocks_follow_lines() {
        let blocks = parse_blocks("# One\n\n#### Four\n##### Five\ntext");
        assert_eq!(
            blocks,
            vec![
                Block::Heading(1, vec![plain("One")]),
                Block::Empty,
                Block::Heading(4, vec![plain("Four")]),
                Block::Paragraph(vec![plain("##### Five")]),
                Block::Paragraph(vec![plain("text")]),
            ]
        );
    }

    #[test]
    fn package_contains_required_parts() {
        let bytes = markdown_to_docx("# Hi & bye\n\nBody", "Notes <1>").unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/document.xml",
            "word/styles.xml",
            "docProps/core.xml",
        ] {
            assert!(archive.by_name(part).is_ok(), "missing {}", part);
        }
        let mut core = String::new();
        archive
            .by_name("docProps/core.xml")
            .unwrap()
            .read_to_string(&mut core)
            .unwrap();
        assert!(core.contains("<dc:title>Notes &lt;1&gt;</dc:title>"));
    }

    #[test]
    fn import_reads_export_back() {
        let bytes =
            markdown_to_docx("# Report\n\nSome **bold** and *italic* text.", "Report").unwrap();
        let converted = docx_to_markdown(&bytes, &HtmlToMarkdownOptions::default()).unwrap();
        assert_eq!(
            converted.markdown,
            "# Report\n\nSome **bold** and *italic* text."
        );
        assert!(converted.warnings.is_empty());
    }
}
