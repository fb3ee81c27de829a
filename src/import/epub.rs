//! EPUB → markdown.
//!
//! The OPF package is located through `META-INF/container.xml`. Chapters are
//! read in spine order, each one on the blocking pool with its own archive
//! handle, with at most `epub.max_concurrency` in flight. Image manifest
//! items are extracted the same way.

use futures::stream::{self, StreamExt};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

use super::html::{self, Element, HtmlToMarkdownOptions, Node};
use super::read_zip_entry;
use crate::config::EpubConfig;
use crate::error::ConvertError;
use crate::models::{BookMetadata, EmbeddedImage, ImportedDocument};

const FORMAT: &str = "epub";
const CONTAINER_PATH: &str = "META-INF/container.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Archive path, already resolved against the package directory.
    pub path: String,
    pub media_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct Package {
    pub metadata: BookMetadata,
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<String>,
}

impl Package {
    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub index: usize,
    pub path: String,
    pub title: Option<String>,
    pub markdown: String,
}

impl Chapter {
    fn into_section(self) -> Option<String> {
        match (self.title, self.markdown.is_empty()) {
            (Some(title), true) => Some(format!("## {}", title)),
            (Some(title), false) => Some(format!("## {}\n\n{}", title, self.markdown)),
            (None, false) => Some(self.markdown),
            (None, true) => None,
        }
    }
}

type Shared = Arc<Vec<u8>>;

pub async fn epub_to_markdown(
    bytes: Vec<u8>,
    config: &EpubConfig,
    options: &HtmlToMarkdownOptions,
) -> Result<ImportedDocument, ConvertError> {
    let data: Shared = Arc::new(bytes);
    let concurrency = config.max_concurrency.max(1);

    let package = {
        let data = data.clone();
        run_blocking(move || read_package(&data)).await?
    };

    let spine_items: Vec<ManifestItem> = package
        .spine
        .iter()
        .filter_map(|idref| {
            let item = package.item(idref).cloned();
            if item.is_none() {
                warn!(idref = %idref, "EPUB spine references a missing manifest item");
            }
            item
        })
        .collect();

    let chapters: Vec<Result<Chapter, ConvertError>> = stream::iter(spine_items.into_iter().enumerate())
        .map(|(index, item)| load_chapter(data.clone(), index, item, options.clone()))
        .buffered(concurrency)
        .collect()
        .await;

    let mut sections = Vec::new();
    for chapter in chapters {
        match chapter {
            Ok(chapter) => {
                debug!(index = chapter.index, path = %chapter.path, "Converted EPUB chapter");
                sections.extend(chapter.into_section());
            }
            Err(e) => warn!(error = %e, "Skipping unreadable EPUB chapter"),
        }
    }

    let image_items: Vec<ManifestItem> = package
        .manifest
        .iter()
        .filter(|item| item.media_type.starts_with("image/"))
        .cloned()
        .collect();
    let embedded_images: Vec<EmbeddedImage> = stream::iter(image_items)
        .map(|item| load_image(data.clone(), item))
        .buffered(concurrency)
        .filter_map(|result| async move {
            match result {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable EPUB image");
                    None
                }
            }
        })
        .collect()
        .await;

    let mut markdown = String::new();
    if config.include_metadata && !package.metadata.is_empty() {
        markdown.push_str(&metadata_frontmatter(&package.metadata)?);
    }
    markdown.push_str(&sections.join("\n\n"));

    let metadata = (!package.metadata.is_empty()).then_some(package.metadata);
    Ok(ImportedDocument {
        markdown,
        embedded_images,
        metadata,
    })
}

async fn load_chapter(
    data: Shared,
    index: usize,
    item: ManifestItem,
    options: HtmlToMarkdownOptions,
) -> Result<Chapter, ConvertError> {
    run_blocking(move || {
        let xhtml = read_entry(&data, &item.path)?;
        let (title, markdown) = chapter_to_markdown(&String::from_utf8_lossy(&xhtml), &options);
        Ok(Chapter {
            index,
            path: item.path,
            title,
            markdown,
        })
    })
    .await
}

async fn load_image(data: Shared, item: ManifestItem) -> Result<EmbeddedImage, ConvertError> {
    run_blocking(move || {
        let bytes = read_entry(&data, &item.path)?;
        Ok(EmbeddedImage {
            id: item.id,
            href: item.path,
            media_type: item.media_type,
            data: bytes,
        })
    })
    .await
}

/// Splits off the first `<h1>`/`<h2>` as the chapter title and converts the
/// remaining body.
pub fn chapter_to_markdown(
    xhtml: &str,
    options: &HtmlToMarkdownOptions,
) -> (Option<String>, String) {
    let mut root = html::parse_xhtml_body(xhtml);
    let title = take_first_heading(&mut root)
        .map(|heading| {
            html::text_content(&heading)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|title| !title.is_empty());
    (title, html::render_document(&root, options))
}

fn take_first_heading(el: &mut Element) -> Option<Element> {
    for i in 0..el.children.len() {
        if let Node::Element(child) = &mut el.children[i] {
            if child.name == "h1" || child.name == "h2" {
                if let Node::Element(heading) = el.children.remove(i) {
                    return Some(heading);
                }
                return None;
            }
            if let Some(found) = take_first_heading(child) {
                return Some(found);
            }
        }
    }
    None
}

fn metadata_frontmatter(metadata: &BookMetadata) -> Result<String, ConvertError> {
    let yaml = serde_yaml::to_string(metadata).map_err(|e| ConvertError::conversion(FORMAT, e))?;
    Ok(format!("---\n{}---\n\n", yaml))
}

async fn run_blocking<T, F>(f: F) -> Result<T, ConvertError>
where
    F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConvertError::conversion(FORMAT, e))?
}

fn read_entry(data: &[u8], path: &str) -> Result<Vec<u8>, ConvertError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ConvertError::conversion(FORMAT, e))?;
    read_zip_entry(&mut archive, path, FORMAT)
}

pub fn read_package(data: &[u8]) -> Result<Package, ConvertError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ConvertError::conversion(FORMAT, e))?;

    let container = read_zip_entry(&mut archive, CONTAINER_PATH, FORMAT)?;
    let opf_path = rootfile_path(&container)?;
    let opf = read_zip_entry(&mut archive, &opf_path, FORMAT)?;

    let base_dir = match opf_path.rfind('/') {
        Some(pos) => &opf_path[..pos],
        None => "",
    };
    parse_opf(&opf, base_dir)
}

fn rootfile_path(container: &[u8]) -> Result<String, ConvertError> {
    let mut reader = Reader::from_reader(container);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attr(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConvertError::conversion(FORMAT, e)),
            _ => {}
        }
        buf.clear();
    }
    Err(ConvertError::conversion(
        FORMAT,
        "container.xml has no rootfile",
    ))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Creator,
    Publisher,
    Language,
    Date,
    Description,
    Identifier { isbn_scheme: bool },
    Subject,
}

fn parse_opf(xml: &[u8], base_dir: &str) -> Result<Package, ConvertError> {
    let mut package = Package::default();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut in_metadata = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ConvertError::conversion(FORMAT, e))?
        {
            Event::Start(e) if e.local_name().as_ref() == b"metadata" => in_metadata = true,
            Event::Start(e) if in_metadata => {
                field = metadata_field(e.local_name().as_ref(), &e);
                text.clear();
            }
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        package.manifest.push(ManifestItem {
                            id,
                            path: resolve_href(base_dir, &href),
                            media_type: attr(&e, b"media-type").unwrap_or_default(),
                        });
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr(&e, b"idref") {
                        package.spine.push(idref);
                    }
                }
                _ => {}
            },
            Event::Text(t) if field.is_some() => {
                let value = t
                    .unescape()
                    .map_err(|e| ConvertError::conversion(FORMAT, e))?;
                text.push_str(&value);
            }
            Event::CData(t) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&t));
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"metadata" {
                    in_metadata = false;
                } else if let Some(f) = field.take() {
                    store_field(&mut package.metadata, f, text.trim());
                    text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(package)
}

fn metadata_field(name: &[u8], e: &BytesStart<'_>) -> Option<Field> {
    Some(match name {
        b"title" => Field::Title,
        b"creator" => Field::Creator,
        b"publisher" => Field::Publisher,
        b"language" => Field::Language,
        b"date" => Field::Date,
        b"description" => Field::Description,
        b"subject" => Field::Subject,
        b"identifier" => Field::Identifier {
            isbn_scheme: attr(e, b"scheme").is_some_and(|s| s.eq_ignore_ascii_case("isbn")),
        },
        _ => return None,
    })
}

fn store_field(metadata: &mut BookMetadata, field: Field, value: &str) {
    if value.is_empty() {
        return;
    }
    let set_once = |slot: &mut Option<String>| {
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    };
    match field {
        Field::Title => set_once(&mut metadata.title),
        Field::Creator => set_once(&mut metadata.creator),
        Field::Publisher => set_once(&mut metadata.publisher),
        Field::Language => set_once(&mut metadata.language),
        Field::Date => set_once(&mut metadata.date),
        Field::Description => set_once(&mut metadata.description),
        Field::Subject => metadata.subjects.push(value.to_string()),
        Field::Identifier { isbn_scheme } => {
            if metadata.isbn.is_none() {
                metadata.isbn = isbn_from_identifier(value, isbn_scheme);
            }
        }
    }
}

/// `urn:isbn:` identifiers, identifiers with an ISBN scheme, and bare 10 or
/// 13 digit identifiers count as ISBNs.
fn isbn_from_identifier(value: &str, isbn_scheme: bool) -> Option<String> {
    let lowered = value.to_ascii_lowercase();
    let candidate = lowered
        .strip_prefix("urn:isbn:")
        .or_else(|| lowered.strip_prefix("isbn:"))
        .map(str::trim);

    let digits: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
        .collect();
    let bare = value
        .chars()
        .all(|c| c.is_ascii_digit() || c == '-' || c == ' ' || c == 'X' || c == 'x')
        && (digits.len() == 10 || digits.len() == 13);

    match candidate {
        Some(isbn) => Some(isbn.to_uppercase()),
        None if isbn_scheme || bare => Some(value.trim().to_string()),
        None => None,
    }
}

/// Resolves an href relative to the package directory into an archive path.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let href = urlencoding::decode(href)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| href.to_string());

    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
