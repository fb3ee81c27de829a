//! Image localization.
//!
//! Rewrites markdown image references so that every image is served from
//! the local image store: `data:image/*;base64,` URIs are decoded, remote
//! `http(s)` images are downloaded, and images shipped inside an imported
//! container (EPUB) are stored directly. Each stored image is referenced as
//! `/api/images/{id}`.
//!
//! Localization never fails as a whole. An image that cannot be decoded,
//! fetched, or stored keeps its original reference and is logged.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ImagesConfig;
use crate::models::{EmbeddedImage, LocalizedImage};
use crate::store::ImageRepository;

/// Route prefix under which stored images are served.
pub const IMAGE_ROUTE: &str = "/api/images";

static IMAGE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"!\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).unwrap());
static DATA_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^data:(image/[A-Za-z0-9.+-]+)(?:;[A-Za-z0-9=.+-]+)*;base64,(.*)$").unwrap()
});

#[derive(Debug, Clone, Default)]
pub struct LocalizeOutcome {
    pub markdown: String,
    pub images: Vec<LocalizedImage>,
    pub localized_count: usize,
}

/// A resolved image waiting to be stored.
struct Fetched {
    data: Vec<u8>,
    filename: String,
    mime_type: String,
}

pub struct ImageLocalizer {
    repository: Arc<dyn ImageRepository>,
    client: reqwest::Client,
    max_bytes: usize,
}

impl ImageLocalizer {
    pub fn new(repository: Arc<dyn ImageRepository>, config: &ImagesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client for image fetching")?;
        Ok(Self {
            repository,
            client,
            max_bytes: config.max_bytes,
        })
    }

    pub fn repository(&self) -> &Arc<dyn ImageRepository> {
        &self.repository
    }

    /// Stores data-URI and remote images and rewrites their references.
    pub async fn localize_images(&self, markdown: &str, document_id: &str) -> LocalizeOutcome {
        let mut data_uri_count = 0usize;
        self.rewrite(markdown, document_id, |src| {
            if src.starts_with("data:") {
                data_uri_count += 1;
                Some(Source::DataUri(data_uri_count))
            } else if src.starts_with("http://") || src.starts_with("https://") {
                Some(Source::Remote)
            } else {
                None
            }
        })
        .await
    }

    /// Stores images that came with an imported container and rewrites the
    /// references that point at them.
    pub async fn localize_embedded(
        &self,
        markdown: &str,
        images: &[EmbeddedImage],
        document_id: &str,
    ) -> LocalizeOutcome {
        if images.is_empty() {
            return LocalizeOutcome {
                markdown: markdown.to_string(),
                ..Default::default()
            };
        }
        self.rewrite(markdown, document_id, |src| {
            find_embedded(images, src).map(Source::Embedded)
        })
        .await
    }

    async fn rewrite<'i, F>(&self, markdown: &str, document_id: &str, mut classify: F) -> LocalizeOutcome
    where
        F: FnMut(&str) -> Option<Source<'i>>,
    {
        let mut out = String::with_capacity(markdown.len());
        let mut images = Vec::new();
        let mut last = 0;

        let refs: Vec<ImageRef<'_>> = IMAGE_REF_RE
            .captures_iter(markdown)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(ImageRef {
                    start: whole.start(),
                    end: whole.end(),
                    alt: caps.get(1)?.as_str(),
                    src: caps.get(2)?.as_str(),
                })
            })
            .collect();

        for image_ref in refs {
            let Some(source) = classify(image_ref.src) else {
                continue;
            };

            match self.store(image_ref.src, source, document_id).await {
                Ok(image) => {
                    out.push_str(&markdown[last..image_ref.start]);
                    out.push_str(&format!("![{}]({})", image_ref.alt, image.new_reference));
                    last = image_ref.end;
                    images.push(image);
                }
                Err(e) => {
                    warn!(
                        src = %truncate_src(image_ref.src),
                        error = %format!("{:#}", e),
                        "Keeping original image reference"
                    );
                }
            }
        }
        out.push_str(&markdown[last..]);

        LocalizeOutcome {
            localized_count: images.len(),
            markdown: out,
            images,
        }
    }

    async fn store(&self, src: &str, source: Source<'_>, document_id: &str) -> Result<LocalizedImage> {
        let fetched = match source {
            Source::DataUri(n) => decode_data_uri(src, n)?,
            Source::Remote => self.fetch_remote(src).await?,
            Source::Embedded(image) => Fetched {
                data: image.data.clone(),
                filename: file_name_of(&image.href).unwrap_or_else(|| image.id.clone()),
                mime_type: image.media_type.clone(),
            },
        };

        let stored = self
            .repository
            .store_image(&fetched.data, &fetched.filename, &fetched.mime_type, document_id)
            .await?;
        debug!(id = %stored.image_id, filename = %fetched.filename, "Stored image");

        Ok(LocalizedImage {
            new_reference: format!("{}/{}", IMAGE_ROUTE, stored.image_id),
            image_id: stored.image_id,
            original_src: src.to_string(),
            original_name: fetched.filename,
        })
    }

    async fn fetch_remote(&self, src: &str) -> Result<Fetched> {
        let url = Url::parse(src).with_context(|| format!("Invalid image URL: {}", src))?;
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        let header_mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        let url_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| name.contains('.'))
            .map(|name| {
                urlencoding::decode(name)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| name.to_string())
            });

        let mime_type = match (&header_mime, &url_name) {
            (Some(mime), _) if mime.starts_with("image/") => mime.clone(),
            (_, Some(name)) => mime_guess::from_path(name)
                .first()
                .map(|m| m.essence_str().to_string())
                .filter(|m| m.starts_with("image/"))
                .ok_or_else(|| anyhow!("{} is not an image", src))?,
            _ => bail!(
                "{} did not return an image (content type {})",
                src,
                header_mime.as_deref().unwrap_or("missing")
            ),
        };

        let filename = url_name.unwrap_or_else(|| {
            format!(
                "image-{}.{}",
                uuid::Uuid::new_v4(),
                extension_for_mime(&mime_type)
            )
        });

        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                bail!("{} is {} bytes, over the {} byte limit", src, length, self.max_bytes);
            }
        }
        // Content-Length may be absent or wrong; enforce the limit while reading.
        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if data.len() + chunk.len() > self.max_bytes {
                bail!("{} exceeds the {} byte limit", src, self.max_bytes);
            }
            data.extend_from_slice(&chunk);
        }
        if data.is_empty() {
            bail!("{} returned an empty body", src);
        }

        Ok(Fetched {
            data,
            filename,
            mime_type,
        })
    }
}

struct ImageRef<'m> {
    start: usize,
    end: usize,
    alt: &'m str,
    src: &'m str,
}

enum Source<'i> {
    /// 1-based position among the data URIs of one document.
    DataUri(usize),
    Remote,
    Embedded(&'i EmbeddedImage),
}

fn decode_data_uri(src: &str, n: usize) -> Result<Fetched> {
    let caps = DATA_URI_RE
        .captures(src)
        .ok_or_else(|| anyhow!("Not a base64 image data URI"))?;
    let mime_type = caps[1].to_ascii_lowercase();
    let payload: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .context("Invalid base64 image data")?;
    if data.is_empty() {
        bail!("Empty image data URI");
    }
    Ok(Fetched {
        filename: format!("image-{}.{}", n, extension_for_mime(&mime_type)),
        data,
        mime_type,
    })
}

pub fn extension_for_mime(mime_type: &str) -> String {
    match mime_type {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg".to_string(),
        "image/svg+xml" => "svg".to_string(),
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico".to_string(),
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first())
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| {
                other
                    .rsplit('/')
                    .next()
                    .unwrap_or("bin")
                    .split('+')
                    .next()
                    .unwrap_or("bin")
                    .to_string()
            }),
    }
}

/// The embedded image a markdown `src` refers to, matched on the normalized
/// path suffix.
fn find_embedded<'i>(images: &'i [EmbeddedImage], src: &str) -> Option<&'i EmbeddedImage> {
    if src.contains("://") || src.starts_with("data:") || src.starts_with(IMAGE_ROUTE) {
        return None;
    }
    let decoded = urlencoding::decode(src)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| src.to_string());
    let relative: Vec<&str> = decoded
        .split('#')
        .next()
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    if relative.is_empty() {
        return None;
    }
    let suffix = relative.join("/");

    images.iter().find(|image| {
        image.href == suffix || image.href.ends_with(&format!("/{}", suffix))
    })
}

fn file_name_of(path: &str) -> Option<String> {
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn truncate_src(src: &str) -> String {
    const MAX: usize = 80;
    if src.chars().count() <= MAX {
        src.to_string()
    } else {
        format!("{}...", src.chars().take(MAX).collect::<String>())
    }
}
