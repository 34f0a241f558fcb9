//! Following invitation links to their final content.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Url;
use scraper::{Html, Selector};
use shared_types::{ContentType, LinkResolution};
use std::time::Duration;

const MAX_REDIRECTS: usize = 10;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp"];

/// Preview image sources, most specific first
const PREVIEW_IMAGE_SELECTORS: &[(&str, &str)] = &[
    (r#"meta[property="og:image"]"#, "content"),
    (r#"meta[name="og:image"]"#, "content"),
    (r#"meta[name="twitter:image"]"#, "content"),
    (r#"meta[property="twitter:image"]"#, "content"),
];

pub struct LinkResolver {
    http: reqwest::Client,
    resolve_timeout: Duration,
    image_timeout: Duration,
}

struct Fetched {
    final_url: String,
    header_type: Option<String>,
    body: Vec<u8>,
}

impl LinkResolver {
    pub fn new(user_agent: &str, resolve_timeout: Duration, image_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .context("Failed to create link resolver HTTP client")?;

        Ok(Self {
            http,
            resolve_timeout,
            image_timeout,
        })
    }

    /// Follow `url` through its redirects and classify what it points at.
    ///
    /// An HTML page with a preview image resolves to that image; without one
    /// (or when the image cannot be fetched) the page itself is returned for
    /// text scanning.
    pub async fn resolve(&self, url: &str) -> Result<LinkResolution, PipelineError> {
        let page = self.fetch(url, self.resolve_timeout).await?;
        let content_type = classify(page.header_type.as_deref(), &page.body, &page.final_url);
        tracing::debug!("{} resolved to {} ({})", url, page.final_url, content_type);

        if content_type == ContentType::Html {
            let html = String::from_utf8_lossy(&page.body);
            if let Some(image_url) = preview_image(&html, &page.final_url) {
                match self.fetch_image(&image_url).await {
                    Ok(image) => return Ok(image),
                    Err(e) => tracing::warn!("Preview image unusable, scanning page text: {}", e),
                }
            }
        }

        Ok(LinkResolution {
            final_url: page.final_url,
            content_type,
            payload: page.body,
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<LinkResolution, PipelineError> {
        let image = self.fetch(url, self.image_timeout).await?;
        match classify(image.header_type.as_deref(), &image.body, &image.final_url) {
            ContentType::Image => Ok(LinkResolution {
                final_url: image.final_url,
                content_type: ContentType::Image,
                payload: image.body,
            }),
            other => Err(PipelineError::link(url, format!("expected an image, got {}", other))),
        }
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Fetched, PipelineError> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| PipelineError::link(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::link(url, format!("status {}", status)));
        }

        let final_url = response.url().to_string();
        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::link(url, e))?;

        Ok(Fetched {
            final_url,
            header_type,
            body: body.to_vec(),
        })
    }
}

/// Classify by `Content-Type` first; sniff the body (then the URL) only when
/// the header is missing or generic.
pub fn classify(header: Option<&str>, body: &[u8], url: &str) -> ContentType {
    let mime = header
        .and_then(|h| h.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let generic = mime.is_empty()
        || mime == "application/octet-stream"
        || mime == "binary/octet-stream";

    if !generic {
        return from_mime(&mime);
    }

    if let Some(kind) = infer::get(body) {
        match from_mime(kind.mime_type()) {
            ContentType::Unknown => {}
            known => return known,
        }
    }

    if looks_like_html(body) {
        return ContentType::Html;
    }

    from_extension(url)
}

fn from_mime(mime: &str) -> ContentType {
    if mime.starts_with("image/") {
        ContentType::Image
    } else if mime == "text/html" || mime == "application/xhtml+xml" {
        ContentType::Html
    } else if mime == "application/pdf" {
        ContentType::Pdf
    } else {
        ContentType::Unknown
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let head: Vec<u8> = body.iter().take(512).map(u8::to_ascii_lowercase).collect();
    let head = String::from_utf8_lossy(&head);
    let head = head.trim_start();
    head.starts_with('<') && (head.contains("<html") || head.contains("<!doctype html"))
}

fn from_extension(url: &str) -> ContentType {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());

    if has_image_extension(&path) {
        ContentType::Image
    } else if path.ends_with(".pdf") {
        ContentType::Pdf
    } else if path.ends_with(".html") || path.ends_with(".htm") {
        ContentType::Html
    } else {
        ContentType::Unknown
    }
}

fn has_image_extension(path: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Absolute URL of the page's representative image: `og:image`, then
/// `twitter:image`, then the first `<img>` that looks like an image file.
pub fn preview_image(html: &str, base_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();

    let absolute = |candidate: &str| -> Option<String> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return None;
        }
        match &base {
            Some(base) => base.join(candidate).ok().map(|u| u.to_string()),
            None => Url::parse(candidate).ok().map(|u| u.to_string()),
        }
    };

    for (selector, attr) in PREVIEW_IMAGE_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        let found = document
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .find_map(|src| absolute(src));
        if found.is_some() {
            return found;
        }
    }

    let images = Selector::parse("img[src]").ok()?;
    let found = document
        .select(&images)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| absolute(src))
        .find(|src| {
            Url::parse(src)
                .map(|u| has_image_extension(&u.path().to_ascii_lowercase()))
                .unwrap_or(false)
        });
    found
}
