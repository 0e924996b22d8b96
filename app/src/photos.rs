//! Fetching and decoding of the images embedded in a quote.
//!
//! A photo reference is an `http(s)://` URL, a `data:image/*;base64,` URL or a
//! local path. Loading never fails the caller: a photo that cannot be read is
//! logged and comes back as `None`, which the renderer draws as an empty slot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use futures_util::StreamExt;
use printpdf::image_crate::{self, DynamicImage};

use crate::error::Result;

/// Upper bound on a single downloaded or read image.
pub const MAX_PHOTO_BYTES: usize = 15 * 1024 * 1024;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(reqwest::StatusCode),
    #[error("image exceeds {MAX_PHOTO_BYTES} bytes")]
    TooLarge,
    #[error("malformed data url")]
    DataUrl,
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] image_crate::ImageError),
}

/// Decodes `data:<mime>;base64,<payload>`. Only base64 payloads are accepted.
fn decode_data_url(s: &str) -> Result<Vec<u8>, LoadError> {
    let s = s.trim();
    if !s.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return Err(LoadError::DataUrl);
    }
    let comma = s.find(',').ok_or(LoadError::DataUrl)?;
    let (meta, data) = s.split_at(comma);
    if !meta.to_ascii_lowercase().contains(";base64") {
        return Err(LoadError::DataUrl);
    }
    base64::engine::general_purpose::STANDARD
        .decode(data[1..].trim())
        .map_err(|_| LoadError::DataUrl)
}

/// The company logo as stored in settings. Anything unreadable means no logo.
pub fn decode_logo(data_url: &str) -> Option<DynamicImage> {
    if data_url.trim().is_empty() {
        return None;
    }
    match decode_data_url(data_url).and_then(|b| Ok(image_crate::load_from_memory(&b)?)) {
        Ok(img) => Some(img),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable logo");
            None
        }
    }
}

fn is_http(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[derive(Debug, Clone)]
pub struct PhotoLoader {
    client: reqwest::Client,
    base_dir: Option<PathBuf>,
    max_bytes: usize,
}

impl PhotoLoader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("oficina/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_dir: None,
            max_bytes: MAX_PHOTO_BYTES,
        })
    }

    /// Relative paths resolve against `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Loads every reference in order, one at a time. The output has one slot
    /// per input.
    pub async fn load_all<'a, I>(&self, urls: I) -> Vec<Option<DynamicImage>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Vec::new();
        for url in urls {
            out.push(self.load(url).await);
        }
        out
    }

    pub async fn load(&self, url: &str) -> Option<DynamicImage> {
        let result = self.read_bytes(url).await.and_then(|bytes| Ok(image_crate::load_from_memory(&bytes)?));
        match result {
            Ok(img) => {
                tracing::debug!(url = %short(url), width = img.width(), height = img.height(), "photo loaded");
                Some(img)
            }
            Err(e) => {
                tracing::warn!(url = %short(url), error = %e, "photo skipped");
                None
            }
        }
    }

    async fn read_bytes(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let url = url.trim();
        if is_http(url) {
            return self.fetch(url).await;
        }
        if url.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
            let bytes = decode_data_url(url)?;
            if bytes.len() > self.max_bytes {
                return Err(LoadError::TooLarge);
            }
            return Ok(bytes);
        }

        let raw = url.strip_prefix("file://").unwrap_or(url);
        let path = match (&self.base_dir, Path::new(raw).is_relative()) {
            (Some(base), true) => base.join(raw),
            _ => PathBuf::from(raw),
        };
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > self.max_bytes as u64 {
            return Err(LoadError::TooLarge);
        }
        Ok(tokio::fs::read(&path).await?)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Status(status));
        }
        if resp.content_length().is_some_and(|n| n > self.max_bytes as u64) {
            return Err(LoadError::TooLarge);
        }

        let mut buf: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(LoadError::TooLarge);
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

/// Data URLs are huge; log only their head.
fn short(url: &str) -> &str {
    match url.char_indices().nth(64) {
        Some((i, _)) => &url[..i],
        None => url,
    }
}
