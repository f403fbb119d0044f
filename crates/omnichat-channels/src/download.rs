use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use omnichat_core::{
    credentials::{CredentialProvider, YCLOUD_API_KEY},
    MediaType, TenantId,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{error::ChannelError, media};

/// URL prefix under which downloaded files are served.
pub const LOCAL_MEDIA_PREFIX: &str = "/media/";

/// Copies remote attachments into tenant-scoped local storage.
///
/// Never fails: on any error the original URL comes back unchanged so the
/// message can still be persisted.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str, tenant: TenantId, hinted: MediaType) -> String;
}

pub struct HttpMediaDownloader {
    client: reqwest::Client,
    root: PathBuf,
    max_bytes: u64,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl HttpMediaDownloader {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            root: root.into(),
            max_bytes,
            credentials: None,
        }
    }

    /// Enables the tenant's YCloud API key on downloads from YCloud hosts.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    async fn fetch_and_store(
        &self,
        url: &str,
        tenant: TenantId,
        hinted: MediaType,
    ) -> Result<String, ChannelError> {
        let mut req = self.client.get(url);
        if url.to_ascii_lowercase().contains("ycloud") {
            if let Some(key) = self
                .credentials
                .as_ref()
                .and_then(|c| c.get(tenant, YCLOUD_API_KEY))
            {
                req = req.header("X-API-Key", key);
            }
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ChannelError::Api {
                status: status.as_u16(),
                message: format!("media download failed for {}", truncate(url)),
            });
        }
        if resp.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(self.too_large());
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let ext = pick_extension(url, &content_type, hinted);
        let file_name = format!("{}{}", Uuid::new_v4(), ext);
        let dir = self.root.join(tenant.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(&file_name);

        let written = match self.stream_to_file(resp, &path).await {
            Ok(n) => n,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %rm, "no partial media file to remove");
                }
                return Err(e);
            }
        };

        info!(
            tenant = %tenant,
            bytes = written,
            ext = %ext,
            "media stored locally"
        );
        Ok(format!("{LOCAL_MEDIA_PREFIX}{tenant}/{file_name}"))
    }

    /// Copies the body chunk by chunk; a missing Content-Length is bounded here.
    async fn stream_to_file(&self, resp: reqwest::Response, path: &Path) -> Result<u64, ChannelError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut body = resp.bytes_stream();
        let mut total: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(self.too_large());
            }
            file.write_all(&chunk).await?;
        }
        if total == 0 {
            return Err(ChannelError::InvalidPayload("empty media body".to_string()));
        }
        file.flush().await?;
        Ok(total)
    }

    fn too_large(&self) -> ChannelError {
        ChannelError::InvalidPayload(format!("media larger than {} bytes", self.max_bytes))
    }
}

#[async_trait]
impl MediaDownloader for HttpMediaDownloader {
    async fn download(&self, url: &str, tenant: TenantId, hinted: MediaType) -> String {
        if url.is_empty() || url.starts_with(LOCAL_MEDIA_PREFIX) {
            return url.to_string();
        }
        match self.fetch_and_store(url, tenant, hinted).await {
            Ok(local) => local,
            Err(ChannelError::InvalidPayload(reason)) => {
                warn!(tenant = %tenant, url = %truncate(url), %reason, "media not stored");
                url.to_string()
            }
            Err(e) => {
                error!(tenant = %tenant, url = %truncate(url), error = %e, "media download failed");
                url.to_string()
            }
        }
    }
}

/// Extension with leading dot: URL path first, then Content-Type, then a
/// default for the hinted media type.
pub fn pick_extension(url: &str, content_type: &str, hinted: MediaType) -> String {
    let default = match hinted {
        MediaType::Audio => "ogg",
        MediaType::Image => "jpg",
        MediaType::Video => "mp4",
        MediaType::Document => "pdf",
    };

    if let Some(ext) = media::url_extension(url)
        .filter(|e| mime_guess::from_ext(e).first_raw().is_some())
    {
        return format!(".{ext}");
    }

    let ct = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !ct.is_empty() && ct != "application/octet-stream" {
        if let Some(exts) = mime_guess::get_mime_extensions_str(&ct) {
            // Several spellings map to one type; keep the usual one when listed.
            let ext = exts.iter().find(|e| **e == default).or_else(|| exts.first());
            if let Some(ext) = ext {
                return format!(".{ext}");
            }
        }
    }

    format!(".{default}")
}

fn truncate(url: &str) -> &str {
    match url.char_indices().nth(80) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
