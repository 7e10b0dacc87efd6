//! Production [`Resolve`] implementation backed by the upload service.

use super::upload::{UploadClient, UploadResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cqrelay_core::media::url_file_name;
use cqrelay_core::{MediaRef, RelayError, RelayResult, Resolve, ResolvedMedia};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, warn};

/// Name given to inline payloads that arrive without one.
const DEFAULT_BLOB_NAME: &str = "file.bin";

/// Longest prefix of a reference that is written to the log.
const LOG_PREVIEW_CHARS: usize = 96;

pub struct MediaResolver {
    uploader: UploadClient,
    /// Directory relative paths are resolved against.
    base_dir: PathBuf,
}

impl MediaResolver {
    /// Resolve relative paths against the process working directory.
    pub fn new(uploader: UploadClient) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|e| {
            warn!(error = %e, "cannot read working directory, relative paths resolve against '.'");
            PathBuf::from(".")
        });
        Self::with_base_dir(uploader, base_dir)
    }

    pub fn with_base_dir(uploader: UploadClient, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        debug!(
            endpoint = uploader.endpoint(),
            base_dir = %base_dir.display(),
            "media resolver ready"
        );
        Self { uploader, base_dir }
    }

    async fn resolve_reference(
        &self,
        reference: &str,
        suggested_name: Option<&str>,
    ) -> RelayResult<ResolvedMedia> {
        let suggested_name = suggested_name.filter(|n| !n.is_empty());

        match MediaRef::classify(reference) {
            MediaRef::Remote(url) => Ok(ResolvedMedia {
                remote_url: Some(url.to_string()),
                local_path: None,
                display_name: suggested_name
                    .map(str::to_string)
                    .or_else(|| url_file_name(url))
                    .unwrap_or_default(),
            }),
            MediaRef::Base64(payload) => {
                // Line-wrapped (MIME style) payloads are accepted.
                let compact: String = payload
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                let bytes = STANDARD
                    .decode(compact)
                    .map_err(|e| RelayError::Decode(format!("invalid base64 payload: {e}")))?;
                let name = suggested_name.unwrap_or(DEFAULT_BLOB_NAME);
                self.upload(bytes, name).await
            }
            MediaRef::FileUri(path) | MediaRef::Path(path) => {
                let path = self.absolute(&path);
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    RelayError::Io(std::io::Error::new(
                        e.kind(),
                        format!("cannot read {}: {e}", path.display()),
                    ))
                })?;
                let name = match suggested_name {
                    Some(name) => name.to_string(),
                    None => path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| DEFAULT_BLOB_NAME.to_string()),
                };
                self.upload(bytes, &name).await
            }
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str) -> RelayResult<ResolvedMedia> {
        let UploadResponse {
            url,
            name: stored_name,
            local_path,
        } = self.uploader.upload(bytes, name).await?;

        Ok(ResolvedMedia {
            remote_url: Some(url).filter(|u| !u.is_empty()),
            local_path: Some(local_path).filter(|p| !p.is_empty()),
            display_name: if stored_name.is_empty() {
                name.to_string()
            } else {
                stored_name
            },
        })
    }
}

impl Resolve for MediaResolver {
    fn resolve<'a>(
        &'a self,
        reference: &'a str,
        suggested_name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = ResolvedMedia> + Send + 'a>> {
        Box::pin(async move {
            match self.resolve_reference(reference, suggested_name).await {
                Ok(media) => {
                    debug!(
                        reference = %preview(reference),
                        url = ?media.remote_url,
                        local_path = ?media.local_path,
                        "resolved media"
                    );
                    media
                }
                Err(e) => {
                    warn!(reference = %preview(reference), error = %e, "media resolution failed");
                    ResolvedMedia::failed()
                }
            }
        })
    }
}

/// Inline payloads can be megabytes long; only log their head.
fn preview(reference: &str) -> String {
    let mut chars = reference.chars();
    let head: String = chars.by_ref().take(LOG_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
