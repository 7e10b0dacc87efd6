//! Media references and the resolver seam.
//!
//! A message can point at media in four ways: a remote URL, an inline base64
//! payload, a `file://` URI or a bare filesystem path. [`MediaRef::classify`]
//! tells them apart; a [`Resolve`] implementation turns one into something the
//! backend can fetch.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

const BASE64_SCHEME: &str = "base64://";
const FILE_SCHEME: &str = "file://";

/// Whether `s` starts with an `http://` or `https://` scheme.
pub fn has_http_scheme(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// A classified media reference. The first matching form wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef<'a> {
    /// `http(s)://...`, used as-is.
    Remote(&'a str),
    /// Base64 text after `base64://`, with any `<meta>,` prefix dropped.
    Base64(&'a str),
    /// Local path taken from a `file://` URI.
    FileUri(PathBuf),
    /// Anything else, as a filesystem path.
    Path(PathBuf),
}

impl<'a> MediaRef<'a> {
    pub fn classify(reference: &'a str) -> Self {
        if has_http_scheme(reference) {
            return MediaRef::Remote(reference);
        }

        if let Some(encoded) = reference.strip_prefix(BASE64_SCHEME) {
            // `base64://data:image/png;base64,AAAA` carries a header to discard
            let payload = match encoded.find(',') {
                Some(idx) => &encoded[idx + 1..],
                None => encoded,
            };
            return MediaRef::Base64(payload);
        }

        if let Some(rest) = reference.strip_prefix(FILE_SCHEME) {
            return MediaRef::FileUri(file_uri_path(rest));
        }

        MediaRef::Path(PathBuf::from(reference))
    }
}

/// Path part of a `file://` URI, percent-decoded.
fn file_uri_path(rest: &str) -> PathBuf {
    let decoded = urlencoding::decode(rest)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| rest.to_string());
    PathBuf::from(strip_drive_separator(&decoded, cfg!(windows)))
}

/// `/C:/dir/a.png` → `C:/dir/a.png` where paths start with a drive letter.
fn strip_drive_separator(path: &str, drive_letters: bool) -> &str {
    if !drive_letters {
        return path;
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
    {
        &path[1..]
    } else {
        path
    }
}

/// Last non-empty path segment of a URL, percent-decoded, ignoring query and
/// fragment.
pub fn url_file_name(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path_end = without_scheme
        .find(['?', '#'])
        .unwrap_or(without_scheme.len());
    let (_, path) = without_scheme[..path_end].split_once('/')?;
    let segment = path.rsplit('/').find(|segment| !segment.is_empty())?;
    Some(match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    })
}

/// Outcome of resolving one reference.
///
/// Both locations empty means resolution failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// URL the backend can download.
    pub remote_url: Option<String>,
    /// Path on the backend's own filesystem.
    pub local_path: Option<String>,
    pub display_name: String,
}

impl ResolvedMedia {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.remote_url.is_none() && self.local_path.is_none()
    }
}

/// Turns a raw media reference into a usable location.
///
/// Implementations never fail: an unresolvable reference yields
/// [`ResolvedMedia::failed`] and is logged by the implementation.
pub trait Resolve: Send + Sync {
    fn resolve<'a>(
        &'a self,
        reference: &'a str,
        suggested_name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = ResolvedMedia> + Send + 'a>>;
}

impl<R: Resolve + ?Sized> Resolve for std::sync::Arc<R> {
    fn resolve<'a>(
        &'a self,
        reference: &'a str,
        suggested_name: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = ResolvedMedia> + Send + 'a>> {
        (**self).resolve(reference, suggested_name)
    }
}
