//! Parser and serializer for inline CQ codes.
//!
//! Two dialects are recognised in message text:
//!
//! - attributed codes, `[CQ:kind,key=value,...]`;
//! - bare image references, `[IMG:path]`, also written `[图:path]`.
//!
//! [`tokenize`] splits a message into plain text and tags. A tag that does not
//! parse cleanly is returned as plain text so it is forwarded untouched.

use std::fmt;

const CQ_PREFIX: &str = "[CQ:";
const IMAGE_PREFIXES: [&str; 2] = ["[IMG:", "[图:"];

/// One attributed code: `[CQ:kind,key=value,...]`.
///
/// Attributes keep the order they were parsed (or set) in, so serializing a
/// code is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CqCode {
    pub kind: String,
    pub attrs: Vec<(String, String)>,
}

impl CqCode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Vec::new(),
        }
    }

    /// Builder form of [`CqCode::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Parse the body of a code, i.e. the text between `[CQ:` and `]`.
    ///
    /// Empty attribute slots (`,,` or a trailing comma) are skipped. Returns
    /// `None` for an empty kind or an attribute without `=`.
    pub fn parse(body: &str) -> Option<Self> {
        let mut parts = body.split(',');
        let kind = parts.next()?.trim();
        if kind.is_empty() || kind.contains('=') {
            return None;
        }

        let mut attrs = Vec::new();
        for part in parts {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            attrs.push((key.to_string(), value.trim().to_string()));
        }

        Some(Self {
            kind: kind.to_string(),
            attrs,
        })
    }

    /// Raw (still escaped) value of an attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace an attribute in place, or append it when absent.
    ///
    /// The value is written verbatim; callers escape it first.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }
}

impl fmt::Display for CqCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CQ_PREFIX}{}", self.kind)?;
        for (key, value) in &self.attrs {
            write!(f, ",{key}={value}")?;
        }
        f.write_str("]")
    }
}

/// A slice of message text produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece<'a> {
    /// Plain text, including tags that failed to parse.
    Text(&'a str),
    /// An attributed code; `raw` is the original tag text.
    Code { raw: &'a str, code: CqCode },
    /// A bare image reference; `src` is trimmed.
    Image { raw: &'a str, src: &'a str },
}

impl<'a> Piece<'a> {
    /// The original text of this piece.
    pub fn raw(&self) -> &'a str {
        match *self {
            Piece::Text(s) => s,
            Piece::Code { raw, .. } | Piece::Image { raw, .. } => raw,
        }
    }
}

/// Split message text into plain text, attributed codes and bare image
/// references, in order. Concatenating the `raw` text of every piece yields
/// the input.
pub fn tokenize(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('[') {
        let open = cursor + offset;
        let rest = &text[open..];

        let tag = if let Some(body_and_tail) = rest.strip_prefix(CQ_PREFIX) {
            body_and_tail.find(']').and_then(|close| {
                let body = &body_and_tail[..close];
                if body.contains('[') {
                    return None;
                }
                let code = CqCode::parse(body)?;
                let end = open + CQ_PREFIX.len() + close + 1;
                Some((
                    end,
                    Piece::Code {
                        raw: &text[open..end],
                        code,
                    },
                ))
            })
        } else {
            IMAGE_PREFIXES.iter().find_map(|prefix| {
                let body_and_tail = rest.strip_prefix(prefix)?;
                let close = body_and_tail.find(']')?;
                let src = body_and_tail[..close].trim();
                if src.is_empty() {
                    return None;
                }
                let end = open + prefix.len() + close + 1;
                Some((
                    end,
                    Piece::Image {
                        raw: &text[open..end],
                        src,
                    },
                ))
            })
        };

        match tag {
            Some((end, piece)) => {
                if text_start < open {
                    pieces.push(Piece::Text(&text[text_start..open]));
                }
                pieces.push(piece);
                text_start = end;
                cursor = end;
            }
            None => cursor = open + 1,
        }
    }

    if text_start < text.len() {
        pieces.push(Piece::Text(&text[text_start..]));
    }
    pieces
}

/// Make a URL safe to embed as an attribute value.
///
/// Characters that would end the value or the tag are percent-encoded, which
/// keeps the URL itself valid.
pub fn escape_url(url: &str) -> String {
    url.replace(',', "%2C")
        .replace('[', "%5B")
        .replace(']', "%5D")
}

/// Entity-escape an arbitrary attribute value.
pub fn escape_value(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
        .replace(',', "&#44;")
}

/// Reverse [`escape_value`].
pub fn unescape_value(value: &str) -> String {
    value
        .replace("&#44;", ",")
        .replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&amp;", "&")
}

/// `[CQ:image,file=<url>]`
pub fn image_code(url: &str) -> String {
    CqCode::new("image").with("file", escape_url(url)).to_string()
}

/// `[CQ:file,file=<url>,name=<name>]`
pub fn file_code(url: &str, name: &str) -> String {
    CqCode::new("file")
        .with("file", escape_url(url))
        .with("name", escape_value(name))
        .to_string()
}
