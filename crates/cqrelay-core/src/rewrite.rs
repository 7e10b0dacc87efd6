//! Rewrite engine: replaces local media references in outgoing commands with
//! locations the backend can use.
//!
//! Handled actions:
//!
//! - `send_msg`, `send_private_msg`, `send_group_msg`: media codes and bare
//!   image references in text messages, media and text segments in array
//!   messages;
//! - `upload_private_file`, `upload_group_file`: the file is re-pointed at a
//!   backend-local path, or the command becomes a message carrying a
//!   `[CQ:file]` link when only a URL is available.
//!
//! Every failure leaves the frame untouched. A frame is re-encoded only when at
//! least one reference in it actually changed.

use crate::cqcode::{
    escape_url, escape_value, file_code, image_code, tokenize, unescape_value, CqCode, Piece,
};
use crate::envelope::{
    Command, Envelope, MediaData, Message, Segment, SegmentKind, SendAction, SendMsgParams,
    TextData, UploadFileParams, UploadTarget,
};
use crate::media::{has_http_scheme, Resolve};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const MEDIA_CODE_KINDS: [&str; 3] = ["image", "record", "video"];

/// Rewrites client→backend frames through a [`Resolve`] implementation.
pub struct Rewriter<R> {
    resolver: R,
}

impl<R: Resolve> Rewriter<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Rewrite one text frame. Returns the input unchanged when there is
    /// nothing to rewrite or anything goes wrong.
    pub async fn rewrite(&self, frame: &str) -> String {
        match self.try_rewrite(frame).await {
            Some(rewritten) => rewritten,
            None => frame.to_string(),
        }
    }

    /// Like [`Rewriter::rewrite`], but `None` means "forward the original".
    pub async fn try_rewrite(&self, frame: &str) -> Option<String> {
        let mut envelope = Envelope::parse(frame).ok()?;
        let params = std::mem::take(&mut envelope.params);

        let (action, params) = match Command::decode(&envelope.action, params) {
            Command::Send { action, params } => self.rewrite_send(action, params).await?,
            Command::UploadFile { target, params } => self.rewrite_upload(target, params).await?,
            Command::Other => return None,
        };

        envelope.action = action.to_string();
        envelope.params = params;
        match envelope.to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(error = %e, "failed to encode rewritten command");
                None
            }
        }
    }

    async fn rewrite_send(
        &self,
        action: SendAction,
        mut params: SendMsgParams,
    ) -> Option<(&'static str, Value)> {
        let changed = match &mut params.message {
            Message::Text(text) => match self.rewrite_text(text, true).await {
                Some(rewritten) => {
                    *text = rewritten;
                    true
                }
                None => false,
            },
            Message::Segments(segments) => self.rewrite_segments(segments).await,
        };
        if !changed {
            return None;
        }
        let params = encode(&params)?;
        Some((action.as_str(), params))
    }

    /// Rewrite inline references in message text. Attributed codes are only
    /// considered when `with_codes` is set; bare image references always are.
    async fn rewrite_text(&self, text: &str, with_codes: bool) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut changed = false;

        for piece in tokenize(text) {
            let replacement = match &piece {
                Piece::Code { code, .. } if with_codes => self.rewrite_code(code).await,
                Piece::Image { src, .. } => self.rewrite_image(src).await,
                _ => None,
            };
            match replacement {
                Some(replacement) => {
                    out.push_str(&replacement);
                    changed = true;
                }
                None => out.push_str(piece.raw()),
            }
        }

        changed.then_some(out)
    }

    async fn rewrite_code(&self, code: &CqCode) -> Option<String> {
        if !MEDIA_CODE_KINDS.contains(&code.kind.as_str()) {
            return None;
        }
        if code.get("url").is_some_and(has_http_scheme) {
            return None;
        }
        let file = unescape_value(code.get("file")?);
        if file.is_empty() || has_http_scheme(&file) {
            return None;
        }
        let name = code.get("name").map(unescape_value);

        let media = self.resolver.resolve(&file, name.as_deref()).await;
        let url = media.remote_url?;

        let mut code = code.clone();
        code.set("file", escape_url(&url));
        if !media.display_name.is_empty() {
            code.set("name", escape_value(&media.display_name));
        }
        debug!(kind = %code.kind, from = %file, to = %url, "rewrote media code");
        Some(code.to_string())
    }

    async fn rewrite_image(&self, src: &str) -> Option<String> {
        let url = self.resolver.resolve(src, None).await.remote_url?;
        debug!(from = %src, to = %url, "rewrote image reference");
        Some(image_code(&url))
    }

    async fn rewrite_segments(&self, segments: &mut [Value]) -> bool {
        let mut changed = false;

        for slot in segments.iter_mut() {
            let Ok(mut segment) = serde_json::from_value::<Segment>(slot.clone()) else {
                continue;
            };
            let data = match segment.kind() {
                kind if kind.is_media() => self.rewrite_media_data(&segment.data).await,
                SegmentKind::Text => self.rewrite_text_data(&segment.data).await,
                _ => None,
            };
            let Some(data) = data else {
                continue;
            };

            segment.data = data;
            if let Some(value) = encode(&segment) {
                *slot = value;
                changed = true;
            }
        }

        changed
    }

    async fn rewrite_media_data(&self, data: &Value) -> Option<Value> {
        let mut data: MediaData = serde_json::from_value(data.clone()).ok()?;
        if data.url.as_deref().is_some_and(has_http_scheme) {
            return None;
        }
        let source = data.source()?.to_string();

        let url = self.resolver.resolve(&source, None).await.remote_url?;
        debug!(from = %source, to = %url, "rewrote media segment");

        data.file = Some(url.clone());
        data.url = Some(url);
        data.path = None;
        encode(&data)
    }

    async fn rewrite_text_data(&self, data: &Value) -> Option<Value> {
        let mut data: TextData = serde_json::from_value(data.clone()).ok()?;
        data.text = self.rewrite_text(&data.text, false).await?;
        encode(&data)
    }

    async fn rewrite_upload(
        &self,
        target: UploadTarget,
        params: UploadFileParams,
    ) -> Option<(&'static str, Value)> {
        let UploadFileParams { file, name, rest } = params;
        let media = self.resolver.resolve(&file, name.as_deref()).await;

        let display_name = if media.display_name.is_empty() {
            name.clone().unwrap_or_default()
        } else {
            media.display_name.clone()
        };

        if let Some(local_path) = media.local_path {
            info!(
                action = target.as_str(),
                local_path = %local_path,
                "re-pointed upload at backend path"
            );
            let params = UploadFileParams {
                file: local_path,
                name: Some(display_name),
                rest,
            };
            return Some((target.as_str(), encode(&params)?));
        }

        if let Some(url) = media.remote_url {
            let send = target.send_action();
            info!(
                from = target.as_str(),
                to = send.as_str(),
                url = %url,
                "converted upload into file message"
            );
            let mut params = Map::new();
            params.insert(
                target.id_key().to_string(),
                rest.get(target.id_key())?.clone(),
            );
            params.insert(
                "message".to_string(),
                Value::String(file_code(&url, &display_name)),
            );
            return Some((send.as_str(), Value::Object(params)));
        }

        warn!(
            action = target.as_str(),
            file = %file,
            "upload could not be resolved, forwarding as-is"
        );
        None
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "failed to encode rewritten params");
            None
        }
    }
}
