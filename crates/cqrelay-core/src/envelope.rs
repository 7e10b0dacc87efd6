//! OneBot command envelopes and typed views of the actions the relay rewrites.
//!
//! Wire format: `{"action": string, "params": object, "echo": any}`. Fields the
//! relay does not look at (`echo` included) are kept in flattened `rest` maps
//! and written back unchanged.

use crate::error::RelayResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A command sent by the bot client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    /// `echo` and any other top-level field, verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Envelope {
    pub fn parse(text: &str) -> RelayResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Message-sending actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAction {
    Msg,
    PrivateMsg,
    GroupMsg,
}

impl SendAction {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "send_msg" => Some(Self::Msg),
            "send_private_msg" => Some(Self::PrivateMsg),
            "send_group_msg" => Some(Self::GroupMsg),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Msg => "send_msg",
            Self::PrivateMsg => "send_private_msg",
            Self::GroupMsg => "send_group_msg",
        }
    }
}

/// Who an `upload_*_file` command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    Private,
    Group,
}

impl UploadTarget {
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "upload_private_file" => Some(Self::Private),
            "upload_group_file" => Some(Self::Group),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "upload_private_file",
            Self::Group => "upload_group_file",
        }
    }

    /// The message action used when the file can only be offered as a link.
    pub fn send_action(self) -> SendAction {
        match self {
            Self::Private => SendAction::PrivateMsg,
            Self::Group => SendAction::GroupMsg,
        }
    }

    /// Params key holding the recipient id.
    pub fn id_key(self) -> &'static str {
        match self {
            Self::Private => "user_id",
            Self::Group => "group_id",
        }
    }
}

/// `message` is either CQ-coded text or an array of segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Text(String),
    Segments(Vec<Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMsgParams {
    pub message: Message,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileParams {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Typed view of an envelope's action and params.
#[derive(Debug, Clone)]
pub enum Command {
    Send {
        action: SendAction,
        params: SendMsgParams,
    },
    UploadFile {
        target: UploadTarget,
        params: UploadFileParams,
    },
    /// Unknown action or params of an unexpected shape.
    Other,
}

impl Command {
    pub fn decode(action: &str, params: Value) -> Self {
        if let Some(action) = SendAction::from_action(action) {
            return match serde_json::from_value::<SendMsgParams>(params) {
                Ok(params) => Command::Send { action, params },
                Err(_) => Command::Other,
            };
        }

        if let Some(target) = UploadTarget::from_action(action) {
            return match serde_json::from_value::<UploadFileParams>(params) {
                Ok(params) if params.rest.contains_key(target.id_key()) => {
                    Command::UploadFile { target, params }
                }
                _ => Command::Other,
            };
        }

        Command::Other
    }
}

/// Segment types the relay inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Image,
    Record,
    Video,
    Text,
    Other,
}

impl SegmentKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "image" => Self::Image,
            "record" => Self::Record,
            "video" => Self::Video,
            "text" => Self::Text,
            _ => Self::Other,
        }
    }

    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Record | Self::Video)
    }
}

/// One element of a segment-array message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from_type(&self.kind)
    }
}

/// `data` of an image, record or video segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Backend-local hint; meaningless once the media is remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl MediaData {
    /// Reference to resolve: `file`, else `path`. Empty strings count as absent.
    pub fn source(&self) -> Option<&str> {
        fn non_empty(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.is_empty())
        }
        non_empty(&self.file).or_else(|| non_empty(&self.path))
    }
}

/// `data` of a text segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_keeps_echo_and_extra_fields() {
        let text = r#"{"action":"get_status","params":{},"echo":{"seq":[1,2]},"x":null}"#;
        let env = Envelope::parse(text).unwrap();
        assert_eq!(env.action, "get_status");
        assert_eq!(env.rest["echo"], json!({"seq": [1, 2]}));
        assert!(env.rest.contains_key("x"));

        let back: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(back, serde_json::from_str::<Value>(text).unwrap());
    }

    #[test]
    fn envelope_without_action_is_rejected() {
        assert!(Envelope::parse(r#"{"params":{}}"#).is_err());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn decode_send_text_and_segments() {
        let cmd = Command::decode(
            "send_group_msg",
            json!({"group_id": 1, "message": "hi", "auto_escape": false}),
        );
        match cmd {
            Command::Send { action, params } => {
                assert_eq!(action, SendAction::GroupMsg);
                assert!(matches!(params.message, Message::Text(ref s) if s == "hi"));
                assert_eq!(params.rest["group_id"], json!(1));
            }
            other => panic!("unexpected {other:?}"),
        }

        let cmd = Command::decode(
            "send_msg",
            json!({"message": [{"type": "text", "data": {"text": "a"}}]}),
        );
        match cmd {
            Command::Send {
                params:
                    SendMsgParams {
                        message: Message::Segments(s),
                        ..
                    },
                ..
            } => assert_eq!(s.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_odd_shapes_as_other() {
        assert!(matches!(
            Command::decode("send_msg", json!({"message": 42})),
            Command::Other
        ));
        assert!(matches!(
            Command::decode("send_msg", Value::Null),
            Command::Other
        ));
        assert!(matches!(
            Command::decode("get_login_info", json!({})),
            Command::Other
        ));
    }

    #[test]
    fn decode_upload_requires_target_id() {
        let cmd = Command::decode(
            "upload_private_file",
            json!({"user_id": 7, "file": "a.png", "name": "a.png"}),
        );
        assert!(matches!(
            cmd,
            Command::UploadFile { target: UploadTarget::Private, .. }
        ));

        let cmd = Command::decode("upload_group_file", json!({"user_id": 7, "file": "a.png"}));
        assert!(matches!(cmd, Command::Other));
    }

    #[test]
    fn media_source_prefers_file() {
        let data: MediaData =
            serde_json::from_value(json!({"file": "a.png", "path": "/tmp/b.png"})).unwrap();
        assert_eq!(data.source(), Some("a.png"));

        let data: MediaData =
            serde_json::from_value(json!({"file": "", "path": "/tmp/b.png"})).unwrap();
        assert_eq!(data.source(), Some("/tmp/b.png"));

        let data: MediaData = serde_json::from_value(json!({"summary": "x"})).unwrap();
        assert_eq!(data.source(), None);
    }

    #[test]
    fn upload_target_mapping() {
        assert_eq!(UploadTarget::Group.send_action().as_str(), "send_group_msg");
        assert_eq!(UploadTarget::Private.id_key(), "user_id");
    }
}
