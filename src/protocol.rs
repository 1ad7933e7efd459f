//! Kernel wire protocol: command text, request/reply frames and reply kinds.
//!
//! Frames are newline-delimited JSON objects shaped after the Jupyter
//! messaging protocol. A request carries a header with a fresh `msg_id`;
//! every reply frame names that id in its `parent_header`, and the stream for
//! one request ends with an `execute_reply` frame.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::codec::{self, Value};
use crate::error::{CodecError, CodecResult};

/// Current structured-data media type used by the kernel.
pub const QSHARP_DATA_MIME: &str = "application/x-qsharp-data";

/// Structured-data media type used by kernels up to 0.17.2105.
pub const LEGACY_JSON_MIME: &str = "application/json";

/// Plain-text rendering media type.
pub const TEXT_PLAIN_MIME: &str = "text/plain";

/// Version of the messaging protocol written into request headers.
pub const MESSAGING_VERSION: &str = "5.3";

/// Reply frame type that terminates a request's stream.
pub const EXECUTE_REPLY: &str = "execute_reply";

/// A single request unit: the exact text sent to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
}

impl Command {
    /// Send `code` unchanged (Q# source or a hand-written directive).
    pub fn raw(code: impl Into<String>) -> Self {
        Self { text: code.into() }
    }

    /// `%name` with an optional bare suffix (`%workspace reload`, `%package Foo`).
    pub fn directive(name: &str, suffix: Option<&str>) -> Self {
        match suffix {
            Some(suffix) if !suffix.is_empty() => Self::raw(format!("%{name} {suffix}")),
            _ => Self::raw(format!("%{name}")),
        }
    }

    /// `%name <json>` with arguments encoded through the value codec.
    pub fn parameterized(name: &str, args: &Arguments) -> Self {
        Self::raw(format!("%{name} {}", args.to_json()))
    }

    /// `%name <qualified-callable> <json>` for callable-targeted directives.
    pub fn callable(name: &str, qualified_name: &str, args: &Arguments) -> Self {
        Self::targeted(name, qualified_name, args)
    }

    /// `%name <subject> <json>`, or `%name <json>` when `subject` is empty.
    pub fn targeted(name: &str, subject: &str, args: &Arguments) -> Self {
        if subject.is_empty() {
            Self::parameterized(name, args)
        } else {
            Self::raw(format!("%{name} {subject} {}", args.to_json()))
        }
    }

    /// Command text as sent to the kernel.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Named arguments for a parameterized directive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    entries: BTreeMap<String, Value>,
}

impl Arguments {
    /// Empty argument object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace an argument.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Whether no arguments were given.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wire JSON text of the argument object.
    pub fn to_json(&self) -> String {
        codec::encode(&Value::Map(self.entries.clone())).to_string()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut args = Arguments::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

/// Header attached to every request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Unique id of this request.
    pub msg_id: String,
    /// Request type (`execute_request`, `shutdown_request`).
    pub msg_type: String,
    /// Client session id.
    pub session: String,
    /// Client user agent.
    pub username: String,
    /// RFC 3339 timestamp.
    pub date: String,
    /// Messaging protocol version.
    pub version: String,
}

/// Frame sent from the client to the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Request header.
    pub header: MessageHeader,
    /// Request content.
    #[serde(default)]
    pub content: Json,
}

impl RequestFrame {
    fn new(msg_type: &str, session: &str, username: &str, content: Json) -> Self {
        Self {
            header: MessageHeader {
                msg_id: Uuid::new_v4().to_string(),
                msg_type: msg_type.to_string(),
                session: session.to_string(),
                username: username.to_string(),
                date: chrono::Utc::now().to_rfc3339(),
                version: MESSAGING_VERSION.to_string(),
            },
            content,
        }
    }

    /// Build an `execute_request` for the given command.
    pub fn execute(session: &str, username: &str, command: &Command) -> Self {
        Self::new(
            "execute_request",
            session,
            username,
            json!({"code": command.text(), "silent": false}),
        )
    }

    /// Build a `shutdown_request`.
    pub fn shutdown(session: &str, username: &str) -> Self {
        Self::new("shutdown_request", session, username, json!({"restart": false}))
    }

    /// Request id.
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// Code carried by an `execute_request`.
    pub fn code(&self) -> Option<&str> {
        self.content.get("code").and_then(Json::as_str)
    }
}

/// Reference to the request a reply frame belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentHeader {
    /// Id of the originating request.
    pub msg_id: String,
}

/// Frame sent from the kernel to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelFrame {
    /// Originating request.
    pub parent_header: ParentHeader,
    /// Reply message type.
    pub msg_type: String,
    /// Reply content.
    #[serde(default)]
    pub content: Json,
}

impl KernelFrame {
    /// Frame replying to `parent` with the given type and content.
    pub fn new(parent: &str, msg_type: &str, content: Json) -> Self {
        Self {
            parent_header: ParentHeader {
                msg_id: parent.to_string(),
            },
            msg_type: msg_type.to_string(),
            content,
        }
    }

    /// Whether this frame terminates the reply stream.
    pub fn is_reply(&self) -> bool {
        self.msg_type == EXECUTE_REPLY
    }

    /// Classify the frame into a [`ReplyMessage`].
    pub fn into_message(self) -> ReplyMessage {
        ReplyMessage::classify(&self.msg_type, self.content)
    }
}

/// Output stream a `stream` message was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    /// Standard output.
    Stdout,
    /// Standard error; carries kernel error lines.
    Stderr,
}

impl StreamName {
    /// Wire name of the stream.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

/// Rich display payload keyed by media type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayData {
    /// Media type to payload.
    pub data: Map<String, Json>,
    /// Display metadata.
    pub metadata: Json,
}

impl DisplayData {
    /// Payload carrying structured data under the current media type.
    pub fn qsharp(payload: &Json) -> Self {
        let mut data = Map::new();
        data.insert(
            QSHARP_DATA_MIME.to_string(),
            Json::String(payload.to_string()),
        );
        Self {
            data,
            metadata: Json::Object(Map::new()),
        }
    }

    /// Add a `text/plain` rendering.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.data
            .insert(TEXT_PLAIN_MIME.to_string(), Json::String(text.into()));
        self
    }

    fn from_content(content: &Json) -> Option<Self> {
        let data = content.get("data")?.as_object()?.clone();
        let metadata = content.get("metadata").cloned().unwrap_or(Json::Null);
        Some(Self { data, metadata })
    }

    fn to_content(&self) -> Json {
        json!({"data": self.data, "metadata": self.metadata})
    }

    /// Raw structured payload, preferring the current media type.
    ///
    /// When both media types are present the legacy payload is ignored, even
    /// if it differs.
    pub fn qsharp_data(&self) -> Option<&Json> {
        self.data
            .get(QSHARP_DATA_MIME)
            .or_else(|| self.data.get(LEGACY_JSON_MIME))
    }

    /// Parse the structured payload into wire JSON.
    ///
    /// Kernels send the payload as JSON text; an already-parsed object is
    /// accepted as well. Returns `None` when neither media type is present.
    pub fn structured(&self) -> CodecResult<Option<Json>> {
        match self.qsharp_data() {
            None => Ok(None),
            Some(Json::String(text)) => serde_json::from_str(text).map(Some).map_err(|err| {
                CodecError::MalformedWireValue(format!("structured payload is not JSON: {err}"))
            }),
            Some(other) => Ok(Some(other.clone())),
        }
    }

    /// Decode the structured payload through the value codec.
    pub fn decode(&self) -> CodecResult<Option<Value>> {
        self.structured()?.map(|wire| codec::decode(&wire)).transpose()
    }

    /// Plain-text rendering, if present.
    pub fn text(&self) -> Option<&str> {
        self.data.get(TEXT_PLAIN_MIME).and_then(Json::as_str)
    }
}

/// One message of a command's reply stream, classified by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyMessage {
    /// Terminal result (`execute_result`).
    ExecuteResult(DisplayData),
    /// Terminal execution-path result (`render_execution_path`).
    ExecutionPath(Json),
    /// Display payload (`display_data`).
    Display(DisplayData),
    /// Stream text (`stream`).
    Stream {
        /// Stream written to.
        name: StreamName,
        /// Text written.
        text: String,
    },
    /// Anything else, passed through unchanged.
    Other {
        /// Original message type.
        msg_type: String,
        /// Original content.
        content: Json,
    },
}

impl ReplyMessage {
    /// Classify a message by its type; malformed known kinds become `Other`.
    pub fn classify(msg_type: &str, content: Json) -> Self {
        let classified = match msg_type {
            "execute_result" => DisplayData::from_content(&content).map(ReplyMessage::ExecuteResult),
            "display_data" => DisplayData::from_content(&content).map(ReplyMessage::Display),
            "render_execution_path" => Some(ReplyMessage::ExecutionPath(
                content
                    .get("executionPath")
                    .cloned()
                    .unwrap_or_else(|| content.clone()),
            )),
            "stream" => {
                let name = match content.get("name").and_then(Json::as_str) {
                    Some("stdout") => Some(StreamName::Stdout),
                    Some("stderr") => Some(StreamName::Stderr),
                    _ => None,
                };
                let text = content.get("text").and_then(Json::as_str);
                name.zip(text).map(|(name, text)| ReplyMessage::Stream {
                    name,
                    text: text.to_string(),
                })
            }
            _ => None,
        };

        classified.unwrap_or_else(|| ReplyMessage::Other {
            msg_type: msg_type.to_string(),
            content,
        })
    }

    /// Wire message type.
    pub fn msg_type(&self) -> &str {
        match self {
            ReplyMessage::ExecuteResult(_) => "execute_result",
            ReplyMessage::ExecutionPath(_) => "render_execution_path",
            ReplyMessage::Display(_) => "display_data",
            ReplyMessage::Stream { .. } => "stream",
            ReplyMessage::Other { msg_type, .. } => msg_type,
        }
    }

    /// Wire content.
    pub fn content(&self) -> Json {
        match self {
            ReplyMessage::ExecuteResult(data) | ReplyMessage::Display(data) => data.to_content(),
            ReplyMessage::ExecutionPath(path) => json!({"executionPath": path}),
            ReplyMessage::Stream { name, text } => json!({"name": name.as_str(), "text": text}),
            ReplyMessage::Other { content, .. } => content.clone(),
        }
    }

    /// Reply frame carrying this message for the given request.
    pub fn to_frame(&self, parent: &str) -> KernelFrame {
        KernelFrame::new(parent, self.msg_type(), self.content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_text_forms() {
        let args = Arguments::new().with("count", 2i64).with("name", "Ada");
        assert_eq!(
            Command::parameterized("simulate", &args).text(),
            r#"%simulate {"count":2,"name":"Ada"}"#
        );
        assert_eq!(
            Command::callable("simulate", "Sample.Hello", &Arguments::new()).text(),
            "%simulate Sample.Hello {}"
        );
        assert_eq!(
            Command::targeted("azure.status", "", &Arguments::new()).text(),
            "%azure.status {}"
        );
        assert_eq!(Command::directive("who", None).text(), "%who");
        assert_eq!(
            Command::directive("workspace", Some("reload")).text(),
            "%workspace reload"
        );
    }

    #[test]
    fn tuple_arguments_are_tuple_encoded() {
        let args = Arguments::new().with("pair", (1i64, "One"));
        assert_eq!(
            args.to_json(),
            r#"{"pair":{"@type":"tuple","Item1":1,"Item2":"One"}}"#
        );
    }

    #[test]
    fn both_media_types_decode_identically() {
        let current = ReplyMessage::classify(
            "execute_result",
            json!({"data": {"application/x-qsharp-data": "[1, 2]"}}),
        );
        let legacy = ReplyMessage::classify(
            "execute_result",
            json!({"data": {"application/json": "[1, 2]"}}),
        );
        let (ReplyMessage::ExecuteResult(current), ReplyMessage::ExecuteResult(legacy)) =
            (current, legacy)
        else {
            panic!("expected execute results");
        };
        assert_eq!(current.decode().unwrap(), legacy.decode().unwrap());
        assert_eq!(
            current.decode().unwrap(),
            Some(Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn current_media_type_wins() {
        let message = ReplyMessage::classify(
            "display_data",
            json!({"data": {
                "application/json": "\"old\"",
                "application/x-qsharp-data": "\"new\""
            }}),
        );
        let ReplyMessage::Display(data) = message else {
            panic!("expected display data");
        };
        assert_eq!(data.decode().unwrap(), Some(Value::from("new")));
    }

    #[test]
    fn unknown_and_malformed_kinds_pass_through() {
        assert!(matches!(
            ReplyMessage::classify("status", json!({"execution_state": "busy"})),
            ReplyMessage::Other { .. }
        ));
        assert!(matches!(
            ReplyMessage::classify("stream", json!({"name": "stdin", "text": "x"})),
            ReplyMessage::Other { .. }
        ));
    }

    #[test]
    fn frames_round_trip_through_json() {
        let message = ReplyMessage::Stream {
            name: StreamName::Stderr,
            text: "boom".to_string(),
        };
        let frame = message.to_frame("abc");
        let text = serde_json::to_string(&frame).unwrap();
        let parsed: KernelFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.parent_header.msg_id, "abc");
        assert_eq!(parsed.into_message(), message);
    }
}
