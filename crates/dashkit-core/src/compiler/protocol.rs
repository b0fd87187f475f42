//! Wire format between dashkit and a compiler process
//!
//! One JSON object per line in each direction. The host sends commands and
//! replies; the compiler sends file-system requests, log lines and a `done`
//! message that ends each command.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

use crate::vfs::VirtualContent;

/// Commands the host issues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Command {
    Setup,
    UpdateFiles { paths: Vec<String>, flag: bool },
    UnlinkMultiple { paths: Vec<String>, flag: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: u64,
    pub command: Command,
}

/// Error kinds the compiler can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&io::Error> for ReplyError {
    fn from(err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Answer to a compiler request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage {
    pub reply_to: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl ReplyMessage {
    pub fn ok(reply_to: u64, result: Value) -> Self {
        Self {
            reply_to,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(reply_to: u64, error: ReplyError) -> Self {
        Self {
            reply_to,
            result: None,
            error: Some(error),
        }
    }
}

/// Everything the host writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    Command(CommandMessage),
    Reply(ReplyMessage),
}

/// File content on the wire: plain text, or hex for non-UTF-8 bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Hex { hex: String },
}

impl WireContent {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => WireContent::Text(text),
            Err(e) => WireContent::Hex {
                hex: hex::encode(e.into_bytes()),
            },
        }
    }

    pub fn into_content(self) -> io::Result<VirtualContent> {
        match self {
            WireContent::Text(text) => Ok(VirtualContent::Text(text)),
            WireContent::Hex { hex } => hex::decode(hex)
                .map(VirtualContent::Bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e)),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Requests the compiler makes while a command runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: WireContent,
    },
    CopyFile {
        from: String,
        to: String,
    },
    Unlink {
        path: String,
    },
    ReadDir {
        path: String,
    },
    Mkdir {
        path: String,
    },
    LastModified {
        path: String,
    },
    RequestJsonData {
        path: String,
    },
    FileType {
        path: String,
        #[serde(default, rename = "searchType")]
        search_type: Option<String>,
        #[serde(default = "default_true", rename = "checkExtension")]
        check_extension: bool,
    },
    PackType {
        path: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Everything the compiler writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CompilerMessage {
    Done {
        id: u64,
        #[serde(default)]
        error: Option<String>,
    },
    Request {
        id: u64,
        request: Request,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let message = HostMessage::Command(CommandMessage {
            id: 7,
            command: Command::UpdateFiles {
                paths: vec!["BP/a.json".into()],
                flag: true,
            },
        });

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "command",
                "id": 7,
                "command": {"method": "updateFiles", "paths": ["BP/a.json"], "flag": true}
            })
        );
    }

    #[test]
    fn test_parse_compiler_messages() {
        let request: CompilerMessage = serde_json::from_str(
            r#"{"type":"request","id":3,"request":{"op":"fileType","path":"BP/entities/a.json"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            CompilerMessage::Request {
                id: 3,
                request: Request::FileType {
                    path: "BP/entities/a.json".into(),
                    search_type: None,
                    check_extension: true,
                },
            }
        );

        let pack: CompilerMessage = serde_json::from_str(
            r#"{"type":"request","id":4,"request":{"op":"packType","path":"RP/a.png"}}"#,
        )
        .unwrap();
        assert_eq!(
            pack,
            CompilerMessage::Request {
                id: 4,
                request: Request::PackType { path: "RP/a.png".into() },
            }
        );

        let done: CompilerMessage = serde_json::from_str(r#"{"type":"done","id":1}"#).unwrap();
        assert_eq!(done, CompilerMessage::Done { id: 1, error: None });
    }

    #[test]
    fn test_wire_content() {
        assert_eq!(WireContent::from_bytes(b"abc".to_vec()), WireContent::Text("abc".into()));

        let binary = WireContent::from_bytes(vec![0xff, 0x00]);
        assert_eq!(binary, WireContent::Hex { hex: "ff00".into() });
        assert_eq!(binary.into_content().unwrap(), VirtualContent::Bytes(vec![0xff, 0x00]));

        let parsed: WireContent = serde_json::from_str(r#"{"hex":"zz"}"#).unwrap();
        assert!(parsed.into_content().is_err());
    }

    #[test]
    fn test_reply_error_kinds() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let reply = ReplyMessage::err(4, ReplyError::from(&err));
        assert_eq!(
            serde_json::to_value(HostMessage::Reply(reply)).unwrap(),
            json!({"type": "reply", "replyTo": 4, "error": {"kind": "notFound", "message": "gone"}})
        );
    }
}
