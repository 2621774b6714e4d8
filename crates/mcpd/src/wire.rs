use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ErrorKind;
use crate::id::ServerId;

/// Hard cap on a single request frame; frames beyond this are rejected with
/// `oversize` and the connection is closed without reading further.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One request parsed off the control socket. Internally tagged on
/// `"command"`; fields beyond those a variant declares are ignored by serde
/// by default.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Request {
    Start {
        server: Option<ServerId>,
        server_command: String,
    },
    Stop {
        server: ServerId,
    },
    Call {
        server: Option<ServerId>,
        server_command: Option<String>,
        tool: String,
        #[serde(default)]
        arguments: Value,
        timeout_ms: Option<u64>,
    },
    List {
        server: Option<ServerId>,
        server_command: Option<String>,
    },
    #[serde(rename = "list-all")]
    ListAll,
    Status,
    Shutdown,
}

pub fn ok(fields: Value) -> Value {
    let mut obj = json!({ "success": true });
    merge(&mut obj, fields);
    obj
}

pub fn err(message: impl Into<String>, kind: ErrorKind) -> Value {
    json!({ "success": false, "error": message.into(), "kind": kind })
}

fn merge(base: &mut Value, extra: Value) {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) {
        base_map.extend(extra_map);
    }
}
