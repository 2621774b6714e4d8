//! Fixtures for integration tests: a minimal fake MCP server over stdio.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Writes a tiny Python MCP server to a tempdir and returns `(tempdir, path)`.
/// The tempdir must be kept alive for as long as the script is used.
///
/// Understands `initialize`, `tools/list`, and `tools/call` (echoing its
/// `arguments` back as the result), and ignores anything without an `id`
/// (notifications). `name` becomes the server's `serverInfo.name`.
pub fn write_fake_mcp_server(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-mcp-server");
    let script = format!(
        r#"#!/usr/bin/env python3
import json
import sys

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    req_id = req.get("id")
    method = req.get("method")
    params = req.get("params") or {{}}

    if req_id is None:
        continue

    if method == "initialize":
        send({{
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {{
                "protocolVersion": "2024-11-05",
                "serverInfo": {{"name": "{name}", "version": "0.0.0"}},
                "capabilities": {{"tools": {{}}}},
            }},
        }})
    elif method == "tools/list":
        send({{
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {{
                "tools": [
                    {{"name": "echo", "description": "echoes its arguments", "inputSchema": {{"type": "object"}}}}
                ]
            }},
        }})
    elif method == "tools/call":
        if params.get("name") == "fail":
            send({{"jsonrpc": "2.0", "id": req_id, "error": {{"code": -32000, "message": "tool failed"}}}})
        else:
            send({{
                "jsonrpc": "2.0",
                "id": req_id,
                "result": {{"content": [{{"type": "text", "text": json.dumps(params.get("arguments"))}}]}},
            }})
    else:
        send({{"jsonrpc": "2.0", "id": req_id, "error": {{"code": -32601, "message": "method not found"}}}})
"#
    );
    std::fs::write(&script_path, script).expect("write fake server script");
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod fake server script");
    (dir, script_path)
}

/// A fake server whose `initialize` handshake hangs forever, for exercising
/// spawn/handshake-timeout paths.
pub fn write_hanging_mcp_server() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("hanging-mcp-server");
    let script = "#!/usr/bin/env python3\nimport time\nwhile True:\n    time.sleep(3600)\n";
    std::fs::write(&script_path, script).expect("write hanging server script");
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod hanging server script");
    (dir, script_path)
}

/// A fake server that exits immediately after accepting stdin, for exercising
/// child-death paths.
pub fn write_dying_mcp_server() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("dying-mcp-server");
    let script = "#!/usr/bin/env python3\nimport sys\nsys.exit(1)\n";
    std::fs::write(&script_path, script).expect("write dying server script");
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod dying server script");
    (dir, script_path)
}

/// A fake server that completes the handshake normally, then exits on its own
/// after `ttl_secs` — for exercising Monitor's crash-detection-and-restart
/// path without a test needing to reach into the child's pid.
pub fn write_short_lived_mcp_server(name: &str, ttl_secs: u64) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("short-lived-mcp-server");
    let script = format!(
        r#"#!/usr/bin/env python3
import json
import sys
import threading

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

threading.Timer({ttl_secs}, lambda: sys.exit(0)).start()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    req_id = req.get("id")
    if req_id is None:
        continue
    method = req.get("method")
    if method == "initialize":
        send({{
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {{
                "protocolVersion": "2024-11-05",
                "serverInfo": {{"name": "{name}", "version": "0.0.0"}},
                "capabilities": {{"tools": {{}}}},
            }},
        }})
    elif method == "tools/list":
        send({{"jsonrpc": "2.0", "id": req_id, "result": {{"tools": []}}}})
    else:
        send({{"jsonrpc": "2.0", "id": req_id, "error": {{"code": -32601, "message": "method not found"}}}})
"#
    );
    std::fs::write(&script_path, script).expect("write short-lived server script");
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod short-lived server script");
    (dir, script_path)
}

/// A fake server whose `tools/call` sleeps `delay_secs` before responding —
/// for exercising the in-flight-call-survives-a-`shutdown` path.
pub fn write_slow_mcp_server(delay_secs: u64) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("slow-mcp-server");
    let script = format!(
        r#"#!/usr/bin/env python3
import json
import sys
import time

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    req_id = req.get("id")
    method = req.get("method")
    if req_id is None:
        continue

    if method == "initialize":
        send({{
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {{
                "protocolVersion": "2024-11-05",
                "serverInfo": {{"name": "slow", "version": "0.0.0"}},
                "capabilities": {{"tools": {{}}}},
            }},
        }})
    elif method == "tools/list":
        send({{
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {{"tools": [{{"name": "slow-echo", "description": "", "inputSchema": {{"type": "object"}}}}]}},
        }})
    elif method == "tools/call":
        time.sleep({delay_secs})
        send({{
            "jsonrpc": "2.0",
            "id": req_id,
            "result": {{"content": [{{"type": "text", "text": "done"}}]}},
        }})
    else:
        send({{"jsonrpc": "2.0", "id": req_id, "error": {{"code": -32601, "message": "method not found"}}}})
"#
    );
    std::fs::write(&script_path, script).expect("write slow server script");
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).expect("chmod slow server script");
    (dir, script_path)
}
