//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end against a scripted stdio MCP
//! server.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// Get the binary to test.
fn mcp_keepalive() -> Command {
    let mut cmd = Command::cargo_bin("mcp-keepalive").unwrap();
    cmd.env_remove("MCP_KEEPALIVE_PING_INTERVAL").env_remove("MCP_KEEPALIVE_CONFIG");
    cmd
}

/// Minimal MCP server speaking newline-delimited JSON-RPC on stdio.
///
/// Answers `initialize`, `tools/list`, `tools/call` and `ping`; everything
/// else is ignored.
const MOCK_SERVER: &str = r##"
while read -r line; do
  case "$line" in
    *'"method":"ping"'*)
      id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
    *'"method":"initialize"'*)
      id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
      printf '{"jsonrpc":"2.0","id":"%s","result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"1.0"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
      printf '{"jsonrpc":"2.0","id":"%s","result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object","required":["text"]}},{"name":"delete","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      id=$(printf '%s' "$line" | sed 's/.*"id":"\([^"]*\)".*/\1/')
      printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"hello from mock"}]}}\n' "$id"
      ;;
  esac
done
"##;

/// Config file with one stdio server running [`MOCK_SERVER`].
fn mock_config(extra: &str) -> String {
    format!(
        "[keepalive]\nping_interval_secs = 30.0\n\n[[servers]]\nname = \"mock\"\ntransport = \"stdio\"\ncommand = \"sh\"\nargs = [\"-c\", '''{}''']\n{}\n",
        MOCK_SERVER, extra
    )
}

fn write_config(temp: &assert_fs::TempDir, content: &str) -> std::path::PathBuf {
    let file = temp.child("config.toml");
    file.write_str(content).unwrap();
    file.path().to_path_buf()
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    mcp_keepalive()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Keep-alive pings for MCP tool sessions"));
}

#[test]
fn test_help_lists_ping_interval() {
    mcp_keepalive()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--ping-interval"));
}

#[test]
fn test_version_flag() {
    mcp_keepalive()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_hold_command_help() {
    mcp_keepalive()
        .args(["hold", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keep it alive"));
}

// ============================================================================
// Config Command Tests
// ============================================================================

#[test]
fn test_config_prints_loaded_file() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("ping_interval_secs = 30.0"))
        .stdout(predicate::str::contains("name = \"mock\""));

    temp.close().unwrap();
}

#[test]
fn test_config_path_flag() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, "");

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    temp.close().unwrap();
}

#[test]
fn test_config_path_prefers_local_file() {
    let temp = assert_fs::TempDir::new().unwrap();
    std::fs::write(temp.path().join(".mcp-keepalive.toml"), "").unwrap();

    mcp_keepalive()
        .current_dir(temp.path())
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".mcp-keepalive.toml"));

    temp.close().unwrap();
}

#[test]
fn test_invalid_interval_in_config_fails() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, "[keepalive]\nping_interval_secs = -1.0\n");

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid ping interval"));

    temp.close().unwrap();
}

#[test]
fn test_servers_lists_configured_servers() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config("tool_name_prefix = \"mock\""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .arg("servers")
        .assert()
        .success()
        .stdout(predicate::str::contains("mock - stdio:sh"))
        .stdout(predicate::str::contains("Prefix: mock"));

    temp.close().unwrap();
}

// ============================================================================
// Interval Validation Tests
// ============================================================================

#[test]
fn test_negative_interval_flag_rejected() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["--ping-interval", "-1", "tools", "mock"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid ping interval"));

    temp.close().unwrap();
}

#[test]
fn test_zero_interval_from_env_rejected() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .env("MCP_KEEPALIVE_PING_INTERVAL", "0")
        .arg("--config")
        .arg(&path)
        .args(["tools", "mock"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid ping interval"));

    temp.close().unwrap();
}

#[test]
fn test_unknown_server_fails() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["tools", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Server not found: missing"));

    temp.close().unwrap();
}

// ============================================================================
// Session Tests (scripted stdio server)
// ============================================================================

#[cfg(unix)]
#[test]
fn test_tools_lists_server_tools() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["tools", "mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo - Echo text back"))
        .stdout(predicate::str::contains("Required: text"))
        .stdout(predicate::str::contains("Total: 2 tool(s)"));

    temp.close().unwrap();
}

#[cfg(unix)]
#[test]
fn test_tools_applies_filter_and_prefix() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(
        &temp,
        &mock_config("tool_filter = [\"echo\"]\ntool_name_prefix = \"mock\""),
    );

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["tools", "mock", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mock_echo\""))
        .stdout(predicate::str::contains("delete").not());

    temp.close().unwrap();
}

#[cfg(unix)]
#[test]
fn test_call_prints_tool_output() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["call", "mock", "echo", "--args", r#"{"text":"hi"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from mock"));

    temp.close().unwrap();
}

#[cfg(unix)]
#[test]
fn test_call_filtered_tool_rejected() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config("tool_filter = [\"echo\"]"));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["call", "mock", "delete"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not selected by filter"));

    temp.close().unwrap();
}

#[test]
fn test_call_rejects_non_object_args() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["call", "mock", "echo", "--args", "[1, 2]"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));

    temp.close().unwrap();
}

#[cfg(unix)]
#[test]
fn test_hold_sends_pings() {
    let temp = assert_fs::TempDir::new().unwrap();
    let path = write_config(&temp, &mock_config(""));

    mcp_keepalive()
        .arg("--config")
        .arg(&path)
        .args(["--ping-interval", "0.1", "hold", "mock", "--duration", "0.55"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"Sent [1-9][0-9]* ping\(s\)").unwrap());

    temp.close().unwrap();
}
