#![allow(clippy::unused_self)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::unnecessary_lazy_evaluations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::or_fun_call)]

//! # mcp-keepalive
//!
//! Keep-alive pings for MCP tool sessions.
//!
//! Many deployments put MCP servers behind load balancers or proxies that
//! close connections after about 60 seconds of inactivity. This crate wraps
//! MCP session management so every open session receives a JSON-RPC `ping`
//! at a fixed interval, keeping the connection warm between tool calls.
//!
//! ## Features
//!
//! - **Per-session pingers**: One background task per session, started when the session opens
//! - **Clean shutdown**: Every pinger is stopped and awaited before its session closes
//! - **Drop-in toolset**: Same tool listing and calling API, plus a `ping_interval` setting
//! - **Transports**: stdio child processes and streamable HTTP
//!
//! ## Quick Start
//!
//! ```bash
//! # List tools from a configured server
//! mcp-keepalive tools github
//!
//! # Hold a session open, pinging every 20 seconds
//! mcp-keepalive --ping-interval 20 hold github
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::redundant_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unnecessary_literal_bound)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::redundant_clone)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unnecessary_map_or)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::use_self)]

pub mod core;
pub mod mcp;

// Re-export commonly used types
pub use self::core::{Config, ConfigError, PingInterval, ServerEntry, DEFAULT_PING_INTERVAL_SECONDS};
pub use mcp::{
    ConnectionParams, KeepAlivePinger, McpSession, McpSessionManager, PingEnabledSessionManager,
    PingEnabledToolset, SessionManager, ToolsetConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "mcp-keepalive";
