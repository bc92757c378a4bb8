//! Server configuration: defaults, `PGQUOTA_*` environment overrides and listen-address resolution.

use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_LISTEN_ADDR: &str = ":5432";
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum regular frame size in bytes (16 MiB). PostgreSQL itself allows up to 1 GiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host-optional listen address, e.g. `:5432`, `127.0.0.1:6432` or `localhost`.
    pub listen_addr: String,
    /// Deadline for a single read; elapsing only re-checks cancellation.
    pub read_timeout: Duration,
    /// Bound on the graceful drain performed by the CLI.
    pub shutdown_timeout: Duration,
    pub max_message_size: usize,
    /// Log every raw frame (hex + ASCII preview) at debug level.
    pub trace_frames: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            trace_frames: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `PGQUOTA_LISTEN_ADDR`, `PGQUOTA_READ_TIMEOUT_SECS`,
    /// `PGQUOTA_SHUTDOWN_TIMEOUT_SECS`, `PGQUOTA_MAX_MESSAGE_SIZE` and `PGQUOTA_PGWIRE_TRACE`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(addr) = env::var("PGQUOTA_LISTEN_ADDR") {
            if !addr.trim().is_empty() { cfg.listen_addr = addr; }
        }
        if let Some(secs) = parse_u64_env("PGQUOTA_READ_TIMEOUT_SECS") {
            if secs > 0 { cfg.read_timeout = Duration::from_secs(secs); }
        }
        if let Some(secs) = parse_u64_env("PGQUOTA_SHUTDOWN_TIMEOUT_SECS") {
            cfg.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = parse_u64_env("PGQUOTA_MAX_MESSAGE_SIZE") {
            if max >= 5 { cfg.max_message_size = max as usize; }
        }
        if let Some(trace) = parse_bool_env("PGQUOTA_PGWIRE_TRACE") {
            cfg.trace_frames = trace;
        }
        cfg
    }
}

/// Turns a host-optional address into something `TcpListener::bind` accepts.
///
/// `:5432` binds every interface, a bare host gets the default port, and anything that already
/// carries a port (including bracketed IPv6) is returned unchanged.
pub fn resolve_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.is_empty() {
        return format!("0.0.0.0:{}", DEFAULT_PORT);
    }
    // ":5432" is port-only; "::1" is an IPv6 literal
    if let Some(port) = addr.strip_prefix(':') {
        if port.is_empty() {
            return format!("0.0.0.0:{}", DEFAULT_PORT);
        }
        if port.bytes().all(|b| b.is_ascii_digit()) {
            return format!("0.0.0.0:{}", port);
        }
    }
    if addr.starts_with('[') {
        // [::1]:5432 or [::1]
        return if addr.contains("]:") { addr.to_string() } else { format!("{}:{}", addr, DEFAULT_PORT) };
    }
    match addr.matches(':').count() {
        0 => format!("{}:{}", addr, DEFAULT_PORT),
        1 => addr.to_string(),
        // unbracketed IPv6 literal
        _ => format!("[{}]:{}", addr, DEFAULT_PORT),
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_env(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_bool(&v))
}

fn parse_u64_env(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}
