//! Structured logging utilities for tgfs components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use tgfs_config::log_vfs_debug;
//!
//! log_vfs_debug!("write staged", path = "/a.txt", size = 5);
//! log_transport_warn!("unpin failed", handle = 42);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const VFS: &'static str = "VFS";
    pub const MANIFEST: &'static str = "MANIFEST";
    pub const TRANSPORT: &'static str = "TRANSPORT";
    pub const LISTENER: &'static str = "LISTENER";
    pub const FUSE: &'static str = "FUSE";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === VFS logging macros ===

#[macro_export]
macro_rules! log_vfs_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "VFS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_vfs_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "VFS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_vfs_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "VFS", $($key = $value,)* $msg)
    };
}

// === MANIFEST logging macros ===

#[macro_export]
macro_rules! log_manifest_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "MANIFEST", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_manifest_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "MANIFEST", $($key = $value,)* $msg)
    };
}

// === TRANSPORT logging macros ===

#[macro_export]
macro_rules! log_transport_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "TRANSPORT", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_transport_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "TRANSPORT", $($key = $value,)* $msg)
    };
}

// === LISTENER logging macros ===

#[macro_export]
macro_rules! log_listener_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "LISTENER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_listener_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "LISTENER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_listener_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "LISTENER", $($key = $value,)* $msg)
    };
}

// === FUSE logging macros ===

#[macro_export]
macro_rules! log_fuse_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FUSE", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `TGFS_LOG` wins over `RUST_LOG`, which wins over `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("TGFS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A second init (e.g. from tests) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
