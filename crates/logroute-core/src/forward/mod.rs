//! Worker-to-master event forwarding over TCP.
//!
//! Workers run a `tcp` appender backed by a [`ForwardClient`]; the master
//! runs a `tcp-server` appender backed by a [`ForwardServer`]. Events travel
//! as UTF-8 JSON frames, each followed by a delimiter, over one persistent
//! connection per worker:
//!
//! ```text
//! worker                                         master
//!   │ {"startTime":...}__LOG4JS__{"startTime":...}__LOG4JS__ ──►
//!   │                                           decode → dispatch
//! ```
//!
//! Frames from one worker arrive in the order they were logged. Nothing is
//! ordered across workers.

pub mod client;
pub mod codec;
pub mod server;

use std::time::Duration;

use crate::appenders::AppenderConfig;
use crate::error::ConfigResult;

pub use client::{ConnectionState, ForwardClient, TcpAppenderFactory};
pub use codec::DelimiterCodec;
pub use server::{ForwardServer, TcpServerFactory};

/// Frame terminator used unless `endMsg` says otherwise
pub const DEFAULT_DELIMITER: &str = "__LOG4JS__";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5000;

/// Events held while disconnected before the oldest are dropped
pub const DEFAULT_BUFFER_LIMIT: usize = 10_000;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Connection settings shared by both ends of the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOptions {
    pub host: String,
    pub port: u16,
    /// Frame delimiter
    pub end_msg: String,
    pub buffer_limit: usize,
    /// First reconnect delay, doubled after every failed attempt
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub write_timeout: Duration,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            end_msg: DEFAULT_DELIMITER.to_string(),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ForwardOptions {
    /// Read `host`, `port`, `endMsg`, `bufferLimit`, `reconnectDelay`,
    /// `maxReconnectDelay` and `writeTimeout` from an appender entry.
    pub fn from_config(config: &AppenderConfig) -> ConfigResult<Self> {
        let mut options = Self::default();

        if let Some(host) = config.str_field("host")? {
            options.host = host.to_string();
        }
        if let Some(port) = config.u64_field("port")? {
            options.port = u16::try_from(port)
                .map_err(|_| config.invalid(format!("port {} is out of range", port)))?;
        }
        if let Some(end_msg) = config.str_field("endMsg")? {
            if end_msg.is_empty() {
                return Err(config.invalid("endMsg must not be empty"));
            }
            options.end_msg = end_msg.to_string();
        }
        if let Some(limit) = config.u64_field("bufferLimit")? {
            if limit == 0 {
                return Err(config.invalid("bufferLimit must be greater than 0"));
            }
            options.buffer_limit = usize::try_from(limit).unwrap_or(usize::MAX);
        }
        if let Some(ms) = config.u64_field("reconnectDelay")? {
            options.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = config.u64_field("maxReconnectDelay")? {
            options.max_reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = config.u64_field("writeTimeout")? {
            options.write_timeout = Duration::from_millis(ms);
        }
        if options.max_reconnect_delay < options.reconnect_delay {
            options.max_reconnect_delay = options.reconnect_delay;
        }

        Ok(options)
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn codec(&self) -> DelimiterCodec {
        DelimiterCodec::new(self.end_msg.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = ForwardOptions::from_config(&AppenderConfig::new("net", "tcp")).unwrap();
        assert_eq!(options, ForwardOptions::default());
        assert_eq!(options.address(), "localhost:5000");
        assert_eq!(options.end_msg, "__LOG4JS__");
    }

    #[test]
    fn test_overrides() {
        let config = AppenderConfig::new("net", "tcp")
            .with_field("host", json!("10.0.0.7"))
            .with_field("port", json!(5010))
            .with_field("endMsg", json!("\n"))
            .with_field("bufferLimit", json!(3))
            .with_field("reconnectDelay", json!(20))
            .with_field("maxReconnectDelay", json!(10));
        let options = ForwardOptions::from_config(&config).unwrap();

        assert_eq!(options.address(), "10.0.0.7:5010");
        assert_eq!(options.end_msg, "\n");
        assert_eq!(options.buffer_limit, 3);
        assert_eq!(options.reconnect_delay, Duration::from_millis(20));
        // The cap never sits below the initial delay
        assert_eq!(options.max_reconnect_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = |key: &str, value: serde_json::Value| {
            ForwardOptions::from_config(&AppenderConfig::new("net", "tcp").with_field(key, value))
                .unwrap_err()
                .to_string()
        };
        assert!(bad("port", json!(70000)).contains("port 70000 is out of range"));
        assert!(bad("port", json!("5000")).contains("port must be a non-negative integer"));
        assert!(bad("endMsg", json!("")).contains("endMsg must not be empty"));
        assert!(bad("bufferLimit", json!(0)).contains("bufferLimit must be greater than 0"));
    }
}
