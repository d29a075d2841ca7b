//! logroute core library
//!
//! Hierarchical category logging with configurable appender graphs and
//! worker-to-master event forwarding.
//!
//! ## Overview
//!
//! Applications log through a [`Logger`] bound to a dot-delimited category
//! (`"app.db.pool"`). The [`Runtime`] decides per event whether the level
//! passes the category's threshold and routes it to the category's
//! appenders. In multi-process deployments, workers forward their events to
//! a single master, either over TCP ([`forward`]) or through a host-supplied
//! IPC channel ([`cluster`]).
//!
//! ## Core Pieces
//!
//! - **Configuration**: validated fully before anything is built, then
//!   resolved into an immutable generation swapped in atomically
//! - **Category table**: inheritance along the dotted name, prefix lookup
//!   with a guaranteed `default`
//! - **Appender graph**: lazily instantiated, dependency loops rejected
//!   before any appender exists
//!
//! ## Quick Start
//!
//! ```ignore
//! use logroute_core::Runtime;
//! use serde_json::json;
//!
//! let runtime = Runtime::new();
//! runtime.configure(&json!({
//!     "appenders": { "out": { "type": "stdout" } },
//!     "categories": {
//!         "default": { "appenders": ["out"], "level": "info" },
//!         "app.db":  { "level": "debug" }
//!     }
//! }))?;
//!
//! let log = runtime.get_logger("app.db");
//! log.debug("connection pool ready");
//! ```

pub mod appenders;
pub mod bridge;
pub mod categories;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod forward;
pub mod layout;
pub mod level;
pub mod logger;
pub mod resolver;
pub mod runtime;
pub mod value;

pub use appenders::{Appender, AppenderConfig, AppenderFactory, AppenderRegistry, Recording};
pub use bridge::RouteLayer;
pub use categories::{AppenderRef, CategoryTable, ResolvedCategory};
pub use cluster::{spawn_cluster_receiver, ChannelHost, ClusterHost, ClusterMessage, CLUSTER_TOPIC};
pub use error::{ConfigError, ConfigResult, ForwardError, ShutdownError};
pub use event::{CallSite, ClusterInfo, LogEvent, INTERNAL_CATEGORY};
pub use forward::{ConnectionState, DelimiterCodec, ForwardClient, ForwardOptions, ForwardServer};
pub use layout::{Layout, Layouts};
pub use level::{Colour, Level, LevelRegistry};
pub use logger::{CallStackParser, Logger};
pub use resolver::AppenderContext;
pub use runtime::{Dispatcher, Runtime};
pub use value::{ErrorRecord, Value};
