//! Intra-host clustering.
//!
//! The embedding program owns process management and supplies a
//! [`ClusterHost`]. The runtime asks it for its role once, when clustering
//! is attached, and caches the answer.
//!
//! - **Master**: appenders are instantiated. Messages handed to
//!   [`Runtime::receive_cluster_message`] are decoded and fanned out.
//! - **Worker**: appenders are never instantiated. Every event is stamped
//!   with [`ClusterInfo`] and sent to the master as a [`ClusterMessage`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::event::{ClusterInfo, LogEvent};
use crate::runtime::Runtime;

/// Topic carried by every log message between cluster processes
pub const CLUSTER_TOPIC: &str = "log4js:message";

/// Message exchanged between cluster processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub topic: String,
    /// Serialized [`LogEvent`]
    pub data: String,
}

impl ClusterMessage {
    /// Wrap an event for the master
    pub fn log(event: &LogEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: CLUSTER_TOPIC.to_string(),
            data: event.serialise()?,
        })
    }

    pub fn is_log(&self) -> bool {
        self.topic == CLUSTER_TOPIC
    }
}

/// Process-management hooks supplied by the embedding program
pub trait ClusterHost: Send + Sync {
    fn is_master(&self) -> bool;

    /// Identifier of this worker, stamped onto forwarded events
    fn worker_id(&self) -> u32;

    /// Deliver a message to the master
    fn send(&self, message: ClusterMessage) -> anyhow::Result<()>;
}

/// A host with its role cached
pub(crate) struct Clustering {
    host: Arc<dyn ClusterHost>,
    is_master: bool,
    worker_id: u32,
}

impl Clustering {
    pub(crate) fn new(host: Arc<dyn ClusterHost>) -> Self {
        let is_master = host.is_master();
        let worker_id = host.worker_id();
        debug!(is_master, worker_id, "clustering attached");
        Self {
            host,
            is_master,
            worker_id,
        }
    }

    pub(crate) fn is_master(&self) -> bool {
        self.is_master
    }

    /// Stamp the event with this worker's identity and send it to the master
    pub(crate) fn send(&self, event: &LogEvent) -> anyhow::Result<()> {
        let stamped = event.clone().with_cluster(ClusterInfo {
            worker_id: self.worker_id,
            worker: std::process::id(),
        });
        self.host.send(ClusterMessage::log(&stamped)?)
    }
}

/// [`ClusterHost`] backed by a tokio channel, for processes that share an
/// address space with their master (and for tests).
pub struct ChannelHost {
    master: bool,
    worker_id: u32,
    tx: mpsc::UnboundedSender<ClusterMessage>,
}

impl ChannelHost {
    pub fn master(tx: mpsc::UnboundedSender<ClusterMessage>) -> Self {
        Self {
            master: true,
            worker_id: 0,
            tx,
        }
    }

    pub fn worker(worker_id: u32, tx: mpsc::UnboundedSender<ClusterMessage>) -> Self {
        Self {
            master: false,
            worker_id,
            tx,
        }
    }
}

impl ClusterHost for ChannelHost {
    fn is_master(&self) -> bool {
        self.master
    }

    fn worker_id(&self) -> u32 {
        self.worker_id
    }

    fn send(&self, message: ClusterMessage) -> anyhow::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow::anyhow!("cluster master channel closed"))
    }
}

/// Pump messages from `rx` into the master runtime until every sender is
/// dropped.
pub fn spawn_cluster_receiver(
    runtime: Runtime,
    mut rx: mpsc::UnboundedReceiver<ClusterMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            runtime.receive_cluster_message(&message);
        }
        debug!("cluster receiver stopped");
    })
}
