//! Master side of the forwarding transport.
//!
//! The server accepts any number of worker connections. Each connection
//! runs its own task that decodes frames and dispatches them into the
//! runtime in arrival order. A frame that is not a valid event becomes an
//! ERROR event in the `log4js` category instead of being dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use super::{DelimiterCodec, ForwardOptions};
use crate::appenders::{Appender, AppenderConfig, AppenderFactory};
use crate::error::ForwardError;
use crate::event::LogEvent;
use crate::resolver::AppenderContext;
use crate::runtime::{Dispatcher, DIAGNOSTICS};

/// Delay between bind attempts while the address is still held, typically
/// by the server of the generation being replaced
const BIND_RETRY: Duration = Duration::from_millis(100);

/// How long an address in use is retried before giving up
const BIND_WINDOW: Duration = Duration::from_secs(2);

enum Listen {
    Bound(TcpListener),
    Address(String),
}

/// A running forwarding receiver
pub struct ForwardServer {
    stop: watch::Sender<bool>,
    bound: watch::Receiver<Option<SocketAddr>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ForwardServer {
    /// Start listening in the background. Binding is retried for a short
    /// window while the address is in use, then reported on the
    /// diagnostics target.
    pub fn spawn(options: ForwardOptions, dispatcher: Dispatcher) -> Result<Self, ForwardError> {
        let address = options.address();
        Self::start(Listen::Address(address), options, dispatcher)
    }

    /// Bind now and start accepting in the background
    pub async fn bind(options: ForwardOptions, dispatcher: Dispatcher) -> Result<Self, ForwardError> {
        let address = options.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ForwardError::Bind {
                addr: address.clone(),
                source,
            })?;
        Self::start(Listen::Bound(listener), options, dispatcher)
    }

    fn start(
        listen: Listen,
        options: ForwardOptions,
        dispatcher: Dispatcher,
    ) -> Result<Self, ForwardError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ForwardError::NoRuntime)?;
        let (stop, stop_rx) = watch::channel(false);
        let (bound_tx, bound) = watch::channel(None);

        let task = handle.spawn(serve(listen, options, dispatcher, stop_rx, bound_tx));
        Ok(Self {
            stop,
            bound,
            task: Mutex::new(Some(task)),
        })
    }

    /// Address actually listened on, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// Wait until the listener is bound. `None` if it never will be.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.clone();
        let result = bound.wait_for(Option::is_some).await;
        result.ok().and_then(|addr| *addr)
    }

    /// Stop accepting, close every connection and wait for them to finish.
    pub async fn shutdown(&self) -> Result<(), ForwardError> {
        self.stop.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|_| ForwardError::TaskStopped)?;
        }
        Ok(())
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn bind_with_retry(address: &str, stop: &mut watch::Receiver<bool>) -> Option<TcpListener> {
    let deadline = tokio::time::Instant::now() + BIND_WINDOW;
    let mut warned = false;
    loop {
        match TcpListener::bind(address).await {
            Ok(listener) => return Some(listener),
            Err(e)
                if e.kind() == std::io::ErrorKind::AddrInUse
                    && tokio::time::Instant::now() < deadline =>
            {
                if !warned {
                    warn!(%address, "address in use, retrying bind");
                    warned = true;
                }
                tokio::select! {
                    _ = stopped(stop) => return None,
                    _ = tokio::time::sleep(BIND_RETRY) => {}
                }
            }
            Err(e) => {
                error!(target: DIAGNOSTICS, %address, error = %e, "forward server could not bind");
                return None;
            }
        }
    }
}

async fn serve(
    listen: Listen,
    options: ForwardOptions,
    dispatcher: Dispatcher,
    mut stop: watch::Receiver<bool>,
    bound: watch::Sender<Option<SocketAddr>>,
) {
    let listener = match listen {
        Listen::Bound(listener) => listener,
        Listen::Address(address) => match bind_with_retry(&address, &mut stop).await {
            Some(listener) => listener,
            None => return,
        },
    };
    let local = listener.local_addr().ok();
    bound.send_replace(local);
    info!(address = ?local, "forward server listening");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        options.codec(),
                        dispatcher.clone(),
                        stop.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!(address = ?local, "forward server stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    codec: DelimiterCodec,
    dispatcher: Dispatcher,
    mut stop: watch::Receiver<bool>,
) {
    debug!(%peer, "worker connected");
    let mut frames = FramedRead::new(stream, codec);
    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => receive(&frame, peer, &dispatcher),
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "worker connection failed");
                    break;
                }
                None => break,
            }
        }
    }
    debug!(%peer, "worker disconnected");
}

fn receive(frame: &[u8], peer: SocketAddr, dispatcher: &Dispatcher) {
    let text = String::from_utf8_lossy(frame);
    let mut event = LogEvent::deserialise(&text, &dispatcher.levels());
    event.remote_address = Some(peer.ip().to_string());
    event.remote_port = Some(peer.port());
    dispatcher.dispatch(&event);
}

/// Owns the server; writes nothing itself
struct TcpServerAppender {
    server: ForwardServer,
}

impl Appender for TcpServerAppender {
    fn append(&self, _event: &LogEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.server.shutdown().await?;
            Ok(())
        })
    }
}

/// `tcp-server`: receive events from workers' `tcp` appenders
pub struct TcpServerFactory;

impl AppenderFactory for TcpServerFactory {
    fn always_on(&self) -> bool {
        true
    }

    fn build(
        &self,
        config: &AppenderConfig,
        ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>> {
        let options = ForwardOptions::from_config(config)?;
        let server = ForwardServer::spawn(options, ctx.dispatcher())?;
        Ok(Arc::new(TcpServerAppender { server }))
    }
}
