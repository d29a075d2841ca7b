//! Worker side of the forwarding transport.
//!
//! A [`ForwardClient`] hands frames over an unbounded channel to a single
//! background task that owns the connection and an ordered buffer. The
//! task is an explicit state machine:
//!
//! ```text
//!              connect ok
//!  Connecting ───────────► Connected ──┐ close / error / write timeout
//!     ▲  │ connect failed               │
//!     │  ▼                              │
//!   Backoff (100ms, 200ms, ... capped) ◄┘
//! ```
//!
//! The delay doubles on every pass through `Backoff` and only returns to
//! `reconnectDelay` once a connection has stayed up for
//! [`STABLE_CONNECTION`]. A peer that accepts and closes straight away is
//! retried at the same capped pace as one that refuses.
//!
//! Frames that arrive while not connected are buffered; on connect the
//! buffer is flushed in order before new frames are written. The buffer is
//! bounded: when full, the oldest frame is dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use super::{DelimiterCodec, ForwardOptions};
use crate::appenders::{Appender, AppenderConfig, AppenderFactory};
use crate::error::ForwardError;
use crate::event::LogEvent;
use crate::layout::Layout;
use crate::resolver::AppenderContext;

/// Attempts made at shutdown to deliver what is still buffered
const SHUTDOWN_ATTEMPTS: u32 = 3;
const SHUTDOWN_RETRY: Duration = Duration::from_millis(100);

/// Uptime after which a lost connection restarts the backoff sequence
pub const STABLE_CONNECTION: Duration = Duration::from_secs(1);

/// Connection state of a [`ForwardClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// `attempt` counts from 1 since the last stable connection
    Connecting { attempt: u32 },
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { attempt } => write!(f, "connecting (attempt {})", attempt),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

enum Command {
    Frame(Bytes),
    /// Acknowledged with the number of frames left undelivered
    Shutdown(oneshot::Sender<usize>),
}

/// Handle to the background forwarding task
pub struct ForwardClient {
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    dropped: Arc<AtomicU64>,
}

impl ForwardClient {
    /// Start the forwarding task on the current tokio runtime.
    pub fn spawn(options: ForwardOptions) -> Result<Self, ForwardError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ForwardError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let dropped = Arc::new(AtomicU64::new(0));

        let task = ClientTask {
            delay: options.reconnect_delay,
            options,
            rx,
            state: state_tx,
            buffer: VecDeque::new(),
            dropped: dropped.clone(),
            attempt: 0,
            connected_at: None,
        };
        handle.spawn(task.run());

        Ok(Self { tx, state, dropped })
    }

    /// Queue one frame payload. The delimiter is added by the codec.
    pub fn send(&self, payload: Bytes) -> Result<(), ForwardError> {
        self.tx
            .send(Command::Frame(payload))
            .map_err(|_| ForwardError::TaskStopped)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Frames dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver what can be delivered, then close. Safe to call repeatedly.
    ///
    /// Fails with [`ForwardError::Undelivered`] when frames were still
    /// buffered after the final drain attempts.
    pub async fn shutdown(&self) -> Result<(), ForwardError> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).is_err() {
            return Ok(());
        }
        // The task may already be stopping for an earlier shutdown
        match done.await {
            Ok(0) | Err(_) => Ok(()),
            Ok(undelivered) => Err(ForwardError::Undelivered(undelivered)),
        }
    }
}

struct Connection {
    reader: OwnedReadHalf,
    writer: FramedWrite<OwnedWriteHalf, DelimiterCodec>,
}

impl Connection {
    fn new(stream: TcpStream, codec: DelimiterCodec) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer: FramedWrite::new(writer, codec),
        }
    }
}

enum Phase {
    Connect,
    Backoff,
    Connected(Connection),
    Stopped,
}

/// What a command received while not connected asks for
enum Control {
    Continue,
    Stop(Option<oneshot::Sender<usize>>),
}

struct ClientTask {
    options: ForwardOptions,
    rx: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    buffer: VecDeque<Bytes>,
    dropped: Arc<AtomicU64>,
    delay: Duration,
    attempt: u32,
    connected_at: Option<Instant>,
}

impl ClientTask {
    async fn run(mut self) {
        let mut phase = Phase::Connect;
        loop {
            phase = match phase {
                Phase::Connect => self.connect().await,
                Phase::Backoff => self.backoff().await,
                Phase::Connected(connection) => self.pump(connection).await,
                Phase::Stopped => break,
            };
        }
        debug!(address = %self.options.address(), "forwarding task stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn enqueue(&mut self, frame: Bytes) {
        if self.buffer.len() >= self.options.buffer_limit {
            self.buffer.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 1000 == 0 {
                warn!(
                    dropped = total,
                    limit = self.options.buffer_limit,
                    "forward buffer full, dropping oldest events"
                );
            }
        }
        self.buffer.push_back(frame);
    }

    fn control(&mut self, command: Option<Command>) -> Control {
        match command {
            Some(Command::Frame(frame)) => {
                self.enqueue(frame);
                Control::Continue
            }
            Some(Command::Shutdown(ack)) => Control::Stop(Some(ack)),
            None => Control::Stop(None),
        }
    }

    async fn connect(&mut self) -> Phase {
        self.attempt += 1;
        self.set_state(ConnectionState::Connecting {
            attempt: self.attempt,
        });

        let address = self.options.address();
        let connect = TcpStream::connect(address.clone());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(stream) => {
                            info!(%address, buffered = self.buffer.len(), "forwarding connected");
                            Phase::Connected(Connection::new(stream, self.options.codec()))
                        }
                        Err(e) => {
                            debug!(%address, attempt = self.attempt, error = %e, "connect failed");
                            self.set_state(ConnectionState::Disconnected);
                            Phase::Backoff
                        }
                    };
                }
                command = self.rx.recv() => {
                    if let Control::Stop(ack) = self.control(command) {
                        return self.stop(None, ack).await;
                    }
                }
            }
        }
    }

    async fn backoff(&mut self) -> Phase {
        let sleep = tokio::time::sleep(self.delay);
        tokio::pin!(sleep);
        self.delay = (self.delay * 2).min(self.options.max_reconnect_delay);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connect,
                command = self.rx.recv() => {
                    if let Control::Stop(ack) = self.control(command) {
                        return self.stop(None, ack).await;
                    }
                }
            }
        }
    }

    async fn pump(&mut self, mut connection: Connection) -> Phase {
        self.set_state(ConnectionState::Connected);
        self.connected_at = Some(Instant::now());

        if let Err(e) = self.flush(&mut connection).await {
            return self.lost(e);
        }

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Frame(frame)) => {
                        if let Err(e) = self.write(&mut connection, frame.clone()).await {
                            self.enqueue(frame);
                            return self.lost(e);
                        }
                    }
                    Some(Command::Shutdown(ack)) => return self.stop(Some(connection), Some(ack)).await,
                    None => return self.stop(Some(connection), None).await,
                },
                result = closed(&mut connection.reader) => {
                    let e = match result {
                        Ok(()) => ForwardError::Io(std::io::ErrorKind::UnexpectedEof.into()),
                        Err(e) => ForwardError::Io(e),
                    };
                    return self.lost(e);
                }
            }
        }
    }

    fn lost(&mut self, error: ForwardError) -> Phase {
        let stable = self
            .connected_at
            .take()
            .is_some_and(|since| since.elapsed() >= STABLE_CONNECTION);
        if stable {
            self.attempt = 0;
            self.delay = self.options.reconnect_delay;
        }
        warn!(
            address = %self.options.address(),
            error = %error,
            buffered = self.buffer.len(),
            "forwarding connection lost"
        );
        self.set_state(ConnectionState::Disconnected);
        Phase::Backoff
    }

    async fn write(&self, connection: &mut Connection, frame: Bytes) -> Result<(), ForwardError> {
        match tokio::time::timeout(self.options.write_timeout, connection.writer.send(frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ForwardError::WriteTimeout(
                self.options.write_timeout.as_millis() as u64,
            )),
        }
    }

    /// Write buffered frames in order. A frame that fails stays buffered.
    async fn flush(&mut self, connection: &mut Connection) -> Result<(), ForwardError> {
        while let Some(frame) = self.buffer.pop_front() {
            if let Err(e) = self.write(connection, frame.clone()).await {
                self.buffer.push_front(frame);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn stop(&mut self, mut connection: Option<Connection>, ack: Option<oneshot::Sender<usize>>) -> Phase {
        let mut attempts = 0;
        while !self.buffer.is_empty() && attempts < SHUTDOWN_ATTEMPTS {
            attempts += 1;
            if connection.is_none() {
                let connect = TcpStream::connect(self.options.address());
                if let Ok(Ok(stream)) = tokio::time::timeout(SHUTDOWN_RETRY, connect).await {
                    connection = Some(Connection::new(stream, self.options.codec()));
                }
            }
            if let Some(mut open) = connection.take() {
                match self.flush(&mut open).await {
                    Ok(()) => connection = Some(open),
                    Err(e) => debug!(error = %e, "flush at shutdown failed"),
                }
            }
            if !self.buffer.is_empty() {
                tokio::time::sleep(SHUTDOWN_RETRY).await;
            }
        }

        let undelivered = self.buffer.len();
        if undelivered > 0 {
            warn!(
                undelivered,
                address = %self.options.address(),
                "dropping events not delivered before shutdown"
            );
            self.buffer.clear();
        }
        if let Some(mut open) = connection {
            let _ = open.writer.close().await;
        }

        self.set_state(ConnectionState::Disconnected);
        if let Some(ack) = ack {
            let _ = ack.send(undelivered);
        }
        Phase::Stopped
    }
}

/// Resolves when the peer closes its end. The master never writes, so
/// anything read is discarded.
async fn closed(reader: &mut OwnedReadHalf) -> std::io::Result<()> {
    let mut scratch = [0u8; 256];
    loop {
        if reader.read(&mut scratch).await? == 0 {
            return Ok(());
        }
    }
}

struct TcpAppender {
    client: ForwardClient,
    layout: Option<Layout>,
}

impl Appender for TcpAppender {
    fn append(&self, event: &LogEvent) -> anyhow::Result<()> {
        let payload = match &self.layout {
            Some(layout) => layout(event),
            None => event.serialise()?,
        };
        self.client.send(Bytes::from(payload))?;
        Ok(())
    }

    fn shutdown(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.client.shutdown().await?;
            Ok(())
        })
    }
}

/// `tcp`: forward every event to a master's `tcp-server`
pub struct TcpAppenderFactory;

impl AppenderFactory for TcpAppenderFactory {
    fn build(
        &self,
        config: &AppenderConfig,
        ctx: &mut AppenderContext<'_, '_>,
    ) -> anyhow::Result<Arc<dyn Appender>> {
        let options = ForwardOptions::from_config(config)?;
        let layout = match config.get("layout") {
            Some(layout) => Some(ctx.layouts().layout(Some(layout))?),
            None => None,
        };
        let client = ForwardClient::spawn(options)?;
        Ok(Arc::new(TcpAppender { client, layout }))
    }
}
