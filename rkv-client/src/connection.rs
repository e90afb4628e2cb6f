//! # Connection
//!
//! Purpose: Own one RESP byte stream, drive it through its lifecycle and
//! correlate replies with the requests that caused them.
//!
//! ## Design Principles
//! 1. **Actor Pattern**: A single driver task owns the socket, the streaming
//!    decoder and the pending queue. Handles talk to it over a channel, so no
//!    two writers ever touch the queue.
//! 2. **FIFO Correlation**: RESP answers strictly in request order; the head of
//!    the pending queue always owns the next decoded reply.
//! 3. **Fail Whole**: Transport, protocol and timeout failures tear the
//!    connection down and fail every pending request. After an unanswered
//!    request the stream cannot be realigned.
//! 4. **Observable Lifecycle**: State is published on a `watch` channel and
//!    lifecycle events on a `broadcast` channel the pool subscribes to.
//!
//! ## State Machine
//!
//! ```text
//! CREATED --connect()--> CONNECTING --PING ok / AUTH ok--> READY
//!                             |                              |
//!                             +--------> ERRORED <-----------+
//! any state --close()--> CLOSED
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rkv_common::{
    encode_command, encode_pipeline, Command, Decoder, Pipeline, ProtocolError, ReplyValue,
    ServerError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{AbortReason, ClientError, ClientResult};
use crate::transport::{self, BoxStream};

/// Read buffer growth step.
const READ_CHUNK: usize = 8 * 1024;

/// Time allowed for a graceful socket shutdown when tearing down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 16;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque connection identity, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, no socket yet.
    Created,
    /// Socket opening or PING/AUTH handshake in progress.
    Connecting,
    /// Accepting commands.
    Ready,
    /// Failed; terminal.
    Errored,
    /// Closed by the caller; terminal.
    Closed,
}

impl ConnectionState {
    /// True for the states no transition leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Errored | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Created => "CREATED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Ready => "READY",
            ConnectionState::Errored => "ERRORED",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Lifecycle notification delivered to subscribers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection reached ERRORED or CLOSED.
    Closed {
        id: ConnectionId,
        state: ConnectionState,
        error: Option<ClientError>,
    },
    /// No traffic for the configured idle timeout while nothing was pending.
    IdleTimeout { id: ConnectionId },
}

/// Work handed to the driver: encoded bytes plus the number of replies owed.
struct Request {
    payload: Bytes,
    expected: usize,
    reply: oneshot::Sender<ClientResult<Vec<ReplyValue>>>,
}

/// A written request waiting for its replies.
struct PendingRequest {
    expected: usize,
    replies: Vec<ReplyValue>,
    deadline: Instant,
    reply: oneshot::Sender<ClientResult<Vec<ReplyValue>>>,
}

/// State shared between handles and the driver task.
struct Core {
    id: ConnectionId,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<ClientError>>,
    close: Notify,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Core {
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(id = %self.id, %from, %to, "state transition");
        }
        changed
    }

    /// Moves to a terminal state (unless one was already reached), records the
    /// error and notifies subscribers. Returns the final state.
    fn finish(&self, target: ConnectionState, error: Option<ClientError>) -> ConnectionState {
        if let Some(err) = &error {
            *lock(&self.last_error) = Some(err.clone());
        }
        let mut final_state = target;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                final_state = *state;
                false
            } else {
                *state = target;
                true
            }
        });
        let _ = self.events.send(ConnectionEvent::Closed {
            id: self.id,
            state: final_state,
            error,
        });
        final_state
    }

    fn last_error(&self) -> Option<ClientError> {
        lock(&self.last_error).clone()
    }
}

struct Inner {
    core: Arc<Core>,
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
}

/// Handle to one RESP connection.
///
/// Clones share the same socket. The connection closes when [`close`] is
/// called or when the last handle is dropped.
///
/// [`close`]: Connection::close
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Creates a connection in the CREATED state without touching the network.
    pub fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Created);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Connection {
            inner: Arc::new(Inner {
                core: Arc::new(Core {
                    id: ConnectionId::next(),
                    config,
                    state,
                    last_error: Mutex::new(None),
                    close: Notify::new(),
                    events,
                }),
                requests: Mutex::new(None),
            }),
        }
    }

    /// Creates a connection and waits until it is READY.
    pub async fn open(config: ConnectionConfig) -> ClientResult<Self> {
        let conn = Connection::new(config);
        conn.connect().await?;
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.core.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.core.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.core.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Subscribes to lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.core.events.subscribe()
    }

    /// Opens the socket and performs the PING/AUTH handshake.
    ///
    /// Resolves once the connection is READY and fails if it ends up ERRORED
    /// or CLOSED instead. Calling it again on a READY connection is a no-op;
    /// calling it while another call is connecting waits for the same outcome.
    pub async fn connect(&self) -> ClientResult<()> {
        let core = &self.inner.core;
        if core.transition(ConnectionState::Created, ConnectionState::Connecting) {
            let (tx, rx) = mpsc::unbounded_channel();
            *lock(&self.inner.requests) = Some(tx);
            tokio::spawn(run(core.clone(), rx));
        }
        self.ready().await
    }

    /// Waits until the connection leaves CONNECTING.
    pub async fn ready(&self) -> ClientResult<()> {
        let core = &self.inner.core;
        let mut states = core.state.subscribe();
        let state = match states
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
        {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        };
        match state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Created | ConnectionState::Connecting => {
                Err(ClientError::NotReady(state))
            }
            ConnectionState::Closed => Err(ClientError::Aborted(AbortReason::Closed)),
            ConnectionState::Errored => Err(core.last_error().unwrap_or(ClientError::NotReady(state))),
        }
    }

    /// Sends one command and returns its reply.
    ///
    /// An error reply from the server is returned as `Ok(ReplyValue::Error)`;
    /// the connection stays READY.
    pub async fn send(&self, command: Command) -> ClientResult<ReplyValue> {
        let mut payload = BytesMut::new();
        encode_command(&command, &mut payload)?;
        let mut replies = self.submit(payload.freeze(), 1).await?;
        replies.pop().ok_or(ClientError::UnexpectedResponse)
    }

    /// Sends several commands in one write and returns one reply per command,
    /// in order.
    pub async fn send_many(&self, commands: &[Command]) -> ClientResult<Vec<ReplyValue>> {
        let mut payload = BytesMut::new();
        encode_pipeline(commands, &mut payload)?;
        self.submit(payload.freeze(), commands.len()).await
    }

    /// Executes a pipeline; see [`Connection::send_many`].
    pub async fn pipeline(&self, pipeline: &Pipeline) -> ClientResult<Vec<ReplyValue>> {
        self.send_many(pipeline.commands()).await
    }

    async fn submit(&self, payload: Bytes, expected: usize) -> ClientResult<Vec<ReplyValue>> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ClientError::NotReady(state));
        }

        let (tx, rx) = oneshot::channel();
        let request = Request {
            payload,
            expected,
            reply: tx,
        };
        {
            let requests = lock(&self.inner.requests);
            let sender = requests
                .as_ref()
                .ok_or(ClientError::Aborted(AbortReason::Closed))?;
            sender
                .send(request)
                .map_err(|_| ClientError::Aborted(AbortReason::Closed))?;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Aborted(AbortReason::Closed)),
        }
    }

    /// Closes the connection: pending requests fail with "connection closed",
    /// the socket is shut down and the state becomes CLOSED. Idempotent.
    pub fn close(&self) {
        let core = &self.inner.core;
        let mut previous = ConnectionState::Closed;
        core.state.send_if_modified(|state| {
            previous = *state;
            if state.is_terminal() {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        lock(&self.inner.requests).take();
        if previous.is_terminal() {
            return;
        }
        info!(id = %core.id, from = %previous, "closing connection");

        match previous {
            // No driver was ever started, so nobody else will report it.
            ConnectionState::Created => {
                core.finish(ConnectionState::Closed, None);
            }
            _ => core.close.notify_one(),
        }
    }
}

/// Why the driver stopped serving.
enum Exit {
    Closed,
    CommandTimeout(Duration),
    Failed(ClientError),
}

/// Socket halves plus decoder state.
///
/// The stream is split so a large request can be written while replies to
/// its first commands are already being read.
struct Wire {
    reader: ReadHalf<BoxStream>,
    writer: WriteHalf<BoxStream>,
    decoder: Decoder,
    buf: BytesMut,
}

impl Wire {
    fn new(stream: BoxStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Wire {
            reader,
            writer,
            decoder: Decoder::new(),
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    async fn write(&mut self, payload: &[u8]) -> ClientResult<()> {
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads at least one more byte into the buffer. Cancel safe.
    async fn fill(&mut self) -> ClientResult<()> {
        fill(&mut self.reader, &mut self.buf).await
    }

    fn next_reply(&mut self) -> ClientResult<Option<ReplyValue>> {
        Ok(self.decoder.decode(&mut self.buf)?)
    }

    async fn read_reply(&mut self) -> ClientResult<ReplyValue> {
        loop {
            if let Some(reply) = self.next_reply()? {
                return Ok(reply);
            }
            self.fill().await?;
        }
    }

    /// Request/response exchange used during the handshake.
    async fn call(&mut self, command: &Command, limit: Duration) -> ClientResult<ReplyValue> {
        let mut payload = BytesMut::new();
        encode_command(command, &mut payload)?;
        timeout(limit, self.exchange(&payload))
            .await
            .map_err(|_| ClientError::Timeout(limit))?
    }

    async fn exchange(&mut self, payload: &[u8]) -> ClientResult<ReplyValue> {
        self.write(payload).await?;
        self.read_reply().await
    }
}

async fn fill(reader: &mut ReadHalf<BoxStream>, buf: &mut BytesMut) -> ClientResult<()> {
    if buf.capacity() - buf.len() < READ_CHUNK / 4 {
        buf.reserve(READ_CHUNK);
    }
    let read = reader.read_buf(buf).await?;
    if read == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )
        .into());
    }
    Ok(())
}

async fn run(core: Arc<Core>, requests: mpsc::UnboundedReceiver<Request>) {
    let established = tokio::select! {
        biased;
        _ = core.close.notified() => None,
        result = establish(&core.config) => Some(result),
    };

    let wire = match established {
        None => {
            core.finish(ConnectionState::Closed, None);
            return;
        }
        Some(Err(err)) => {
            warn!(id = %core.id, error = %err, "connection failed before ready");
            core.finish(ConnectionState::Errored, Some(err));
            return;
        }
        Some(Ok(wire)) => wire,
    };

    if !core.transition(ConnectionState::Connecting, ConnectionState::Ready) {
        // Closed while the handshake was finishing.
        core.finish(ConnectionState::Closed, None);
        return;
    }
    info!(id = %core.id, "connection ready");

    let mut driver = Driver {
        core,
        wire,
        requests,
        pending: VecDeque::new(),
    };
    let exit = driver.serve().await;
    driver.shutdown(exit).await;
}

async fn establish(config: &ConnectionConfig) -> ClientResult<Wire> {
    let stream = timeout(config.connect_timeout, transport::open(config))
        .await
        .map_err(|_| ClientError::Timeout(config.connect_timeout))??;
    let mut wire = Wire::new(stream);
    handshake(&mut wire, config).await?;
    Ok(wire)
}

/// PING first; fall back to AUTH only when the server asks for it.
async fn handshake(wire: &mut Wire, config: &ConnectionConfig) -> ClientResult<()> {
    let limit = config.command_timeout;
    let ping = Command::new("PING");

    match wire.call(&ping, limit).await? {
        ReplyValue::Error(err) if requires_auth(&err) => {}
        ReplyValue::Error(err) => return Err(ClientError::Server(err)),
        _ => return Ok(()),
    }

    let Some(password) = config.password.as_deref() else {
        return Err(ClientError::Auth(
            "server requires authentication but no password is configured".to_string(),
        ));
    };
    let auth = match config.username.as_deref() {
        Some(username) => Command::new("AUTH").arg(username).arg(password),
        None => Command::new("AUTH").arg(password),
    };
    if let ReplyValue::Error(err) = wire.call(&auth, limit).await? {
        return Err(ClientError::Auth(err.to_string()));
    }

    match wire.call(&ping, limit).await? {
        ReplyValue::Error(err) => Err(ClientError::Auth(err.to_string())),
        _ => Ok(()),
    }
}

fn requires_auth(err: &ServerError) -> bool {
    err.tag == "NOAUTH"
        || err.message.contains("Authentication required")
        || (err.tag == "ERR" && err.message.starts_with("operation not permitted"))
}

struct Driver {
    core: Arc<Core>,
    wire: Wire,
    requests: mpsc::UnboundedReceiver<Request>,
    pending: VecDeque<PendingRequest>,
}

impl Driver {
    async fn serve(&mut self) -> Exit {
        let idle_timeout = self.core.config.idle_timeout;
        let mut idle_deadline = idle_timeout.map(|period| Instant::now() + period);

        loop {
            let command_deadline = self.pending.front().map(|pending| pending.deadline);
            let idle_armed = if self.pending.is_empty() { idle_deadline } else { None };

            tokio::select! {
                biased;
                _ = self.core.close.notified() => return Exit::Closed,
                _ = wait_until(command_deadline) => {
                    return Exit::CommandTimeout(self.core.config.command_timeout);
                }
                read = self.wire.fill() => {
                    if let Err(err) = read.and_then(|()| self.drain_replies()) {
                        return Exit::Failed(err);
                    }
                }
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if let Err(err) = self.dispatch(request).await {
                            return Exit::Failed(err);
                        }
                    }
                    // Every handle is gone.
                    None => return Exit::Closed,
                },
                _ = wait_until(idle_armed) => {
                    debug!(id = %self.core.id, "idle timeout");
                    let _ = self.core.events.send(ConnectionEvent::IdleTimeout { id: self.core.id });
                    idle_deadline = idle_timeout.map(|period| Instant::now() + period);
                    continue;
                }
            }

            idle_deadline = idle_timeout.map(|period| Instant::now() + period);
        }
    }

    /// Queues a request for correlation and writes it, reading replies while
    /// the write is in progress.
    async fn dispatch(&mut self, request: Request) -> ClientResult<()> {
        if request.reply.is_closed() {
            // The caller gave up before anything was written.
            return Ok(());
        }

        let limit = self.core.config.command_timeout;
        let payload = request.payload;
        self.pending.push_back(PendingRequest {
            expected: request.expected,
            replies: Vec::with_capacity(request.expected),
            deadline: Instant::now() + limit,
            reply: request.reply,
        });
        debug!(id = %self.core.id, replies = request.expected, queued = self.pending.len(), bytes = payload.len(), "writing request");

        let mut written = 0;
        while written < payload.len() {
            let deadline = self.pending.front().map(|pending| pending.deadline);
            tokio::select! {
                biased;
                _ = wait_until(deadline) => return Err(ClientError::Timeout(limit)),
                result = self.wire.writer.write(&payload[written..]) => match result? {
                    0 => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                    n => written += n,
                },
                read = fill(&mut self.wire.reader, &mut self.wire.buf) => {
                    read?;
                    self.drain_replies()?;
                }
            }
        }
        match timeout(limit, self.wire.writer.flush()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Timeout(limit)),
        }
    }

    /// Hands every complete reply in the buffer to the head of the queue.
    fn drain_replies(&mut self) -> ClientResult<()> {
        while let Some(reply) = self.wire.next_reply()? {
            let Some(head) = self.pending.front_mut() else {
                warn!(id = %self.core.id, "reply received with no request pending");
                return Err(ProtocolError::UnsolicitedReply.into());
            };
            head.replies.push(reply);
            if head.replies.len() == head.expected {
                if let Some(done) = self.pending.pop_front() {
                    // The caller may have stopped waiting; the replies were
                    // still consumed to keep the stream aligned.
                    let _ = done.reply.send(Ok(done.replies));
                }
            }
        }
        Ok(())
    }

    async fn shutdown(mut self, exit: Exit) {
        let (target, head_error, rest_error) = match exit {
            Exit::Closed => (
                ConnectionState::Closed,
                ClientError::Aborted(AbortReason::Closed),
                ClientError::Aborted(AbortReason::Closed),
            ),
            Exit::CommandTimeout(limit) => {
                warn!(id = %self.core.id, ?limit, pending = self.pending.len(), "command timed out, aborting connection");
                (
                    ConnectionState::Errored,
                    ClientError::Timeout(limit),
                    ClientError::Aborted(AbortReason::CommandTimeout),
                )
            }
            Exit::Failed(err) => {
                warn!(id = %self.core.id, error = %err, pending = self.pending.len(), "connection failed");
                (ConnectionState::Errored, err.clone(), err)
            }
        };

        // Terminal before anyone hears about the failure.
        let error = match target {
            ConnectionState::Errored => Some(head_error.clone()),
            _ => None,
        };
        let state = self.core.finish(target, error);

        if let Some(head) = self.pending.pop_front() {
            let _ = head.reply.send(Err(head_error));
        }
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(Err(rest_error.clone()));
        }
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(rest_error.clone()));
        }

        let _ = timeout(SHUTDOWN_GRACE, self.wire.writer.shutdown()).await;
        info!(id = %self.core.id, %state, "connection closed");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
