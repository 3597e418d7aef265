use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use pixie_frame::{FrameDecoder, FrameEncoder, JsonSerializer, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{Dispatcher, Listeners};
use crate::handle::SessionHandle;
use crate::state::{ConnectionState, SessionId};

type StateListener = dyn Fn(ConnectionState) + Send + Sync;
type MessageListener<S> = dyn Fn(&Session<S>) + Send + Sync;

/// One TCP connection with its framing buffers and I/O pumps.
///
/// `Session` is a cheap handle; clones refer to the same connection. The
/// inbound pump feeds the frame decoder and raises "message received"
/// notifications; the outbound pump writes whatever [`send`](Self::send)
/// queued. Both pumps stop once the session reaches an exiting state.
///
/// A notification is raised once per socket read that leaves a complete
/// frame buffered, not once per frame. Subscribers pull messages until
/// [`get_message`](Self::get_message) returns `None`, or use
/// [`drain_messages`](Self::drain_messages).
///
/// The length prefix can describe payloads up to `i32::MAX` bytes, but a
/// session only accepts up to [`SessionConfig::max_payload_size`] (16 MiB by
/// default) in either direction. A peer announcing a larger frame is
/// disconnected; raise the limit in the config to carry bigger messages.
pub struct Session<S: Serializer = JsonSerializer> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: Serializer> {
    id: SessionId,
    remote_addr: SocketAddr,
    config: SessionConfig,
    serializer: S,
    lifecycle: Mutex<Lifecycle>,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    signal: WriteSignal,
    state_listeners: Listeners<StateListener>,
    message_listeners: Listeners<MessageListener<S>>,
    dispatcher: Dispatcher,
}

struct Lifecycle {
    state: ConnectionState,
    /// Control handle used to shut the socket down; the pumps own clones.
    stream: Option<TcpStream>,
    closed: bool,
}

impl<S: Serializer> Session<S> {
    /// Wrap an already connected socket. Pumps start immediately.
    pub fn inbound(stream: TcpStream, config: SessionConfig, serializer: S) -> Result<Self> {
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(config.nodelay)?;

        let session = Self::build(remote_addr, config, serializer, ConnectionState::Connected)?;
        {
            let mut life = session.inner.lock_lifecycle();
            if let Err(err) = session.start_pumps(&stream) {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(err);
            }
            life.stream = Some(stream);
        }

        debug!(session_id = %session.id(), remote = %remote_addr, "inbound session created");
        Ok(session)
    }

    /// Prepare a session to `endpoint`. Nothing is dialed until [`open`](Self::open).
    pub fn outbound(endpoint: SocketAddr, config: SessionConfig, serializer: S) -> Result<Self> {
        Self::build(endpoint, config, serializer, ConnectionState::Disconnected)
    }

    fn build(
        remote_addr: SocketAddr,
        config: SessionConfig,
        serializer: S,
        initial: ConnectionState,
    ) -> Result<Self> {
        let id = SessionId::new();
        let dispatcher = Dispatcher::spawn(format!("pixie-events-{id}"))?;
        let frame_config = config.frame_config();

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                remote_addr,
                config,
                serializer,
                lifecycle: Mutex::new(Lifecycle {
                    state: initial,
                    stream: None,
                    closed: false,
                }),
                decoder: FrameDecoder::with_config(frame_config.clone()),
                encoder: FrameEncoder::with_config(frame_config),
                signal: WriteSignal::new(),
                state_listeners: Listeners::new(),
                message_listeners: Listeners::new(),
                dispatcher,
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_lifecycle().state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Connect if not connected yet, then mark the session `Connected`.
    ///
    /// On an inbound session this only re-publishes `Connected`. A closed
    /// session cannot be reopened.
    pub fn open(&self) -> Result<()> {
        {
            let mut life = self.inner.lock_lifecycle();
            if life.closed {
                return Err(SessionError::InvalidOperation("session has been closed"));
            }
            if life.stream.is_some() {
                self.inner.transition(&mut life, ConnectionState::Connected);
                return Ok(());
            }
            if life.state == ConnectionState::PendingConnect {
                return Err(SessionError::InvalidOperation("connect already in progress"));
            }
            self.inner.transition(&mut life, ConnectionState::PendingConnect);
        }

        let connected = pixie_transport::connect(self.remote_addr(), self.inner.config.connect_timeout)
            .map_err(SessionError::from)
            .and_then(|stream| {
                stream.set_nodelay(self.inner.config.nodelay)?;
                Ok(stream)
            });

        let mut life = self.inner.lock_lifecycle();
        let stream = match connected {
            Ok(stream) => stream,
            Err(err) => {
                if !life.closed {
                    self.inner.transition(&mut life, ConnectionState::Disconnected);
                }
                warn!(session_id = %self.id(), remote = %self.remote_addr(), error = %err, "connect failed");
                return Err(err);
            }
        };

        if life.closed {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(SessionError::InvalidOperation("session closed while connecting"));
        }
        if let Err(err) = self.start_pumps(&stream) {
            let _ = stream.shutdown(Shutdown::Both);
            self.inner.transition(&mut life, ConnectionState::Disconnected);
            return Err(err);
        }
        life.stream = Some(stream);
        self.inner.transition(&mut life, ConnectionState::Connected);

        info!(session_id = %self.id(), remote = %self.remote_addr(), "session connected");
        Ok(())
    }

    /// Shut the socket down and move to `Disconnected`.
    ///
    /// Blocked pump reads and writes fail and the pumps exit. Closing an
    /// already closed session does nothing.
    pub fn close(&self) -> Result<()> {
        let stream = {
            let mut life = self.inner.lock_lifecycle();
            if life.closed {
                return Ok(());
            }
            life.closed = true;
            self.inner.transition(&mut life, ConnectionState::PendingDisconnect);
            life.stream.take()
        };

        let result = match &stream {
            Some(stream) => match stream.shutdown(Shutdown::Both) {
                Err(err) if err.kind() != ErrorKind::NotConnected => Err(err.into()),
                _ => Ok(()),
            },
            None => Ok(()),
        };
        drop(stream);

        self.inner.signal.notify();
        self.inner.set_state(ConnectionState::Disconnected);

        debug!(session_id = %self.id(), remote = %self.remote_addr(), "session closed");
        result
    }

    /// Serialize `message` and queue it for the outbound pump.
    ///
    /// Fails with [`SessionError::InvalidOperation`] unless the session is
    /// `Connected`; nothing is queued in that case.
    pub fn send<T>(&self, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::InvalidOperation("connection isn't open"));
        }

        let payload = self.inner.serializer.serialize(message)?;
        self.inner.encoder.queue(&payload)?;
        self.inner.signal.notify();
        Ok(())
    }

    /// Pull one decoded message off the inbound buffer.
    ///
    /// Returns `Ok(None)` while no complete frame is buffered.
    pub fn get_message<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.inner.decoder.extract_message()? {
            Some(payload) => Ok(Some(self.inner.serializer.deserialize(&payload)?)),
            None => Ok(None),
        }
    }

    /// Deliver every buffered message to `deliver`, in arrival order.
    ///
    /// Payloads that fail to deserialize are logged and skipped. Returns the
    /// number of messages delivered.
    pub fn drain_messages<T>(&self, mut deliver: impl FnMut(T)) -> usize
    where
        T: DeserializeOwned,
    {
        let mut delivered = 0;
        loop {
            match self.get_message::<T>() {
                Ok(Some(message)) => {
                    deliver(message);
                    delivered += 1;
                }
                Ok(None) => break,
                Err(SessionError::Serializer(err)) => {
                    warn!(session_id = %self.id(), error = %err, "dropping undecodable message");
                }
                Err(err) => {
                    debug!(session_id = %self.id(), error = %err, "stopped draining messages");
                    break;
                }
            }
        }
        delivered
    }

    /// Whether a complete inbound frame is buffered.
    pub fn has_message(&self) -> bool {
        self.inner.decoder.has_message()
    }

    /// Framed bytes queued but not yet handed to the socket.
    pub fn pending_outbound(&self) -> usize {
        self.inner.encoder.pending_len()
    }

    /// Subscribe to state transitions.
    pub fn on_state_changed(&self, listener: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.inner.state_listeners.add(Arc::new(listener));
    }

    /// Subscribe to "message received" notifications.
    ///
    /// If a frame is already buffered when subscribing, a notification is
    /// raised right away so data that arrived before the subscription is not
    /// stranded.
    pub fn on_message_received(&self, listener: impl Fn(&Session<S>) + Send + Sync + 'static) {
        self.inner.message_listeners.add(Arc::new(listener));
        if self.has_message() {
            self.publish_message();
        }
    }

    fn publish_message(&self) {
        let listeners = self.inner.message_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let session = self.clone();
        self.inner.dispatcher.publish(move || {
            for listener in &listeners {
                listener(&session);
            }
        });
    }

    fn start_pumps(&self, stream: &TcpStream) -> Result<()> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;

        let session = self.clone();
        thread::Builder::new()
            .name(format!("pixie-read-{}", self.id()))
            .spawn(move || session.run_inbound(reader))?;

        let session = self.clone();
        thread::Builder::new()
            .name(format!("pixie-write-{}", self.id()))
            .spawn(move || session.run_outbound(writer))?;

        Ok(())
    }

    fn run_inbound(self, mut stream: TcpStream) {
        let mut chunk = vec![0u8; self.inner.config.read_chunk_size.max(1)];

        while !self.state().is_exiting() {
            let read = match stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(session_id = %self.id(), "peer closed the connection");
                    self.close_logged();
                    break;
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.report_io_failure("read", &err);
                    self.close_logged();
                    break;
                }
            };

            match self.inner.decoder.append(&chunk[..read]) {
                Ok(true) => self.publish_message(),
                Ok(false) => {}
                Err(err) => {
                    error!(session_id = %self.id(), error = %err, "invalid frame from peer");
                    self.close_logged();
                    break;
                }
            }
        }

        trace!(session_id = %self.id(), "inbound pump stopped");
    }

    fn run_outbound(self, mut stream: TcpStream) {
        let signal = &self.inner.signal;

        while !self.state().is_exiting() {
            if !signal.wait_and_claim() {
                continue;
            }
            if self.state().is_exiting() {
                signal.release();
                break;
            }

            let Some(block) = self.inner.encoder.drain() else {
                signal.release();
                continue;
            };

            let result = stream.write_all(&block).and_then(|()| stream.flush());
            signal.release();
            match result {
                Ok(()) => {
                    trace!(session_id = %self.id(), bytes = block.len(), "flushed outbound frames");
                    signal.notify();
                }
                Err(err) => {
                    self.report_io_failure("write", &err);
                    self.close_logged();
                }
            }
        }

        trace!(session_id = %self.id(), "outbound pump stopped");
    }

    fn report_io_failure(&self, op: &'static str, err: &std::io::Error) {
        if self.state().is_exiting() {
            debug!(session_id = %self.id(), op, error = %err, "socket closed during i/o");
        } else {
            error!(session_id = %self.id(), remote = %self.remote_addr(), op, error = %err, "socket i/o failed");
        }
    }

    fn close_logged(&self) {
        if let Err(err) = self.close() {
            warn!(session_id = %self.id(), error = %err, "error while closing session");
        }
    }
}

impl<S: Serializer> Inner<S> {
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut life = self.lock_lifecycle();
        self.transition(&mut life, next);
    }

    /// Record `next` and publish it. Called with the lifecycle lock held so
    /// notifications are queued in transition order.
    fn transition(&self, life: &mut Lifecycle, next: ConnectionState) {
        life.state = next;
        trace!(session_id = %self.id, state = %next, "state changed");

        let listeners = self.state_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        self.dispatcher.publish(move || {
            for listener in &listeners {
                listener(next);
            }
        });
    }
}

impl<S: Serializer> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Serializer> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .finish()
    }
}

impl<S: Serializer> SessionHandle for Session<S> {
    fn id(&self) -> SessionId {
        Session::id(self)
    }

    fn remote_addr(&self) -> SocketAddr {
        Session::remote_addr(self)
    }

    fn state(&self) -> ConnectionState {
        Session::state(self)
    }

    fn open(&self) -> Result<()> {
        Session::open(self)
    }

    fn close(&self) -> Result<()> {
        Session::close(self)
    }

    fn send<T>(&self, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        Session::send(self, message)
    }
}

/// Single-slot wake-up for the outbound pump plus its "write in progress"
/// flag, both guarded by one lock.
struct WriteSignal {
    slot: Mutex<SignalSlot>,
    ready: Condvar,
}

#[derive(Default)]
struct SignalSlot {
    signaled: bool,
    writing: bool,
}

impl WriteSignal {
    fn new() -> Self {
        Self {
            slot: Mutex::new(SignalSlot::default()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.lock().signaled = true;
        self.ready.notify_one();
    }

    /// Block until signalled, consume the signal and claim the writer slot.
    /// Returns `false` if a write is already in flight.
    fn wait_and_claim(&self) -> bool {
        let mut slot = self.lock();
        while !slot.signaled {
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.signaled = false;
        if slot.writing {
            return false;
        }
        slot.writing = true;
        true
    }

    fn release(&self) {
        self.lock().writing = false;
    }
}
