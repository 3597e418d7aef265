use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pixie_frame::{JsonSerializer, Serializer};
use pixie_transport::{TcpTransport, TransportError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::events::{Dispatcher, Listeners};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::state::{ConnectionState, SessionId};

type ConnectionListener<S> = dyn Fn(&Session<S>) + Send + Sync;
type MessageListener<M> = dyn Fn(SessionId, &M) + Send + Sync;
type StoppedListener = dyn Fn() + Send + Sync;

/// Typed TCP server.
///
/// [`start`](Self::start) blocks the calling thread in the accept loop, so
/// the server is usually shared through an `Arc` with the thread that will
/// later call [`stop`](Self::stop). New connections are held as *pending*
/// until [`accept_session`](Self::accept_session) approves them; only
/// accepted sessions are reachable through [`send`](Self::send).
///
/// Messages from every connected session, pending or accepted, are
/// deserialized into `M` and handed to the message listeners together with
/// the sender's [`SessionId`].
pub struct PixieServer<M, S: Serializer = JsonSerializer> {
    transport: TcpTransport,
    config: ServerConfig,
    serializer: S,
    running: AtomicBool,
    registry: Arc<SessionRegistry<Session<S>>>,
    connection_listeners: Listeners<ConnectionListener<S>>,
    message_listeners: Arc<Listeners<MessageListener<M>>>,
    stopped_listeners: Listeners<StoppedListener>,
    dispatcher: Dispatcher,
}

impl<M> PixieServer<M, JsonSerializer> {
    /// Bind a JSON server on `addr` with default session settings.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(ServerConfig::new(addr))
    }

    pub fn bind_with_config(config: ServerConfig) -> Result<Self> {
        Self::bind_with_serializer(config, JsonSerializer)
    }
}

impl<M, S: Serializer> PixieServer<M, S> {
    /// Bind with an explicit payload serializer.
    pub fn bind_with_serializer(config: ServerConfig, serializer: S) -> Result<Self> {
        let transport = TcpTransport::bind(config.bind_addr)?;
        let dispatcher = Dispatcher::spawn(format!("pixie-server-{}", transport.local_addr().port()))?;

        Ok(Self {
            transport,
            config,
            serializer,
            running: AtomicBool::new(true),
            registry: Arc::new(SessionRegistry::new()),
            connection_listeners: Listeners::new(),
            message_listeners: Arc::new(Listeners::new()),
            stopped_listeners: Listeners::new(),
            dispatcher,
        })
    }

    /// Address actually bound; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting, close every held session and notify subscribers.
    ///
    /// Safe to call from any thread and more than once.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(addr = %self.local_addr(), "stopping server");

        self.transport.wake();
        self.registry.close_all();

        let listeners = self.stopped_listeners.snapshot();
        self.dispatcher.publish(move || {
            for listener in &listeners {
                listener();
            }
        });
    }

    /// Approve a pending session so it can be reached through `send`.
    pub fn accept_session(&self, id: SessionId) -> Result<()> {
        self.registry.accept(id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.pending_len()
    }

    pub fn accepted_count(&self) -> usize {
        self.registry.accepted_len()
    }

    pub fn is_pending(&self, id: SessionId) -> bool {
        self.registry.is_pending(id)
    }

    pub fn is_accepted(&self, id: SessionId) -> bool {
        self.registry.is_accepted(id)
    }

    /// Called once per accepted TCP connection, before any approval.
    pub fn on_connection_received(&self, listener: impl Fn(&Session<S>) + Send + Sync + 'static) {
        self.connection_listeners.add(Arc::new(listener));
    }

    /// Called for every message decoded from any session.
    ///
    /// Runs on the sending session's notification thread, so messages from
    /// one session arrive in order.
    pub fn on_message_received(&self, listener: impl Fn(SessionId, &M) + Send + Sync + 'static) {
        self.message_listeners.add(Arc::new(listener));
    }

    pub fn on_server_stopped(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.stopped_listeners.add(Arc::new(listener));
    }

    /// Drop a session from the registry once it disconnects on its own.
    fn forget_on_close(&self, session: &Session<S>) {
        let registry = Arc::downgrade(&self.registry);
        let id = session.id();
        session.on_state_changed(move |state| {
            if state != ConnectionState::Disconnected {
                return;
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });
    }

    fn publish_connection(&self, session: &Session<S>) {
        let listeners = self.connection_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let session = session.clone();
        self.dispatcher.publish(move || {
            for listener in &listeners {
                listener(&session);
            }
        });
    }
}

impl<M, S> PixieServer<M, S>
where
    M: DeserializeOwned + 'static,
    S: Serializer,
{
    /// Run the accept loop on the calling thread.
    ///
    /// Returns `Ok(())` once [`stop`](Self::stop) has been called, or the
    /// accept error that ended the loop.
    pub fn start(&self) -> Result<()> {
        info!(addr = %self.local_addr(), transport = self.transport.transport_name(), "server started");

        while self.is_running() {
            let (stream, remote) = match self.transport.accept() {
                Ok(accepted) => accepted,
                Err(TransportError::Accept(err))
                    if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::ConnectionAborted) =>
                {
                    debug!(error = %err, "transient accept failure");
                    continue;
                }
                Err(err) => {
                    if !self.is_running() {
                        break;
                    }
                    error!(error = %err, "accept failed; leaving accept loop");
                    return Err(err.into());
                }
            };

            if !self.is_running() {
                debug!(%remote, "discarding connection accepted during shutdown");
                break;
            }

            let session = match Session::inbound(stream, self.config.session.clone(), self.serializer.clone()) {
                Ok(session) => session,
                Err(err) => {
                    warn!(%remote, error = %err, "failed to set up session");
                    continue;
                }
            };

            self.route_messages(&session);
            self.forget_on_close(&session);
            if !self.registry.admit(session.clone(), &self.running) {
                if let Err(err) = session.close() {
                    warn!(session_id = %session.id(), error = %err, "failed to close rejected session");
                }
            } else if session.state() == ConnectionState::Disconnected {
                // Closed before it was inserted; the listener may already have run.
                self.registry.remove(session.id());
            }
            info!(session_id = %session.id(), %remote, "connection received");
            self.publish_connection(&session);
        }

        info!(addr = %self.local_addr(), "server stopped");
        Ok(())
    }

    fn route_messages(&self, session: &Session<S>) {
        let listeners = Arc::clone(&self.message_listeners);
        session.on_message_received(move |session| {
            let id = session.id();
            session.drain_messages::<M>(|message| {
                for listener in listeners.snapshot() {
                    listener(id, &message);
                }
            });
        });
    }
}

impl<M, S> PixieServer<M, S>
where
    M: Serialize,
    S: Serializer,
{
    /// Send `message` to an accepted session.
    ///
    /// Ids that are unknown or still pending are logged and ignored.
    pub fn send(&self, id: SessionId, message: &M) -> Result<()> {
        self.registry.send(id, message)
    }
}

impl<M, S: Serializer> Drop for PixieServer<M, S> {
    fn drop(&mut self) {
        self.stop();
    }
}
