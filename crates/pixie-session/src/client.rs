use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pixie_frame::{JsonSerializer, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::Listeners;
use crate::session::Session;
use crate::state::ConnectionState;

type StateListener = dyn Fn(ConnectionState) + Send + Sync;
type MessageListener<M> = dyn Fn(&M) + Send + Sync;

/// Typed client for one server endpoint.
///
/// Each [`connect`](Self::connect) creates a fresh outbound session.
/// Subscriptions are registered on the client and carried over to every
/// session it creates.
pub struct PixieClient<M, S: Serializer = JsonSerializer> {
    endpoint: SocketAddr,
    config: SessionConfig,
    serializer: S,
    session: Mutex<Option<Session<S>>>,
    state_listeners: Arc<Listeners<StateListener>>,
    message_listeners: Arc<Listeners<MessageListener<M>>>,
}

impl<M> PixieClient<M, JsonSerializer> {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self::with_config(endpoint, SessionConfig::default())
    }

    pub fn with_config(endpoint: SocketAddr, config: SessionConfig) -> Self {
        Self::with_serializer(endpoint, config, JsonSerializer)
    }
}

impl<M, S: Serializer> PixieClient<M, S> {
    pub fn with_serializer(endpoint: SocketAddr, config: SessionConfig, serializer: S) -> Self {
        Self {
            endpoint,
            config,
            serializer,
            session: Mutex::new(None),
            state_listeners: Arc::new(Listeners::new()),
            message_listeners: Arc::new(Listeners::new()),
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// State of the current session; `Disconnected` before the first connect.
    pub fn state(&self) -> ConnectionState {
        self.lock_session()
            .as_ref()
            .map_or(ConnectionState::Disconnected, Session::state)
    }

    /// Close the current session. Failures are logged, not returned.
    pub fn disconnect(&self) {
        let Some(session) = self.lock_session().clone() else {
            return;
        };
        if let Err(err) = session.close() {
            warn!(endpoint = %self.endpoint, error = %err, "error while disconnecting");
        }
    }

    pub fn on_state_changed(&self, listener: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.state_listeners.add(Arc::new(listener));
    }

    /// Called for every message received from the server, in arrival order.
    pub fn on_message_received(&self, listener: impl Fn(&M) + Send + Sync + 'static) {
        self.message_listeners.add(Arc::new(listener));
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session<S>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M, S> PixieClient<M, S>
where
    M: DeserializeOwned + 'static,
    S: Serializer,
{
    /// Open a new session to the endpoint.
    ///
    /// Fails with [`SessionError::InvalidOperation`] while a session is
    /// connecting or connected; disconnect first.
    pub fn connect(&self) -> Result<()> {
        let session = {
            let mut current = self.lock_session();
            if let Some(existing) = current.as_ref() {
                if !existing.state().is_exiting() {
                    return Err(SessionError::InvalidOperation("client is already connected"));
                }
            }

            let session = Session::outbound(self.endpoint, self.config.clone(), self.serializer.clone())?;
            self.forward_events(&session);
            *current = Some(session.clone());
            session
        };

        debug!(endpoint = %self.endpoint, session_id = %session.id(), "connecting");
        session.open()
    }

    fn forward_events(&self, session: &Session<S>) {
        let state_listeners = Arc::clone(&self.state_listeners);
        session.on_state_changed(move |state| {
            for listener in state_listeners.snapshot() {
                listener(state);
            }
        });

        let message_listeners = Arc::clone(&self.message_listeners);
        session.on_message_received(move |session| {
            session.drain_messages::<M>(|message| {
                for listener in message_listeners.snapshot() {
                    listener(&message);
                }
            });
        });
    }
}

impl<M, S> PixieClient<M, S>
where
    M: Serialize,
    S: Serializer,
{
    /// Queue `message` for the server.
    ///
    /// Fails with [`SessionError::InvalidOperation`] if the client has never
    /// connected or the session is not `Connected`.
    pub fn send(&self, message: &M) -> Result<()> {
        let session = self.lock_session().clone();
        match session {
            Some(session) => session.send(message),
            None => Err(SessionError::InvalidOperation("client has not connected")),
        }
    }
}

impl<M, S: Serializer> Drop for PixieClient<M, S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn fresh_client_is_disconnected_and_cannot_send() {
        let client: PixieClient<String> = PixieClient::new(SocketAddr::from(([127, 0, 0, 1], 9)));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let err = client.send(&"hello".to_string()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidOperation(_)));

        // Disconnecting an unconnected client is a no-op.
        client.disconnect();
    }

    #[test]
    fn connect_twice_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client: PixieClient<String> = PixieClient::new(listener.local_addr().unwrap());

        client.connect().unwrap();
        let _accepted = listener.accept().unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        let err = client.connect().unwrap_err();
        assert!(matches!(err, SessionError::InvalidOperation(_)));
    }

    #[test]
    fn reconnect_after_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client: PixieClient<String> = PixieClient::new(listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();
        client.on_state_changed(move |state| {
            let _ = tx.send(state);
        });

        let next = || rx.recv_timeout(Duration::from_secs(2)).unwrap();

        client.connect().unwrap();
        let _first = listener.accept().unwrap();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            [next(), next(), next(), next()],
            [
                ConnectionState::PendingConnect,
                ConnectionState::Connected,
                ConnectionState::PendingDisconnect,
                ConnectionState::Disconnected,
            ]
        );

        client.connect().unwrap();
        let _second = listener.accept().unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(
            [next(), next()],
            [ConnectionState::PendingConnect, ConnectionState::Connected]
        );
    }

    #[test]
    fn failed_connect_leaves_client_disconnected() {
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let config = SessionConfig {
            connect_timeout: Some(Duration::from_millis(500)),
            ..SessionConfig::default()
        };
        let client: PixieClient<String> = PixieClient::with_config(addr, config);

        assert!(matches!(client.connect(), Err(SessionError::Transport(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
