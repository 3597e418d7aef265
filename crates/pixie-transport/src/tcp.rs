use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// How long a wake-up dial may take before it is abandoned.
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// Listening TCP socket.
///
/// Accepting is blocking. A thread parked in [`TcpTransport::accept`] can be
/// released with [`TcpTransport::wake`], which dials the listener once.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr,
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr,
            source: e,
        })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, remote) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%remote, "accepted connection");
        Ok((stream, remote))
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Release a thread blocked in [`accept`](Self::accept).
    ///
    /// The caller is expected to have flipped its own shutdown flag first so
    /// the connection accepted here is discarded.
    pub fn wake(&self) {
        let target = wake_target(self.local_addr);
        match TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
            Ok(_) => debug!(%target, "woke accept loop"),
            Err(err) => debug!(%target, error = %err, "wake dial failed"),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// Connect to a remote endpoint (blocking), optionally bounded by `timeout`.
pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|e| TransportError::Connect { addr, source: e })?;
    debug!(%addr, "connected to tcp endpoint");
    Ok(stream)
}

// A wildcard listener cannot be dialed directly; use loopback of the same family.
fn wake_target(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}
