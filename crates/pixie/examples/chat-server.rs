//! Chat relay: every accepted client's message is broadcast to all others.
//!
//! Run with:
//!   cargo run --example chat-server
//!
//! In other terminals:
//!   cargo run --example chat-client -- alice
//!   cargo run --example chat-client -- bob

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use pixie::{PixieServer, SessionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = "127.0.0.1:8000".parse()?;
    let server: Arc<PixieServer<ChatMessage>> = Arc::new(PixieServer::bind(addr)?);
    let members: Arc<Mutex<HashSet<SessionId>>> = Arc::new(Mutex::new(HashSet::new()));
    eprintln!("Listening on {}", server.local_addr());

    {
        let weak = Arc::downgrade(&server);
        let members = Arc::clone(&members);
        server.on_connection_received(move |session| {
            eprintln!("Connection from {} ({})", session.remote_addr(), session.id());
            if let Some(server) = weak.upgrade() {
                if server.accept_session(session.id()).is_ok() {
                    members.lock().unwrap().insert(session.id());
                }
            }
        });
    }

    {
        let weak = Arc::downgrade(&server);
        let members = Arc::clone(&members);
        server.on_message_received(move |sender, message: &ChatMessage| {
            eprintln!("{}: {}", message.from, message.text);
            let Some(server) = weak.upgrade() else {
                return;
            };
            let recipients: Vec<SessionId> = members.lock().unwrap().iter().copied().collect();
            for id in recipients.into_iter().filter(|id| *id != sender) {
                if let Err(err) = server.send(id, message) {
                    eprintln!("Dropping member {id}: {err}");
                    members.lock().unwrap().remove(&id);
                }
            }
        });
    }

    server.start()?;
    Ok(())
}
