//! Chat client for the `chat-server` example.
//!
//! Run with:
//!   cargo run --example chat-client -- <name>
//!
//! Type lines to send them; `exit` quits.

use std::io::BufRead;
use std::net::SocketAddr;

use pixie::PixieClient;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    from: String,
    text: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args().nth(1).unwrap_or_else(|| "anonymous".to_string());
    let addr: SocketAddr = "127.0.0.1:8000".parse()?;

    let client: PixieClient<ChatMessage> = PixieClient::new(addr);
    client.on_state_changed(|state| eprintln!("[{state}]"));
    client.on_message_received(|message: &ChatMessage| {
        println!("{}: {}", message.from, message.text);
    });
    client.connect()?;

    for line in std::io::stdin().lock().lines() {
        let text = line?;
        if text == "exit" {
            break;
        }
        client.send(&ChatMessage {
            from: name.clone(),
            text,
        })?;
    }

    client.disconnect();
    Ok(())
}
