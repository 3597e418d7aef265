use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One line of CLI output: a received message or a connection event.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    Message {
        session: &'a str,
        message: &'a str,
        timestamp: u64,
    },
    Connection {
        session: &'a str,
        remote: &'a str,
        timestamp: u64,
    },
    State {
        session: &'a str,
        state: &'a str,
        timestamp: u64,
    },
}

impl<'a> Event<'a> {
    pub fn message(session: &'a str, message: &'a str) -> Self {
        Self::Message {
            session,
            message,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn connection(session: &'a str, remote: &'a str) -> Self {
        Self::Connection {
            session,
            remote,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn state(session: &'a str, state: &'a str) -> Self {
        Self::State {
            session,
            state,
            timestamp: now_unix_seconds(),
        }
    }

    fn columns(&self) -> [&'a str; 3] {
        match *self {
            Self::Message {
                session, message, ..
            } => ["message", session, message],
            Self::Connection {
                session, remote, ..
            } => ["connection", session, remote],
            Self::State { session, state, .. } => ["state", session, state],
        }
    }
}

pub fn print_event(event: &Event<'_>, format: OutputFormat) {
    let [kind, session, detail] = event.columns();
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "SESSION", "DETAIL"])
                .add_row(vec![kind, session, detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{kind} session={session} {detail}");
        }
        OutputFormat::Raw => {
            if let Event::Message { message, .. } = event {
                print_raw(message.as_bytes());
                print_raw(b"\n");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
