use std::io::BufRead;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use pixie_session::{PixieServer, ServerConfig, SessionConfig, SessionId};

use crate::cmd::ServeArgs;
use crate::exit::{session_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_event, Event, OutputFormat};

type StringServer = PixieServer<String>;

/// Time given to queued echoes before `--count` shuts the server down.
const COUNT_LINGER: Duration = Duration::from_millis(250);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut session = SessionConfig::default();
    if let Some(max) = args.max_payload {
        session.max_payload_size = max;
    }
    let config = ServerConfig {
        bind_addr: args.addr,
        session,
    };

    let server: Arc<StringServer> = Arc::new(
        PixieServer::bind_with_config(config).map_err(|err| session_error("bind failed", err))?,
    );
    tracing::info!(addr = %server.local_addr(), manual_accept = args.manual_accept, "serving");

    install_ctrlc_handler(Arc::downgrade(&server))?;
    register_connection_handler(&server, args.manual_accept, format);
    register_echo_handler(&server, args.echo_prefix, args.count, format);
    if args.manual_accept {
        spawn_accept_console(Arc::downgrade(&server))?;
    }

    server
        .start()
        .map_err(|err| session_error("accept failed", err))?;
    Ok(SUCCESS)
}

fn register_connection_handler(server: &Arc<StringServer>, manual_accept: bool, format: OutputFormat) {
    let weak = Arc::downgrade(server);
    server.on_connection_received(move |session| {
        let id = session.id().to_string();
        let remote = session.remote_addr().to_string();
        print_event(&Event::connection(&id, &remote), format);

        if manual_accept {
            return;
        }
        if let Some(server) = weak.upgrade() {
            if let Err(err) = server.accept_session(session.id()) {
                tracing::warn!(session_id = %id, error = %err, "auto-accept failed");
            }
        }
    });
}

fn register_echo_handler(
    server: &Arc<StringServer>,
    prefix: String,
    count: Option<usize>,
    format: OutputFormat,
) {
    let weak = Arc::downgrade(server);
    let received = AtomicUsize::new(0);
    server.on_message_received(move |id, message: &String| {
        print_event(&Event::message(&id.to_string(), message), format);

        let Some(server) = weak.upgrade() else {
            return;
        };
        if let Err(err) = server.send(id, &format!("{prefix}{message}")) {
            tracing::warn!(session_id = %id, error = %err, "echo failed");
        }

        let total = received.fetch_add(1, Ordering::SeqCst) + 1;
        if count.is_some_and(|limit| total == limit) {
            tracing::info!(total, "message count reached; stopping");
            let weak = Arc::downgrade(&server);
            thread::spawn(move || {
                thread::sleep(COUNT_LINGER);
                if let Some(server) = weak.upgrade() {
                    server.stop();
                }
            });
        }
    });
}

/// Read `accept <SESSION_ID>` commands from stdin.
fn spawn_accept_console(server: Weak<StringServer>) -> CliResult<()> {
    thread::Builder::new()
        .name("pixie-accept-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let Some(server) = server.upgrade() else {
                    break;
                };
                match parse_accept_command(&line) {
                    Some(Ok(id)) => match server.accept_session(id) {
                        Ok(()) => tracing::info!(session_id = %id, "session accepted"),
                        Err(err) => tracing::warn!(session_id = %id, error = %err, "accept failed"),
                    },
                    Some(Err(err)) => tracing::warn!(error = %err, "invalid accept command"),
                    None => tracing::warn!(input = %line, "expected `accept <SESSION_ID>`"),
                }
            }
        })
        .map(|_| ())
        .map_err(|err| CliError::new(INTERNAL, format!("console thread setup failed: {err}")))
}

fn parse_accept_command(line: &str) -> Option<CliResult<SessionId>> {
    let id = line.trim().strip_prefix("accept")?.trim();
    Some(
        id.parse()
            .map_err(|err| CliError::new(USAGE, format!("invalid session id {id:?}: {err}"))),
    )
}

fn install_ctrlc_handler(server: Weak<StringServer>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if let Some(server) = server.upgrade() {
            server.stop();
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_command_parses_session_id() {
        let id = SessionId::new();
        let parsed = parse_accept_command(&format!("accept {id}\n")).unwrap().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn accept_command_rejects_garbage() {
        assert!(parse_accept_command("accept nope").unwrap().is_err());
        assert!(parse_accept_command("hello").is_none());
    }
}
