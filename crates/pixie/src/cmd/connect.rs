use std::io::BufRead;
use std::thread;

use pixie_session::{PixieClient, SessionConfig};

use crate::cmd::{parse_duration, ConnectArgs};
use crate::exit::{io_error, session_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, Event, OutputFormat};

const EXIT_COMMAND: &str = "exit";

pub fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let linger = parse_duration(&args.linger)?;

    let config = SessionConfig {
        connect_timeout: Some(timeout),
        ..SessionConfig::default()
    };
    let client: PixieClient<String> = PixieClient::with_config(args.addr, config);

    let label = args.addr.to_string();
    {
        let label = label.clone();
        client.on_state_changed(move |state| {
            print_event(&Event::state(&label, state.as_str()), format);
        });
    }
    {
        let label = label.clone();
        client.on_message_received(move |message: &String| {
            print_event(&Event::message(&label, message), format);
        });
    }

    client
        .connect()
        .map_err(|err| session_error("connect failed", err))?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|err| io_error("stdin read failed", err))?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line == EXIT_COMMAND {
            break;
        }

        if client.state().is_exiting() {
            tracing::warn!(server = %label, "server closed the connection");
            return Ok(FAILURE);
        }
        client
            .send(&line.to_string())
            .map_err(|err| session_error("send failed", err))?;
    }

    // Replies to the last lines may still be in flight.
    thread::sleep(linger);
    client.disconnect();
    Ok(SUCCESS)
}
