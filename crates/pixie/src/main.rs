mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

/// `pixie serve` runs an echo server, `pixie connect` talks to one.
#[derive(Parser, Debug)]
#[command(name = "pixie", version, about = "Length-prefixed TCP messaging CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", env = "PIXIE_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `PIXIE_LOG` directives take precedence.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let code = match cmd::run(cli.command, format) {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(code = err.code, "command failed");
            eprintln!("error: {err}");
            err.code
        }
    };
    std::process::exit(code);
}
