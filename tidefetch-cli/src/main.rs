//! tidefetch CLI - fetch files over BitTorrent from a `.torrent` URL

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tidefetch_core::fetch::{FetchError, FetchErrorKind};
use tidefetch_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "tidefetch", version)]
#[command(about = "Fetch files over BitTorrent from a .torrent URL")]
struct Cli {
    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the full trace log of the last run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref()) {
        eprintln!("Warning: logging unavailable: {e}");
    }

    match commands::handle_command(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<FetchError>() {
            Some(fetch) => {
                eprintln!("Error: {}", fetch.user_message());
                ExitCode::from(exit_code(fetch.kind()))
            }
            None => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn exit_code(kind: FetchErrorKind) -> u8 {
    match kind {
        FetchErrorKind::EngineConstructionFailed => 3,
        FetchErrorKind::DescriptorFetchFailed | FetchErrorKind::NonSuccessStatus => 4,
        FetchErrorKind::MalformedDescriptor => 5,
        FetchErrorKind::RegistrationFailed => 6,
        FetchErrorKind::IncompleteTransfer => 7,
    }
}
