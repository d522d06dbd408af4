//! fs-server: sector file service daemon.
//!
//! Serves sectors of one data source to any number of clients. Stops on
//! SIGTERM/SIGINT; exits non-zero when a session could not be set up.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use file_service::pidfile::PidFile;
use file_service::signals::install_termination_handler;
use file_service::{
    FileService, MirroredRange, Partitioned, RangePolicy, ServerConfig, Shutdown, SourceSpec,
    WholeSource,
};

// =============================================================================
// CLI
// =============================================================================

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    /// Client `n` may read sectors `-n..=n`.
    Mirrored,
    /// Every client may read the whole source.
    Whole,
    /// Consecutive windows of `--window` sectors in registration order.
    Partitioned,
}

#[derive(Parser, Debug)]
#[command(name = "fs-server", about = "Shared-memory sector file service")]
struct Cli {
    /// Path of the PID file written at startup.
    pid_file: PathBuf,

    /// Data source: a file path, or `pattern:<sectors>` for the built-in
    /// test pattern.
    source: SourceSpec,

    /// How sector ranges are assigned to new clients.
    #[arg(long, value_enum, default_value_t = Policy::Mirrored)]
    policy: Policy,

    /// Window size for the partitioned policy.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..))]
    window: u64,

    /// Registration segment name.
    #[arg(long, default_value = file_service::protocol::REGISTRAR_NAME)]
    registrar_name: String,

    /// Prefix of per-client channel names.
    #[arg(long, default_value = file_service::protocol::CHANNEL_PREFIX)]
    channel_prefix: String,

    /// Slots in the registration ring.
    #[arg(
        long,
        default_value_t = file_service::protocol::REGISTRAR_SLOT_COUNT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    registrar_slots: u32,

    /// Slots in each session ring.
    #[arg(
        long,
        default_value_t = file_service::protocol::SESSION_SLOT_COUNT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    session_slots: u32,

    /// Detach from the terminal. Working directory and stdio are kept.
    #[arg(long)]
    daemonize: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    file_service::init_tracing("info");

    // Must happen before any thread exists.
    if cli.daemonize {
        if let Err(e) = nix::unistd::daemon(true, true) {
            tracing::error!(error = %e, "failed to daemonize");
            return ExitCode::FAILURE;
        }
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fs-server failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> file_service::Result<()> {
    let source = cli.source.open()?;
    let sector_count = source.sector_count().unwrap_or(0);
    let policy: Box<dyn RangePolicy> = match cli.policy {
        Policy::Mirrored => Box::new(MirroredRange),
        Policy::Whole => Box::new(WholeSource { sector_count }),
        Policy::Partitioned => Box::new(Partitioned::new(cli.window, sector_count)),
    };

    let config = ServerConfig {
        registrar_name: cli.registrar_name,
        channel_prefix: cli.channel_prefix,
        registrar_capacity: cli.registrar_slots,
        session_capacity: cli.session_slots,
    };

    let _pid_file = PidFile::create(&cli.pid_file)?;
    let shutdown = Shutdown::new();
    install_termination_handler(shutdown.clone())?;

    tracing::info!(
        pid = std::process::id(),
        source = ?cli.source,
        policy = ?cli.policy,
        sectors = sector_count,
        "starting"
    );
    let service = FileService::start(config, source, policy, shutdown)?;
    service.wait()
}
