//! fs-client: registers with a running fs-server and reads sectors.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;

use file_service::{ClientConfig, ClientId, FsClient, SectorData, SectorNumber, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "fs-client", about = "Read sectors from a running fs-server")]
struct Cli {
    /// Sectors to read, in order.
    #[arg(allow_negative_numbers = true)]
    sectors: Vec<SectorNumber>,

    /// Client id to register with. Defaults to the process id.
    #[arg(long)]
    id: Option<i32>,

    /// Registration segment name.
    #[arg(long, default_value = file_service::protocol::REGISTRAR_NAME)]
    registrar_name: String,

    /// Prefix of per-client channel names.
    #[arg(long, default_value = file_service::protocol::CHANNEL_PREFIX)]
    channel_prefix: String,

    /// Write the raw 512-byte sectors instead of one text line per sector.
    #[arg(long)]
    raw: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    file_service::init_tracing("warn");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fs-client failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> file_service::Result<()> {
    let config = ClientConfig {
        registrar_name: cli.registrar_name,
        channel_prefix: cli.channel_prefix,
    };
    let id = cli.id.map_or_else(ClientId::current, ClientId);
    let client = FsClient::register(&config, id, Shutdown::new())?;
    eprintln!("client {} limits {}", client.id(), client.limits());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for sector in cli.sectors {
        let data = client.read_sector(sector)?;
        if cli.raw {
            out.write_all(data.as_bytes())?;
        } else {
            writeln!(out, "{:>6}: {}", sector, printable(&data))?;
        }
    }
    out.flush()?;
    Ok(())
}

fn printable(data: &SectorData) -> String {
    data.as_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
