//! fs-mktest: writes a test file for fs-server to stdout.
//!
//! Every 512-byte sector reads `Sector NNN: The quick brown fox jumped
//! over the lazy dog.....end.`; redirect to the file of your choice.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use clap::Parser;

use file_service::PatternSource;

#[derive(Parser, Debug)]
#[command(name = "fs-mktest", about = "Generate a sector test file on stdout")]
struct Cli {
    /// Number of sectors to write.
    sector_count: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let pattern = PatternSource::new(cli.sector_count);

    let mut out = BufWriter::new(io::stdout().lock());
    let result = (0..cli.sector_count)
        .try_for_each(|sector| out.write_all(pattern.render(sector).as_bytes()))
        .and_then(|()| out.flush());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // A closed pipe is not worth a complaint.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fs-mktest: {}", e);
            ExitCode::FAILURE
        }
    }
}
