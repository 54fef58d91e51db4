//! Reads random native-endian `i64`s from a mapped file until stopped.
//!
//! Meant to be left running while the file underneath is truncated or its
//! mount is pulled: failed reads print `Failed to read` and the loop goes on.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::Level;

use safe_mmap::MappedRegion;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File to map
    path: PathBuf,

    /// Stop after this many reads instead of running forever
    #[arg(short, long)]
    count: Option<u64>,

    /// Seed for the offset generator
    #[arg(short, long)]
    seed: Option<u64>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    safe_mmap::install_fault_handler()?;

    let region = MappedRegion::open(&cli.path)?;
    let offsets = region
        .valid_offsets()
        .ok_or_else(|| format!("{} is shorter than 8 bytes", cli.path.display()))?;

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    tracing::info!(path = %cli.path.display(), size = region.size(), "reading");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0u64;
    let mut reads = 0u64;
    while cli.count.map_or(true, |count| reads < count) {
        let offset = rng.gen_range(offsets.clone());
        match region.read_i64(offset) {
            Ok(value) => writeln!(out, "{}", value)?,
            Err(_) => {
                failures += 1;
                writeln!(out, "Failed to read")?;
            }
        }
        reads += 1;
    }

    tracing::info!(reads, failures, "done");
    Ok(())
}
