use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::*;
use log::*;
use structopt::*;

use ozxread::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "ozxcat", about = "Lists and prints files in .zip and .ozx archives")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Check whole-file reads against their CRC-32s.
    #[structopt(long)]
    verify: bool,

    /// Chunk size for reads
    #[structopt(short, long, default_value = "8192")]
    buffer_size: usize,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Lists the files in the archive (only the JSON metadata with --json-only).
    List {
        #[structopt(short, long)]
        json_only: bool,
    },
    /// Prints the archive's OZX metadata.
    Metadata,
    /// Writes a file from the archive to stdout.
    Cat { path: String },
    /// Writes bytes START through END (inclusive) of a file to stdout.
    Range { path: String, start: u64, end: u64 },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let options = ReadOptions {
        buffer_size: args.buffer_size,
        verify_checksums: args.verify,
    };
    info!("Opening {}", args.zip_path.display());
    let mut reader = OzxReader::open_with_options(&args.zip_path, options)
        .with_context(|| format!("Couldn't open {}", args.zip_path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.command {
        Command::List { json_only } => {
            let entries = reader.parse_central_directory(json_only)?;
            for entry in entries.iter().filter(|e| e.is_file()) {
                if json_only && !entry.is_json_metadata() {
                    continue;
                }
                writeln!(out, "{:>12}  {}", entry.uncompressed_size, entry.filename)?;
            }
        }
        Command::Metadata => match reader.metadata() {
            Some(metadata) => {
                writeln!(out, "OME-Zarr version: {}", metadata.version)?;
                writeln!(out, "JSON first: {}", metadata.json_first)?;
            }
            None => bail!("{} has no OZX metadata", args.zip_path.display()),
        },
        Command::Cat { path } => {
            for chunk in reader.stream_file(&path, args.buffer_size)? {
                out.write_all(&chunk?)?;
            }
        }
        Command::Range { path, start, end } => {
            for chunk in reader.stream_file_range(&path, start, end, args.buffer_size)? {
                out.write_all(&chunk?)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
