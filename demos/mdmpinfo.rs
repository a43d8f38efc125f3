use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::*;
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use mdmp::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "mdmpinfo", about = "Prints the header and streams of a Minidump")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Writes each stream's raw bytes to a file in the given directory.
    #[structopt(short = "x", long)]
    extract: Option<PathBuf>,

    #[structopt(name("Minidump file"))]
    dump_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    info!("Memory mapping {:#?}", &args.dump_path);
    let dump_file = File::open(&args.dump_path).context("Couldn't open dump file")?;
    let mapping = unsafe { Mmap::map(&dump_file).context("Couldn't mmap dump file")? };

    let dump = Minidump::from_bytes(&mapping).context("Couldn't load Minidump")?;
    print_header(dump.header()?);
    print_streams(&dump)?;

    match args.extract {
        Some(directory) => extract_streams(&dump, &directory),
        None => Ok(()),
    }
}

fn print_header(header: &FileHeader) {
    println!(
        "Version:        {:#06x} (implementation {:#06x})",
        header.version, header.implementation_version
    );
    match header.last_written() {
        Some(when) => println!("Written:        {}", when.to_rfc3339()),
        None => println!("Written:        ? ({:#x})", header.timestamp),
    }
    println!("Checksum:       {:#010x}", header.checksum);
    println!(
        "Flags:          {:#010x} {}",
        header.flags.bits(),
        header.flags.names().join(" | ")
    );
    println!(
        "Directory:      {} entries at {:#x}",
        header.number_of_streams, header.streams_directory_offset
    );
}

fn print_streams(dump: &Minidump) -> Result<()> {
    println!();
    for (i, stream) in dump.streams()?.enumerate() {
        println!(
            "{:3}  {:<28} {:#010x} {:>10} bytes",
            i,
            StreamType::from_u32(stream.stream_type()).name(),
            stream.start_offset()?,
            stream.size()?
        );
    }
    Ok(())
}

fn extract_streams(dump: &Minidump, directory: &Path) -> Result<()> {
    fs::create_dir_all(directory)
        .with_context(|| format!("Couldn't create directory {}", directory.display()))?;

    (0..dump.number_of_streams()?)
        .into_par_iter()
        .try_for_each(|i| {
            let mut stream = dump.stream(i)?;
            let name = format!(
                "{:03}-{}.bin",
                i,
                StreamType::from_u32(stream.stream_type()).name()
            );
            let path = directory.join(name);
            let mut sink = File::create(&path)
                .with_context(|| format!("Couldn't create file {}", path.display()))?;
            io::copy(&mut stream, &mut sink)
                .with_context(|| format!("Couldn't extract stream {}", i))?;
            Ok(())
        })
}
