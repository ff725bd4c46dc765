// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
/// tlog-cli is a thin demonstration binary over the tlog library: it
/// dumps and validates line-delimited JSON session logs from the command
/// line.
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tlog::{transport::FileReader, Filter, Packet, Source};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "tlog", version = VERSION, about = "Dump and validate tlog session logs")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a log end to end, reporting the first error found.
    Check {
        path: PathBuf,
        /// Tolerate a repeated message id instead of only a contiguous one.
        #[arg(long)]
        lax: bool,
    },
    /// Print a log's packets, one per line.
    Dump {
        path: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        session: Option<u32>,
        #[arg(long)]
        lax: bool,
        #[arg(long, default_value_t = 65536)]
        io_size: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    match args.command {
        Command::Check { path, lax } => check(&path, lax),
        Command::Dump { path, host, user, session, lax, io_size } => {
            dump(&path, Filter { host, user, session }, lax, io_size)
        }
    }
}

fn check(path: &PathBuf, lax: bool) -> anyhow::Result<()> {
    let reader = FileReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut source = Source::new(reader, Filter::default(), lax, tlog::Config::default().io_size.max(4096));

    let mut packets = 0u64;
    loop {
        match source.read().with_context(|| format!("reading {}", path.display()))? {
            Packet::Void => break,
            _ => packets += 1,
        }
    }
    println!("{}: ok, {packets} packets", path.display());
    Ok(())
}

fn dump(path: &PathBuf, filter: Filter, lax: bool, io_size: usize) -> anyhow::Result<()> {
    let reader = FileReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut source = Source::new(reader, filter, lax, io_size);

    loop {
        let pkt = source.read().with_context(|| format!("reading {}", path.display()))?;
        match pkt {
            Packet::Void => break,
            Packet::Window { ts, width, height } => {
                println!("{:>6}.{:03} resize {width}x{height}", ts.secs, ts.nanos / 1_000_000);
            }
            Packet::Io { ts, output, bytes } => {
                let dir = if output { "out" } else { "in " };
                println!("{:>6}.{:03} {dir} {:?}", ts.secs, ts.nanos / 1_000_000, String::from_utf8_lossy(&bytes));
            }
        }
    }
    Ok(())
}
