use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sonde::{
    ClassTable, DecodeConfig, DecodeSession, Extractor, RegisterSnapshot, SnapshotMemory,
    parse_address, read_argument,
};

/// Replay a dumped heap region and decode one object out of it.
#[derive(Debug, Parser)]
#[command(name = "sonde", version, about)]
struct Args {
    /// Raw memory snapshot file
    #[arg(long)]
    snapshot: PathBuf,

    /// Address the snapshot was dumped from (hex or decimal)
    #[arg(long, value_parser = parse_u64)]
    base: u64,

    /// Class table JSON produced by the offline analysis pass
    #[arg(long)]
    classes: PathBuf,

    /// Register dump JSON, e.g. {"x28": "0x10", "x15": "0x1000002000"}
    #[arg(long)]
    registers: Option<PathBuf>,

    /// Tagged word to decode
    #[arg(long, value_parser = parse_u64, conflicts_with = "arg")]
    addr: Option<u64>,

    /// Decode the n-th stack argument slot instead of --addr
    #[arg(long)]
    arg: Option<u32>,

    /// Heap base, when the register dump does not carry it
    #[arg(long, value_parser = parse_u64)]
    heap_base: Option<u64>,

    /// Maximum reference-expansion depth
    #[arg(long, default_value_t = 5)]
    max_depth: u32,

    /// Emit reference fields that resolve to null
    #[arg(long)]
    show_null: bool,
}

fn parse_u64(text: &str) -> Result<u64, String> {
    parse_address(text).ok_or_else(|| format!("not a hex or decimal number: {text:?}"))
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let memory = SnapshotMemory::from_file(args.base, &args.snapshot)?;
    let table = ClassTable::from_file(&args.classes)?;

    let config = DecodeConfig {
        max_depth: args.max_depth,
        show_null_fields: args.show_null,
        ..Default::default()
    };
    let mut session = DecodeSession::new(config)?;

    let registers = match &args.registers {
        Some(path) => RegisterSnapshot::from_json(&fs::read_to_string(path)?)?,
        None => RegisterSnapshot::new(),
    };
    if let Some(base) = args.heap_base {
        session.set_heap_base(base);
    }
    session.ensure_heap_base(&registers);

    let raw = match (args.addr, args.arg) {
        (Some(raw), _) => raw,
        (None, Some(index)) => read_argument(&registers, &memory, &session.config, index),
        (None, None) => return Err("one of --addr or --arg is required".into()),
    };

    let mut extractor = Extractor::new(&memory, &table, &session);
    let decoded = extractor.decode(raw);

    log::info!("{decoded}");
    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sonde: {err}");
            ExitCode::FAILURE
        }
    }
}
