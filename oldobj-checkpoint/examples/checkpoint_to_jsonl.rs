//! Convert an OLDOBJCK checkpoint chunk to JSONL (one JSON object per type block).
//!
//! Usage:
//!   cargo run --example checkpoint_to_jsonl -- <input.bin> [output.jsonl]
//!
//! If output is omitted, writes to stdout.

use oldobj_checkpoint::checkpoint::CheckpointReader;
use std::io::{BufWriter, Write};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: checkpoint_to_jsonl <input.bin> [output.jsonl]");
        std::process::exit(1);
    }

    let mut reader = CheckpointReader::new(&args[1])?;
    let (magic, version) = reader.read_header()?;
    if magic != "OLDOBJCK" {
        eprintln!("not an OLDOBJCK file (got: {magic})");
        std::process::exit(1);
    }
    eprintln!("OLDOBJCK v{version}, converting...");

    let out: Box<dyn Write> = if let Some(path) = args.get(2) {
        Box::new(std::fs::File::create(path)?)
    } else {
        Box::new(std::io::stdout().lock())
    };
    let mut w = BufWriter::new(out);

    let mut checkpoints = 0u64;
    let mut blocks = 0u64;
    while let Some(checkpoint) = reader.read_checkpoint()? {
        for block in &checkpoint {
            serde_json::to_writer(&mut w, block)?;
            w.write_all(b"\n")?;
            blocks += 1;
        }
        checkpoints += 1;
    }
    w.flush()?;

    let repeated = reader
        .stack_trace_emissions
        .values()
        .filter(|&&n| n > 1)
        .count();
    eprintln!(
        "{checkpoints} checkpoints, {blocks} blocks, {} stack traces ({repeated} emitted more than once)",
        reader.stack_traces.len()
    );
    Ok(())
}
