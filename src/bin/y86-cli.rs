use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use y86_core::{loader, trace, Machine, Status};

/// Fallback arena when the program itself needs less.
const DEFAULT_MEMORY: u64 = 1 << 20;

#[derive(Parser, Debug)]
#[command(name = "y86-cli")]
#[command(about = "Run a .yo program from stdin and emit a JSON cycle trace", long_about = None)]
struct Args {
    /// Maximum number of cycles to execute.
    #[arg(long, default_value_t = 100_000)]
    max_cycles: u64,

    /// Extra bytes reserved above the loaded program for stack and data.
    #[arg(long, default_value_t = 8192)]
    margin: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("failed to read program from stdin")?;

    let segments = loader::parse_program(&text);
    if segments.is_empty() {
        print!("[]");
        return Ok(());
    }

    let required = loader::required_memory(&segments);
    let memory_size = (required + args.margin).max(DEFAULT_MEMORY);

    let mut machine = Machine::new(memory_size as usize)?;
    machine.load_segments(&segments)?;

    // One snapshot after every cycle entered while the status was still AOK.
    let mut frames = Vec::new();
    for _ in 0..args.max_cycles {
        if machine.cpu().status() != Status::Aok {
            break;
        }
        machine.step();
        frames.push(trace::capture(machine.cpu(), &machine.ram()));
    }

    let stdout = std::io::stdout();
    serde_json::to_writer(stdout.lock(), &frames).context("failed to write trace")?;
    Ok(())
}
