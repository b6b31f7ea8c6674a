use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    style::Print,
    terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::fs;
use std::io::{stdout, IsTerminal, Write};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;
use y86_core::machine::DEFAULT_RAM_SIZE;
use y86_core::{Joystick, Machine, Status, SCREEN_HEIGHT, SCREEN_WIDTH};

#[derive(Parser, Debug)]
#[command(name = "y86-term")]
#[command(about = "Run a .yo program with the memory-mapped peripherals attached")]
struct Args {
    /// Path to the .yo program.
    program: PathBuf,

    /// RAM size in bytes; the default keeps RAM below the peripheral map.
    #[arg(long, default_value_t = DEFAULT_RAM_SIZE)]
    ram_size: usize,

    /// Maximum number of cycles before giving up.
    #[arg(long, default_value_t = 1_000_000)]
    max_cycles: u64,

    /// Sleep this many microseconds after each cycle (0 = run flat out).
    #[arg(long, default_value_t = 0)]
    cycle_delay_us: u64,
}

struct ScreenGuard {
    active: bool,
}

impl ScreenGuard {
    fn enter(active: bool) -> Result<Self> {
        if active {
            let mut out = stdout();
            crossterm::execute!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
        }
        Ok(Self { active })
    }
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = crossterm::execute!(stdout(), Show, LeaveAlternateScreen);
        }
    }
}

fn render_frame(frame: &[u8]) {
    let mut out = stdout();
    for y in 0..SCREEN_HEIGHT {
        let mut line = String::with_capacity(SCREEN_WIDTH);
        for x in 0..SCREEN_WIDTH {
            let idx = y * SCREEN_WIDTH + x;
            let on = (frame[idx / 8] >> (idx % 8)) & 1 == 1;
            line.push(if on { '#' } else { ' ' });
        }
        let _ = crossterm::queue!(out, MoveTo(0, y as u16), Print(line));
    }
    let _ = out.flush();
}

fn run(args: &Args) -> Result<(u64, u64, Status)> {
    let text = fs::read_to_string(&args.program)
        .with_context(|| format!("failed to read {}", args.program.display()))?;

    let mut machine = Machine::new(args.ram_size)?;
    machine.load_program(&text)?;

    // The joystick owns the raw-mode guard, so it comes up first and goes
    // down last (the machine keeps its handle alive until it drops).
    let joystick = machine.attach_joystick(Joystick::new()?)?;
    let ppu = machine.attach_ppu()?;
    machine.attach_timer()?;

    let use_tty = stdout().is_terminal();
    let _screen = ScreenGuard::enter(use_tty)?;
    if use_tty {
        ppu.borrow_mut().set_present_hook(Box::new(render_frame));
    }

    let mut executed = 0u64;
    while executed < args.max_cycles && machine.cpu().status() == Status::Aok {
        machine.step();
        executed += 1;
        if joystick.borrow().quit_requested() {
            break;
        }
        if args.cycle_delay_us > 0 {
            sleep(Duration::from_micros(args.cycle_delay_us));
        }
    }

    Ok((executed, machine.cpu().pc(), machine.cpu().status()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (executed, pc, status) = run(&args)?;
    println!("Executed {executed} cycles; pc=0x{pc:X} status={status:?}");
    Ok(())
}
