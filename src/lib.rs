pub mod bus;
pub mod cpu;
pub mod joystick;
pub mod loader;
pub mod machine;
pub mod ppu;
pub mod ram;
pub mod timer;
pub mod trace;

use thiserror::Error;

pub use bus::{Bus, BusResult, Device, SharedDevice};
pub use cpu::{ConditionCodes, Cpu, Register, REGISTER_COUNT};
pub use joystick::Joystick;
pub use loader::{load_program, parse_program, Segment};
pub use machine::Machine;
pub use ppu::{Ppu, FRAME_BUFFER_BYTES, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use ram::Ram;
pub use timer::Timer;
pub use trace::TraceFrame;

pub type Result<T> = std::result::Result<T, EmuError>;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("bus mapping requires start < end (start=0x{start:x}, end=0x{end:x})")]
    InvalidMapping { start: u64, end: u64 },
    #[error("ram size must be non-zero")]
    ZeroRamSize,
    #[error("segment at 0x{address:x} ({len} bytes) does not fit in {ram_size} bytes of ram")]
    SegmentOverflow {
        address: u64,
        len: usize,
        ram_size: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Processor status word. Every value except `Aok` is terminal: the cycle
/// loop refuses to run once the status has left `Aok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Aok,
    Ins,
    Adr,
    Hlt,
}

impl Status {
    /// Sticky-merge priority. Within a cycle a new status only replaces the
    /// current one when its priority is equal or higher.
    pub fn priority(self) -> u8 {
        match self {
            Status::Aok => 0,
            Status::Ins => 1,
            Status::Adr => 2,
            Status::Hlt => 3,
        }
    }

    /// Encoding used by the trace stream: 1=AOK, 2=HLT, 3=ADR, 4=INS.
    pub fn encode(self) -> u8 {
        match self {
            Status::Aok => 1,
            Status::Hlt => 2,
            Status::Adr => 3,
            Status::Ins => 4,
        }
    }
}
