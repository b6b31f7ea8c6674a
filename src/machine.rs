use crate::bus::Bus;
use crate::cpu::Cpu;
use crate::joystick::Joystick;
use crate::loader::{self, Segment};
use crate::ppu::{Ppu, PPU_MEMORY_SIZE};
use crate::ram::Ram;
use crate::timer::Timer;
use crate::{Result, Status};
use std::cell::{Ref, RefCell};
use std::rc::Rc;

// Default address map. RAM grows up from zero; the peripherals sit above it.
pub const RAM_BASE: u64 = 0x0000;
pub const JOYSTICK_BASE: u64 = 0x2000;
pub const PPU_BASE: u64 = 0x3000;
pub const TIMER_BASE: u64 = 0x4000;

/// Default arena for the interactive machine, sized so RAM stays below the
/// joystick window.
pub const DEFAULT_RAM_SIZE: usize = 0x2000;

/// Owns the processor, the bus, and the attached devices, and drives the
/// cooperative loop: one CPU cycle, then PPU, joystick, and timer updates,
/// in that order.
pub struct Machine {
    cpu: Cpu,
    bus: Bus,
    ram: Rc<RefCell<Ram>>,
    ppu: Option<Rc<RefCell<Ppu>>>,
    joystick: Option<Rc<RefCell<Joystick>>>,
    timer: Option<Rc<RefCell<Timer>>>,
}

impl Machine {
    /// RAM-only machine mapped from address zero; the batch driver uses this
    /// configuration directly.
    pub fn new(ram_size: usize) -> Result<Self> {
        let ram = Rc::new(RefCell::new(Ram::new(ram_size)?));
        let size = ram.borrow().size();
        let mut bus = Bus::new();
        bus.register_device(ram.clone(), RAM_BASE, RAM_BASE + size)?;
        Ok(Self {
            cpu: Cpu::new(),
            bus,
            ram,
            ppu: None,
            joystick: None,
            timer: None,
        })
    }

    pub fn attach_ppu(&mut self) -> Result<Rc<RefCell<Ppu>>> {
        let ppu = Rc::new(RefCell::new(Ppu::new()));
        self.bus
            .register_device(ppu.clone(), PPU_BASE, PPU_BASE + PPU_MEMORY_SIZE as u64)?;
        self.ppu = Some(ppu.clone());
        Ok(ppu)
    }

    pub fn attach_joystick(&mut self, joystick: Joystick) -> Result<Rc<RefCell<Joystick>>> {
        let joystick = Rc::new(RefCell::new(joystick));
        self.bus
            .register_device(joystick.clone(), JOYSTICK_BASE, JOYSTICK_BASE + 1)?;
        self.joystick = Some(joystick.clone());
        Ok(joystick)
    }

    pub fn attach_timer(&mut self) -> Result<Rc<RefCell<Timer>>> {
        let timer = Rc::new(RefCell::new(Timer::new()));
        self.bus
            .register_device(timer.clone(), TIMER_BASE, TIMER_BASE + 1)?;
        self.timer = Some(timer.clone());
        Ok(timer)
    }

    pub fn load_program(&mut self, text: &str) -> Result<()> {
        loader::load_program(text, &mut self.ram.borrow_mut())
    }

    pub fn load_segments(&mut self, segments: &[Segment]) -> Result<()> {
        loader::load_segments(segments, &mut self.ram.borrow_mut())
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn ram(&self) -> Ref<'_, Ram> {
        self.ram.borrow()
    }

    /// One scheduler iteration. The CPU cycle is a no-op once the status has
    /// left AOK; the peripherals still tick.
    pub fn step(&mut self) {
        self.cpu.run_cycle(&self.bus);
        if let Some(ppu) = &self.ppu {
            ppu.borrow_mut().update(&self.bus);
        }
        if let Some(joystick) = &self.joystick {
            joystick.borrow_mut().update();
        }
        if let Some(timer) = &self.timer {
            timer.borrow_mut().update();
        }
    }

    /// Drive until the status leaves AOK or the cycle cap is reached.
    /// Returns the number of cycles executed.
    pub fn run(&mut self, max_cycles: u64) -> u64 {
        let mut executed = 0;
        while executed < max_cycles && self.cpu.status() == Status::Aok {
            self.step();
            executed += 1;
        }
        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Device;

    #[test]
    fn runs_a_program_to_halt() {
        let mut machine = Machine::new(DEFAULT_RAM_SIZE).unwrap();
        machine
            .load_program("0x000: 10 | nop\n0x001: 00 | halt\n")
            .unwrap();
        let executed = machine.run(16);
        assert_eq!(executed, 2);
        assert_eq!(machine.cpu().status(), Status::Hlt);
        assert_eq!(machine.cpu().pc(), 1);
    }

    #[test]
    fn cycle_cap_bounds_the_loop() {
        let mut machine = Machine::new(DEFAULT_RAM_SIZE).unwrap();
        // Jump-to-self never halts.
        machine
            .load_program("0x000: 700000000000000000 | loop: jmp loop\n")
            .unwrap();
        assert_eq!(machine.run(10), 10);
        assert_eq!(machine.cpu().status(), Status::Aok);
    }

    #[test]
    fn default_map_leaves_holes_between_devices() {
        let mut machine = Machine::new(DEFAULT_RAM_SIZE).unwrap();
        machine.attach_ppu().unwrap();
        machine.attach_timer().unwrap();

        assert!(machine.bus().read(0x1FFF).is_ok());
        assert_eq!(machine.bus().read(0x2FFF).status, Status::Adr);
        assert!(machine.bus().read(PPU_BASE).is_ok());
        assert!(machine.bus().read(PPU_BASE + 0xBF).is_ok());
        assert_eq!(machine.bus().read(PPU_BASE + 0xC0).status, Status::Adr);
        assert!(machine.bus().read(TIMER_BASE).is_ok());
        assert_eq!(machine.bus().read(TIMER_BASE + 1).status, Status::Adr);
    }

    #[test]
    fn cpu_stores_reach_the_ppu_window() {
        let mut machine = Machine::new(DEFAULT_RAM_SIZE).unwrap();
        let ppu = machine.attach_ppu().unwrap();

        // irmovq $0x3000, %rcx; irmovq $5, %rax; rmmovq %rax, 8(%rcx); halt
        // lands height=5 in sprite 0 (offset 8 of the PPU window).
        let mut program = vec![0x30, 0xF1];
        program.extend_from_slice(&0x3000u64.to_le_bytes());
        program.extend_from_slice(&[0x30, 0xF0]);
        program.extend_from_slice(&5u64.to_le_bytes());
        program.extend_from_slice(&[0x40, 0x01]);
        program.extend_from_slice(&8u64.to_le_bytes());
        program.push(0x00);

        machine.load_segments(&[Segment {
            address: 0,
            bytes: program,
        }]).unwrap();
        machine.run(64);
        assert_eq!(machine.cpu().status(), Status::Hlt);
        assert_eq!(ppu.borrow_mut().read(8), 5);
    }
}
