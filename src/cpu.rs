use crate::bus::Bus;
use crate::Status;

pub const REGISTER_COUNT: usize = 15;

/// Register id nibble meaning "no register".
pub const RNONE: u8 = 0xF;

const WORD_BYTES: u64 = 8;

/// Architectural register names, in register-file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Halt = 0x0,
    Nop = 0x1,
    Cmovxx = 0x2,
    Irmovq = 0x3,
    Rmmovq = 0x4,
    Mrmovq = 0x5,
    Opq = 0x6,
    Jxx = 0x7,
    Call = 0x8,
    Ret = 0x9,
    Pushq = 0xA,
    Popq = 0xB,
    Iaddq = 0xC,
}

impl Opcode {
    fn from_icode(icode: u8) -> Option<Self> {
        match icode {
            0x0 => Some(Opcode::Halt),
            0x1 => Some(Opcode::Nop),
            0x2 => Some(Opcode::Cmovxx),
            0x3 => Some(Opcode::Irmovq),
            0x4 => Some(Opcode::Rmmovq),
            0x5 => Some(Opcode::Mrmovq),
            0x6 => Some(Opcode::Opq),
            0x7 => Some(Opcode::Jxx),
            0x8 => Some(Opcode::Call),
            0x9 => Some(Opcode::Ret),
            0xA => Some(Opcode::Pushq),
            0xB => Some(Opcode::Popq),
            0xC => Some(Opcode::Iaddq),
            _ => None,
        }
    }

    /// Instruction carries an rA|rB byte after the opcode byte.
    fn uses_reg_ids(self) -> bool {
        matches!(
            self,
            Opcode::Cmovxx
                | Opcode::Irmovq
                | Opcode::Rmmovq
                | Opcode::Mrmovq
                | Opcode::Opq
                | Opcode::Pushq
                | Opcode::Popq
                | Opcode::Iaddq
        )
    }

    /// Instruction carries an 8-byte little-endian immediate.
    fn uses_val_c(self) -> bool {
        matches!(
            self,
            Opcode::Irmovq
                | Opcode::Rmmovq
                | Opcode::Mrmovq
                | Opcode::Jxx
                | Opcode::Call
                | Opcode::Iaddq
        )
    }

    fn valid_ifun(self, ifun: u8) -> bool {
        match self {
            Opcode::Cmovxx | Opcode::Jxx => ifun <= 0x6,
            Opcode::Opq => ifun <= 0x3,
            _ => ifun == 0,
        }
    }
}

/// Condition codes. Power-on state has ZF set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionCodes {
    pub zf: bool,
    pub sf: bool,
    pub of: bool,
}

impl Default for ConditionCodes {
    fn default() -> Self {
        Self {
            zf: true,
            sf: false,
            of: false,
        }
    }
}

/// Per-cycle scratch record. Rebuilt from `Default` at the top of every
/// cycle so the stage guards always describe the current cycle.
#[derive(Debug, Clone)]
struct StageState {
    inst_pc: u64,
    icode: u8,
    ifun: u8,
    ra: u8,
    rb: u8,
    val_c: u64,
    val_a: u64,
    val_b: u64,
    val_e: u64,
    val_m: u64,
    val_p: u64,
    cnd: bool,
    fetch_ok: bool,
    decode_ok: bool,
    execute_ok: bool,
    mem_ok: bool,
}

impl Default for StageState {
    fn default() -> Self {
        Self {
            inst_pc: 0,
            icode: 0,
            ifun: 0,
            ra: RNONE,
            rb: RNONE,
            val_c: 0,
            val_a: 0,
            val_b: 0,
            val_e: 0,
            val_m: 0,
            val_p: 0,
            cnd: true,
            fetch_ok: false,
            decode_ok: false,
            execute_ok: false,
            mem_ok: false,
        }
    }
}

/// Sequential five-stage interpreter core: one instruction per cycle, all
/// memory traffic routed byte-by-byte through the bus.
pub struct Cpu {
    registers: [u64; REGISTER_COUNT],
    cc: ConditionCodes,
    stat: Status,
    pc: u64,
    stage: StageState,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            cc: ConditionCodes::default(),
            stat: Status::Aok,
            pc: 0,
            stage: StageState::default(),
        }
    }

    pub fn reset(&mut self) {
        self.registers = [0; REGISTER_COUNT];
        self.cc = ConditionCodes::default();
        self.stat = Status::Aok;
        self.pc = 0;
        self.stage = StageState::default();
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn status(&self) -> Status {
        self.stat
    }

    pub fn condition_codes(&self) -> ConditionCodes {
        self.cc
    }

    pub fn registers(&self) -> &[u64; REGISTER_COUNT] {
        &self.registers
    }

    pub fn read_register(&self, reg: Register) -> u64 {
        self.registers[reg as usize]
    }

    /// One full fetch/decode/execute/memory/write-back/PC-update pass.
    /// A no-op once the status has left AOK.
    pub fn run_cycle(&mut self, bus: &Bus) {
        if self.stat != Status::Aok {
            return;
        }

        self.stage = StageState {
            inst_pc: self.pc,
            ..StageState::default()
        };

        self.fetch(bus);
        self.decode();
        self.execute();
        self.memory(bus);
        self.write_back();
        self.update_pc();
    }

    fn opcode(&self) -> Option<Opcode> {
        Opcode::from_icode(self.stage.icode)
    }

    fn fetch(&mut self, bus: &Bus) {
        let Some(inst_byte) = self.read_byte(bus, self.pc) else {
            return;
        };

        self.stage.icode = inst_byte >> 4;
        self.stage.ifun = inst_byte & 0xF;
        self.stage.val_p = self.pc.wrapping_add(1);

        let Some(opcode) = Opcode::from_icode(self.stage.icode) else {
            self.set_status(Status::Ins);
            return;
        };
        if !opcode.valid_ifun(self.stage.ifun) {
            self.set_status(Status::Ins);
            return;
        }

        if opcode.uses_reg_ids() {
            let Some(reg_byte) = self.read_byte(bus, self.stage.val_p) else {
                return;
            };
            self.stage.ra = reg_byte >> 4;
            self.stage.rb = reg_byte & 0xF;
            self.stage.val_p = self.stage.val_p.wrapping_add(1);
        }

        if opcode.uses_val_c() {
            let Some(word) = self.read_u64(bus, self.stage.val_p) else {
                return;
            };
            self.stage.val_c = word;
            self.stage.val_p = self.stage.val_p.wrapping_add(WORD_BYTES);
        }

        self.stage.fetch_ok = true;
    }

    fn decode(&mut self) {
        if !self.stage.fetch_ok {
            return;
        }

        self.stage.decode_ok = true;
        let Some(opcode) = self.opcode() else {
            return;
        };
        let rsp = Register::Rsp as usize;

        match opcode {
            Opcode::Cmovxx => {
                if !self.require_reg(self.stage.ra) || !self.require_reg(self.stage.rb) {
                    return;
                }
                self.stage.val_a = self.registers[self.stage.ra as usize];
            }
            Opcode::Irmovq => {
                if !self.require_reg(self.stage.rb) {
                    return;
                }
            }
            Opcode::Rmmovq => {
                if !self.require_reg(self.stage.ra) || !self.require_reg(self.stage.rb) {
                    return;
                }
                self.stage.val_a = self.registers[self.stage.ra as usize];
                self.stage.val_b = self.registers[self.stage.rb as usize];
            }
            Opcode::Mrmovq => {
                if !self.require_reg(self.stage.ra) || !self.require_reg(self.stage.rb) {
                    return;
                }
                self.stage.val_b = self.registers[self.stage.rb as usize];
            }
            Opcode::Opq => {
                if !self.require_reg(self.stage.ra) || !self.require_reg(self.stage.rb) {
                    return;
                }
                self.stage.val_a = self.registers[self.stage.ra as usize];
                self.stage.val_b = self.registers[self.stage.rb as usize];
            }
            Opcode::Call => {
                self.stage.val_a = self.stage.val_p;
                self.stage.val_b = self.registers[rsp];
            }
            Opcode::Ret => {
                self.stage.val_a = self.registers[rsp];
                self.stage.val_b = self.stage.val_a;
            }
            Opcode::Pushq => {
                if !self.require_reg(self.stage.ra) {
                    return;
                }
                self.stage.val_a = self.registers[self.stage.ra as usize];
                self.stage.val_b = self.registers[rsp];
            }
            Opcode::Popq => {
                if !self.require_reg(self.stage.ra) {
                    return;
                }
                self.stage.val_a = self.registers[rsp];
                self.stage.val_b = self.stage.val_a;
            }
            Opcode::Iaddq => {
                if !self.require_reg(self.stage.rb) {
                    return;
                }
                self.stage.val_b = self.registers[self.stage.rb as usize];
            }
            Opcode::Halt | Opcode::Nop | Opcode::Jxx => {}
        }
    }

    fn execute(&mut self) {
        if !self.stage.decode_ok {
            return;
        }

        self.stage.execute_ok = true;
        let Some(opcode) = self.opcode() else {
            return;
        };

        match opcode {
            Opcode::Cmovxx => {
                self.stage.cnd = self.evaluate_condition(self.stage.ifun);
                self.stage.val_e = self.stage.val_a;
            }
            Opcode::Irmovq => {
                self.stage.val_e = self.stage.val_c;
            }
            Opcode::Rmmovq | Opcode::Mrmovq => {
                self.stage.val_e = self.stage.val_b.wrapping_add(self.stage.val_c);
            }
            Opcode::Opq => match alu(self.stage.ifun, self.stage.val_b, self.stage.val_a) {
                Some(result) => {
                    self.stage.val_e = result;
                    self.update_cc(self.stage.ifun, self.stage.val_b, self.stage.val_a, result);
                }
                None => {
                    self.set_status(Status::Ins);
                    self.stage.execute_ok = false;
                }
            },
            Opcode::Jxx => {
                self.stage.cnd = self.evaluate_condition(self.stage.ifun);
            }
            Opcode::Call | Opcode::Pushq => {
                self.stage.val_e = self.stage.val_b.wrapping_sub(WORD_BYTES);
            }
            Opcode::Ret | Opcode::Popq => {
                self.stage.val_e = self.stage.val_b.wrapping_add(WORD_BYTES);
            }
            Opcode::Iaddq => {
                self.stage.val_e = self.stage.val_b.wrapping_add(self.stage.val_c);
                self.update_cc(0x0, self.stage.val_b, self.stage.val_c, self.stage.val_e);
            }
            Opcode::Halt => {
                self.set_status(Status::Hlt);
            }
            Opcode::Nop => {}
        }
    }

    fn memory(&mut self, bus: &Bus) {
        if !self.stage.execute_ok {
            return;
        }

        self.stage.mem_ok = true;
        let Some(opcode) = self.opcode() else {
            return;
        };

        match opcode {
            Opcode::Rmmovq | Opcode::Pushq | Opcode::Call => {
                self.stage.mem_ok = self.write_u64(bus, self.stage.val_e, self.stage.val_a);
            }
            Opcode::Mrmovq => match self.read_u64(bus, self.stage.val_e) {
                Some(word) => self.stage.val_m = word,
                None => self.stage.mem_ok = false,
            },
            Opcode::Popq | Opcode::Ret => match self.read_u64(bus, self.stage.val_a) {
                Some(word) => self.stage.val_m = word,
                None => self.stage.mem_ok = false,
            },
            _ => {}
        }
    }

    fn write_back(&mut self) {
        if !self.stage.decode_ok {
            return;
        }

        let Some(opcode) = self.opcode() else {
            return;
        };
        let rsp = Register::Rsp as u8;

        match opcode {
            Opcode::Cmovxx => {
                if self.stage.cnd {
                    self.set_register(self.stage.rb, self.stage.val_e);
                }
            }
            Opcode::Irmovq | Opcode::Opq | Opcode::Iaddq => {
                self.set_register(self.stage.rb, self.stage.val_e);
            }
            Opcode::Mrmovq => {
                self.set_register(self.stage.ra, self.stage.val_m);
            }
            Opcode::Popq => {
                self.set_register(rsp, self.stage.val_e);
                self.set_register(self.stage.ra, self.stage.val_m);
            }
            Opcode::Ret | Opcode::Pushq | Opcode::Call => {
                self.set_register(rsp, self.stage.val_e);
            }
            _ => {}
        }
    }

    fn update_pc(&mut self) {
        // A fetch or memory fault leaves the PC at the faulting instruction.
        if !self.stage.fetch_ok || !self.stage.mem_ok {
            return;
        }

        let Some(opcode) = self.opcode() else {
            return;
        };

        self.pc = match opcode {
            Opcode::Halt => self.stage.inst_pc,
            Opcode::Jxx => {
                if self.stage.cnd {
                    self.stage.val_c
                } else {
                    self.stage.val_p
                }
            }
            Opcode::Call => self.stage.val_c,
            Opcode::Ret => self.stage.val_m,
            _ => self.stage.val_p,
        };
    }

    fn require_reg(&mut self, id: u8) -> bool {
        if is_valid_register(id) {
            return true;
        }
        self.set_status(Status::Ins);
        self.stage.decode_ok = false;
        false
    }

    fn evaluate_condition(&self, ifun: u8) -> bool {
        let s = self.cc.sf ^ self.cc.of;
        match ifun {
            0x0 => true,
            0x1 => s || self.cc.zf,
            0x2 => s,
            0x3 => self.cc.zf,
            0x4 => !self.cc.zf,
            0x5 => !s,
            0x6 => !s && !self.cc.zf,
            _ => false,
        }
    }

    fn update_cc(&mut self, op_ifun: u8, lhs: u64, rhs: u64, result: u64) {
        if self.stat != Status::Aok {
            return;
        }

        self.cc.zf = result == 0;
        self.cc.sf = (result as i64) < 0;
        self.cc.of = match op_ifun {
            0x0 => (lhs as i64).checked_add(rhs as i64).is_none(),
            0x1 => (lhs as i64).checked_sub(rhs as i64).is_none(),
            // AND and XOR never overflow.
            _ => false,
        };
    }

    fn read_byte(&mut self, bus: &Bus, addr: u64) -> Option<u8> {
        let result = bus.read(addr);
        if result.status != Status::Aok {
            self.set_status(result.status);
            return None;
        }
        Some(result.data)
    }

    fn write_byte(&mut self, bus: &Bus, addr: u64, value: u8) -> bool {
        let result = bus.write(addr, value);
        if result.status != Status::Aok {
            self.set_status(result.status);
            return false;
        }
        true
    }

    fn read_u64(&mut self, bus: &Bus, addr: u64) -> Option<u64> {
        let mut value = 0u64;
        for offset in 0..WORD_BYTES {
            let byte = self.read_byte(bus, addr.wrapping_add(offset))?;
            value |= u64::from(byte) << (offset * 8);
        }
        Some(value)
    }

    fn write_u64(&mut self, bus: &Bus, addr: u64, value: u64) -> bool {
        for offset in 0..WORD_BYTES {
            let byte = (value >> (offset * 8)) as u8;
            if !self.write_byte(bus, addr.wrapping_add(offset), byte) {
                return false;
            }
        }
        true
    }

    fn set_register(&mut self, id: u8, value: u64) {
        if is_valid_register(id) {
            self.registers[id as usize] = value;
        }
    }

    /// Only entry point for status changes: a candidate replaces the current
    /// status when its priority is equal or higher, so AOK never clobbers a
    /// fault and HLT outranks everything within the cycle.
    fn set_status(&mut self, candidate: Status) {
        if candidate.priority() >= self.stat.priority() {
            self.stat = candidate;
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_register(id: u8) -> bool {
    (id as usize) < REGISTER_COUNT
}

fn alu(ifun: u8, lhs: u64, rhs: u64) -> Option<u64> {
    match ifun {
        0x0 => Some(lhs.wrapping_add(rhs)),
        0x1 => Some(lhs.wrapping_sub(rhs)),
        0x2 => Some(lhs & rhs),
        0x3 => Some(lhs ^ rhs),
        _ => None,
    }
}
