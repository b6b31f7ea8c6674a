use crate::cpu::Cpu;
use crate::ram::Ram;
use serde::Serialize;
use std::collections::BTreeMap;

const WORD_BYTES: u64 = 8;

/// One per-cycle snapshot of the architectural state, shaped for the JSON
/// trace stream the batch driver emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceFrame {
    #[serde(rename = "CC")]
    pub cc: TraceConditionCodes,
    /// Non-zero little-endian words on 8-byte boundaries, keyed by byte
    /// offset; zero words are elided to keep the stream small.
    #[serde(rename = "MEM")]
    pub mem: BTreeMap<u64, i64>,
    #[serde(rename = "PC")]
    pub pc: u64,
    #[serde(rename = "REG")]
    pub reg: TraceRegisters,
    /// 1=AOK, 2=HLT, 3=ADR, 4=INS.
    #[serde(rename = "STAT")]
    pub stat: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceConditionCodes {
    #[serde(rename = "OF")]
    pub of: u8,
    #[serde(rename = "SF")]
    pub sf: u8,
    #[serde(rename = "ZF")]
    pub zf: u8,
}

/// Register values as signed 64-bit, keyed by lower-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceRegisters {
    pub rax: i64,
    pub rcx: i64,
    pub rdx: i64,
    pub rbx: i64,
    pub rsp: i64,
    pub rbp: i64,
    pub rsi: i64,
    pub rdi: i64,
    pub r8: i64,
    pub r9: i64,
    pub r10: i64,
    pub r11: i64,
    pub r12: i64,
    pub r13: i64,
    pub r14: i64,
}

pub fn capture(cpu: &Cpu, ram: &Ram) -> TraceFrame {
    let cc = cpu.condition_codes();
    let regs = cpu.registers();

    let mut mem = BTreeMap::new();
    let mut addr = 0;
    while addr + WORD_BYTES <= ram.size() {
        let mut value = 0u64;
        for i in 0..WORD_BYTES {
            value |= u64::from(ram.peek(addr + i)) << (i * 8);
        }
        if value != 0 {
            mem.insert(addr, value as i64);
        }
        addr += WORD_BYTES;
    }

    TraceFrame {
        cc: TraceConditionCodes {
            of: cc.of.into(),
            sf: cc.sf.into(),
            zf: cc.zf.into(),
        },
        mem,
        pc: cpu.pc(),
        reg: TraceRegisters {
            rax: regs[0] as i64,
            rcx: regs[1] as i64,
            rdx: regs[2] as i64,
            rbx: regs[3] as i64,
            rsp: regs[4] as i64,
            rbp: regs[5] as i64,
            rsi: regs[6] as i64,
            rdi: regs[7] as i64,
            r8: regs[8] as i64,
            r9: regs[9] as i64,
            r10: regs[10] as i64,
            r11: regs[11] as i64,
            r12: regs[12] as i64,
            r13: regs[13] as i64,
            r14: regs[14] as i64,
        },
        stat: cpu.status().encode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn memory_map_keeps_only_nonzero_words() {
        let cpu = Cpu::new();
        let mut ram = Ram::new(64).unwrap();
        ram.load_bytes(8, &3u64.to_le_bytes()).unwrap();
        ram.load_bytes(40, &(-1i64).to_le_bytes()).unwrap();

        let frame = capture(&cpu, &ram);
        assert_eq!(frame.mem.len(), 2);
        assert_eq!(frame.mem[&8], 3);
        assert_eq!(frame.mem[&40], -1);
    }

    #[test]
    fn fresh_cpu_serializes_reset_state() {
        let cpu = Cpu::new();
        let ram = Ram::new(16).unwrap();
        let frame = capture(&cpu, &ram);

        assert_eq!(frame.pc, 0);
        assert_eq!(frame.stat, 1);
        assert_eq!(frame.cc.zf, 1);
        assert_eq!(frame.cc.sf, 0);
        assert_eq!(frame.cc.of, 0);
        assert_eq!(frame.reg.rax, 0);
    }

    #[test]
    fn json_shape_matches_the_trace_contract() {
        let ram = Rc::new(RefCell::new(Ram::new(32).unwrap()));
        // irmovq $-2, %rax; halt
        let mut program = vec![0x30, 0xF0];
        program.extend_from_slice(&(-2i64).to_le_bytes());
        program.push(0x00);
        ram.borrow_mut().load_bytes(0, &program).unwrap();

        let mut bus = Bus::new();
        bus.register_device(ram.clone(), 0, 32).unwrap();
        let mut cpu = Cpu::new();
        cpu.run_cycle(&bus);
        cpu.run_cycle(&bus);

        let frame = capture(&cpu, &ram.borrow());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["STAT"], 2);
        assert_eq!(json["REG"]["rax"], -2);
        assert_eq!(json["CC"]["ZF"], 1);
        // Map keys are the decimal byte offsets.
        assert!(json["MEM"].get("0").is_some());
        assert_eq!(json["PC"], 10);
    }
}
