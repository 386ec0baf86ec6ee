/*!
isa.rs - Guest instruction set: opcode enumeration, classification and the
decoder.

Overview
========
The guest machine is a small stack VM. An instruction is one 32-bit word
(the opcode), optionally followed by a second word holding a signed
immediate. Decoding never fails visibly: anything unrecognised, truncated or
out of range decodes to `Break`, which every engine treats as a fatal stop.

The numeric opcode values are load-bearing. The subroutine/threaded engines
and both binary-translation engines index routine tables by `Opcode as
usize`, and program images store the raw numbers on disk. Append new opcodes
at the end; never reorder.
*/

use crate::cpu::{Cpu, CpuState};
use crate::program::{PROGRAM_SIZE, ProgramMemory};

/// Guest opcodes, in canonical numbering.
///
/// Opcodes marked `imm` consume the following program word as a signed
/// 32-bit immediate.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Abnormal end; uninitialised program memory decodes to this.
    Break = 0x00,
    Nop = 0x01,
    /// Normal program end.
    Halt = 0x02,
    Push = 0x03, // imm
    Print = 0x04,
    Jne = 0x05, // imm
    Swap = 0x06,
    Dup = 0x07,
    Je = 0x08, // imm
    Inc = 0x09,
    Add = 0x0a,
    Sub = 0x0b,
    Mul = 0x0c,
    Rand = 0x0d,
    Dec = 0x0e,
    Drop = 0x0f,
    Over = 0x10,
    Mod = 0x11,
    Jump = 0x12, // imm
    And = 0x13,
    Or = 0x14,
    Xor = 0x15,
    Shl = 0x16,
    Shr = 0x17,
    Rot = 0x18,
    Pick = 0x19,
    Div = 0x1a,
    Get = 0x1b,
    Set = 0x1c,
    Greater = 0x1d,
    Sqrt = 0x1e,
}

/// Number of opcodes; routine tables have exactly this many entries.
pub const OPCODE_COUNT: usize = 0x1f;

impl Opcode {
    /// Map a raw program word to an opcode. Unknown words are `None`; the
    /// decoder turns them into `Break`.
    pub fn from_word(raw: u32) -> Option<Opcode> {
        use Opcode::*;
        Some(match raw {
            0x00 => Break,
            0x01 => Nop,
            0x02 => Halt,
            0x03 => Push,
            0x04 => Print,
            0x05 => Jne,
            0x06 => Swap,
            0x07 => Dup,
            0x08 => Je,
            0x09 => Inc,
            0x0a => Add,
            0x0b => Sub,
            0x0c => Mul,
            0x0d => Rand,
            0x0e => Dec,
            0x0f => Drop,
            0x10 => Over,
            0x11 => Mod,
            0x12 => Jump,
            0x13 => And,
            0x14 => Or,
            0x15 => Xor,
            0x16 => Shl,
            0x17 => Shr,
            0x18 => Rot,
            0x19 => Pick,
            0x1a => Div,
            0x1b => Get,
            0x1c => Set,
            0x1d => Greater,
            0x1e => Sqrt,
            _ => return None,
        })
    }

    /// True for opcodes that carry an immediate in the next program word.
    #[inline]
    pub fn has_immediate(self) -> bool {
        matches!(self, Opcode::Push | Opcode::Jne | Opcode::Je | Opcode::Jump)
    }

    /// Instruction length in program words (1 or 2).
    #[inline]
    pub fn encoded_len(self) -> u32 {
        if self.has_immediate() { 2 } else { 1 }
    }
}

/// One decoded instruction.
#[derive(Clone, Copy, Debug)]
pub struct Decoded {
    pub op: Opcode,
    /// Offset of the next sequential instruction, in words.
    pub length: u32,
    /// Signed immediate; meaningful only when `length == 2`.
    pub immediate: i32,
    /// Dispatch handle cached by the threaded-cached engine.
    pub handler: Option<crate::cpu::ServiceFn>,
}

impl Decoded {
    /// The synthetic instruction every decode failure collapses to.
    #[inline]
    pub fn fault() -> Decoded {
        Decoded {
            op: Opcode::Break,
            length: 1,
            immediate: 0,
            handler: None,
        }
    }

    #[inline]
    pub fn inherent(op: Opcode) -> Decoded {
        Decoded {
            op,
            length: 1,
            immediate: 0,
            handler: None,
        }
    }

    #[inline]
    pub fn with_immediate(op: Opcode, immediate: i32) -> Decoded {
        Decoded {
            op,
            length: 2,
            immediate,
            handler: None,
        }
    }
}

impl Default for Decoded {
    fn default() -> Decoded {
        Decoded::fault()
    }
}

/// Decode the instruction at `addr`.
///
/// Out-of-range addresses, unknown words and immediate opcodes whose
/// immediate would fall past the end of program memory all decode to
/// `Break` with length 1.
pub fn decode_at(pmem: &ProgramMemory, addr: usize) -> Decoded {
    let Some(raw) = pmem.word(addr) else {
        return Decoded::fault();
    };
    let Some(op) = Opcode::from_word(raw) else {
        return Decoded::fault();
    };
    if !op.has_immediate() {
        return Decoded::inherent(op);
    }
    match pmem.word(addr + 1) {
        Some(imm) => Decoded::with_immediate(op, imm as i32),
        None => {
            log::debug!("truncated immediate at {addr:#x}");
            Decoded::fault()
        }
    }
}

/// Fetch and decode at the current program counter.
///
/// A program counter outside program memory is a fetch fault: the CPU
/// transitions to `Break` and the synthetic `Break` instruction is returned.
/// The caller must not count the step.
pub fn fetch_decode(cpu: &mut Cpu) -> Decoded {
    if cpu.pc as usize >= PROGRAM_SIZE {
        log::debug!("PC out of bounds: {:#x}", cpu.pc);
        cpu.state = CpuState::Break;
        return Decoded::fault();
    }
    decode_at(cpu.pmem(), cpu.pc as usize)
}
