/*!
program.rs - Guest program memory: the fixed 512-word image, the binary
image loader/writer, and the built-in guest programs.

An image on disk is a raw array of 32-bit little-endian words with no
header. The loader zero-pads short images; word 0x00000000 decodes as
`Break`, so running off the end of a loaded program stops the machine.
*/

use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::isa::Opcode;

/// Capacity of guest program memory, in 32-bit words.
pub const PROGRAM_SIZE: usize = 512;

/// Immutable guest program memory.
///
/// Engines and the decoder read it; nothing mutates it after construction.
#[derive(Clone)]
pub struct ProgramMemory {
    words: [u32; PROGRAM_SIZE],
}

impl ProgramMemory {
    /// Build program memory from a word slice, zero-padding to capacity.
    ///
    /// Slices longer than `PROGRAM_SIZE` are truncated; the built-in
    /// programs and tests never hit that, and the loader checks sizes
    /// before calling here.
    pub fn from_words(words: &[u32]) -> ProgramMemory {
        let mut mem = [0u32; PROGRAM_SIZE];
        let n = words.len().min(PROGRAM_SIZE);
        mem[..n].copy_from_slice(&words[..n]);
        ProgramMemory { words: mem }
    }

    /// Read the word at `addr`, or `None` past the end of program memory.
    #[inline]
    pub fn word(&self, addr: usize) -> Option<u32> {
        self.words.get(addr).copied()
    }

    /// The raw backing words.
    #[inline]
    pub fn words(&self) -> &[u32; PROGRAM_SIZE] {
        &self.words
    }

    /// Load a binary image: little-endian 32-bit words, no header.
    ///
    /// Images larger than `PROGRAM_SIZE * 4` bytes are rejected. A trailing
    /// partial word is zero-extended.
    pub fn load_image(path: &Path) -> Result<ProgramMemory, Error> {
        let bytes = fs::read(path).map_err(|source| Error::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() > PROGRAM_SIZE * 4 {
            return Err(Error::ImageTooLarge {
                got: bytes.len(),
                limit: PROGRAM_SIZE * 4,
            });
        }
        let mut mem = [0u32; PROGRAM_SIZE];
        for (i, chunk) in bytes.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            mem[i] = u32::from_le_bytes(word);
        }
        log::debug!("loaded {} bytes of guest program from {}", bytes.len(), path.display());
        Ok(ProgramMemory { words: mem })
    }

    /// Write the first `count` words as a binary image (the loader's inverse).
    pub fn write_image(&self, path: &Path, count: usize) -> Result<(), Error> {
        let count = count.min(PROGRAM_SIZE);
        let mut bytes = Vec::with_capacity(count * 4);
        for w in &self.words[..count] {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        fs::write(path, bytes).map_err(|source| Error::ImageWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for ProgramMemory {
    fn default() -> ProgramMemory {
        primes()
    }
}

const PUSH: u32 = Opcode::Push as u32;
const PRINT: u32 = Opcode::Print as u32;
const JNE: u32 = Opcode::Jne as u32;
const SWAP: u32 = Opcode::Swap as u32;
const DUP: u32 = Opcode::Dup as u32;
const JE: u32 = Opcode::Je as u32;
const INC: u32 = Opcode::Inc as u32;
const ADD: u32 = Opcode::Add as u32;
const SUB: u32 = Opcode::Sub as u32;
const MUL: u32 = Opcode::Mul as u32;
const RAND: u32 = Opcode::Rand as u32;
const DEC: u32 = Opcode::Dec as u32;
const DROP: u32 = Opcode::Drop as u32;
const OVER: u32 = Opcode::Over as u32;
const MOD: u32 = Opcode::Mod as u32;
const JUMP: u32 = Opcode::Jump as u32;
const NOP: u32 = Opcode::Nop as u32;
const HALT: u32 = Opcode::Halt as u32;
const BREAK: u32 = Opcode::Break as u32;

const fn imm(v: i32) -> u32 {
    v as u32
}

/// Default guest program: prints every prime below its bound.
///
/// Stack tracking comments give bottom-to-top contents after each step.
pub fn primes() -> ProgramMemory {
    ProgramMemory::from_words(&[
        PUSH, 100000, // nmax (maximal number to test)
        PUSH, 2,      // nmax, c (minimal number to test)
        // back:
        OVER,         // nmax, c, nmax
        OVER,         // nmax, c, nmax, c
        SUB,          // nmax, c, c-nmax
        JE, imm(23),  // -> end; nmax, c
        PUSH, 2,      // nmax, c, divisor
        // back2:
        OVER,         // nmax, c, divisor, c
        OVER,         // nmax, c, divisor, c, divisor
        SWAP,         // nmax, c, divisor, divisor, c
        SUB,          // nmax, c, divisor, c-divisor
        JE, imm(9),   // -> print_prime; nmax, c, divisor
        OVER,         // nmax, c, divisor, c
        OVER,         // nmax, c, divisor, c, divisor
        SWAP,         // nmax, c, divisor, divisor, c
        MOD,          // nmax, c, divisor, c mod divisor
        JE, imm(5),   // -> not_prime; nmax, c, divisor
        INC,          // nmax, c, divisor+1
        JUMP, imm(-15), // -> back2
        // print_prime:
        OVER,         // nmax, c, divisor, c
        PRINT,        // nmax, c, divisor
        // not_prime:
        DROP,         // nmax, c
        INC,          // nmax, c+1
        JUMP, imm(-28), // -> back
        // end:
        HALT,         // nmax, c (== nmax)
    ])
}

/// Computes and prints 12! (479001600), halting with an empty stack.
pub fn factorial() -> ProgramMemory {
    ProgramMemory::from_words(&[
        PUSH, 12,     // n
        PUSH, 1,      // n, a
        SWAP,         // a, n
        // back:
        SWAP,         // n, a
        OVER,         // n, a, n
        MUL,          // n, a*n
        SWAP,         // a*n, n
        DEC,          // a*n, n-1
        DUP,          // a*n, n-1, n-1
        JNE, imm(-8), // -> back; a*n, n-1
        SWAP,         // n, a
        PRINT,        // n
        DROP,         //
        HALT,
    ])
}

/// Historical opcode smoke program, kept for reference; exercises most of
/// the original instruction set and ends in Halt.
pub fn legacy_smoke() -> ProgramMemory {
    ProgramMemory::from_words(&[
        NOP,
        PUSH, 0x11112222,
        PUSH, 0xf00d,
        PRINT,
        PUSH, 0x1,
        PUSH, 0x2,
        PUSH, 0x3,
        PUSH, 0x4,
        SWAP,
        DUP,
        INC,
        ADD,
        SUB,
        MUL,
        RAND,
        DEC,
        DROP,
        OVER,
        HALT,
        BREAK,
    ])
}
