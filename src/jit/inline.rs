/*!
inline.rs - The "translated-inline" engine: per-opcode machine-code
capsules emitted directly into the code buffer.

Where the call-threaded engine pays one host call per guest instruction,
this engine inlines the opcode bodies: stack traffic, arithmetic and the
pc/steps bookkeeping are emitted as machine code, with host calls left only
for `Print`, `Rand` and `Sqrt`. The classic trick here is to scan the
binary's own compiled routines for marker bytes and copy the bracketed
bodies; Rust offers no reliable way to scan its compiled functions, so the
capsules are authored as byte templates instead, with immediates and
call/table relocations patched during emission. The observable contract is
the same either way.

Capsule conventions (x86-64 SysV):
  - rbx holds the CPU pointer for the whole burst (bound by the entry
    thunk, preserved across helper calls by the ABI);
  - eax carries the working value, ecx/edx/esi/edi are scratch;
  - every fault site sets Break and returns straight to the thunk;
  - a taken branch bounds-checks the new pc and chains through the
    entrypoint table without leaving generated code.
*/

use std::mem;

use crate::cpu::{Cpu, CpuState};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::{Decoded, Opcode, decode_at};
use crate::jit::code_buf::CodeBuf;
use crate::jit::{
    BAIL_STUB, ENTER_THUNK, EnterFn, STATE_HALTED, jit_isqrt, jit_print, jit_rand, offsets,
};
use crate::program::PROGRAM_SIZE;

/// Inline capsules are an order of magnitude larger than call stubs.
const INLINE_CODE_SIZE: usize = PROGRAM_SIZE * 256;

const THUNK_OFF: usize = 0;
const BAIL_OFF: usize = 16;
const CODE_OFF: usize = 32;

// Condition codes for the two-byte 0F 8x rel32 jcc forms.
const CC_B: u8 = 0x82;
const CC_Z: u8 = 0x84;
const CC_NZ: u8 = 0x85;
const CC_NS: u8 = 0x89;
const CC_L: u8 = 0x8c;
const CC_LE: u8 = 0x8e;

/// Forward-reference to a rel32 field awaiting `bind`.
struct Fixup(usize);

struct Asm<'a> {
    buf: &'a mut CodeBuf,
    pos: usize,
    guest_pc: u32,
    op: Opcode,
}

impl<'a> Asm<'a> {
    fn emit(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.pos + bytes.len() > self.buf.len() {
            return Err(Error::CodeBufferFull {
                guest_pc: self.guest_pc,
            });
        }
        self.buf.write(self.pos, bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// call rel32 to a host helper.
    fn call(&mut self, target: usize) -> Result<(), Error> {
        let site_end = self.buf.addr(self.pos + 5);
        let diff = (target as i64).wrapping_sub(site_end as i64);
        let rel = i32::try_from(diff).map_err(|_| Error::Displacement {
            opcode: self.op as u32,
        })?;
        self.emit(&[0xe8])?;
        self.emit(&rel.to_le_bytes())
    }

    /// Forward conditional jump (0F cc rel32); patch with `bind`.
    fn jcc(&mut self, cc: u8) -> Result<Fixup, Error> {
        self.emit(&[0x0f, cc, 0, 0, 0, 0])?;
        Ok(Fixup(self.pos - 4))
    }

    fn bind(&mut self, fix: Fixup) {
        let rel = (self.pos - (fix.0 + 4)) as i32;
        self.buf.patch32(fix.0, rel);
    }

    /// mov dword ptr [rbx+STATE], Break; ret
    fn set_break_ret(&mut self) -> Result<(), Error> {
        self.emit(&BAIL_STUB)
    }

    /// Pop the stack top into eax; underflow faults out. Clobbers ecx.
    fn pop_eax(&mut self) -> Result<(), Error> {
        self.emit(&[0x8b, 0x4b, offsets::SP])?; // mov ecx, [rbx+SP]
        self.emit(&[0x85, 0xc9])?; // test ecx, ecx
        let ok = self.jcc(CC_NS)?;
        self.set_break_ret()?;
        self.bind(ok);
        self.emit(&[0x8b, 0x44, 0x8b, offsets::STACK])?; // mov eax, [rbx+rcx*4+STACK]
        self.emit(&[0xff, 0xc9])?; // dec ecx
        self.emit(&[0x89, 0x4b, offsets::SP]) // mov [rbx+SP], ecx
    }

    /// Push eax; overflow faults out. Clobbers ecx, preserves eax.
    fn push_eax(&mut self) -> Result<(), Error> {
        self.emit(&[0x8b, 0x4b, offsets::SP])?; // mov ecx, [rbx+SP]
        self.emit(&[0x83, 0xf9, 0x1f])?; // cmp ecx, 31
        let ok = self.jcc(CC_L)?;
        self.set_break_ret()?;
        self.bind(ok);
        self.emit(&[0xff, 0xc1])?; // inc ecx
        self.emit(&[0x89, 0x4b, offsets::SP])?; // mov [rbx+SP], ecx
        self.emit(&[0x89, 0x44, 0x8b, offsets::STACK]) // mov [rbx+rcx*4+STACK], eax
    }

    /// Advance pc, count the step, leave when the budget is exhausted or
    /// the pc has run off the end of program memory (the next buffer bytes
    /// are trap fill; the harness reports the fetch fault).
    fn epilogue(&mut self, len: u8) -> Result<(), Error> {
        self.emit(&[0x83, 0x43, offsets::PC, len])?; // add dword [rbx+PC], len
        self.emit(&[0x48, 0xff, 0x43, offsets::STEPS])?; // inc qword [rbx+STEPS]
        self.emit(&[0x48, 0x8b, 0x43, offsets::STEPS])?; // mov rax, [rbx+STEPS]
        self.emit(&[0x48, 0x3b, 0x43, offsets::STEP_LIMIT])?; // cmp rax, [rbx+LIMIT]
        self.emit(&[0x7c, 0x01])?; // jl +1
        self.emit(&[0xc3])?; // ret
        self.emit(&[0x81, 0x7b, offsets::PC])?; // cmp dword [rbx+PC], imm32
        self.emit(&(PROGRAM_SIZE as u32).to_le_bytes())?;
        self.emit(&[0x72, 0x01])?; // jb +1
        self.emit(&[0xc3]) // ret
    }

    /// add dword ptr [rbx+PC], imm32 (branch displacement).
    fn add_pc(&mut self, imm: i32) -> Result<(), Error> {
        self.emit(&[0x81, 0x43, offsets::PC])?;
        self.emit(&imm.to_le_bytes())
    }

    /// Bounds-check the new pc and jump on through the entrypoint table.
    fn chain(&mut self, table: usize) -> Result<(), Error> {
        self.emit(&[0x8b, 0x43, offsets::PC])?; // mov eax, [rbx+PC]
        self.emit(&[0x3d])?; // cmp eax, imm32
        self.emit(&(PROGRAM_SIZE as u32).to_le_bytes())?;
        let ok = self.jcc(CC_B)?;
        self.set_break_ret()?;
        self.bind(ok);
        self.emit(&[0x48, 0xb9])?; // mov rcx, imm64
        self.emit(&(table as u64).to_le_bytes())?;
        self.emit(&[0x48, 0x8b, 0x04, 0xc1])?; // mov rax, [rcx+rax*8]
        self.emit(&[0xff, 0xe0]) // jmp rax
    }

    /// Pops for a two-operand opcode: first pop lands in edx, second in eax.
    fn bin_prelude(&mut self) -> Result<(), Error> {
        self.pop_eax()?;
        self.emit(&[0x89, 0xc2])?; // mov edx, eax
        self.pop_eax()
    }
}

/// Emit the capsule for one decoded instruction.
fn emit_capsule(a: &mut Asm<'_>, d: &Decoded, table: usize) -> Result<(), Error> {
    use Opcode::*;
    match d.op {
        Break => a.set_break_ret(),
        Nop => a.epilogue(1),
        Halt => {
            a.emit(&[0xc7, 0x43, offsets::STATE])?; // mov dword [rbx+STATE], Halted
            a.emit(&STATE_HALTED.to_le_bytes())?;
            a.emit(&[0x83, 0x43, offsets::PC, 1])?;
            a.emit(&[0x48, 0xff, 0x43, offsets::STEPS])?;
            a.emit(&[0xc3])
        }
        Push => {
            a.emit(&[0xb8])?; // mov eax, imm32
            a.emit(&d.immediate.to_le_bytes())?;
            a.push_eax()?;
            a.epilogue(2)
        }
        Print => {
            a.pop_eax()?;
            a.emit(&[0x89, 0xc7])?; // mov edi, eax
            a.call(jit_print as usize)?;
            a.epilogue(1)
        }
        Swap => {
            a.bin_prelude()?; // edx = top, eax = below
            a.emit(&[0x89, 0xc6])?; // mov esi, eax
            a.emit(&[0x89, 0xd0])?; // mov eax, edx
            a.push_eax()?;
            a.emit(&[0x89, 0xf0])?; // mov eax, esi
            a.push_eax()?;
            a.epilogue(1)
        }
        Dup => {
            a.pop_eax()?;
            a.push_eax()?;
            a.push_eax()?;
            a.epilogue(1)
        }
        Drop => {
            a.pop_eax()?;
            a.epilogue(1)
        }
        Over => {
            a.bin_prelude()?; // edx = top, eax = below
            a.emit(&[0x89, 0xc6])?; // mov esi, eax
            a.push_eax()?; // below
            a.emit(&[0x89, 0xd0])?;
            a.push_eax()?; // top
            a.emit(&[0x89, 0xf0])?;
            a.push_eax()?; // below again
            a.epilogue(1)
        }
        Rot => {
            a.pop_eax()?; // c
            a.emit(&[0x89, 0xc2])?; // mov edx, eax
            a.pop_eax()?; // b
            a.emit(&[0x89, 0xc6])?; // mov esi, eax
            a.pop_eax()?; // a
            a.emit(&[0x89, 0xc7])?; // mov edi, eax
            a.emit(&[0x89, 0xf0])?;
            a.push_eax()?; // b
            a.emit(&[0x89, 0xd0])?;
            a.push_eax()?; // c
            a.emit(&[0x89, 0xf8])?;
            a.push_eax()?; // a
            a.epilogue(1)
        }
        Inc => {
            a.pop_eax()?;
            a.emit(&[0x83, 0xc0, 0x01])?; // add eax, 1
            a.push_eax()?;
            a.epilogue(1)
        }
        Dec => {
            a.pop_eax()?;
            a.emit(&[0x83, 0xe8, 0x01])?; // sub eax, 1
            a.push_eax()?;
            a.epilogue(1)
        }
        Add => {
            a.bin_prelude()?;
            a.emit(&[0x01, 0xd0])?; // add eax, edx
            a.push_eax()?;
            a.epilogue(1)
        }
        Sub => {
            a.bin_prelude()?;
            a.emit(&[0x29, 0xc2])?; // sub edx, eax (first pop minus second)
            a.emit(&[0x89, 0xd0])?; // mov eax, edx
            a.push_eax()?;
            a.epilogue(1)
        }
        Mul => {
            a.bin_prelude()?;
            a.emit(&[0x0f, 0xaf, 0xc2])?; // imul eax, edx
            a.push_eax()?;
            a.epilogue(1)
        }
        And => {
            a.bin_prelude()?;
            a.emit(&[0x21, 0xd0])?; // and eax, edx
            a.push_eax()?;
            a.epilogue(1)
        }
        Or => {
            a.bin_prelude()?;
            a.emit(&[0x09, 0xd0])?; // or eax, edx
            a.push_eax()?;
            a.epilogue(1)
        }
        Xor => {
            a.bin_prelude()?;
            a.emit(&[0x31, 0xd0])?; // xor eax, edx
            a.push_eax()?;
            a.epilogue(1)
        }
        Shl | Shr => {
            a.pop_eax()?; // shift amount
            a.emit(&[0x89, 0xc6])?; // mov esi, eax
            a.pop_eax()?; // value
            a.emit(&[0x89, 0xf1])?; // mov ecx, esi
            // Hardware masks cl to 5 bits, matching the guest semantics.
            if d.op == Shl {
                a.emit(&[0xd3, 0xe0])?; // shl eax, cl
            } else {
                a.emit(&[0xd3, 0xe8])?; // shr eax, cl
            }
            a.push_eax()?;
            a.epilogue(1)
        }
        Greater => {
            a.bin_prelude()?;
            a.emit(&[0x31, 0xc9])?; // xor ecx, ecx
            a.emit(&[0x39, 0xc2])?; // cmp edx, eax
            a.emit(&[0x0f, 0x97, 0xc1])?; // seta cl
            a.emit(&[0x89, 0xc8])?; // mov eax, ecx
            a.push_eax()?;
            a.epilogue(1)
        }
        Sqrt => {
            a.pop_eax()?;
            a.emit(&[0x89, 0xc7])?; // mov edi, eax
            a.call(jit_isqrt as usize)?;
            a.push_eax()?;
            a.epilogue(1)
        }
        Rand => {
            a.call(jit_rand as usize)?;
            a.push_eax()?;
            a.epilogue(1)
        }
        Mod | Div => {
            a.pop_eax()?; // dividend
            a.emit(&[0x89, 0xc6])?; // mov esi, eax
            a.pop_eax()?; // divisor
            a.emit(&[0x89, 0xc1])?; // mov ecx, eax
            a.emit(&[0x85, 0xc9])?; // test ecx, ecx
            let ok = a.jcc(CC_NZ)?;
            a.set_break_ret()?;
            a.bind(ok);
            a.emit(&[0x89, 0xf0])?; // mov eax, esi
            a.emit(&[0x31, 0xd2])?; // xor edx, edx
            a.emit(&[0xf7, 0xf1])?; // div ecx
            if d.op == Mod {
                a.emit(&[0x89, 0xd0])?; // mov eax, edx (remainder)
            }
            a.push_eax()?;
            a.epilogue(1)
        }
        Pick => {
            a.pop_eax()?; // depth n
            a.emit(&[0x8b, 0x4b, offsets::SP])?; // mov ecx, [rbx+SP]
            a.emit(&[0x89, 0xca])?; // mov edx, ecx
            a.emit(&[0x29, 0xc2])?; // sub edx, eax
            let ok1 = a.jcc(CC_NS)?;
            a.set_break_ret()?;
            a.bind(ok1);
            a.emit(&[0x39, 0xca])?; // cmp edx, ecx
            let ok2 = a.jcc(CC_LE)?;
            a.set_break_ret()?;
            a.bind(ok2);
            a.emit(&[0x8b, 0x44, 0x93, offsets::STACK])?; // mov eax, [rbx+rdx*4+STACK]
            a.push_eax()?;
            a.epilogue(1)
        }
        Get => {
            a.pop_eax()?;
            a.emit(&[0x83, 0xf8, 0x20])?; // cmp eax, 32
            let ok = a.jcc(CC_B)?;
            a.set_break_ret()?;
            a.bind(ok);
            a.emit(&[0x8b, 0x44, 0x83, offsets::STACK])?; // mov eax, [rbx+rax*4+STACK]
            a.push_eax()?;
            a.epilogue(1)
        }
        Set => {
            a.pop_eax()?; // index
            a.emit(&[0x89, 0xc2])?; // mov edx, eax
            a.pop_eax()?; // value
            a.emit(&[0x83, 0xfa, 0x20])?; // cmp edx, 32
            let ok = a.jcc(CC_B)?;
            a.set_break_ret()?;
            a.bind(ok);
            a.emit(&[0x89, 0x44, 0x93, offsets::STACK])?; // mov [rbx+rdx*4+STACK], eax
            a.epilogue(1)
        }
        Je | Jne => {
            a.pop_eax()?;
            a.emit(&[0x85, 0xc0])?; // test eax, eax
            // Je branches on zero, so non-zero skips the taken block.
            let not_taken = a.jcc(if d.op == Je { CC_NZ } else { CC_Z })?;
            a.add_pc(d.immediate)?;
            a.epilogue(2)?;
            a.chain(table)?;
            a.bind(not_taken);
            a.epilogue(2)
        }
        Jump => {
            a.add_pc(d.immediate)?;
            a.epilogue(2)?;
            a.chain(table)
        }
    }
}

pub struct TranslatedInline;

impl Engine for TranslatedInline {
    fn name(&self) -> &'static str {
        "translated-inline"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        let anchor = jit_print as usize;
        let mut buf = CodeBuf::map_near(anchor, INLINE_CODE_SIZE)?;
        buf.write(THUNK_OFF, &ENTER_THUNK);
        buf.write(BAIL_OFF, &BAIL_STUB);

        // Host-address entrypoint table; taken branches index it from
        // inside generated code, so its address is baked into the capsules
        // and it must stay put for the whole run.
        let mut entries: Box<[usize]> = vec![0usize; PROGRAM_SIZE].into_boxed_slice();
        let table_ptr = entries.as_ptr() as usize;

        let mut capsule_offs = vec![BAIL_OFF; PROGRAM_SIZE];
        let code_end = {
            let mut asm = Asm {
                buf: &mut buf,
                pos: CODE_OFF,
                guest_pc: 0,
                op: Opcode::Break,
            };
            let mut addr = 0usize;
            while addr < PROGRAM_SIZE {
                let d = decode_at(cpu.pmem(), addr);
                capsule_offs[addr] = asm.pos;
                asm.guest_pc = addr as u32;
                asm.op = d.op;
                emit_capsule(&mut asm, &d, table_ptr)?;
                addr += d.length as usize;
            }
            asm.pos
        };
        for (entry, off) in entries.iter_mut().zip(&capsule_offs) {
            *entry = buf.addr(*off);
        }
        log::debug!("inline translation: {} bytes", code_end - CODE_OFF);

        let enter: EnterFn = unsafe { mem::transmute::<usize, EnterFn>(buf.addr(THUNK_OFF)) };
        while cpu.running() && cpu.steps < cpu.step_limit {
            let pc = cpu.pc as usize;
            if pc >= PROGRAM_SIZE {
                cpu.state = CpuState::Break;
                break;
            }
            unsafe { enter(&mut *cpu, entries[pc] as *const u8) };
        }
        Ok(())
    }
}
