/*!
call_threaded.rs - The "translated" engine: call-threaded binary
translation.

The whole program is translated eagerly at startup. Each guest instruction
becomes at most 16 bytes of host code:

```text
mov edi, imm32        ; immediate opcodes only; patched at translate time
call sr_<opcode>      ; rel32 into the host binary
test eax, eax         ; continue flag from the routine
jnz +1                ; fall through to the next stub...
ret                   ; ...or leave generated code
```

Control transfers (taken branches, halt, break, faults, step budget) make
the routine return 0; the `ret` lands in the entry thunk and the harness
loop re-enters at the new `pc`. The buffer therefore contains no branches
at all and is built in one linear pass.
*/

use std::mem;

use crate::cpu::{Cpu, CpuState};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::{Opcode, decode_at};
use crate::jit::code_buf::CodeBuf;
use crate::jit::{BAIL_STUB, CpuBinding, ENTER_THUNK, EnterFn, SERVICE_STUBS};
use crate::program::PROGRAM_SIZE;

/// Up to 16 host bytes per guest program word.
const JIT_CODE_SIZE: usize = PROGRAM_SIZE * 16;

const THUNK_OFF: usize = 0;
const BAIL_OFF: usize = ENTER_THUNK.len().next_multiple_of(8);
const CODE_OFF: usize = 32;

/// rel32 displacement from the end of a call instruction to `target`;
/// errors out when the mapping landed outside call range.
fn rel32(site_end: usize, target: usize, op: Opcode) -> Result<i32, Error> {
    let diff = (target as i64).wrapping_sub(site_end as i64);
    i32::try_from(diff).map_err(|_| Error::Displacement { opcode: op as u32 })
}

pub struct Translated;

impl Engine for Translated {
    fn name(&self) -> &'static str {
        "translated"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        let anchor = SERVICE_STUBS[0] as usize;
        let mut buf = CodeBuf::map_near(anchor, CODE_OFF + JIT_CODE_SIZE)?;
        buf.write(THUNK_OFF, &ENTER_THUNK);
        buf.write(BAIL_OFF, &BAIL_STUB);

        // Guest pc -> buffer offset. Addresses that are not instruction
        // starts keep the bail-out stub.
        let mut entries = vec![BAIL_OFF; PROGRAM_SIZE];
        let mut cur = CODE_OFF;
        let mut addr = 0usize;
        while addr < PROGRAM_SIZE {
            let d = decode_at(cpu.pmem(), addr);
            entries[addr] = cur;

            let mut stub = [0u8; 16];
            let mut n = 0;
            if d.length == 2 {
                stub[n] = 0xbf; // mov edi, imm32
                stub[n + 1..n + 5].copy_from_slice(&d.immediate.to_le_bytes());
                n += 5;
            }
            let target = SERVICE_STUBS[d.op as usize] as usize;
            let rel = rel32(buf.addr(cur + n + 5), target, d.op)?;
            stub[n] = 0xe8; // call rel32
            stub[n + 1..n + 5].copy_from_slice(&rel.to_le_bytes());
            n += 5;
            stub[n..n + 5].copy_from_slice(&[0x85, 0xc0, 0x75, 0x01, 0xc3]);
            n += 5;

            if cur + n > buf.len() {
                return Err(Error::CodeBufferFull {
                    guest_pc: addr as u32,
                });
            }
            buf.write(cur, &stub[..n]);
            cur += n;
            addr += d.length as usize;
        }
        log::debug!("call-threaded translation: {} bytes", cur - CODE_OFF);

        let enter: EnterFn = unsafe { mem::transmute::<usize, EnterFn>(buf.addr(THUNK_OFF)) };
        let _binding = CpuBinding::bind(cpu);
        while cpu.running() && cpu.steps < cpu.step_limit {
            let pc = cpu.pc as usize;
            if pc >= PROGRAM_SIZE {
                cpu.state = CpuState::Break;
                break;
            }
            let entry = buf.addr(entries[pc]) as *const u8;
            // Returns via the thunk whenever a routine reports 0.
            unsafe { enter(&mut *cpu, entry) };
        }
        Ok(())
    }
}
