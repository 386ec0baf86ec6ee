/*!
predecoded.rs - Decode the whole program once, then run the switched loop
over the decoded array.

Every address gets a cache entry, including words that are really
immediates; `pc` normally skips those, and a branch landing on one simply
executes whatever the word decodes to, exactly as the per-step decoder
would.
*/

use crate::cpu::{Cpu, CpuState, execute};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::{Decoded, decode_at};
use crate::program::{PROGRAM_SIZE, ProgramMemory};

pub struct Predecoded;

/// Decode every program address into a lookup table.
pub(crate) fn predecode(pmem: &ProgramMemory) -> Box<[Decoded]> {
    (0..PROGRAM_SIZE)
        .map(|addr| decode_at(pmem, addr))
        .collect()
}

impl Engine for Predecoded {
    fn name(&self) -> &'static str {
        "predecoded"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        let cache = predecode(cpu.pmem());
        while cpu.running() && cpu.steps < cpu.step_limit {
            let pc = cpu.pc as usize;
            if pc >= PROGRAM_SIZE {
                log::debug!("PC out of bounds: {pc:#x}");
                cpu.state = CpuState::Break;
                break;
            }
            let d = cache[pc];
            execute(cpu, &d);
            if cpu.state == CpuState::Break {
                break;
            }
            cpu.pc = cpu.pc.wrapping_add(d.length);
            cpu.steps += 1;
        }
        Ok(())
    }
}
