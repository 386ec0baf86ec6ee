/*!
threaded_cached.rs - Token-threaded dispatch over a predecoded cache.

The classic "threaded code with inline cache": a predecode pass resolves
every address to its dispatch handle once and stores the handle inside the
decoded instruction, so the hot loop is a bounds check, a cache load and an
indirect call. Shares its handler table with the plain threaded engine.
*/

use crate::cpu::{Cpu, CpuState};
use crate::engine::Engine;
use crate::engine::threaded::HANDLERS;
use crate::error::Error;
use crate::isa::{Decoded, decode_at};
use crate::program::{PROGRAM_SIZE, ProgramMemory};

pub struct ThreadedCached;

/// Decode every address and resolve its dispatch handle.
fn predecode_with_handlers(pmem: &ProgramMemory) -> Box<[Decoded]> {
    (0..PROGRAM_SIZE)
        .map(|addr| {
            let mut d = decode_at(pmem, addr);
            d.handler = Some(HANDLERS[d.op as usize]);
            d
        })
        .collect()
}

impl Engine for ThreadedCached {
    fn name(&self) -> &'static str {
        "threaded-cached"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        let cache = predecode_with_handlers(cpu.pmem());
        while cpu.running() && cpu.steps < cpu.step_limit {
            let pc = cpu.pc as usize;
            if pc >= PROGRAM_SIZE {
                log::debug!("PC out of bounds: {pc:#x}");
                cpu.state = CpuState::Break;
                break;
            }
            let d = cache[pc];
            match d.handler {
                Some(handler) => handler(cpu, &d),
                None => HANDLERS[d.op as usize](cpu, &d),
            }
        }
        Ok(())
    }
}
