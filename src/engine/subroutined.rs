/*!
subroutined.rs - Dispatch through an opcode-indexed table of first-class
functions instead of a tagged match.

The table is the shared `ROUTINES` array; this engine is the thinnest
possible wrapper around it and doubles as the model for the threaded
variants, which move the advance bookkeeping into the routines themselves.
*/

use crate::cpu::{Cpu, CpuState, ROUTINES};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::fetch_decode;

pub struct Subroutined;

impl Engine for Subroutined {
    fn name(&self) -> &'static str {
        "subroutined"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        while cpu.running() && cpu.steps < cpu.step_limit {
            let d = fetch_decode(cpu);
            if !cpu.running() {
                break;
            }
            ROUTINES[d.op as usize](cpu, &d);
            if cpu.state == CpuState::Break {
                break;
            }
            cpu.pc = cpu.pc.wrapping_add(d.length);
            cpu.steps += 1;
        }
        Ok(())
    }
}
