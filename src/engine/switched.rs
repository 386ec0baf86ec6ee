/*!
switched.rs - The baseline engine: fetch, decode and execute every step
through one tagged match, with no precomputation.

All the other engines are measured against this one; its loop is the
reference rendering of the shared contract. A completed instruction advances
`pc` and counts one step; a faulting one leaves both untouched.
*/

use crate::cpu::{Cpu, CpuState, execute};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::fetch_decode;

pub struct Switched;

impl Engine for Switched {
    fn name(&self) -> &'static str {
        "switched"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        while cpu.running() && cpu.steps < cpu.step_limit {
            let d = fetch_decode(cpu);
            if !cpu.running() {
                // Fetch fault: nothing was executed, nothing is counted.
                break;
            }
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
