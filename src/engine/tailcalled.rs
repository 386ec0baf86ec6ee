/*!
tailcalled.rs - Tail-call chained dispatch.

Each routine performs its effect, advances past the instruction, checks the
stop conditions and then fetch-decodes its successor. In a language with
guaranteed tail calls the routine would invoke the successor directly; Rust
makes no such guarantee, so the routine returns the successor's handle and a
trampoline loops on it. The stack stays flat and the loop body degenerates
to a single indirect call.
*/

use crate::cpu::{Cpu, CpuState, ROUTINES};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::{Decoded, OPCODE_COUNT, Opcode, fetch_decode};

/// Handle to a chained routine: executes one instruction and returns the
/// next link, or `None` when the run is over.
#[derive(Clone, Copy)]
struct Chain(fn(&mut Cpu, &Decoded) -> Option<(Chain, Decoded)>);

/// Shared tail of every chained routine: advance, check the stop
/// conditions, fetch-decode the successor and resolve its handle.
fn continue_chain(cpu: &mut Cpu, d: &Decoded) -> Option<(Chain, Decoded)> {
    if cpu.state == CpuState::Break {
        return None;
    }
    cpu.pc = cpu.pc.wrapping_add(d.length);
    cpu.steps += 1;
    if !cpu.running() || cpu.steps >= cpu.step_limit {
        return None;
    }
    let next = fetch_decode(cpu);
    if !cpu.running() {
        return None;
    }
    Some((CHAIN[next.op as usize], next))
}

macro_rules! chained_routines {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            fn $name(cpu: &mut Cpu, d: &Decoded) -> Option<(Chain, Decoded)> {
                ROUTINES[Opcode::$op as usize](cpu, d);
                continue_chain(cpu, d)
            }
        )*
        const CHAIN: [Chain; OPCODE_COUNT] = [$(Chain($name)),*];
    };
}

chained_routines!(
    c_break => Break,
    c_nop => Nop,
    c_halt => Halt,
    c_push => Push,
    c_print => Print,
    c_jne => Jne,
    c_swap => Swap,
    c_dup => Dup,
    c_je => Je,
    c_inc => Inc,
    c_add => Add,
    c_sub => Sub,
    c_mul => Mul,
    c_rand => Rand,
    c_dec => Dec,
    c_drop => Drop,
    c_over => Over,
    c_mod => Mod,
    c_jump => Jump,
    c_and => And,
    c_or => Or,
    c_xor => Xor,
    c_shl => Shl,
    c_shr => Shr,
    c_rot => Rot,
    c_pick => Pick,
    c_div => Div,
    c_get => Get,
    c_set => Set,
    c_greater => Greater,
    c_sqrt => Sqrt,
);

pub struct Tailcalled;

impl Engine for Tailcalled {
    fn name(&self) -> &'static str {
        "tailcalled"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        if !cpu.running() || cpu.steps >= cpu.step_limit {
            return Ok(());
        }
        let first = fetch_decode(cpu);
        if !cpu.running() {
            return Ok(());
        }
        let mut link = Some((CHAIN[first.op as usize], first));
        while let Some((Chain(routine), d)) = link {
            link = routine(cpu, &d);
        }
        Ok(())
    }
}
