/*!
threaded.rs - Token-threaded dispatch, decoding on every step.

The classic formulation chains computed-goto labels: each service routine
ends by jumping straight to the next routine through a table of label
addresses. Rust has no computed goto, so the chain degrades to the
documented portable fallback: a table of routine handles and a loop that
does nothing but dispatch. The routines advance `pc`/`steps` themselves,
which is what distinguishes this engine from the subroutine-table one.
*/

use crate::cpu::{Cpu, CpuState, ROUTINES, ServiceFn};
use crate::engine::Engine;
use crate::error::Error;
use crate::isa::{Decoded, OPCODE_COUNT, Opcode, fetch_decode};

/// Advance past the instruction just executed; a routine that faulted left
/// `Break` behind and must not advance or count.
#[inline]
pub(crate) fn advance(cpu: &mut Cpu, d: &Decoded) {
    if cpu.state == CpuState::Break {
        return;
    }
    cpu.pc = cpu.pc.wrapping_add(d.length);
    cpu.steps += 1;
}

macro_rules! threaded_handlers {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            fn $name(cpu: &mut Cpu, d: &Decoded) {
                ROUTINES[Opcode::$op as usize](cpu, d);
                advance(cpu, d);
            }
        )*
        /// Dispatch handles in canonical opcode order.
        pub(crate) const HANDLERS: [ServiceFn; OPCODE_COUNT] = [$($name),*];
    };
}

threaded_handlers!(
    t_break => Break,
    t_nop => Nop,
    t_halt => Halt,
    t_push => Push,
    t_print => Print,
    t_jne => Jne,
    t_swap => Swap,
    t_dup => Dup,
    t_je => Je,
    t_inc => Inc,
    t_add => Add,
    t_sub => Sub,
    t_mul => Mul,
    t_rand => Rand,
    t_dec => Dec,
    t_drop => Drop,
    t_over => Over,
    t_mod => Mod,
    t_jump => Jump,
    t_and => And,
    t_or => Or,
    t_xor => Xor,
    t_shl => Shl,
    t_shr => Shr,
    t_rot => Rot,
    t_pick => Pick,
    t_div => Div,
    t_get => Get,
    t_set => Set,
    t_greater => Greater,
    t_sqrt => Sqrt,
);

pub struct Threaded;

impl Engine for Threaded {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn run(&self, cpu: &mut Cpu) -> Result<(), Error> {
        while cpu.running() && cpu.steps < cpu.step_limit {
            let d = fetch_decode(cpu);
            if !cpu.running() {
                break;
            }
            HANDLERS[d.op as usize](cpu, &d);
        }
        Ok(())
    }
}
