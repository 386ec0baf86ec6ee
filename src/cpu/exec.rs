/*!
exec.rs - Engine-independent semantic routines, one per opcode.

Every engine funnels instruction effects through these routines, either via
the tagged match in `execute` (switched/predecoded engines) or via the
`ROUTINES` table (subroutine, tail-call and threaded engines). A routine
mutates CPU state only; advancing `pc` past the instruction and counting the
step is the caller's job, so that a routine that faults leaves `pc` and
`steps` exactly as they were.

Operand order convention, fixed by the guest programs: for two-operand
opcodes the first pop is the first operand (`Sub` pushes first-popped minus
second-popped; `Shl`/`Shr` shift the second pop by the first).
*/

use crate::cpu::{Cpu, CpuState};
use crate::isa::{Decoded, OPCODE_COUNT, Opcode};

/// Signature shared by all semantic routines; also the dispatch-handle type
/// cached inside `Decoded` by the threaded-cached engine.
pub type ServiceFn = fn(&mut Cpu, &Decoded);

/// Routine table in canonical opcode order. `ROUTINES[op as usize]` is the
/// semantic routine for `op`.
pub const ROUTINES: [ServiceFn; OPCODE_COUNT] = [
    op_break, op_nop, op_halt, op_push, op_print, op_jne, op_swap, op_dup,
    op_je, op_inc, op_add, op_sub, op_mul, op_rand, op_dec, op_drop, op_over,
    op_mod, op_jump, op_and, op_or, op_xor, op_shl, op_shr, op_rot, op_pick,
    op_div, op_get, op_set, op_greater, op_sqrt,
];

/// Execute one decoded instruction via a tagged match.
pub fn execute(cpu: &mut Cpu, d: &Decoded) {
    match d.op {
        Opcode::Break => op_break(cpu, d),
        Opcode::Nop => op_nop(cpu, d),
        Opcode::Halt => op_halt(cpu, d),
        Opcode::Push => op_push(cpu, d),
        Opcode::Print => op_print(cpu, d),
        Opcode::Jne => op_jne(cpu, d),
        Opcode::Swap => op_swap(cpu, d),
        Opcode::Dup => op_dup(cpu, d),
        Opcode::Je => op_je(cpu, d),
        Opcode::Inc => op_inc(cpu, d),
        Opcode::Add => op_add(cpu, d),
        Opcode::Sub => op_sub(cpu, d),
        Opcode::Mul => op_mul(cpu, d),
        Opcode::Rand => op_rand(cpu, d),
        Opcode::Dec => op_dec(cpu, d),
        Opcode::Drop => op_drop(cpu, d),
        Opcode::Over => op_over(cpu, d),
        Opcode::Mod => op_mod(cpu, d),
        Opcode::Jump => op_jump(cpu, d),
        Opcode::And => op_and(cpu, d),
        Opcode::Or => op_or(cpu, d),
        Opcode::Xor => op_xor(cpu, d),
        Opcode::Shl => op_shl(cpu, d),
        Opcode::Shr => op_shr(cpu, d),
        Opcode::Rot => op_rot(cpu, d),
        Opcode::Pick => op_pick(cpu, d),
        Opcode::Div => op_div(cpu, d),
        Opcode::Get => op_get(cpu, d),
        Opcode::Set => op_set(cpu, d),
        Opcode::Greater => op_greater(cpu, d),
        Opcode::Sqrt => op_sqrt(cpu, d),
    }
}

/// Integer square root (floor).
pub fn isqrt(v: u32) -> u32 {
    if v < 2 {
        return v;
    }
    // Float estimate, then fix up the unit of rounding error.
    let mut x = (v as f64).sqrt() as u32;
    while (x as u64 + 1) * (x as u64 + 1) <= v as u64 {
        x += 1;
    }
    while (x as u64) * (x as u64) > v as u64 {
        x -= 1;
    }
    x
}

#[inline]
fn binop(cpu: &mut Cpu, f: fn(u32, u32) -> u32) {
    let a = cpu.pop();
    let b = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(f(a, b));
}

fn op_nop(_cpu: &mut Cpu, _d: &Decoded) {}

fn op_halt(cpu: &mut Cpu, _d: &Decoded) {
    cpu.state = CpuState::Halted;
}

fn op_break(cpu: &mut Cpu, _d: &Decoded) {
    cpu.state = CpuState::Break;
}

fn op_push(cpu: &mut Cpu, d: &Decoded) {
    cpu.push(d.immediate as u32);
}

fn op_print(cpu: &mut Cpu, _d: &Decoded) {
    let v = cpu.pop();
    if !cpu.running() {
        return;
    }
    println!("[{}]", v as i32);
}

fn op_swap(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    let b = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(a);
    cpu.push(b);
}

fn op_dup(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(a);
    cpu.push(a);
}

fn op_drop(cpu: &mut Cpu, _d: &Decoded) {
    let _ = cpu.pop();
}

fn op_over(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    let b = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(b);
    cpu.push(a);
    cpu.push(b);
}

/// `... a b c -> ... b c a`
fn op_rot(cpu: &mut Cpu, _d: &Decoded) {
    let c = cpu.pop();
    let b = cpu.pop();
    let a = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(b);
    cpu.push(c);
    cpu.push(a);
}

/// Pop n, push a copy of the element n slots below the new top.
fn op_pick(cpu: &mut Cpu, _d: &Decoded) {
    let n = cpu.pop();
    if !cpu.running() {
        return;
    }
    let idx = cpu.sp.wrapping_sub(n as i32);
    if idx < 0 || idx > cpu.sp {
        log::debug!("pick depth {n} out of range at pc {:#x}", cpu.pc);
        cpu.state = CpuState::Break;
        return;
    }
    let v = cpu.stack[idx as usize];
    cpu.push(v);
}

fn op_inc(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(a.wrapping_add(1));
}

fn op_dec(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(a.wrapping_sub(1));
}

fn op_add(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, u32::wrapping_add);
}

fn op_sub(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, u32::wrapping_sub);
}

fn op_mul(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, u32::wrapping_mul);
}

fn op_mod(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    let b = cpu.pop();
    if !cpu.running() {
        return;
    }
    if b == 0 {
        log::debug!("modulo by zero at pc {:#x}", cpu.pc);
        cpu.state = CpuState::Break;
        return;
    }
    cpu.push(a % b);
}

fn op_div(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    let b = cpu.pop();
    if !cpu.running() {
        return;
    }
    if b == 0 {
        log::debug!("division by zero at pc {:#x}", cpu.pc);
        cpu.state = CpuState::Break;
        return;
    }
    cpu.push(a / b);
}

fn op_and(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, |a, b| a & b);
}

fn op_or(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, |a, b| a | b);
}

fn op_xor(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, |a, b| a ^ b);
}

fn op_shl(cpu: &mut Cpu, _d: &Decoded) {
    // First pop is the shift amount (masked to 5 bits), second the value.
    binop(cpu, |a, b| b.wrapping_shl(a));
}

fn op_shr(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, |a, b| b.wrapping_shr(a));
}

fn op_greater(cpu: &mut Cpu, _d: &Decoded) {
    binop(cpu, |a, b| (a > b) as u32);
}

fn op_sqrt(cpu: &mut Cpu, _d: &Decoded) {
    let a = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.push(isqrt(a));
}

fn op_rand(cpu: &mut Cpu, _d: &Decoded) {
    cpu.push(rand::random::<u32>());
}

fn op_get(cpu: &mut Cpu, _d: &Decoded) {
    let i = cpu.pop() as i32;
    if !cpu.running() {
        return;
    }
    let v = cpu.get_stack(i);
    if !cpu.running() {
        return;
    }
    cpu.push(v);
}

fn op_set(cpu: &mut Cpu, _d: &Decoded) {
    let i = cpu.pop() as i32;
    let v = cpu.pop();
    if !cpu.running() {
        return;
    }
    cpu.set_stack(i, v);
}

fn op_je(cpu: &mut Cpu, d: &Decoded) {
    let v = cpu.pop();
    if !cpu.running() {
        return;
    }
    if v == 0 {
        cpu.pc = cpu.pc.wrapping_add(d.immediate as u32);
    }
}

fn op_jne(cpu: &mut Cpu, d: &Decoded) {
    let v = cpu.pop();
    if !cpu.running() {
        return;
    }
    if v != 0 {
        cpu.pc = cpu.pc.wrapping_add(d.immediate as u32);
    }
}

fn op_jump(cpu: &mut Cpu, d: &Decoded) {
    cpu.pc = cpu.pc.wrapping_add(d.immediate as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramMemory;

    fn cpu_with(stack: &[u32]) -> Cpu {
        let mut c = Cpu::new(ProgramMemory::from_words(&[]), i64::MAX);
        for &v in stack {
            c.push(v);
        }
        c
    }

    fn none() -> Decoded {
        Decoded::inherent(Opcode::Nop)
    }

    #[test]
    fn sub_order_is_first_popped_minus_second() {
        let mut c = cpu_with(&[10, 3]);
        op_sub(&mut c, &none());
        // tmp1 = 3 (top), tmp2 = 10 -> 3 - 10
        assert_eq!(c.stack_slice(), &[3u32.wrapping_sub(10)]);
    }

    #[test]
    fn rot_moves_third_element_to_top() {
        let mut c = cpu_with(&[1, 5, 8]);
        op_rot(&mut c, &none());
        assert_eq!(c.stack_slice(), &[5, 8, 1]);
    }

    #[test]
    fn over_copies_element_below_top() {
        let mut c = cpu_with(&[1, 2]);
        op_over(&mut c, &none());
        assert_eq!(c.stack_slice(), &[1, 2, 1]);
    }

    #[test]
    fn shifts_use_top_as_amount() {
        let mut c = cpu_with(&[1, 3]);
        op_shl(&mut c, &none());
        assert_eq!(c.stack_slice(), &[8]);

        let mut c = cpu_with(&[1, 3]);
        op_shr(&mut c, &none());
        assert_eq!(c.stack_slice(), &[0]);

        // Amount masked to 5 bits: 1 << 33 == 1 << 1.
        let mut c = cpu_with(&[1, 33]);
        op_shl(&mut c, &none());
        assert_eq!(c.stack_slice(), &[2]);
    }

    #[test]
    fn greater_is_unsigned() {
        let mut c = cpu_with(&[1, 0xffff_ffff]);
        op_greater(&mut c, &none());
        assert_eq!(c.stack_slice(), &[1]);
    }

    #[test]
    fn pick_reaches_down_the_stack() {
        let mut c = cpu_with(&[10, 20, 30, 2]);
        op_pick(&mut c, &none());
        assert_eq!(c.stack_slice(), &[10, 20, 30, 10]);

        let mut c = cpu_with(&[10, 5]);
        op_pick(&mut c, &none());
        assert_eq!(c.state, CpuState::Break);
    }

    #[test]
    fn division_by_zero_faults() {
        let mut c = cpu_with(&[0, 9]);
        op_div(&mut c, &none());
        assert_eq!(c.state, CpuState::Break);

        let mut c = cpu_with(&[0, 9]);
        op_mod(&mut c, &none());
        assert_eq!(c.state, CpuState::Break);
    }

    #[test]
    fn get_and_set_address_absolute_slots() {
        let mut c = cpu_with(&[11, 22, 0]);
        op_get(&mut c, &none());
        assert_eq!(c.stack_slice(), &[11, 22, 11]);

        // set: pop index 0, pop value 99, store at slot 0.
        let mut c = cpu_with(&[11, 22, 99, 0]);
        op_set(&mut c, &none());
        assert_eq!(c.stack_slice(), &[99, 22]);
    }

    #[test]
    fn isqrt_is_exact_at_square_boundaries() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
        assert_eq!(isqrt(u32::MAX), 65535);
    }

    #[test]
    fn branch_adjusts_pc_only_when_taken() {
        let mut c = cpu_with(&[0]);
        c.pc = 10;
        op_je(&mut c, &Decoded::with_immediate(Opcode::Je, 5));
        assert_eq!(c.pc, 15);

        let mut c = cpu_with(&[1]);
        c.pc = 10;
        op_je(&mut c, &Decoded::with_immediate(Opcode::Je, 5));
        assert_eq!(c.pc, 10);

        let mut c = cpu_with(&[1]);
        c.pc = 10;
        op_jne(&mut c, &Decoded::with_immediate(Opcode::Jne, -4));
        assert_eq!(c.pc, 6);
    }

    #[test]
    fn routine_table_matches_tagged_match() {
        // Same opcode through both dispatch paths must agree.
        for op in [Opcode::Add, Opcode::Swap, Opcode::Greater] {
            let d = Decoded::inherent(op);
            let mut via_match = cpu_with(&[6, 3]);
            execute(&mut via_match, &d);
            let mut via_table = cpu_with(&[6, 3]);
            ROUTINES[op as usize](&mut via_table, &d);
            assert_eq!(via_match.snapshot(), via_table.snapshot());
        }
    }
}
