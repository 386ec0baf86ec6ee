//! Cross-engine equivalence and fault-locality suite.
//!
//! Every engine must leave identical architectural state for identical
//! inputs. The switched engine is the reference; each scenario runs all
//! available engines (binary-translation included where supported) and
//! compares snapshots against it.

use crate::cpu::CpuState;
use crate::isa::Opcode;
use crate::program::PROGRAM_SIZE;
use crate::test_utils::{all_engines, run_engine};

const PUSH: u32 = Opcode::Push as u32;
const PRINT: u32 = Opcode::Print as u32;
const HALT: u32 = Opcode::Halt as u32;
const JE: u32 = Opcode::Je as u32;
const JNE: u32 = Opcode::Jne as u32;
const JUMP: u32 = Opcode::Jump as u32;

fn assert_engines_agree(words: &[u32], step_limit: i64) {
    let engines = all_engines();
    let reference = run_engine(engines[0].as_ref(), words, step_limit);
    for engine in &engines[1..] {
        let cpu = run_engine(engine.as_ref(), words, step_limit);
        assert_eq!(
            cpu.snapshot(),
            reference.snapshot(),
            "{} disagrees with {}",
            engine.name(),
            engines[0].name()
        );
    }
}

#[test]
fn smoke() {
    let words = [PUSH, 7, PRINT, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Halted, "{}", engine.name());
        assert_eq!(cpu.steps, 3);
        assert_eq!(cpu.pc, 4);
        assert_eq!(cpu.sp, -1);
    }
}

#[test]
fn rot_fixture() {
    let words = [PUSH, 1, PUSH, 5, PUSH, 8, Opcode::Rot as u32, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Halted, "{}", engine.name());
        assert_eq!(cpu.stack_slice(), &[5, 8, 1], "{}", engine.name());
    }
}

#[test]
fn bitwise_fixture() {
    let words = [
        PUSH, 1, PUSH, 2, Opcode::Xor as u32, PRINT,
        PUSH, 1, PUSH, 2, Opcode::Or as u32, PRINT,
        PUSH, 1, PUSH, 2, Opcode::And as u32, PRINT,
        HALT,
    ];
    assert_engines_agree(&words, 1000);
    let cpu = run_engine(all_engines()[0].as_ref(), &words, 1000);
    assert_eq!(cpu.state, CpuState::Halted);
    assert_eq!(cpu.sp, -1);
}

#[test]
fn shift_fixture() {
    let words = [
        PUSH, 1, PUSH, 3, Opcode::Shl as u32, PRINT,
        PUSH, 1, PUSH, 3, Opcode::Shr as u32, PRINT,
        HALT,
    ];
    assert_engines_agree(&words, 1000);
}

#[test]
fn stack_ops_and_arithmetic_mix() {
    let words = [
        PUSH, 9, PUSH, 4,
        Opcode::Over as u32,   // 9 4 9
        Opcode::Dup as u32,    // 9 4 9 9
        Opcode::Add as u32,    // 9 4 18
        Opcode::Sub as u32,    // 9 14
        Opcode::Swap as u32,   // 14 9
        Opcode::Greater as u32,
        Opcode::Sqrt as u32,
        HALT,
    ];
    assert_engines_agree(&words, 1000);
}

#[test]
fn pick_get_set_round() {
    let words = [
        PUSH, 10, PUSH, 20, PUSH, 30,
        PUSH, 2, Opcode::Pick as u32, // copies slot sp-2
        PUSH, 0, Opcode::Get as u32,  // reads slot 0
        PUSH, 1, PUSH, 1, Opcode::Set as u32, // stores 1 at slot 1
        HALT,
    ];
    assert_engines_agree(&words, 1000);
}

#[test]
fn division_fixture() {
    let words = [
        PUSH, 3, PUSH, 17, Opcode::Div as u32, // 17 / 3
        PUSH, 5, PUSH, 17, Opcode::Mod as u32, // 17 % 5
        Opcode::Mul as u32,
        HALT,
    ];
    assert_engines_agree(&words, 1000);
}

#[test]
fn factorial_prints_and_leaves_empty_stack() {
    let pmem = crate::program::factorial();
    assert_engines_agree(pmem.words(), 100_000);
    for engine in all_engines() {
        let mut cpu = crate::cpu::Cpu::new(pmem.clone(), 100_000);
        engine.run(&mut cpu).expect("run");
        assert_eq!(cpu.state, CpuState::Halted, "{}", engine.name());
        assert_eq!(cpu.sp, -1, "{}", engine.name());
    }
}

#[test]
fn primes_prefix_under_step_limit() {
    // Cut the default program early; all engines must stop on the exact
    // same step with the same partial state.
    let pmem = crate::program::primes();
    for limit in [0, 1, 17, 1000, 4999] {
        let engines = all_engines();
        let reference = run_engine(engines[0].as_ref(), pmem.words(), limit);
        assert!(reference.steps <= limit);
        for engine in &engines[1..] {
            let cpu = run_engine(engine.as_ref(), pmem.words(), limit);
            assert_eq!(
                cpu.snapshot(),
                reference.snapshot(),
                "{} at limit {limit}",
                engine.name()
            );
        }
    }
}

#[test]
fn jump_lands_on_first_word_of_target() {
    // Jump +1 from address 0 lands on address 3 (immediate, then the
    // normal length-2 advance).
    let words = [JUMP, 1, Opcode::Break as u32, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Halted, "{}", engine.name());
        assert_eq!(cpu.pc, 4);
        assert_eq!(cpu.steps, 2);
    }
}

#[test]
fn branches_taken_and_not_taken() {
    // JE falls through on non-zero, JNE branches on non-zero.
    let words = [PUSH, 1, JE, 100, PUSH, 0, JE, 2, HALT, HALT, HALT];
    assert_engines_agree(&words, 1000);
    let words = [PUSH, 1, JNE, 1, HALT, PUSH, 1, HALT];
    assert_engines_agree(&words, 1000);
}

#[test]
fn backward_branch_loops() {
    // Counts 5 down to 0, then halts.
    let words = [
        PUSH, 5,
        // back:
        Opcode::Dec as u32,
        Opcode::Dup as u32,
        JNE, (-4i32) as u32,
        HALT,
    ];
    assert_engines_agree(&words, 1000);
}

#[test]
fn step_limit_cut_leaves_running() {
    let words = [JUMP, (-2i32) as u32];
    assert_engines_agree(&words, 100);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 100);
        assert_eq!(cpu.state, CpuState::Running, "{}", engine.name());
        assert_eq!(cpu.steps, 100);
    }
}

#[test]
fn fault_stack_underflow() {
    // The second Print pops an empty stack: two completed steps, then
    // Break at the faulting instruction with pc unmoved.
    let words = [PUSH, 1, PRINT, PRINT, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        assert_eq!(cpu.steps, 2, "{}", engine.name());
        assert_eq!(cpu.pc, 3, "{}", engine.name());
    }
}

#[test]
fn fault_stack_overflow() {
    let mut words = Vec::new();
    for i in 0..33 {
        words.extend_from_slice(&[PUSH, i]);
    }
    words.push(HALT);
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        assert_eq!(cpu.steps, 32, "{}", engine.name());
        assert_eq!(cpu.sp, 31);
    }
}

#[test]
fn fault_division_by_zero() {
    let words = [PUSH, 0, PUSH, 7, Opcode::Mod as u32, HALT];
    assert_engines_agree(&words, 1000);
    let words = [PUSH, 0, PUSH, 7, Opcode::Div as u32, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        assert_eq!(cpu.steps, 2);
        assert_eq!(cpu.pc, 4);
    }
}

#[test]
fn fault_bad_absolute_index() {
    let words = [PUSH, 40, Opcode::Get as u32, HALT];
    assert_engines_agree(&words, 1000);
    let words = [PUSH, 7, PUSH, 40, Opcode::Set as u32, HALT];
    assert_engines_agree(&words, 1000);
}

#[test]
fn fault_unknown_opcode() {
    let words = [0xff, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        assert_eq!(cpu.steps, 0);
        assert_eq!(cpu.pc, 0);
    }
}

#[test]
fn fault_jump_out_of_bounds() {
    let far = PROGRAM_SIZE as u32 * 2;
    let words = [JUMP, far, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        // The jump itself completed; the fetch after it faulted.
        assert_eq!(cpu.steps, 1, "{}", engine.name());
        assert_eq!(cpu.pc, far + 2);
    }
}

#[test]
fn fault_truncated_immediate_at_end_of_memory() {
    let mut words = vec![Opcode::Nop as u32; PROGRAM_SIZE];
    words[0] = JUMP;
    words[1] = (PROGRAM_SIZE as u32) - 3; // lands on the last word
    words[PROGRAM_SIZE - 1] = PUSH; // immediate would be out of range
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        assert_eq!(cpu.steps, 1, "{}", engine.name());
        assert_eq!(cpu.pc, PROGRAM_SIZE as u32 - 1);
    }
}

#[test]
fn explicit_break_is_not_counted() {
    let words = [Opcode::Nop as u32, Opcode::Break as u32, HALT];
    assert_engines_agree(&words, 1000);
    for engine in all_engines() {
        let cpu = run_engine(engine.as_ref(), &words, 1000);
        assert_eq!(cpu.state, CpuState::Break, "{}", engine.name());
        assert_eq!(cpu.steps, 1, "{}", engine.name());
        assert_eq!(cpu.pc, 1, "{}", engine.name());
    }
}

#[test]
fn legacy_smoke_program_halts() {
    // Contains Rand, so only termination state is comparable.
    let pmem = crate::program::legacy_smoke();
    for engine in all_engines() {
        let mut cpu = crate::cpu::Cpu::new(pmem.clone(), 10_000);
        engine.run(&mut cpu).expect("run");
        assert_eq!(cpu.state, CpuState::Halted, "{}", engine.name());
    }
}
