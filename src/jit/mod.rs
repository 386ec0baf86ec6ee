/*!
jit - Shared substrate for the two binary-translation engines.

```text
code_buf.rs      - Executable code buffer (mmap RWX, 0xCC-filled).
call_threaded.rs - "translated": mov-imm + call stubs per instruction.
inline.rs        - "translated-inline": opcode bodies emitted inline.
```

Host binding
============
x86-64 SysV only. The textbook approach reserves a host register for the
CPU pointer and leaves generated code with longjmp; neither mechanism
exists in Rust, so:

- the CPU pointer lives in a process-global slot (`CpuBinding`) that the
  service routines read, and the inline engine additionally keeps it in rbx
  for the duration of a burst of generated code;
- generated code is entered through a small call thunk emitted at the start
  of the buffer, and every exit site is a plain `ret` that lands back in the
  thunk. The harness loop then re-checks `pc`/state/steps and re-enters.

Service routines return a continue flag: 1 to fall through to the next
stub, 0 to leave generated code (fault, halt, break, exhausted step budget
or a taken branch).

The routines address `Cpu` fields by constant offset; `offsets` pins the
`#[repr(C)]` layout at compile time.
*/

pub mod call_threaded;
pub mod code_buf;
pub mod inline;

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::cpu::{Cpu, CpuState, ROUTINES, isqrt};
use crate::isa::{Decoded, OPCODE_COUNT, Opcode};

/// Field offsets baked into generated code. All must stay within disp8
/// range of a base register.
pub(crate) mod offsets {
    use crate::cpu::Cpu;

    pub const PC: u8 = 0;
    pub const SP: u8 = 4;
    pub const STATE: u8 = 8;
    pub const STEPS: u8 = 16;
    pub const STEP_LIMIT: u8 = 24;
    pub const STACK: u8 = 32;

    const _: () = {
        assert!(std::mem::offset_of!(Cpu, pc) == PC as usize);
        assert!(std::mem::offset_of!(Cpu, sp) == SP as usize);
        assert!(std::mem::offset_of!(Cpu, state) == STATE as usize);
        assert!(std::mem::offset_of!(Cpu, steps) == STEPS as usize);
        assert!(std::mem::offset_of!(Cpu, step_limit) == STEP_LIMIT as usize);
        assert!(std::mem::offset_of!(Cpu, stack) == STACK as usize);
    };
}

/// Numeric `CpuState` values stored by generated code.
pub(crate) const STATE_HALTED: u32 = CpuState::Halted as u32;
pub(crate) const STATE_BREAK: u32 = CpuState::Break as u32;

static CPU_SLOT: AtomicPtr<Cpu> = AtomicPtr::new(ptr::null_mut());

/// Binds the CPU pointer for the service routines; unbinds on drop so a
/// stale pointer can never outlive the run.
pub(crate) struct CpuBinding;

impl CpuBinding {
    pub(crate) fn bind(cpu: &mut Cpu) -> CpuBinding {
        CPU_SLOT.store(cpu, Ordering::Release);
        CpuBinding
    }
}

impl Drop for CpuBinding {
    fn drop(&mut self) {
        CPU_SLOT.store(ptr::null_mut(), Ordering::Release);
    }
}

/// # Safety
/// Callable only between `CpuBinding::bind` and its drop, from the single
/// simulation thread.
#[inline]
unsafe fn bound_cpu<'a>() -> &'a mut Cpu {
    unsafe { &mut *CPU_SLOT.load(Ordering::Acquire) }
}

/// Advance past a completed instruction and report whether generated code
/// may fall through to the next stub. Running off the end of program
/// memory must leave generated code too: the next buffer bytes are trap
/// fill, and the harness turns the out-of-range pc into a fetch fault.
fn seal(cpu: &mut Cpu, len: u32) -> u32 {
    cpu.pc = cpu.pc.wrapping_add(len);
    cpu.steps += 1;
    let stop = !cpu.running()
        || cpu.steps >= cpu.step_limit
        || cpu.pc as usize >= crate::program::PROGRAM_SIZE;
    if stop { 0 } else { 1 }
}

/// Post-routine bookkeeping: a fault leaves `pc`/`steps` untouched, a
/// completed instruction (Halt included) advances and counts.
fn finish(cpu: &mut Cpu, len: u32) -> u32 {
    if cpu.state == CpuState::Break {
        return 0;
    }
    seal(cpu, len)
}

/// Stub signature: every service routine takes the (possibly unused)
/// immediate in the first argument register and returns the continue flag.
pub(crate) type ServiceStub = unsafe extern "C" fn(i32) -> u32;

unsafe fn exec_stub(op: Opcode) -> u32 {
    let cpu = unsafe { bound_cpu() };
    let d = Decoded::inherent(op);
    ROUTINES[op as usize](cpu, &d);
    finish(cpu, 1)
}

unsafe fn branch_stub(imm: i32, taken: fn(u32) -> bool) -> u32 {
    let cpu = unsafe { bound_cpu() };
    let v = cpu.pop();
    if !cpu.running() {
        return 0;
    }
    let hit = taken(v);
    if hit {
        cpu.pc = cpu.pc.wrapping_add(imm as u32);
    }
    let cont = finish(cpu, 2);
    // A taken branch is a non-sequential pc change: leave generated code
    // and let the harness re-enter at the target.
    if hit { 0 } else { cont }
}

macro_rules! inherent_stubs {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            unsafe extern "C" fn $name(_imm: i32) -> u32 {
                unsafe { exec_stub(Opcode::$op) }
            }
        )*
    };
}

inherent_stubs!(
    sr_break => Break,
    sr_nop => Nop,
    sr_halt => Halt,
    sr_print => Print,
    sr_swap => Swap,
    sr_dup => Dup,
    sr_inc => Inc,
    sr_add => Add,
    sr_sub => Sub,
    sr_mul => Mul,
    sr_rand => Rand,
    sr_dec => Dec,
    sr_drop => Drop,
    sr_over => Over,
    sr_mod => Mod,
    sr_and => And,
    sr_or => Or,
    sr_xor => Xor,
    sr_shl => Shl,
    sr_shr => Shr,
    sr_rot => Rot,
    sr_pick => Pick,
    sr_div => Div,
    sr_get => Get,
    sr_set => Set,
    sr_greater => Greater,
    sr_sqrt => Sqrt,
);

unsafe extern "C" fn sr_push(imm: i32) -> u32 {
    let cpu = unsafe { bound_cpu() };
    cpu.push(imm as u32);
    finish(cpu, 2)
}

unsafe extern "C" fn sr_je(imm: i32) -> u32 {
    unsafe { branch_stub(imm, |v| v == 0) }
}

unsafe extern "C" fn sr_jne(imm: i32) -> u32 {
    unsafe { branch_stub(imm, |v| v != 0) }
}

unsafe extern "C" fn sr_jump(imm: i32) -> u32 {
    let cpu = unsafe { bound_cpu() };
    cpu.pc = cpu.pc.wrapping_add(imm as u32);
    seal(cpu, 2);
    0
}

/// Service routines in canonical opcode order; the call-threaded translator
/// emits direct calls into this table.
pub(crate) const SERVICE_STUBS: [ServiceStub; OPCODE_COUNT] = [
    sr_break, sr_nop, sr_halt, sr_push, sr_print, sr_jne, sr_swap, sr_dup,
    sr_je, sr_inc, sr_add, sr_sub, sr_mul, sr_rand, sr_dec, sr_drop, sr_over,
    sr_mod, sr_jump, sr_and, sr_or, sr_xor, sr_shl, sr_shr, sr_rot, sr_pick,
    sr_div, sr_get, sr_set, sr_greater, sr_sqrt,
];

/// Host helpers the inline engine calls out to for effects that are not
/// worth inlining as machine code.
pub(crate) extern "C" fn jit_print(v: u32) {
    println!("[{}]", v as i32);
}

pub(crate) extern "C" fn jit_rand() -> u32 {
    rand::random::<u32>()
}

pub(crate) extern "C" fn jit_isqrt(v: u32) -> u32 {
    isqrt(v)
}

/// Signature of the entry thunk emitted at the start of every code buffer.
pub(crate) type EnterFn = unsafe extern "C" fn(*mut Cpu, *const u8);

/// Entry thunk: saves rbx/rbp, binds rbx to the CPU pointer and calls into
/// the translated stream. Stream code runs with rsp 16-aligned, so helper
/// calls land on a conforming stack, and leaves by returning here.
///
/// ```text
/// push rbx
/// push rbp
/// mov  rbx, rdi
/// call rsi
/// pop  rbp
/// pop  rbx
/// ret
/// ```
pub(crate) const ENTER_THUNK: [u8; 10] =
    [0x53, 0x55, 0x48, 0x89, 0xfb, 0xff, 0xd6, 0x5d, 0x5b, 0xc3];

/// Bail-out stub installed at every address that is not an instruction
/// start: set Break and leave.
///
/// ```text
/// mov dword ptr [rbx + STATE], Cpu_Break
/// ret
/// ```
pub(crate) const BAIL_STUB: [u8; 8] = [
    0xc7,
    0x43,
    offsets::STATE,
    STATE_BREAK as u8,
    0x00,
    0x00,
    0x00,
    0xc3,
];
