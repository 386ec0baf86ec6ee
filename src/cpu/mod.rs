/*!
cpu - Simulated processor state and the shared per-opcode semantics.

```text
state.rs - CPU state (pc, sp, stack, execution status) + stack primitives.
exec.rs  - Engine-independent semantic routines, one per opcode.
```

Every engine owns one `Cpu` for the duration of a run and drives it through
the routines in `exec`; the engines differ only in how they decode and
dispatch, never in what an opcode does.
*/

mod exec;
mod state;

pub use exec::{ROUTINES, ServiceFn, execute, isqrt};
pub use state::{Cpu, CpuState, STACK_CAPACITY};
