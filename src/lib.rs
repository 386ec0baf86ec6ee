#![doc = r#"
Dispatch laboratory library crate.

One fixed stack virtual machine, many execution engines. The crate exposes
the VM core and the interchangeable dispatch strategies for use by the
per-engine binaries and the tests.

Modules:
- isa: opcode enumeration, instruction classification and the decoder
- cpu: simulated CPU state, stack primitives and the shared opcode semantics
- program: guest program memory, image loader/writer and built-in programs
- engine: the portable execution engines (switch, predecode, subroutine
  table, tail-call chain, threaded, threaded+cache)
- jit: the binary-translation engines (x86-64/unix, `jit` feature)
- harness: command-line front end shared by every engine executable

In tests, shared engine rosters and program runners are available under
`crate::test_utils`.
"#]

// VM core modules
pub mod cpu;
pub mod engine;
pub mod error;
pub mod harness;
pub mod isa;
pub mod program;

#[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
pub mod jit;

// Re-export commonly used types at the crate root for convenience.
pub use cpu::{Cpu, CpuState};
pub use engine::{Engine, EngineKind};
pub use isa::{Decoded, Opcode};
pub use program::ProgramMemory;

// Shared test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;
