use std::path::PathBuf;

use thiserror::Error;

/// Host-level failures: everything that aborts the run before or during
/// engine setup. Guest-level faults are not errors; they surface as the
/// `Break` CPU state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read program image {path}: {source}")]
    ImageRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write program image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("input program size exceeds allocated memory ({got} bytes, limit {limit})")]
    ImageTooLarge { got: usize, limit: usize },

    #[error("cannot map an executable code buffer: {0}")]
    CodeBufferMap(String),

    #[error("code buffer full while translating guest address {guest_pc:#x}")]
    CodeBufferFull { guest_pc: u32 },

    #[error("displacement to service routine for opcode {opcode:#x} does not fit in 32 bits")]
    Displacement { opcode: u32 },

    #[error("engine {0:?} is not supported on this host")]
    Unsupported(crate::engine::EngineKind),
}
