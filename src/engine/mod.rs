/*!
engine - The interchangeable execution engines.

Every engine realises the same contract: drive a `Cpu` until it stops
Running or exhausts its step budget, leaving identical architectural state
`(pc, sp, stack, state, steps)` for identical inputs. They differ only in
how instructions are decoded and how control reaches the semantic routines:

```text
switched.rs        - fetch/decode every step, one big tagged match.
predecoded.rs      - whole-program decode up front, then the same match.
subroutined.rs     - routines as first-class functions in an
                     opcode-indexed table; the loop calls through it.
tailcalled.rs      - each routine hands back the next routine; a
                     trampoline loops on the handle.
threaded.rs        - dispatch-only loop, routines advance themselves.
threaded_cached.rs - threaded plus a predecoded cache that stores the
                     dispatch handle inside each decoded instruction.
```

The binary-translation engines live in `crate::jit` and plug into the same
trait.
*/

pub mod predecoded;
pub mod subroutined;
pub mod switched;
pub mod tailcalled;
pub mod threaded;
pub mod threaded_cached;

#[cfg(test)]
mod tests;

use crate::cpu::Cpu;
use crate::error::Error;

/// One execution strategy.
pub trait Engine {
    fn name(&self) -> &'static str;

    /// Run `cpu` to termination (halt, break or step budget). Only the
    /// binary-translation engines can fail, and only during setup.
    fn run(&self, cpu: &mut Cpu) -> Result<(), Error>;
}

/// Selector for the engine an executable drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    Switched,
    Predecoded,
    Subroutined,
    Tailcalled,
    Threaded,
    ThreadedCached,
    Translated,
    TranslatedInline,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Switched => "switched",
            EngineKind::Predecoded => "predecoded",
            EngineKind::Subroutined => "subroutined",
            EngineKind::Tailcalled => "tailcalled",
            EngineKind::Threaded => "threaded",
            EngineKind::ThreadedCached => "threaded-cached",
            EngineKind::Translated => "translated",
            EngineKind::TranslatedInline => "translated-inline",
        }
    }

    /// Instantiate the engine. The binary-translation engines exist only on
    /// x86-64 unix hosts with the `jit` feature; elsewhere this is a
    /// startup error.
    pub fn build(self) -> Result<Box<dyn Engine>, Error> {
        match self {
            EngineKind::Switched => Ok(Box::new(switched::Switched)),
            EngineKind::Predecoded => Ok(Box::new(predecoded::Predecoded)),
            EngineKind::Subroutined => Ok(Box::new(subroutined::Subroutined)),
            EngineKind::Tailcalled => Ok(Box::new(tailcalled::Tailcalled)),
            EngineKind::Threaded => Ok(Box::new(threaded::Threaded)),
            EngineKind::ThreadedCached => Ok(Box::new(threaded_cached::ThreadedCached)),
            EngineKind::Translated => {
                #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
                {
                    Ok(Box::new(crate::jit::call_threaded::Translated))
                }
                #[cfg(not(all(feature = "jit", unix, target_arch = "x86_64")))]
                {
                    Err(Error::Unsupported(self))
                }
            }
            EngineKind::TranslatedInline => {
                #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
                {
                    Ok(Box::new(crate::jit::inline::TranslatedInline))
                }
                #[cfg(not(all(feature = "jit", unix, target_arch = "x86_64")))]
                {
                    Err(Error::Unsupported(self))
                }
            }
        }
    }
}
