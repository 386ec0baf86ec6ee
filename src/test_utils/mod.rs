/*!
Shared test helpers: engine rosters and a one-call runner for small guest
programs. Only compiled for tests.
*/

use crate::cpu::Cpu;
use crate::engine::{Engine, EngineKind};
use crate::program::ProgramMemory;

/// Run `engine` over a program given as raw words, with a step budget.
pub fn run_engine(engine: &dyn Engine, words: &[u32], step_limit: i64) -> Cpu {
    let mut cpu = Cpu::new(ProgramMemory::from_words(words), step_limit);
    engine
        .run(&mut cpu)
        .unwrap_or_else(|e| panic!("{} failed: {e}", engine.name()));
    cpu
}

/// The engines that exist on every host.
pub fn portable_engines() -> Vec<Box<dyn Engine>> {
    [
        EngineKind::Switched,
        EngineKind::Predecoded,
        EngineKind::Subroutined,
        EngineKind::Tailcalled,
        EngineKind::Threaded,
        EngineKind::ThreadedCached,
    ]
    .into_iter()
    .map(|k| k.build().expect("portable engine"))
    .collect()
}

/// Every engine available on this host, binary-translation included.
pub fn all_engines() -> Vec<Box<dyn Engine>> {
    let mut engines = portable_engines();
    #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
    {
        engines.push(EngineKind::Translated.build().expect("translated"));
        engines.push(
            EngineKind::TranslatedInline
                .build()
                .expect("translated-inline"),
        );
    }
    engines
}
