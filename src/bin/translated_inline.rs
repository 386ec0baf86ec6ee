use std::process::ExitCode;

use dispatch_lab::EngineKind;

fn main() -> ExitCode {
    dispatch_lab::harness::main_for(EngineKind::TranslatedInline)
}
