/*!
harness.rs - Shared runtime harness behind every engine executable.

Each binary is a thin wrapper that names its engine and delegates here:
parse the command line, load the optional program image (default: the
Primes program), drive the engine to termination and print the report.

Exit status contract:
    0 - Halted, or Running because the step budget ran out
    1 - Break (any guest fault)
    2 - command-line misuse or startup failure (bad image, JIT setup)
*/

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use crate::cpu::{Cpu, CpuState};
use crate::engine::EngineKind;
use crate::error::Error;
use crate::program::ProgramMemory;

#[derive(Parser, Debug)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Maximum number of guest instructions to execute.
    #[arg(
        long = "steplimit",
        value_name = "num",
        value_parser = clap::value_parser!(i64).range(0..)
    )]
    steplimit: Option<i64>,

    /// Binary program image: raw little-endian 32-bit words, no header.
    #[arg(long = "inp-prog", value_name = "str")]
    inp_prog: Option<PathBuf>,

    /// Print usage and exit.
    #[arg(long)]
    help: bool,
}

fn report_usage() {
    let exec = std::env::args()
        .next()
        .unwrap_or_else(|| "interpreter".to_string());
    eprintln!("Usage: {exec} --steplimit=<num> --inp-prog=<str>");
}

/// Entry point shared by all engine binaries.
pub fn main_for(kind: EngineKind) -> ExitCode {
    let _ = env_logger::try_init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(2);
        }
    };
    if cli.help {
        report_usage();
        return ExitCode::from(2);
    }
    match run(kind, &cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

fn run(kind: EngineKind, cli: &Cli) -> Result<u8, Error> {
    let pmem = match &cli.inp_prog {
        Some(path) => ProgramMemory::load_image(path)?,
        None => ProgramMemory::default(),
    };
    let step_limit = cli.steplimit.unwrap_or(i64::MAX);

    let engine = kind.build()?;
    let mut cpu = Cpu::new(pmem, step_limit);
    log::info!("running the {} engine, step limit {step_limit}", engine.name());
    engine.run(&mut cpu)?;

    debug_assert!(!cpu.running() || cpu.steps == step_limit);
    print_report(&cpu);
    Ok(exit_code(&cpu))
}

/// Fixed-format termination report.
pub fn print_report(cpu: &Cpu) {
    println!(
        "CPU executed {} steps. End state \"{}\".",
        cpu.steps,
        cpu.state.name()
    );
    println!("PC = {:#x}, SP = {}", cpu.pc, cpu.sp);
    print!("Stack: ");
    for i in (0..=cpu.sp).rev() {
        print!("{:#10x} ", cpu.stack[i as usize]);
    }
    println!("{}", if cpu.sp == -1 { "(empty)" } else { "" });
}

fn exit_code(cpu: &Cpu) -> u8 {
    let clean = cpu.state == CpuState::Halted
        || (cpu.state == CpuState::Running && cpu.steps == cpu.step_limit);
    if clean { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ProgramMemory;

    #[test]
    fn cli_accepts_equals_form() {
        let cli = Cli::try_parse_from(["x", "--steplimit=42"]).expect("parse");
        assert_eq!(cli.steplimit, Some(42));
        assert!(cli.inp_prog.is_none());
    }

    #[test]
    fn cli_rejects_negative_and_garbage_steplimits() {
        assert!(Cli::try_parse_from(["x", "--steplimit=-1"]).is_err());
        assert!(Cli::try_parse_from(["x", "--steplimit=banana"]).is_err());
    }

    #[test]
    fn cli_rejects_unknown_options() {
        assert!(Cli::try_parse_from(["x", "--frobnicate"]).is_err());
    }

    #[test]
    fn exit_codes_follow_end_state() {
        let mut cpu = Cpu::new(ProgramMemory::from_words(&[]), 10);
        cpu.state = CpuState::Halted;
        assert_eq!(exit_code(&cpu), 0);

        cpu.state = CpuState::Break;
        assert_eq!(exit_code(&cpu), 1);

        cpu.state = CpuState::Running;
        cpu.steps = 10;
        assert_eq!(exit_code(&cpu), 0);
    }
}
