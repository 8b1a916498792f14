//! Command-line front end for the APEX pipeline simulator.
//!
//! Assembles an input file with `apex-asm` and drives an `apex_core::Machine`
//! in one of three modes (spec §6): run to HALT, a bounded cycle budget, or
//! interactive single-stepping. Argument parsing, verbosity, and styling
//! follow the teacher's `clap`-derived `Args` + `binutils::get_styles()` /
//! `logging_setup` conventions.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use apex_core::{CoreError, Machine};

/// APEX: a cycle-accurate simulator for the 5-stage in-order APEX pipeline.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = binutils::get_styles(),
)]
struct Args {
    /// Path to the assembly source file.
    input: String,

    #[command(subcommand)]
    mode: Option<Mode>,

    /// Enable the branch target buffer + 2-bit saturating predictor variant.
    #[arg(long)]
    btb: bool,

    /// Number of entries in the BTB, when enabled.
    #[arg(long, default_value_t = 4, requires = "btb")]
    btb_size: usize,

    #[command(flatten)]
    verbosity: binutils::verbose::Verbosity,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run at most N cycles, non-interactively.
    Simulate {
        /// Maximum number of cycles to execute.
        cycles: u64,
    },
    /// Pause after every cycle for user input; `q` quits.
    #[command(name = "single_step")]
    SingleStep,
}

fn main() -> Result<()> {
    let args = Args::parse();

    use binutils::verbose::Level;
    let log_level: &'static tracing::Level = match args.verbosity.log_level() {
        None => &tracing::Level::ERROR,
        Some(Level::Error) => &tracing::Level::ERROR,
        Some(Level::Warn) => &tracing::Level::WARN,
        Some(Level::Info) => &tracing::Level::INFO,
        Some(Level::Debug) => &tracing::Level::DEBUG,
        Some(Level::Trace) => &tracing::Level::TRACE,
    };
    binutils::logging_setup(log_level, None::<&std::fs::File>);

    if let Err(err) = run(&args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let source = std::fs::read_to_string(&args.input)
        .with_context(|| format!("could not read file `{}`", &args.input))?;
    let code = apex_asm::assemble(&source)
        .with_context(|| format!("could not assemble `{}`", &args.input))?;
    anyhow::ensure!(!code.is_empty(), "input program `{}` is empty", &args.input);

    let btb_size = args.btb.then_some(args.btb_size);
    let mut machine = Machine::new(code, btb_size);

    let result = match &args.mode {
        None => machine.run_to_halt(),
        Some(Mode::Simulate { cycles }) => machine.simulate(*cycles),
        Some(Mode::SingleStep) => run_single_step(&mut machine),
    };

    print_summary(&machine);
    result.context("simulation halted on an unrecoverable condition")
}

fn run_single_step(machine: &mut Machine) -> Result<(), CoreError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if machine.terminated {
            return Ok(());
        }
        print!("> ");
        io::stdout().flush().ok();
        let Some(Ok(line)) = lines.next() else {
            return Ok(());
        };
        if line.trim().eq_ignore_ascii_case("q") {
            return Ok(());
        }
        machine.step()?;
        print_cycle(machine);
    }
}

fn print_cycle(machine: &Machine) {
    println!("--- cycle {} ---", machine.clock);
    for stage in machine.stage_snapshots() {
        let fields: Vec<String> = stage
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!("{:<10} {}", stage.name, fields.join(" "));
    }
    print_flags(machine);
}

fn print_flags(machine: &Machine) {
    println!(
        "flags: Z={} N={} P={}",
        machine.flags.zero as u8, machine.flags.negative as u8, machine.flags.positive as u8
    );
}

fn print_reg_file(machine: &Machine) {
    println!("registers:");
    for (r, v) in machine.register_dump() {
        println!("  R{r:<2} = {v}");
    }
}

fn print_data_memory(machine: &Machine) {
    println!("data memory (nonzero):");
    for (addr, v) in machine.nonzero_memory() {
        println!("  [{addr}] = {v}");
    }
}

fn print_summary(machine: &Machine) {
    println!(
        "pc={:#x} cycles={} retired={}",
        machine.pc, machine.clock, machine.retired
    );
    print_flags(machine);
    print_reg_file(machine);
    print_data_memory(machine);
}
