//! CVERE command-line runner.
//!
//! Loads a hex text program image, executes it with the console syscalls
//! installed, and prints the final machine state.
//!
//! # Usage
//! ```text
//! cvere run <file> [OPTIONS]
//! cvere trace <file> [OPTIONS]
//! ```
//!
//! # Options
//! - `--base <addr>`: load address (default 0x0000)
//! - `--max-cycles <n>`: cycle budget (default 100000)
//! - `--snapshot <file>`: write a JSON snapshot of the final state
//!
//! `RUST_LOG=trace` enables per-instruction engine logging.

use cvere::{Console, ProgramImage, RunStatus, TraceRecord, Vm};
use std::cell::RefCell;
use std::env;
use std::fs;
use std::process;
use std::rc::Rc;

struct Options {
    base: u16,
    max_cycles: u64,
    snapshot: Option<String>,
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 3 { 1 } else { 0 });
    }

    let command = args[1].as_str();
    let file = args[2].as_str();
    let options = match parse_options(&args[3..]) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {message}");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    let tracing = match command {
        "run" => false,
        "trace" => true,
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if let Err(message) = execute(file, &options, tracing) {
        eprintln!("Error: {message}");
        process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("CVERE virtual machine");
    println!();
    println!("Usage:");
    println!("  {program} run <file>    - Run a hex program image");
    println!("  {program} trace <file>  - Run with per-instruction tracing");
    println!();
    println!("Options:");
    println!("  --base <addr>       Load address (default 0x0000)");
    println!("  --max-cycles <n>    Cycle budget (default 100000)");
    println!("  --snapshot <file>   Write final state as JSON");
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        base: 0,
        max_cycles: 100_000,
        snapshot: None,
    };
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| format!("missing value for {flag}"))?;
        match flag.as_str() {
            "--base" => {
                let digits = value.trim_start_matches("0x").trim_start_matches("0X");
                options.base = u16::from_str_radix(digits, 16)
                    .map_err(|_| format!("invalid address: {value}"))?;
            }
            "--max-cycles" => {
                options.max_cycles = value
                    .parse()
                    .map_err(|_| format!("invalid cycle count: {value}"))?;
            }
            "--snapshot" => options.snapshot = Some(value.clone()),
            _ => return Err(format!("unknown option: {flag}")),
        }
    }
    Ok(options)
}

fn execute(file: &str, options: &Options, tracing: bool) -> Result<(), String> {
    let source = fs::read_to_string(file).map_err(|err| format!("cannot read {file}: {err}"))?;
    let image =
        ProgramImage::from_hex_text(&source).map_err(|err| format!("cannot parse {file}: {err}"))?;

    let mut vm = Vm::new();
    vm.load_program(&image.words, options.base)
        .map_err(|err| err.to_string())?;
    let console = Rc::new(RefCell::new(Console::new()));
    Console::attach(&console, &mut vm);

    let result = if tracing {
        let mut sink = |record: &TraceRecord| {
            println!(
                "{:>8}  {:#06X}  {:04X}  {}",
                record.cycle, record.pc, record.word, record.instr
            );
        };
        vm.trace(options.max_cycles, &mut sink)
    } else {
        vm.run(options.max_cycles)
    };

    let output = console.borrow_mut().take_output();
    if !output.is_empty() {
        println!("{output}");
    }

    match result {
        Ok(summary) => {
            match summary.status {
                RunStatus::Halted => println!("Halted after {} cycles", summary.cycles),
                RunStatus::CycleBudgetExhausted => {
                    println!("Cycle budget exhausted after {} cycles", summary.cycles)
                }
            }
            println!("{vm}");
        }
        Err(err) => {
            eprintln!("Fault: {err}");
            println!("{vm}");
        }
    }

    if let Some(path) = &options.snapshot {
        let json = serde_json::to_string_pretty(&vm.snapshot())
            .map_err(|err| format!("cannot serialize snapshot: {err}"))?;
        fs::write(path, json).map_err(|err| format!("cannot write {path}: {err}"))?;
        println!("Snapshot written to {path}");
    }

    Ok(())
}
