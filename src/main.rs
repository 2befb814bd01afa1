//! Stencil to Streaming Accelerator Compiler CLI
//!
//! Usage:
//!   stencilc -f jacobi.stencil
//!   stencilc -f jacobi.stencil --stages 3 --emit kernel -o build/
//!   cat jacobi.stencil | stencilc --json

use clap::{Parser as ClapParser, ValueEnum};
use colored::Colorize;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use stencil_stream::render::{render_header, render_kernel};
use stencil_stream::{compile, AcceleratorConfig, AcceleratorProgram};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Print a summary of the generated accelerator
    Summary,
    /// Shared `#define` header
    Header,
    /// HLS C++ source of every kernel
    Kernel,
}

#[derive(ClapParser, Debug)]
#[command(name = "stencilc")]
#[command(version = "0.1.0")]
#[command(about = "Compiles stencil programs to streaming accelerator kernels")]
struct Args {
    /// Read the program from a file instead of stdin
    #[arg(short = 'f', long = "file")]
    input_file: Option<PathBuf>,

    /// Accelerator configuration as JSON; flags below override it
    #[arg(short = 'c', long = "config")]
    config_file: Option<PathBuf>,

    /// Output elements per loop iteration
    #[arg(short = 'u', long = "unroll")]
    unroll: Option<usize>,

    /// Transfer word width in bits
    #[arg(short = 'w', long = "word-bits")]
    word_bits: Option<usize>,

    /// Dataflow stages per kernel call
    #[arg(short = 's', long = "stages")]
    stages: Option<usize>,

    /// What to produce
    #[arg(short = 'e', long = "emit", value_enum, default_value = "summary")]
    emit: Emit,

    /// Write generated files here instead of stdout
    #[arg(short = 'o', long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn fail(what: &str, detail: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red(), detail);
    std::process::exit(1);
}

fn load_config(args: &Args) -> AcceleratorConfig {
    let mut config = match &args.config_file {
        Some(path) => {
            let json = fs::read_to_string(path)
                .unwrap_or_else(|e| fail("Error", format!("Failed to read config '{}': {}", path.display(), e)));
            AcceleratorConfig::from_json(&json).unwrap_or_else(|e| fail("Configuration error", e))
        }
        None => AcceleratorConfig::default(),
    };
    if let Some(word_bits) = args.word_bits {
        config.word_bits = word_bits;
        // keep lanes and unroll in step unless told otherwise
        config.unroll_factor = config.lanes_per_word();
    }
    if let Some(unroll) = args.unroll {
        config.unroll_factor = unroll;
    }
    if let Some(stages) = args.stages {
        config.stage_count = stages;
    }
    config
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let source = if let Some(file) = &args.input_file {
        fs::read_to_string(file)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read file '{}': {}", file.display(), e)))
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read stdin: {}", e)));
        buffer
    };

    let config = load_config(&args);

    if args.verbose {
        println!("{}", "Stencil to Streaming Accelerator Compiler".bold().blue());
        println!("{}", "=".repeat(42));
        println!();
        println!(
            "{}: {}-bit words, unroll {}, {} stage(s)",
            "Target".green(),
            config.word_bits,
            config.unroll_factor,
            config.stage_count
        );
        println!();
    }

    let program = compile(&source, &config).unwrap_or_else(|e| fail("Compilation error", e));

    if args.json_output {
        match program.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error", format!("Failed to serialize to JSON: {}", e)),
        }
        return;
    }

    match args.emit {
        Emit::Summary => print_program(&program, args.verbose),
        Emit::Header => {
            let file = format!("{}.h", program.header.app_name);
            write_output(args.out_dir.as_ref(), &file, &render_header(&program));
        }
        Emit::Kernel => {
            for kernel in &program.kernels {
                let file = format!("{}.cpp", kernel.name);
                write_output(args.out_dir.as_ref(), &file, &render_kernel(&program, kernel));
            }
        }
    }
}

fn write_output(out_dir: Option<&PathBuf>, file: &str, text: &str) {
    match out_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .unwrap_or_else(|e| fail("Error", format!("Failed to create '{}': {}", dir.display(), e)));
            let path = dir.join(file);
            fs::write(&path, text)
                .unwrap_or_else(|e| fail("Error", format!("Failed to write '{}': {}", path.display(), e)));
            println!("{} {}", "wrote".green(), path.display());
        }
        None => {
            println!("// ---- {} ----", file);
            println!("{}", text);
        }
    }
}

fn print_program(program: &AcceleratorProgram, verbose: bool) {
    println!("{}", "Compilation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    let h = &program.header;
    println!("{}: {}", "Kernel".cyan(), h.app_name);
    println!("{}: {}x{}, {} iteration(s)", "Grid".cyan(), h.grid_rows, h.grid_cols, h.iterations);
    println!(
        "{}: {} x {} rows, halo {}+{} per pass",
        "Partitions".cyan(),
        h.kernel_count,
        h.part_rows,
        h.top_append,
        h.bottom_append
    );
    println!(
        "{}: {} elements ({} words), result in '{}'",
        "Buffers".cyan(),
        program.host.elements_per_buffer,
        program.host.words_per_buffer,
        program.host.result_buffer
    );
    println!();

    println!("{}", "Line Buffers".bold().yellow());
    println!("{}", "-".repeat(50));
    for buffer in &program.buffers {
        println!();
        println!("{} {}", "Input".bold(), buffer.var.bold());
        println!("  {}: {:?}", "Blocks per row".cyan(), buffer.block_count);
        println!("  {}: {:?}", "Popped per row".cyan(), buffer.pop_count);
        if verbose {
            for element in buffer.storage() {
                println!("  {:>4}  {:<28} {:?}", element.row, element.name, element.kind);
            }
        }
    }
    println!();

    println!("{}", "Kernels".bold().yellow());
    println!("{}", "-".repeat(50));
    for kernel in &program.kernels {
        println!();
        println!("{} {} ({:?})", "Kernel".bold(), kernel.name.bold(), kernel.role);
        for stage in &kernel.stages {
            println!(
                "  {}: {} rows, {} steps, writes {}",
                stage.name.cyan(),
                stage.valid_rows,
                stage.trip_count,
                stage.output.name()
            );
            if verbose {
                for event in &stage.events {
                    println!("    {:?}", event);
                }
            }
        }
        println!("  {}: {}", "Sweeps".cyan(), kernel.schedule.sweeps.len());
        if let Some(exchange) = &kernel.exchange {
            for step in &exchange.steps {
                println!(
                    "  {:?} {:?}: rows {}..{}",
                    step.transfer,
                    step.neighbor,
                    step.first_row,
                    step.first_row + step.rows
                );
            }
        }
    }
}
