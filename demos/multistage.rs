//! Example: chaining stages inside one kernel call
//!
//! Three stages apply the stencil three times per sweep; every stage
//! computes one halo's worth of rows less than the one before it.
//!
//! Run with: cargo run --example multistage

use stencil_stream::{compile, AcceleratorConfig};

const SOURCE: &str = "
ITERATE: 7
KERNEL: heat
COUNT: 1
input a(64, 64)
output
    c = 0.1
    b(0, 0) = a(0, 0) + c * (a(-1, 0) + a(1, 0) + a(0, -1) + a(0, 1) - 4.0 * a(0, 0))
";

fn main() {
    println!("=== Multi-stage Example ===\n");

    let config = AcceleratorConfig::new(16, 512, 3);
    let program = compile(SOURCE, &config).unwrap();
    let kernel = &program.kernels[0];

    println!("Channels: {:?}", kernel.channels);
    for stage in &kernel.stages {
        println!(
            "  {:<12} {} rows -> {}",
            stage.name,
            stage.valid_rows,
            stage.output.name()
        );
    }
    println!();

    println!("Sweeps:");
    for sweep in &kernel.schedule.sweeps {
        println!(
            "  #{} reads {} writes {} (skipped stages: {:?})",
            sweep.index, sweep.reads, sweep.writes, sweep.skips
        );
    }
    println!("\nResult lands in '{}'", program.host.result_buffer);
}
