//! Example: 5-point Jacobi smoothing
//!
//! Compiles a single-stage, single-partition 5-point stencil and walks
//! through the line buffer it needs.
//!
//! Run with: cargo run --example jacobi_5pt

use stencil_stream::buffer::LaneRead;
use stencil_stream::hardware::EmitEvent;
use stencil_stream::render::render_kernel;
use stencil_stream::{analyze, AcceleratorConfig, KernelGenerator};

const SOURCE: &str = "
ITERATE: 1
KERNEL: jacobi
COUNT: 1
input a(64, 64)
output b(0, 0) = (a(-1, 0) + a(0, -1) + a(0, 0) + a(0, 1) + a(1, 0)) * 0.2
";

fn main() {
    println!("=== 5-point Jacobi Example ===\n");

    let config = AcceleratorConfig::default_512();
    let stencil = analyze(SOURCE).unwrap();
    println!("Footprint of 'a': {:?}\n", stencil.refs("a").unwrap());

    let program = KernelGenerator::new(config).generate(&stencil).unwrap();
    let buffer = &program.buffers[0];
    println!("Blocks per row: {:?}", buffer.block_count);
    println!("Popped per row: {:?}", buffer.pop_count);
    println!("Storage flow (top row first):");
    for element in &buffer.flow {
        println!("  row {:>2}: {} {:?}", element.row, element.name, element.kind);
    }
    println!();

    println!("Lane reads:");
    for event in &program.kernels[0].stages[0].events {
        if let EmitEvent::LaneRead { port, read } = event {
            match read {
                LaneRead::Direct(slice) => println!("  {:<8} all lanes from {}", port, slice.element),
                LaneRead::Switch { split, low, high } => println!(
                    "  {:<8} lanes 0..{} from {}, the rest from {}",
                    port, split, low.element, high.element
                ),
            }
        }
    }
    println!();

    println!("{}", render_kernel(&program, &program.kernels[0]));
}
