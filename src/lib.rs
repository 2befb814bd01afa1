//! Stencil to Streaming Accelerator Compiler
//!
//! This library compiles a small stencil language into a description of a
//! pipelined, spatially partitioned streaming accelerator: line buffers fed
//! one wide word per cycle, chained dataflow stages and halo exchange between
//! neighbouring partitions. [`render`] turns the description into HLS C++.
//!
//! # Example
//!
//! ```rust
//! use stencil_stream::{compile, AcceleratorConfig};
//!
//! let source = "ITERATE: 2 KERNEL: jacobi COUNT: 1 input a(64, 64)
//!               output b(0, 0) = (a(-1, 0) + a(0, -1) + a(0, 1) + a(1, 0)) * 0.25";
//! let program = compile(source, &AcceleratorConfig::default()).unwrap();
//! assert_eq!(program.host.result_buffer, "a");
//! println!("{}", program);
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod ir;
pub mod analyzer;
pub mod stencil;
pub mod buffer;
pub mod pipeline;
pub mod exchange;
pub mod codegen;
pub mod hardware;
pub mod render;
pub mod error;

pub use parser::Parser;
pub use analyzer::Analyzer;
pub use stencil::Stencil;
pub use buffer::{BufferConfig, OutputBufferConfig};
pub use pipeline::{IterationSchedule, PipelinePlan, PipelineStrategy};
pub use exchange::{ExchangeProtocol, PartitionRole};
pub use codegen::KernelGenerator;
pub use hardware::{AcceleratorConfig, AcceleratorProgram, KernelEmission};
pub use error::{CompileError, CompileResult};

/// Parse, lower and analyze a stencil program
pub fn analyze(source: &str) -> CompileResult<Stencil> {
    let mut parser = Parser::new(source);
    let program = parser.parse_program()?;
    let program = ir::lower::lower_program(&program)?;

    let mut analyzer = Analyzer::new();
    analyzer.analyze(&program)
}

/// Main compilation function that takes stencil source and produces the accelerator description
pub fn compile(source: &str, config: &AcceleratorConfig) -> CompileResult<AcceleratorProgram> {
    let stencil = analyze(source)?;
    KernelGenerator::new(config.clone()).generate(&stencil)
}

/// Compile an already parsed program
pub fn compile_program(program: &ast::Program, config: &AcceleratorConfig) -> CompileResult<AcceleratorProgram> {
    let program = ir::lower::lower_program(program)?;
    let stencil = Analyzer::new().analyze(&program)?;
    KernelGenerator::new(config.clone()).generate(&stencil)
}
