//! Hardware interface definitions for the streaming stencil accelerator
//!
//! These types are what the HLS renderer and the host driver consume: the
//! accelerator configuration, the per-role kernel emissions and the sizing
//! facts the host needs to allocate and read back buffers.

use serde::{Deserialize, Serialize};

use crate::buffer::{AdvanceOp, BufferConfig, DrainOp, Endpoint, Feed, InitOp, LaneRead, OutputBufferConfig, StorageElement};
use crate::error::{CompileError, CompileResult};
use crate::exchange::{ExchangeProtocol, PartitionRole};
use crate::pipeline::{IterationSchedule, StageKind};

/// Configuration of the target accelerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Output elements produced per loop iteration
    pub unroll_factor: usize,
    /// Width of one memory transfer word in bits
    pub word_bits: usize,
    /// Dataflow stages chained inside one kernel call
    pub stage_count: usize,
    /// Depth of inter-stage and inter-partition FIFOs, in words
    pub channel_depth: usize,
}

impl AcceleratorConfig {
    pub fn new(unroll_factor: usize, word_bits: usize, stage_count: usize) -> Self {
        Self {
            unroll_factor,
            word_bits,
            stage_count,
            channel_depth: 64,
        }
    }

    /// 512-bit words, sixteen lanes, a single stage
    pub fn default_512() -> Self {
        Self::new(16, 512, 1)
    }

    /// 32-bit elements per transfer word
    pub fn lanes_per_word(&self) -> usize {
        self.word_bits / 32
    }

    /// Read a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> CompileResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CompileError::config(format!("invalid accelerator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if self.word_bits == 0 || self.word_bits % 32 != 0 {
            return Err(CompileError::config(format!(
                "word width {} is not a multiple of 32 bits",
                self.word_bits
            )));
        }
        if self.unroll_factor != self.lanes_per_word() {
            return Err(CompileError::config(format!(
                "unroll factor {} must equal the {} lanes of a {}-bit word",
                self.unroll_factor,
                self.lanes_per_word(),
                self.word_bits
            )));
        }
        if self.stage_count == 0 {
            return Err(CompileError::config("stage count must be at least 1"));
        }
        if self.channel_depth == 0 {
            return Err(CompileError::config("channel depth must be at least 1"));
        }
        Ok(())
    }
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self::default_512()
    }
}

/// Compile-time constants written to the generated header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderFacts {
    pub app_name: String,
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub kernel_count: usize,
    pub part_rows: usize,
    pub iterations: usize,
    pub stage_count: usize,
    pub word_bits: usize,
    /// Elements per transfer word
    pub width_factor: usize,
    pub para_factor: usize,
    /// Halo rows above/below the owned rows for one pass
    pub top_append: usize,
    pub bottom_append: usize,
}

/// What the host needs to allocate buffers and collect the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSizing {
    /// `grid_cols * part_rows + halo_rows * grid_cols`
    pub elements_per_buffer: usize,
    pub words_per_buffer: usize,
    pub halo_rows: usize,
    /// Buffer holding the final grid after the last sweep
    pub result_buffer: String,
}

/// The per-point stencil computation as a C function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StencilFunction {
    pub name: String,
    /// Port names followed by scalar parameters
    pub params: Vec<String>,
    /// The trailing scalar parameters alone
    pub scalars: Vec<String>,
    /// `(name, expression)` in binding order
    pub lets: Vec<(String, String)>,
    pub result: String,
}

/// One step of a stage body, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EmitEvent {
    Declare { element: StorageElement },
    Init { op: InitOp },
    BeginLoop { trip_count: usize, unroll: usize },
    LaneRead { port: String, read: LaneRead },
    Compute {
        function: String,
        args: Vec<String>,
        /// Port forwarded unchanged when the stage skips
        skip_forward: Option<String>,
    },
    Store { target: Endpoint, first: usize },
    Advance { op: AdvanceOp },
    EndLoop,
    Drain { op: DrainOp },
}

/// One dataflow stage of a kernel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEmission {
    pub name: String,
    pub kind: StageKind,
    /// Rows produced by this stage
    pub valid_rows: usize,
    pub trip_count: usize,
    pub feeds: Vec<(String, Feed)>,
    pub output: Endpoint,
    pub events: Vec<EmitEvent>,
}

impl StageEmission {
    pub fn declarations(&self) -> impl Iterator<Item = &StorageElement> {
        self.events.iter().filter_map(|e| match e {
            EmitEvent::Declare { element } => Some(element),
            _ => None,
        })
    }
}

/// Everything emitted for one partition role
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelEmission {
    pub role: PartitionRole,
    pub name: String,
    pub stencil_fn: StencilFunction,
    pub stages: Vec<StageEmission>,
    /// Streams connecting consecutive stages
    pub channels: Vec<String>,
    pub schedule: IterationSchedule,
    pub exchange: Option<ExchangeProtocol>,
}

/// A complete compiled accelerator program
#[derive(Debug, Clone, Serialize)]
pub struct AcceleratorProgram {
    pub config: AcceleratorConfig,
    pub header: HeaderFacts,
    pub buffers: Vec<BufferConfig>,
    pub output_buffer: OutputBufferConfig,
    pub host: HostSizing,
    pub kernels: Vec<KernelEmission>,
    /// Human-readable summary
    pub summary: String,
}

impl AcceleratorProgram {
    pub fn generate_summary(&mut self) {
        let h = &self.header;
        self.summary = format!(
            "Accelerator Program Summary:\n\
             ============================\n\
             Kernel: {} ({}x{} grid, {} iterations)\n\
             Target: {}-bit words, {} lanes, {} stage(s)\n\
             Partitions: {} x {} rows, halo {}+{}\n\
             Kernels: {}\n\
             Buffer: {} elements, result in '{}'\n",
            h.app_name,
            h.grid_rows,
            h.grid_cols,
            h.iterations,
            h.word_bits,
            h.para_factor,
            h.stage_count,
            h.kernel_count,
            h.part_rows,
            h.top_append,
            h.bottom_append,
            self.kernels.iter().map(|k| k.name.as_str()).collect::<Vec<_>>().join(", "),
            self.host.elements_per_buffer,
            self.host.result_buffer
        );
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn kernel(&self, role: PartitionRole) -> Option<&KernelEmission> {
        self.kernels.iter().find(|k| k.role == role)
    }
}

impl std::fmt::Display for AcceleratorProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Accelerator Program")?;
        writeln!(f, "===================")?;
        writeln!(f, "Kernel: {}", self.header.app_name)?;
        writeln!(f, "Grid: {}x{}", self.header.grid_rows, self.header.grid_cols)?;
        writeln!(
            f,
            "Target: {}-bit words, unroll {}, {} stage(s)",
            self.config.word_bits, self.config.unroll_factor, self.config.stage_count
        )?;
        writeln!(f, "Output row bounds: {:?}", self.output_buffer.row_bounds)?;
        writeln!(f, "Result buffer: {}", self.host.result_buffer)?;
        writeln!(f)?;

        for buffer in &self.buffers {
            writeln!(f, "Buffer {}:", buffer.var)?;
            writeln!(f, "  Blocks per row: {:?}", buffer.block_count)?;
            writeln!(f, "  Popped per row: {:?}", buffer.pop_count)?;
            writeln!(f, "  Flow: {}", buffer.flow.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(" <- "))?;
        }
        writeln!(f)?;

        for kernel in &self.kernels {
            writeln!(f, "Kernel {} ({:?}):", kernel.name, kernel.role)?;
            for stage in &kernel.stages {
                writeln!(
                    f,
                    "  {}: {} rows, {} steps, {} events",
                    stage.name,
                    stage.valid_rows,
                    stage.trip_count,
                    stage.events.len()
                )?;
            }
            writeln!(f, "  Sweeps: {}", kernel.schedule.sweeps.len())?;
            if let Some(exchange) = &kernel.exchange {
                writeln!(f, "  Exchange steps: {}", exchange.steps.len())?;
            }
        }
        Ok(())
    }
}
