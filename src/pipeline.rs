//! Multi-stage pipeline planning
//!
//! A kernel call chains `S` stages, each applying the stencil once. Stage `s`
//! consumes the rows stage `s - 1` produced, so every stage loses one halo's
//! worth of rows:
//!
//! ```text
//! buffer rows: [T*S top halo][P owned][B*S bottom halo]
//! stage s computes rows [T*(s+1), T*(s+1) + P + (T+B)*(S-1-s))
//! ```
//!
//! The last stage lands exactly on the owned rows. Iterations are grouped into
//! sweeps of `S` passes that ping-pong between two buffers.

use serde::Serialize;

use crate::error::{CompileError, CompileResult};
use crate::hardware::AcceleratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum StageKind {
    /// The only stage of a one-stage kernel
    Single,
    In,
    Mid(usize),
    Out,
}

/// Halo rows consumed by one stencil pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Halo {
    pub top: usize,
    pub bottom: usize,
}

impl Halo {
    pub fn total(&self) -> usize {
        self.top + self.bottom
    }
}

/// Rows one stage produces, in buffer coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRange {
    pub index: usize,
    pub kind: StageKind,
    pub first_row: usize,
    pub valid_rows: usize,
}

impl StageRange {
    pub fn name(&self) -> String {
        match self.kind {
            StageKind::Single => "stage".to_string(),
            StageKind::In => "stage_in".to_string(),
            StageKind::Mid(i) => format!("stage_mid_{}", i),
            StageKind::Out => "stage_out".to_string(),
        }
    }
}

/// Stage layout of one kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelinePlan {
    pub stage_count: usize,
    pub part_rows: usize,
    pub halo: Halo,
    pub stages: Vec<StageRange>,
}

impl PipelinePlan {
    /// Halo rows stored in each partition buffer
    pub fn halo_rows(&self) -> usize {
        self.halo.total() * self.stage_count
    }

    pub fn top_rows(&self) -> usize {
        self.halo.top * self.stage_count
    }

    pub fn bottom_rows(&self) -> usize {
        self.halo.bottom * self.stage_count
    }

    pub fn buffer_rows(&self) -> usize {
        self.part_rows + self.halo_rows()
    }

    /// Stream from stage `s` to stage `s + 1`
    pub fn channel(&self, stage: usize) -> String {
        format!("temp_out_{}", stage)
    }

    /// Which stages of a sweep starting at `first_pass` have nothing to do
    pub fn skips(&self, first_pass: u32, iterations: u32) -> Vec<bool> {
        (0..self.stage_count)
            .map(|s| u64::from(first_pass) + s as u64 >= u64::from(iterations))
            .collect()
    }
}

/// Lays out the stages of a kernel
pub struct PipelineStrategy {
    config: AcceleratorConfig,
}

impl PipelineStrategy {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, part_rows: usize, halo: Halo) -> CompileResult<PipelinePlan> {
        let stage_count = self.config.stage_count;
        if stage_count == 0 {
            return Err(CompileError::config("stage count must be at least 1"));
        }
        if part_rows == 0 {
            return Err(CompileError::config("partitions must own at least one row"));
        }

        let stages = (0..stage_count)
            .map(|s| {
                let kind = if stage_count == 1 {
                    StageKind::Single
                } else if s == 0 {
                    StageKind::In
                } else if s + 1 == stage_count {
                    StageKind::Out
                } else {
                    StageKind::Mid(s)
                };
                StageRange {
                    index: s,
                    kind,
                    first_row: halo.top * (s + 1),
                    valid_rows: part_rows + halo.total() * (stage_count - 1) - halo.total() * s,
                }
            })
            .collect();

        log::debug!(
            "pipeline: {} stage(s) over {} rows, halo {}+{}",
            stage_count,
            part_rows,
            halo.top,
            halo.bottom
        );

        Ok(PipelinePlan {
            stage_count,
            part_rows,
            halo,
            stages,
        })
    }
}

/// One kernel call covering up to `stage_count` passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sweep {
    pub index: usize,
    pub first_pass: u32,
    /// Operand roles swapped: read the output buffer, write the input
    pub swapped: bool,
    pub reads: String,
    pub writes: String,
    /// Per stage: the pass it would run is past the last iteration
    pub skips: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationSchedule {
    pub iterations: u32,
    pub stage_count: usize,
    pub sweeps: Vec<Sweep>,
}

impl IterationSchedule {
    /// Alternate the iterated input and the output across sweeps
    pub fn new(iterations: u32, plan: &PipelinePlan, iterated: &str, output: &str) -> Self {
        let stage_count = plan.stage_count;
        let stages = stage_count.max(1) as u32;
        let count = iterations.div_ceil(stages).max(1);
        let sweeps = (0..count)
            .map(|i| {
                let swapped = i % 2 == 1;
                let (reads, writes) = if swapped { (output, iterated) } else { (iterated, output) };
                let first_pass = i * stages;
                Sweep {
                    index: i as usize,
                    first_pass,
                    swapped,
                    reads: reads.to_string(),
                    writes: writes.to_string(),
                    skips: plan.skips(first_pass, iterations),
                }
            })
            .collect();
        Self {
            iterations,
            stage_count,
            sweeps,
        }
    }

    /// Buffer written by the last sweep
    pub fn result_buffer(&self) -> &str {
        self.sweeps.last().map(|s| s.writes.as_str()).unwrap_or("")
    }
}
