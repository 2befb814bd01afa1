//! The validated stencil model handed to buffer synthesis and codegen

use std::collections::BTreeSet;

use serde::Serialize;

use crate::analyzer::{Footprint, Offset};
use crate::error::{CompileError, CompileResult};
use crate::ir::OutputStmt;

/// A parsed, simplified and checked stencil program
#[derive(Debug, Clone)]
pub struct Stencil {
    pub iterate: u32,
    pub kernel_name: String,
    pub partition_count: u32,
    /// Shared grid size of every input
    pub size: Vec<u64>,
    /// Declaration order; the last one is carried across iterations
    pub input_vars: Vec<String>,
    pub output_var: String,
    pub output_idx: Vec<i64>,
    /// Output statement after simplification
    pub output: OutputStmt,
    pub all_refs: Footprint,
    /// Free scalars, passed to the kernel as parameters
    pub scalar_vars: Vec<String>,
}

/// A named lane value feeding the stencil function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    pub var: String,
    pub offset: Offset,
    pub name: String,
}

/// Render one coordinate for an identifier: `-1` becomes `m1`
pub fn idx_to_str(idx: i64) -> String {
    if idx < 0 {
        format!("m{}", -idx)
    } else {
        idx.to_string()
    }
}

/// `a` at `(0, -1)` is `a_0_m1`
pub fn port_name(var: &str, offset: &Offset) -> String {
    let coords: Vec<String> = offset.0.iter().map(|c| idx_to_str(*c)).collect();
    format!("{}_{}", var, coords.join("_"))
}

impl Stencil {
    pub fn dims(&self) -> usize {
        self.size.len()
    }

    /// Buffer synthesis only understands row/column grids
    pub fn ensure_2d(&self) -> CompileResult<()> {
        if self.dims() != 2 {
            return Err(CompileError::UnsupportedDimensionality { dims: self.dims() });
        }
        Ok(())
    }

    pub fn grid_rows(&self) -> usize {
        self.size.first().copied().unwrap_or(0) as usize
    }

    pub fn grid_cols(&self) -> usize {
        self.size.get(1).copied().unwrap_or(1) as usize
    }

    /// Rows owned by each partition
    pub fn part_rows(&self) -> usize {
        self.grid_rows() / self.partition_count.max(1) as usize
    }

    /// The input that is swapped with the output between iterations
    pub fn iterated_var(&self) -> &str {
        self.input_vars.last().map(String::as_str).unwrap_or(&self.output_var)
    }

    pub fn refs(&self, var: &str) -> Option<&BTreeSet<Offset>> {
        self.all_refs.get(var)
    }

    /// Every referenced (variable, offset) in deterministic order
    pub fn ports(&self) -> Vec<Port> {
        self.all_refs
            .iter()
            .flat_map(|(var, offsets)| {
                offsets.iter().map(move |o| Port {
                    var: var.clone(),
                    offset: o.clone(),
                    name: port_name(var, o),
                })
            })
            .collect()
    }
}
