//! Line-buffer synthesis
//!
//! A variable's footprint becomes a chain of storage elements, one segment per
//! footprint row from the top row down:
//!
//! ```text
//! [block 0 .. block n-1][queue]  row top
//! [block 0 .. block n-1][queue]  ...
//! [block 0 .. block n-1]         row bottom  <- memory / upstream stream
//! ```
//!
//! Every segment but the last holds exactly one grid row of words, so a word
//! entering a row's block 0 leaves the previous row's queue one row later.
//! Blocks are word registers read by the unrolled lanes, popped registers keep
//! block 0 of the previous step for negative column offsets.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analyzer::{Offset, RowRefs};
use crate::error::{CompileError, CompileResult};
use crate::hardware::AcceleratorConfig;
use crate::stencil::idx_to_str;

/// Width of one grid element inside a packed word
pub const LANE_BITS: i64 = 32;

/// Where a buffer's words come from, or where results go
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Global memory buffer, addressed by word
    Memory { buffer: String },
    /// FIFO between dataflow stages, read in order
    Stream { name: String },
}

impl Endpoint {
    pub fn memory(buffer: impl Into<String>) -> Self {
        Endpoint::Memory { buffer: buffer.into() }
    }

    pub fn stream(name: impl Into<String>) -> Self {
        Endpoint::Stream { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Endpoint::Memory { buffer } => buffer,
            Endpoint::Stream { name } => name,
        }
    }
}

/// Input feed of one buffer within one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub endpoint: Endpoint,
    /// Feed row holding footprint row 0 when the stage starts
    pub center_row: usize,
    /// Words the feed can deliver in total
    pub words: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKind {
    /// Word register read by the lanes
    Block { index: usize },
    /// FIFO carrying the rest of a grid row
    Queue { depth: usize },
    /// Delayed copy of block 0
    Popped { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageElement {
    pub name: String,
    pub row: i64,
    #[serde(flatten)]
    pub kind: StorageKind,
}

impl StorageElement {
    pub fn is_queue(&self) -> bool {
        matches!(self.kind, StorageKind::Queue { .. })
    }
}

/// Bits of one lane inside a storage element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneSlice {
    pub element: String,
    /// Added to `lane * 32` to get the low bit
    pub shift_bits: i64,
}

impl LaneSlice {
    /// `(high, low)` bit positions for `lane`
    pub fn bit_range(&self, lane: usize) -> (i64, i64) {
        let low = lane as i64 * LANE_BITS + self.shift_bits;
        (low + LANE_BITS - 1, low)
    }
}

/// How lane `k` of the unrolled loop gets its value for one offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaneRead {
    Direct(LaneSlice),
    /// Lanes below `split` read `low`, the rest read `high`
    Switch {
        split: usize,
        low: LaneSlice,
        high: LaneSlice,
    },
}

impl LaneRead {
    pub fn resolve(&self, lane: usize) -> &LaneSlice {
        match self {
            LaneRead::Direct(slice) => slice,
            LaneRead::Switch { split, low, high } => {
                if lane < *split {
                    low
                } else {
                    high
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InitOp {
    /// Throw away stream words above the window
    Discard { source: Endpoint, words: usize },
    /// Load one block register
    Load { target: String, source: Endpoint, address: usize },
    /// Push `count` consecutive words into a queue
    Fill { queue: String, source: Endpoint, first: usize, count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdvanceOp {
    /// Popped register takes the previous value of `source`
    Delay { target: String, source: String },
    /// `target` receives from its successor in the flow
    Shift { target: StorageElement, source: StorageElement },
    /// The last element takes word `first + step`, or zero past `valid_steps`
    Fetch {
        target: StorageElement,
        source: Endpoint,
        first: usize,
        valid_steps: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrainOp {
    Queue { queue: String, words: usize },
    /// Words an upstream stage produced that this stage never consumed
    Upstream { source: Endpoint, words: usize },
}

fn ceil_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a > 0) == (b > 0)) {
        q + 1
    } else {
        q
    }
}

/// Line buffer of one input variable
#[derive(Debug, Clone, Serialize)]
pub struct BufferConfig {
    pub var: String,
    pub rows: RowRefs,
    pub unroll: usize,
    /// Words per grid row
    pub row_words: usize,
    /// Blocks per row, zero for pass-through rows
    pub block_count: BTreeMap<i64, usize>,
    /// Popped registers per row with negative offsets
    pub pop_count: BTreeMap<i64, usize>,
    pub flow: Vec<StorageElement>,
    pub popped: Vec<StorageElement>,
}

impl BufferConfig {
    pub fn synthesize(
        var: &str,
        rows: &RowRefs,
        config: &AcceleratorConfig,
        grid_cols: usize,
    ) -> CompileResult<Self> {
        let (Some(top), Some(bottom)) = (rows.keys().next().copied(), rows.keys().next_back().copied()) else {
            return Err(CompileError::empty_footprint(var));
        };
        let unroll = config.unroll_factor;
        let u = unroll as i64;
        let row_words = grid_cols / config.lanes_per_word();

        let mut block_count = BTreeMap::new();
        let mut pop_count = BTreeMap::new();
        for row in top..=bottom {
            let Some(cols) = rows.get(&row) else {
                block_count.insert(row, 0);
                continue;
            };
            let cmax = cols.iter().copied().max().unwrap_or(0);
            let cmin = cols.iter().copied().min().unwrap_or(0);
            // Block 0 always exists for a read row: popped registers copy it
            block_count.insert(row, (ceil_div(cmax, u) + 1).max(1) as usize);
            if cmin < 0 {
                let pops = ceil_div(-cmin, u) as usize;
                if pops > 1 {
                    return Err(CompileError::UnsupportedLookback {
                        name: var.to_string(),
                        row,
                        offset: cmin,
                    });
                }
                pop_count.insert(row, pops);
            }
        }

        let mut buffer = BufferConfig {
            var: var.to_string(),
            rows: rows.clone(),
            unroll,
            row_words,
            block_count,
            pop_count,
            flow: Vec::new(),
            popped: Vec::new(),
        };
        buffer.flow = buffer.build_flow();
        buffer.popped = buffer.build_popped();

        log::debug!(
            "buffer '{}': rows {}..={}, blocks {:?}, popped {:?}",
            var,
            top,
            bottom,
            buffer.block_count,
            buffer.pop_count
        );
        Ok(buffer)
    }

    pub fn top_row(&self) -> i64 {
        self.block_count.keys().next().copied().unwrap_or(0)
    }

    pub fn bottom_row(&self) -> i64 {
        self.block_count.keys().next_back().copied().unwrap_or(0)
    }

    pub fn blocks(&self, row: i64) -> usize {
        self.block_count.get(&row).copied().unwrap_or(0)
    }

    fn line(&self, row: i64) -> String {
        format!("{}_line_{}", self.var, idx_to_str(row))
    }

    pub fn block_name(&self, row: i64, index: usize) -> String {
        format!("{}_block_{}", self.line(row), index)
    }

    pub fn popped_name(&self, row: i64, index: usize) -> String {
        format!("{}_block_m{}", self.line(row), index + 1)
    }

    /// Queue depth; pass-through rows hold a whole row
    fn queue_depth(&self, row: i64) -> usize {
        (self.row_words + 1).saturating_sub(self.blocks(row))
    }

    fn build_flow(&self) -> Vec<StorageElement> {
        let bottom = self.bottom_row();
        let mut flow = Vec::new();
        for row in self.top_row()..=bottom {
            for index in 0..self.blocks(row) {
                flow.push(StorageElement {
                    name: self.block_name(row, index),
                    row,
                    kind: StorageKind::Block { index },
                });
            }
            // The bottom row is fed directly
            if row != bottom {
                flow.push(StorageElement {
                    name: self.line(row),
                    row,
                    kind: StorageKind::Queue {
                        depth: self.queue_depth(row),
                    },
                });
            }
        }
        flow
    }

    fn build_popped(&self) -> Vec<StorageElement> {
        self.pop_count
            .iter()
            .flat_map(|(row, count)| {
                (0..*count).map(move |index| StorageElement {
                    name: self.popped_name(*row, index),
                    row: *row,
                    kind: StorageKind::Popped { index },
                })
            })
            .collect()
    }

    /// Every element to declare, flow first
    pub fn storage(&self) -> impl Iterator<Item = &StorageElement> {
        self.flow.iter().chain(self.popped.iter())
    }

    /// Reject layouts that only make sense on wider grids
    pub fn check_fits(&self, grid_cols: usize, lanes: usize) -> CompileResult<()> {
        if grid_cols % lanes != 0 {
            return Err(CompileError::config(format!(
                "{} grid columns are not a whole number of {}-lane words",
                grid_cols, lanes
            )));
        }
        let widest = self.block_count.values().copied().max().unwrap_or(0);
        if widest > self.row_words {
            return Err(CompileError::config(format!(
                "'{}' needs {} blocks per row but a row is only {} words",
                self.var, widest, self.row_words
            )));
        }
        Ok(())
    }

    fn address(&self, feed: &Feed, row: i64, word: usize) -> CompileResult<usize> {
        let feed_row = feed.center_row as i64 + row;
        if feed_row < 0 {
            return Err(CompileError::codegen(format!(
                "'{}' row {} lies above its feed (center row {})",
                self.var, row, feed.center_row
            )));
        }
        Ok(feed_row as usize * self.row_words + word)
    }

    /// Fill every block and queue before the first step
    pub fn init(&self, feed: &Feed) -> CompileResult<Vec<InitOp>> {
        let source = &feed.endpoint;
        let mut ops = Vec::new();

        let start = self.address(feed, self.top_row(), 0)?;
        if matches!(source, Endpoint::Stream { .. }) && start > 0 {
            ops.push(InitOp::Discard {
                source: source.clone(),
                words: start,
            });
        }

        let bottom = self.bottom_row();
        for row in self.top_row()..=bottom {
            let blocks = self.blocks(row);
            for index in 0..blocks {
                ops.push(InitOp::Load {
                    target: self.block_name(row, index),
                    source: source.clone(),
                    address: self.address(feed, row, index)?,
                });
            }
            if row != bottom {
                ops.push(InitOp::Fill {
                    queue: self.line(row),
                    source: source.clone(),
                    first: self.address(feed, row, blocks)?,
                    count: self.row_words.saturating_sub(blocks),
                });
            }
        }
        Ok(ops)
    }

    /// Word fetched at step 0 of the main loop
    fn first_fetch(&self, feed: &Feed) -> CompileResult<usize> {
        let bottom = self.bottom_row();
        self.address(feed, bottom, self.blocks(bottom))
    }

    /// One synchronous step of the whole flow
    pub fn advance(&self, feed: &Feed, trip_count: usize) -> CompileResult<Vec<AdvanceOp>> {
        let mut ops = Vec::new();

        for (row, count) in &self.pop_count {
            for index in (0..*count).rev() {
                let source = if index == 0 {
                    self.block_name(*row, 0)
                } else {
                    self.popped_name(*row, index - 1)
                };
                ops.push(AdvanceOp::Delay {
                    target: self.popped_name(*row, index),
                    source,
                });
            }
        }

        for pair in self.flow.windows(2) {
            ops.push(AdvanceOp::Shift {
                target: pair[0].clone(),
                source: pair[1].clone(),
            });
        }

        if let Some(last) = self.flow.last() {
            let first = self.first_fetch(feed)?;
            ops.push(AdvanceOp::Fetch {
                target: last.clone(),
                source: feed.endpoint.clone(),
                first,
                valid_steps: trip_count.min(feed.words.saturating_sub(first)),
            });
        }
        Ok(ops)
    }

    /// Words this buffer pulls from its feed over a stage of `trip_count` steps
    pub fn consumed(&self, feed: &Feed, trip_count: usize) -> CompileResult<usize> {
        let first = self.first_fetch(feed)?;
        Ok((first + trip_count).min(feed.words.max(first)))
    }

    /// Lane read for one offset of this variable
    pub fn lane_read(&self, offset: &Offset) -> CompileResult<LaneRead> {
        let (row, col) = (offset.row(), offset.col());
        if !self.rows.get(&row).is_some_and(|cols| cols.contains(&col)) {
            return Err(CompileError::codegen(format!(
                "'{}' is never read at {:?}",
                self.var, offset.0
            )));
        }

        let u = self.unroll as i64;
        let word = col.div_euclid(u);
        let rem = col.rem_euclid(u);
        let low = LaneSlice {
            element: self.word_element(row, word)?,
            shift_bits: rem * LANE_BITS,
        };
        if rem == 0 {
            return Ok(LaneRead::Direct(low));
        }
        let high = LaneSlice {
            element: self.word_element(row, word + 1)?,
            shift_bits: (rem - u) * LANE_BITS,
        };
        Ok(LaneRead::Switch {
            split: (u - rem) as usize,
            low,
            high,
        })
    }

    /// Element holding word `word` of a row relative to the current position
    fn word_element(&self, row: i64, word: i64) -> CompileResult<String> {
        if word >= 0 && (word as usize) < self.blocks(row) {
            return Ok(self.block_name(row, word as usize));
        }
        let pop = (-word - 1) as usize;
        if word < 0 && pop < self.pop_count.get(&row).copied().unwrap_or(0) {
            return Ok(self.popped_name(row, pop));
        }
        Err(CompileError::codegen(format!(
            "'{}' row {} has no storage for word {}",
            self.var, row, word
        )))
    }

    /// Empty every queue once the stage has produced its last word
    pub fn drain(&self) -> Vec<DrainOp> {
        self.flow
            .iter()
            .filter(|e| e.is_queue())
            .map(|e| DrainOp::Queue {
                queue: e.name.clone(),
                words: self.row_words.saturating_sub(self.blocks(e.row)),
            })
            .collect()
    }
}

/// Row extent of the output buffer: the union over every input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputBufferConfig {
    pub row_bounds: (i64, i64),
}

impl OutputBufferConfig {
    pub fn from_buffers<'b>(buffers: impl IntoIterator<Item = &'b BufferConfig>) -> Self {
        let (mut lo, mut hi) = (0i64, 0i64);
        for b in buffers {
            lo = lo.min(b.top_row());
            hi = hi.max(b.bottom_row());
        }
        Self { row_bounds: (lo, hi) }
    }

    /// Halo rows above the owned rows per pass
    pub fn top_halo(&self) -> usize {
        (-self.row_bounds.0).max(0) as usize
    }

    /// Halo rows below the owned rows per pass
    pub fn bottom_halo(&self) -> usize {
        self.row_bounds.1.max(0) as usize
    }
}
