//! Halo exchange between neighbouring partitions
//!
//! The grid is split into horizontal bands. After each sweep a partition must
//! refresh its halo rows from the bands above and below it over bounded
//! blocking FIFOs. The step order per role keeps the chain deadlock-free:
//!
//! - `Up` (top band): send below, then receive from below
//! - `Down` (bottom band): receive from above, then send above
//! - `Mid`: finish the exchange with the band above (receive, send) before
//!   starting the one with the band below (send, receive)

use std::collections::VecDeque;

use serde::Serialize;

use crate::error::{CompileError, CompileResult};
use crate::pipeline::PipelinePlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionRole {
    /// No neighbours to talk to
    Uni,
    Up,
    Mid,
    Down,
}

impl PartitionRole {
    pub fn kernel_name(&self) -> &'static str {
        match self {
            PartitionRole::Uni => "unikernel",
            PartitionRole::Up => "upkernel",
            PartitionRole::Mid => "midkernel",
            PartitionRole::Down => "downkernel",
        }
    }

    /// Role of every partition, top to bottom
    pub fn assign(partitions: usize, sweeps: usize) -> Vec<PartitionRole> {
        if partitions <= 1 || sweeps <= 1 {
            return vec![PartitionRole::Uni; partitions.max(1)];
        }
        (0..partitions)
            .map(|p| match p {
                0 => PartitionRole::Up,
                p if p + 1 == partitions => PartitionRole::Down,
                _ => PartitionRole::Mid,
            })
            .collect()
    }

    /// Roles that need their own kernel, in first-use order
    pub fn distinct(partitions: usize, sweeps: usize) -> Vec<PartitionRole> {
        let mut roles = Vec::new();
        for role in Self::assign(partitions, sweeps) {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        roles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighbor {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transfer {
    Send,
    Receive,
}

/// Move a block of whole rows to or from one neighbour
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeStep {
    pub neighbor: Neighbor,
    pub transfer: Transfer,
    /// First buffer row sent or overwritten
    pub first_row: usize,
    pub rows: usize,
}

/// Ordered exchange steps of one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeProtocol {
    pub role: PartitionRole,
    pub words_per_row: usize,
    pub steps: Vec<ExchangeStep>,
}

impl ExchangeProtocol {
    /// `None` for partitions with nobody to exchange with
    pub fn for_role(role: PartitionRole, plan: &PipelinePlan, words_per_row: usize) -> CompileResult<Option<Self>> {
        let top = plan.top_rows();
        let bottom = plan.bottom_rows();
        let owned = plan.part_rows;
        if role != PartitionRole::Uni && (owned < top || owned < bottom) {
            return Err(CompileError::config(format!(
                "a partition of {} rows cannot supply {}+{} halo rows",
                owned, top, bottom
            )));
        }

        let step = |neighbor, transfer, first_row, rows| ExchangeStep {
            neighbor,
            transfer,
            first_row,
            rows,
        };
        // Halo rows the band above needs from us, and the ones we need from below
        let with_below = [
            step(Neighbor::Below, Transfer::Send, owned, top),
            step(Neighbor::Below, Transfer::Receive, top + owned, bottom),
        ];
        let with_above = [
            step(Neighbor::Above, Transfer::Receive, 0, top),
            step(Neighbor::Above, Transfer::Send, top, bottom),
        ];

        let steps: Vec<ExchangeStep> = match role {
            PartitionRole::Uni => return Ok(None),
            PartitionRole::Up => with_below.to_vec(),
            PartitionRole::Down => with_above.to_vec(),
            PartitionRole::Mid => with_above.iter().chain(with_below.iter()).cloned().collect(),
        };

        Ok(Some(Self {
            role,
            words_per_row,
            steps: steps.into_iter().filter(|s| s.rows > 0).collect(),
        }))
    }

    pub fn words(&self, step: &ExchangeStep) -> usize {
        step.rows * self.words_per_row
    }
}

/// Run the protocols of a partition chain word by word over FIFOs holding
/// `capacity` words each; returns the number of rounds to completion
pub fn check_progress(chain: &[ExchangeProtocol], capacity: usize) -> CompileResult<usize> {
    let n = chain.len();
    if n < 2 {
        return Ok(0);
    }
    // downward[i]: partition i -> i + 1, upward[i]: partition i + 1 -> i
    let mut downward = vec![0usize; n - 1];
    let mut upward = vec![0usize; n - 1];
    let mut cursors: Vec<VecDeque<(Neighbor, Transfer, usize)>> = chain
        .iter()
        .map(|p| p.steps.iter().map(|s| (s.neighbor, s.transfer, p.words(s))).collect())
        .collect();

    let mut rounds = 0;
    while cursors.iter().any(|c| !c.is_empty()) {
        rounds += 1;
        let mut progressed = false;

        for (p, cursor) in cursors.iter_mut().enumerate() {
            while let Some((_, _, 0)) = cursor.front() {
                cursor.pop_front();
            }
            let Some((neighbor, transfer, remaining)) = cursor.front_mut() else {
                continue;
            };
            let fifo = match (*neighbor, *transfer) {
                (Neighbor::Below, Transfer::Send) if p + 1 < n => &mut downward[p],
                (Neighbor::Above, Transfer::Receive) if p > 0 => &mut downward[p - 1],
                (Neighbor::Above, Transfer::Send) if p > 0 => &mut upward[p - 1],
                (Neighbor::Below, Transfer::Receive) if p + 1 < n => &mut upward[p],
                _ => {
                    return Err(CompileError::codegen(format!(
                        "partition {} ({:?}) has no neighbour {:?}",
                        p, chain[p].role, neighbor
                    )))
                }
            };
            let moved = match transfer {
                Transfer::Send if *fifo < capacity => {
                    *fifo += 1;
                    true
                }
                Transfer::Receive if *fifo > 0 => {
                    *fifo -= 1;
                    true
                }
                _ => false,
            };
            if moved {
                *remaining -= 1;
                progressed = true;
            }
        }

        let finished = cursors.iter().all(|c| c.iter().all(|(_, _, w)| *w == 0));
        if finished {
            break;
        }
        if !progressed {
            let stuck: Vec<String> = cursors
                .iter()
                .enumerate()
                .filter_map(|(p, c)| c.front().map(|(nb, t, w)| format!("#{} {:?} {:?} ({} left)", p, t, nb, w)))
                .collect();
            return Err(CompileError::codegen(format!(
                "halo exchange deadlocks after {} rounds: {}",
                rounds,
                stuck.join(", ")
            )));
        }
    }
    Ok(rounds)
}
