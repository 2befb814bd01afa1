//! Kernel emission driver
//!
//! Puts the pieces together: one line buffer per input, a pipeline of stages
//! that each read their feeds, run the unrolled lanes through the stencil
//! function and push results downstream, and one kernel per partition role.

use std::collections::BTreeMap;

use crate::analyzer::{refs_by_row, relative, Offset};
use crate::buffer::{BufferConfig, DrainOp, Endpoint, Feed, OutputBufferConfig};
use crate::error::{CompileError, CompileResult};
use crate::exchange::{check_progress, ExchangeProtocol, PartitionRole};
use crate::hardware::{
    AcceleratorConfig, AcceleratorProgram, EmitEvent, HeaderFacts, HostSizing, KernelEmission, StageEmission,
    StencilFunction,
};
use crate::ir::visit::rewrite;
use crate::ir::{Node, Rewrite, Var};
use crate::pipeline::{Halo, IterationSchedule, PipelinePlan, PipelineStrategy, StageKind, StageRange};
use crate::stencil::{port_name, Stencil};

/// Code generator for the streaming stencil accelerator
pub struct KernelGenerator {
    config: AcceleratorConfig,
}

/// Lane value forwarded by a skipping stage
struct Forward {
    port: String,
    /// Not part of the footprint, read only for forwarding
    extra: bool,
}

impl KernelGenerator {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self { config }
    }

    /// Generate the accelerator program for a stencil
    pub fn generate(&self, stencil: &Stencil) -> CompileResult<AcceleratorProgram> {
        self.config.validate()?;
        stencil.ensure_2d()?;

        let cols = stencil.grid_cols();
        let lanes = self.config.lanes_per_word();
        let row_words = cols / lanes;
        let iterated = stencil.iterated_var().to_string();

        let forward = self.forward_port(stencil, &iterated);
        let buffers = self.synthesize_buffers(stencil, &iterated, forward.as_ref())?;
        let output_buffer = OutputBufferConfig::from_buffers(buffers.values());
        let halo = Halo {
            top: output_buffer.top_halo(),
            bottom: output_buffer.bottom_halo(),
        };
        let plan = PipelineStrategy::new(self.config.clone()).plan(stencil.part_rows(), halo)?;
        let schedule = IterationSchedule::new(stencil.iterate, &plan, &iterated, &stencil.output_var);

        let stencil_fn = self.stencil_function(stencil)?;
        let stages = plan
            .stages
            .iter()
            .map(|stage| {
                self.emit_stage(
                    stencil,
                    &plan,
                    stage,
                    &buffers,
                    &stencil_fn,
                    forward.as_ref(),
                    stencil.iterate > 1,
                )
            })
            .collect::<CompileResult<Vec<_>>>()?;
        let channels: Vec<String> = (0..plan.stage_count.saturating_sub(1)).map(|s| plan.channel(s)).collect();

        let partitions = stencil.partition_count as usize;
        let sweeps = schedule.sweeps.len();
        let chain = PartitionRole::assign(partitions, sweeps)
            .into_iter()
            .map(|role| ExchangeProtocol::for_role(role, &plan, row_words))
            .collect::<CompileResult<Vec<_>>>()?;
        let chain: Vec<ExchangeProtocol> = chain.into_iter().flatten().collect();
        let rounds = check_progress(&chain, self.config.channel_depth)?;
        log::debug!("halo exchange completes in {} rounds", rounds);

        let mut kernels = Vec::new();
        for role in PartitionRole::distinct(partitions, sweeps) {
            kernels.push(KernelEmission {
                role,
                name: role.kernel_name().to_string(),
                stencil_fn: stencil_fn.clone(),
                stages: stages.clone(),
                channels: channels.clone(),
                schedule: schedule.clone(),
                exchange: ExchangeProtocol::for_role(role, &plan, row_words)?,
            });
        }

        let elements_per_buffer = cols * plan.part_rows + plan.halo_rows() * cols;
        let host = HostSizing {
            elements_per_buffer,
            words_per_buffer: elements_per_buffer / lanes,
            halo_rows: plan.halo_rows(),
            result_buffer: schedule.result_buffer().to_string(),
        };
        let header = HeaderFacts {
            app_name: stencil.kernel_name.clone(),
            grid_rows: stencil.grid_rows(),
            grid_cols: cols,
            kernel_count: partitions,
            part_rows: plan.part_rows,
            iterations: stencil.iterate as usize,
            stage_count: plan.stage_count,
            word_bits: self.config.word_bits,
            width_factor: lanes,
            para_factor: self.config.unroll_factor,
            top_append: halo.top,
            bottom_append: halo.bottom,
        };

        let mut program = AcceleratorProgram {
            config: self.config.clone(),
            header,
            buffers: stencil
                .input_vars
                .iter()
                .filter_map(|v| buffers.get(v).cloned())
                .collect(),
            output_buffer,
            host,
            kernels,
            summary: String::new(),
        };
        program.generate_summary();
        log::info!(
            "generated {} kernel(s) for '{}' ({} stage(s), {} sweep(s))",
            program.kernels.len(),
            stencil.kernel_name,
            plan.stage_count,
            sweeps
        );
        Ok(program)
    }

    /// Skipping stages pass the iterated variable through unchanged
    fn forward_port(&self, stencil: &Stencil, iterated: &str) -> Option<Forward> {
        if self.config.stage_count <= 1 {
            return None;
        }
        let origin = Offset(vec![0; stencil.dims()]);
        let extra = !stencil
            .refs(iterated)
            .is_some_and(|refs| refs.iter().any(Offset::is_origin));
        Some(Forward {
            port: port_name(iterated, &origin),
            extra,
        })
    }

    fn synthesize_buffers(
        &self,
        stencil: &Stencil,
        iterated: &str,
        forward: Option<&Forward>,
    ) -> CompileResult<BTreeMap<String, BufferConfig>> {
        let cols = stencil.grid_cols();
        let mut buffers = BTreeMap::new();
        for var in &stencil.input_vars {
            let refs = stencil.refs(var).ok_or_else(|| CompileError::empty_footprint(var.as_str()))?;
            let mut rows = refs_by_row(refs)?;
            if var == iterated && forward.is_some_and(|f| f.extra) {
                rows.entry(0).or_default().insert(0);
            }
            let buffer = BufferConfig::synthesize(var, &rows, &self.config, cols)?;
            buffer.check_fits(cols, self.config.lanes_per_word())?;
            buffers.insert(var.clone(), buffer);
        }
        Ok(buffers)
    }

    /// The per-point computation with references renamed to lane ports
    fn stencil_function(&self, stencil: &Stencil) -> CompileResult<StencilFunction> {
        let origin = &stencil.output_idx;
        let lets = stencil
            .output
            .lets
            .iter()
            .map(|l| Ok((l.name.clone(), rename_refs(&l.expr, origin)?.to_string())))
            .collect::<CompileResult<Vec<_>>>()?;
        let result = rename_refs(&stencil.output.expr, origin)?.to_string();

        let mut params: Vec<String> = stencil.ports().into_iter().map(|p| p.name).collect();
        params.extend(stencil.scalar_vars.iter().cloned());

        Ok(StencilFunction {
            name: format!("{}_point", stencil.kernel_name),
            params,
            scalars: stencil.scalar_vars.clone(),
            lets,
            result,
        })
    }

    /// Where a variable's words come from in a given stage
    fn feed(&self, plan: &PipelinePlan, stage: &StageRange, var: &str, iterated: &str, row_words: usize) -> Feed {
        if stage.index == 0 || var != iterated {
            return Feed {
                endpoint: Endpoint::memory(var),
                center_row: stage.first_row,
                words: plan.buffer_rows() * row_words,
            };
        }
        let upstream = &plan.stages[stage.index - 1];
        Feed {
            endpoint: Endpoint::stream(plan.channel(stage.index - 1)),
            center_row: stage.first_row - upstream.first_row,
            words: upstream.valid_rows * row_words,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_stage(
        &self,
        stencil: &Stencil,
        plan: &PipelinePlan,
        stage: &StageRange,
        buffers: &BTreeMap<String, BufferConfig>,
        stencil_fn: &StencilFunction,
        forward: Option<&Forward>,
        repeated: bool,
    ) -> CompileResult<StageEmission> {
        let row_words = stencil.grid_cols() / self.config.lanes_per_word();
        let trip_count = stage.valid_rows * row_words;
        let iterated = stencil.iterated_var();

        let ordered: Vec<&BufferConfig> = stencil.input_vars.iter().filter_map(|v| buffers.get(v)).collect();
        let feeds: Vec<(String, Feed)> = ordered
            .iter()
            .map(|b| (b.var.clone(), self.feed(plan, stage, &b.var, iterated, row_words)))
            .collect();

        let mut events = Vec::new();
        for buffer in &ordered {
            events.extend(buffer.storage().cloned().map(|element| EmitEvent::Declare { element }));
        }
        for (buffer, (_, feed)) in ordered.iter().zip(&feeds) {
            events.extend(buffer.init(feed)?.into_iter().map(|op| EmitEvent::Init { op }));
        }

        events.push(EmitEvent::BeginLoop {
            trip_count,
            unroll: self.config.unroll_factor,
        });
        for port in stencil.ports() {
            let buffer = buffers
                .get(&port.var)
                .ok_or_else(|| CompileError::codegen(format!("no buffer for '{}'", port.var)))?;
            events.push(EmitEvent::LaneRead {
                port: port.name,
                read: buffer.lane_read(&port.offset)?,
            });
        }
        if let (Some(f), Some(buffer)) = (forward.filter(|f| f.extra), buffers.get(iterated)) {
            events.push(EmitEvent::LaneRead {
                port: f.port.clone(),
                read: buffer.lane_read(&Offset(vec![0, 0]))?,
            });
        }
        events.push(EmitEvent::Compute {
            function: stencil_fn.name.clone(),
            args: stencil_fn.params.clone(),
            skip_forward: forward.map(|f| f.port.clone()),
        });

        let (output, first) = match stage.kind {
            StageKind::Single | StageKind::Out => (Endpoint::memory(stencil.output_var.as_str()), stage.first_row * row_words),
            StageKind::In | StageKind::Mid(_) => (Endpoint::stream(plan.channel(stage.index)), 0),
        };
        events.push(EmitEvent::Store {
            target: output.clone(),
            first,
        });

        for (buffer, (_, feed)) in ordered.iter().zip(&feeds) {
            events.extend(buffer.advance(feed, trip_count)?.into_iter().map(|op| EmitEvent::Advance { op }));
        }
        events.push(EmitEvent::EndLoop);

        for (buffer, (_, feed)) in ordered.iter().zip(&feeds) {
            if repeated {
                events.extend(buffer.drain().into_iter().map(|op| EmitEvent::Drain { op }));
            }
            if let Endpoint::Stream { .. } = feed.endpoint {
                let leftover = feed.words.saturating_sub(buffer.consumed(feed, trip_count)?);
                if leftover > 0 {
                    events.push(EmitEvent::Drain {
                        op: DrainOp::Upstream {
                            source: feed.endpoint.clone(),
                            words: leftover,
                        },
                    });
                }
            }
        }

        log::debug!(
            "{}: {} rows from buffer row {}, {} events",
            stage.name(),
            stage.valid_rows,
            stage.first_row,
            events.len()
        );

        Ok(StageEmission {
            name: stage.name(),
            kind: stage.kind,
            valid_rows: stage.valid_rows,
            trip_count,
            feeds,
            output,
            events,
        })
    }
}

/// Replace every array reference with the name of its lane port
pub fn rename_refs(node: &Node, origin: &[i64]) -> CompileResult<Node> {
    let mut error: Option<CompileError> = None;
    let renamed = rewrite(
        node,
        &mut |node: &mut Node, error: &mut Option<CompileError>| match node {
            Node::Ref(r) => match relative(&r.idx, origin) {
                Ok(offset) => Rewrite::Replace(Node::Var(Var::new(port_name(&r.name, &offset)))),
                Err(e) => {
                    error.get_or_insert(e);
                    Rewrite::Replace(node.clone())
                }
            },
            _ => Rewrite::Descend,
        },
        &mut error,
    );
    match error {
        Some(e) => Err(e),
        None => Ok(renamed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AdvanceOp, InitOp};
    use crate::ir::lower::lower_program;
    use crate::parser::Parser;
    use crate::Analyzer;

    fn stencil(source: &str) -> Stencil {
        let ast = Parser::new(source).parse_program().unwrap();
        let program = lower_program(&ast).unwrap();
        Analyzer::new().analyze(&program).unwrap()
    }

    fn jacobi(iterate: u32, count: u32) -> Stencil {
        stencil(&format!(
            "ITERATE: {} KERNEL: jacobi COUNT: {} input a(64, 64)
             output b(0, 0) = (a(-1, 0) + a(0, -1) + a(0, 0) + a(0, 1) + a(1, 0)) * 0.2",
            iterate, count
        ))
    }

    fn generate(stencil: &Stencil, stages: usize) -> AcceleratorProgram {
        KernelGenerator::new(AcceleratorConfig::new(16, 512, stages))
            .generate(stencil)
            .unwrap()
    }

    #[test]
    fn test_stencil_function_uses_ports() {
        let program = generate(&jacobi(1, 1), 1);
        let f = &program.kernels[0].stencil_fn;
        assert_eq!(f.name, "jacobi_point");
        assert_eq!(f.params, vec!["a_m1_0", "a_0_m1", "a_0_0", "a_0_1", "a_1_0"]);
        assert_eq!(f.result, "(a_m1_0 + a_0_m1 + a_0_0 + a_0_1 + a_1_0) * 0.2");
    }

    #[test]
    fn test_negated_negation_is_not_a_decrement() {
        let s = stencil("ITERATE: 1 KERNEL: flip COUNT: 1 input a(64, 64) output b(0, 0) = - -a(0, 0) + -(-a(0, 1))");
        let f = generate(&s, 1).kernels[0].stencil_fn.clone();
        assert!(!f.result.contains("--"), "{}", f.result);
    }

    #[test]
    fn test_single_stage_event_order() {
        let program = generate(&jacobi(1, 1), 1);
        let stage = &program.kernels[0].stages[0];
        assert_eq!(stage.kind, StageKind::Single);
        assert_eq!(stage.trip_count, 64 * 4);

        let position = |pred: &dyn Fn(&EmitEvent) -> bool| stage.events.iter().position(|e| pred(e)).unwrap();
        let first_init = position(&|e| matches!(e, EmitEvent::Init { .. }));
        let begin = position(&|e| matches!(e, EmitEvent::BeginLoop { .. }));
        let compute = position(&|e| matches!(e, EmitEvent::Compute { .. }));
        let first_advance = position(&|e| matches!(e, EmitEvent::Advance { .. }));
        let end = position(&|e| matches!(e, EmitEvent::EndLoop));
        assert!(stage.events[..first_init].iter().all(|e| matches!(e, EmitEvent::Declare { .. })));
        assert!(first_init < begin && begin < compute && compute < first_advance && first_advance < end);

        let reads = stage.events.iter().filter(|e| matches!(e, EmitEvent::LaneRead { .. })).count();
        assert_eq!(reads, 5);
        // one iteration: nothing to drain
        assert_eq!(end, stage.events.len() - 1);
    }

    #[test]
    fn test_single_stage_writes_owned_rows() {
        let program = generate(&jacobi(1, 1), 1);
        let stage = &program.kernels[0].stages[0];
        assert!(stage.events.contains(&EmitEvent::Store {
            target: Endpoint::memory("b"),
            first: 4
        }));
        assert_eq!(program.host.elements_per_buffer, 64 * 64 + 2 * 64);
        assert_eq!(program.host.result_buffer, "b");
    }

    #[test]
    fn test_iterations_drain_and_swap() {
        let program = generate(&jacobi(2, 1), 1);
        let stage = &program.kernels[0].stages[0];
        let drains = stage.events.iter().filter(|e| matches!(e, EmitEvent::Drain { .. })).count();
        assert_eq!(drains, 2);
        assert_eq!(program.kernels[0].schedule.sweeps.len(), 2);
        assert_eq!(program.host.result_buffer, "a");
    }

    #[test]
    fn test_multi_stage_streams() {
        let program = generate(&jacobi(3, 1), 3);
        let kernel = &program.kernels[0];
        assert_eq!(kernel.channels, vec!["temp_out_0", "temp_out_1"]);

        let names: Vec<&str> = kernel.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["stage_in", "stage_mid_1", "stage_out"]);
        assert_eq!(kernel.stages[0].output, Endpoint::stream("temp_out_0"));
        assert_eq!(kernel.stages[1].feeds[0].1.endpoint, Endpoint::stream("temp_out_0"));
        assert_eq!(kernel.stages[1].feeds[0].1.center_row, 1);
        assert_eq!(kernel.stages[2].output, Endpoint::memory("b"));

        let rows: Vec<usize> = kernel.stages.iter().map(|s| s.valid_rows).collect();
        assert_eq!(rows, vec![68, 66, 64]);
        assert_eq!(program.host.halo_rows, 6);
    }

    #[test]
    fn test_queues_drain_within_a_single_sweep() {
        // three passes fit one call, yet the queues are reused by the next call
        let program = generate(&jacobi(3, 1), 3);
        assert_eq!(program.kernels[0].schedule.sweeps.len(), 1);
        for stage in &program.kernels[0].stages {
            assert!(stage.events.iter().any(|e| matches!(e, EmitEvent::Drain { op: DrainOp::Queue { .. } })));
        }
    }

    #[test]
    fn test_sweeps_carry_skip_flags() {
        let program = generate(&jacobi(5, 1), 3);
        let skips: Vec<Vec<bool>> = program.kernels[0]
            .schedule
            .sweeps
            .iter()
            .map(|s| s.skips.clone())
            .collect();
        assert_eq!(skips, vec![vec![false, false, false], vec![false, false, true]]);

        let program = generate(&jacobi(2, 1), 1);
        assert!(program.kernels[0].schedule.sweeps.iter().all(|s| s.skips == vec![false]));
    }

    #[test]
    fn test_stream_fed_stage_never_overreads() {
        let program = generate(&jacobi(3, 1), 2);
        let stage = &program.kernels[0].stages[1];
        let fetch = stage
            .events
            .iter()
            .find_map(|e| match e {
                EmitEvent::Advance {
                    op: AdvanceOp::Fetch { first, valid_steps, .. },
                } => Some((*first, *valid_steps)),
                _ => None,
            })
            .unwrap();
        let upstream_words = program.kernels[0].stages[0].trip_count;
        assert!(fetch.0 + fetch.1 <= upstream_words);
        assert!(matches!(stage.events.first(), Some(EmitEvent::Declare { .. })));
        assert!(stage
            .events
            .iter()
            .any(|e| matches!(e, EmitEvent::Init { op: InitOp::Load { source: Endpoint::Stream { .. }, .. } })));
    }

    #[test]
    fn test_skip_forward_reads_center_when_missing() {
        let s = stencil(
            "ITERATE: 2 KERNEL: blur COUNT: 1 input a(32, 32)
             output b(0, 0) = a(0, -1) + a(0, 1)",
        );
        let program = generate(&s, 2);
        let stage = &program.kernels[0].stages[0];
        assert!(stage
            .events
            .iter()
            .any(|e| matches!(e, EmitEvent::LaneRead { port, .. } if port == "a_0_0")));
        assert!(stage.events.iter().any(|e| matches!(
            e,
            EmitEvent::Compute { skip_forward: Some(p), args, .. } if p == "a_0_0" && !args.contains(p)
        )));
    }

    #[test]
    fn test_partition_roles() {
        let program = generate(&jacobi(4, 4), 1);
        let roles: Vec<PartitionRole> = program.kernels.iter().map(|k| k.role).collect();
        assert_eq!(roles, vec![PartitionRole::Up, PartitionRole::Mid, PartitionRole::Down]);
        assert!(program.kernel(PartitionRole::Mid).and_then(|k| k.exchange.as_ref()).is_some());
        assert_eq!(program.header.part_rows, 16);
        assert_eq!(program.host.elements_per_buffer, 64 * 16 + 2 * 64);
    }

    #[test]
    fn test_single_iteration_is_uni() {
        let program = generate(&jacobi(1, 4), 1);
        assert_eq!(program.kernels.len(), 1);
        assert_eq!(program.kernels[0].role, PartitionRole::Uni);
        assert!(program.kernels[0].exchange.is_none());
    }

    #[test]
    fn test_narrow_grid_is_rejected() {
        let s = stencil("ITERATE: 1 KERNEL: k COUNT: 1 input a(5, 5) output b(0, 0) = a(0, 0)");
        let result = KernelGenerator::new(AcceleratorConfig::default()).generate(&s);
        assert!(matches!(result, Err(CompileError::ConfigError { .. })));
    }

    #[test]
    fn test_three_dimensional_grid_is_rejected() {
        let s = stencil("ITERATE: 1 KERNEL: k COUNT: 1 input a(4, 4, 4) output b(0, 0, 0) = a(0, 0, 1)");
        let result = KernelGenerator::new(AcceleratorConfig::default()).generate(&s);
        assert!(matches!(result, Err(CompileError::UnsupportedDimensionality { dims: 3 })));
    }

    #[test]
    fn test_rename_refs() {
        let node = Node::binary(
            crate::ir::BinaryKind::AddSub,
            vec![Node::reference("x", &[2, 1]), Node::var("w")],
            &["-"],
        );
        assert_eq!(rename_refs(&node, &[1, 1]).unwrap().to_string(), "x_1_0 - w");
    }
}
