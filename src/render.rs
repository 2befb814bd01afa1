//! HLS C++ text for the generated kernels and their shared header

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::buffer::{AdvanceOp, DrainOp, Endpoint, InitOp, LaneRead, LaneSlice, StorageElement, StorageKind, LANE_BITS};
use crate::exchange::{ExchangeProtocol, Neighbor, Transfer};
use crate::hardware::{AcceleratorProgram, EmitEvent, KernelEmission, StageEmission};

/// `#define`s shared by every kernel and the host
pub fn render_header(program: &AcceleratorProgram) -> String {
    let h = &program.header;
    let guard = format!("{}_H", h.app_name.to_uppercase());
    let mut out = String::new();
    let _ = writeln!(out, "#ifndef {}", guard);
    let _ = writeln!(out, "#define {}", guard);
    out.push('\n');
    let facts: [(&str, String); 16] = [
        ("APP_NAME", format!("\"{}\"", h.app_name)),
        ("GRID_ROWS", h.grid_rows.to_string()),
        ("GRID_COLS", h.grid_cols.to_string()),
        ("KERNEL_COUNT", h.kernel_count.to_string()),
        ("PART_ROWS", h.part_rows.to_string()),
        ("ITERATIONS", h.iterations.to_string()),
        ("STAGE_COUNT", h.stage_count.to_string()),
        ("DWIDTH", h.word_bits.to_string()),
        ("WIDTH_FACTOR", h.width_factor.to_string()),
        ("PARA_FACTOR", h.para_factor.to_string()),
        ("TOP_APPEND", h.top_append.to_string()),
        ("BOTTOM_APPEND", h.bottom_append.to_string()),
        ("HALO_ROWS", program.host.halo_rows.to_string()),
        ("ELEMENTS_PER_BUFFER", program.host.elements_per_buffer.to_string()),
        ("WORDS_PER_BUFFER", program.host.words_per_buffer.to_string()),
        ("RESULT_BUFFER", format!("\"{}\"", program.host.result_buffer)),
    ];
    for (name, value) in facts {
        let _ = writeln!(out, "#define {} {}", name, value);
    }
    out.push('\n');
    let _ = writeln!(out, "#endif // {}", guard);
    out
}

/// The complete source of one kernel
pub fn render_kernel(program: &AcceleratorProgram, kernel: &KernelEmission) -> String {
    let mut r = Renderer {
        program,
        kernel,
        out: String::new(),
        depth: 0,
    };
    r.emit_all();
    r.out
}

struct Renderer<'a> {
    program: &'a AcceleratorProgram,
    kernel: &'a KernelEmission,
    out: String,
    depth: usize,
}

impl<'a> Renderer<'a> {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.depth += 1;
    }

    fn close(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    fn word(&self) -> String {
        format!("ap_uint<{}>", self.program.config.word_bits)
    }

    fn scalars(&self) -> &'a [String] {
        let kernel = self.kernel;
        &kernel.stencil_fn.scalars
    }

    fn emit_all(&mut self) {
        self.line(format!("// {} for '{}'", self.kernel.name, self.program.header.app_name));
        self.line("#include <cmath>");
        self.line("#include <ap_int.h>");
        self.line("#include <hls_stream.h>");
        self.line(format!("#include \"{}.h\"", self.program.header.app_name));
        self.line("");
        self.emit_lane_helpers();
        self.emit_stencil_function();
        let kernel = self.kernel;
        for stage in &kernel.stages {
            self.emit_stage(stage);
        }
        self.emit_backbone();
        if let Some(exchange) = &kernel.exchange {
            self.emit_exchange(exchange);
        }
        self.emit_interface();
    }

    fn emit_lane_helpers(&mut self) {
        let word = self.word();
        self.open(format!("static inline float lane(const {} &w, int low) {{", word));
        self.line("union { unsigned int u; float f; } bits;");
        self.line(format!("bits.u = w.range(low + {}, low);", LANE_BITS - 1));
        self.line("return bits.f;");
        self.close("}");
        self.line("");
        self.open("static inline unsigned int lane_bits(float v) {");
        self.line("union { unsigned int u; float f; } bits;");
        self.line("bits.f = v;");
        self.line("return bits.u;");
        self.close("}");
        self.line("");
    }

    fn emit_stencil_function(&mut self) {
        let kernel = self.kernel;
        let f = &kernel.stencil_fn;
        let params: Vec<String> = f.params.iter().map(|p| format!("float {}", p)).collect();
        self.open(format!("static float {}({}) {{", f.name, params.join(", ")));
        for (name, expr) in &f.lets {
            self.line(format!("float {} = {};", name, expr));
        }
        self.line(format!("return {};", f.result));
        self.close("}");
        self.line("");
    }

    fn stage_params(&self, stage: &StageEmission) -> Vec<String> {
        let word = self.word();
        let mut memory = BTreeSet::new();
        let mut streams = BTreeSet::new();
        let endpoints = stage.feeds.iter().map(|(_, f)| &f.endpoint).chain(std::iter::once(&stage.output));
        for endpoint in endpoints {
            match endpoint {
                Endpoint::Memory { buffer } => memory.insert(buffer.clone()),
                Endpoint::Stream { name } => streams.insert(name.clone()),
            };
        }
        let mut params: Vec<String> = memory.into_iter().map(|m| format!("{} *{}", word, m)).collect();
        params.extend(streams.into_iter().map(|s| format!("hls::stream<{}> &{}", word, s)));
        params.extend(self.scalars().iter().map(|s| format!("float {}", s)));
        if self.program.header.stage_count > 1 {
            params.push("bool skip".to_string());
        }
        params
    }

    fn emit_stage(&mut self, stage: &StageEmission) {
        let params = self.stage_params(stage);
        self.open(format!("static void {}({}) {{", stage.name, params.join(", ")));
        let ports: BTreeSet<&str> = stage
            .events
            .iter()
            .filter_map(|e| match e {
                EmitEvent::LaneRead { port, .. } => Some(port.as_str()),
                _ => None,
            })
            .collect();
        for event in &stage.events {
            self.emit_event(event, &ports);
        }
        self.close("}");
        self.line("");
    }

    fn emit_event(&mut self, event: &EmitEvent, ports: &BTreeSet<&str>) {
        let word = self.word();
        let unroll = self.program.config.unroll_factor;
        match event {
            EmitEvent::Declare { element } => match element.kind {
                StorageKind::Queue { depth } => {
                    self.line(format!("hls::stream<{}> {};", word, element.name));
                    self.line(format!("#pragma HLS stream variable={} depth={}", element.name, depth));
                }
                StorageKind::Block { .. } | StorageKind::Popped { .. } => {
                    self.line(format!("{} {} = 0;", word, element.name));
                }
            },
            EmitEvent::Init { op } => self.emit_init(op),
            EmitEvent::BeginLoop { trip_count, .. } => {
                self.open(format!("for (int i = 0; i < {}; i++) {{", trip_count));
                self.line("#pragma HLS pipeline II=1");
            }
            EmitEvent::LaneRead { port, read } => {
                self.line(format!("float {}[{}];", port, unroll));
                self.open(format!("for (int k = 0; k < {}; k++) {{", unroll));
                self.line("#pragma HLS unroll");
                let value = match read {
                    LaneRead::Direct(slice) => lane_expr(slice),
                    LaneRead::Switch { split, low, high } => {
                        format!("k < {} ? {} : {}", split, lane_expr(low), lane_expr(high))
                    }
                };
                self.line(format!("{}[k] = {};", port, value));
                self.close("}");
            }
            EmitEvent::Compute {
                function,
                args,
                skip_forward,
            } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|a| if ports.contains(a.as_str()) { format!("{}[k]", a) } else { a.clone() })
                    .collect();
                let call = format!("{}({})", function, args.join(", "));
                let value = match skip_forward {
                    Some(port) => format!("skip ? {}[k] : {}", port, call),
                    None => call,
                };
                self.line(format!("{} out_word;", word));
                self.open(format!("for (int k = 0; k < {}; k++) {{", unroll));
                self.line("#pragma HLS unroll");
                self.line(format!(
                    "out_word.range(k * {} + {}, k * {}) = lane_bits({});",
                    LANE_BITS,
                    LANE_BITS - 1,
                    LANE_BITS,
                    value
                ));
                self.close("}");
            }
            EmitEvent::Store { target, first } => match target {
                Endpoint::Memory { buffer } => self.line(format!("{}[{} + i] = out_word;", buffer, first)),
                Endpoint::Stream { name } => self.line(format!("{}.write(out_word);", name)),
            },
            EmitEvent::Advance { op } => self.emit_advance(op),
            EmitEvent::EndLoop => self.close("}"),
            EmitEvent::Drain { op } => {
                let (source, words) = match op {
                    DrainOp::Queue { queue, words } => (queue.as_str(), *words),
                    DrainOp::Upstream { source, words } => (source.name(), *words),
                };
                self.line(format!("for (int d = 0; d < {}; d++) {}.read();", words, source));
            }
        }
    }

    fn emit_init(&mut self, op: &InitOp) {
        match op {
            InitOp::Discard { source, words } => {
                self.line(format!("for (int d = 0; d < {}; d++) {}.read();", words, source.name()));
            }
            InitOp::Load {
                target,
                source,
                address,
            } => self.line(format!("{} = {};", target, read_at(source, &address.to_string()))),
            InitOp::Fill {
                queue,
                source,
                first,
                count,
            } => {
                self.open(format!("for (int f = 0; f < {}; f++) {{", count));
                self.line("#pragma HLS pipeline II=1");
                self.line(format!("{}.write({});", queue, read_at(source, &format!("{} + f", first))));
                self.close("}");
            }
        }
    }

    fn emit_advance(&mut self, op: &AdvanceOp) {
        match op {
            AdvanceOp::Delay { target, source } => self.line(format!("{} = {};", target, source)),
            AdvanceOp::Shift { target, source } => {
                let value = take(source);
                self.line(assign(target, &value));
            }
            AdvanceOp::Fetch {
                target,
                source,
                first,
                valid_steps,
            } => {
                let value = format!(
                    "i < {} ? {} : {}(0)",
                    valid_steps,
                    read_at(source, &format!("{} + i", first)),
                    self.word()
                );
                self.line(assign(target, &value));
            }
        }
    }

    fn emit_backbone(&mut self) {
        let word = self.word();
        let program = self.program;
        let kernel = self.kernel;
        let mut params: Vec<String> = program.buffers.iter().map(|b| format!("{} *{}", word, b.var)).collect();
        params.push(format!("{} *{}", word, self.output_var()));
        params.extend(self.scalars().iter().map(|s| format!("float {}", s)));
        if program.header.stage_count > 1 {
            params.extend((0..kernel.stages.len()).map(|s| format!("bool skip_{}", s)));
        }

        self.open(format!("static void backbone({}) {{", params.join(", ")));
        self.line("#pragma HLS dataflow");
        for channel in &kernel.channels {
            self.line(format!("hls::stream<{}> {};", word, channel));
            self.line(format!(
                "#pragma HLS stream variable={} depth={}",
                channel, program.config.channel_depth
            ));
        }
        for (s, stage) in kernel.stages.iter().enumerate() {
            let mut args: Vec<String> = self
                .stage_params(stage)
                .iter()
                .filter_map(|p| p.rsplit([' ', '*', '&']).next().map(str::to_string))
                .collect();
            if program.header.stage_count > 1 {
                args.pop();
                args.push(format!("skip_{}", s));
            }
            self.line(format!("{}({});", stage.name, args.join(", ")));
        }
        self.close("}");
        self.line("");
    }

    fn output_var(&self) -> &'a str {
        self.kernel
            .stages
            .last()
            .map(|s| s.output.name())
            .unwrap_or(self.program.host.result_buffer.as_str())
    }

    fn exchange_params(&self, exchange: &ExchangeProtocol) -> Vec<(String, String)> {
        let word = self.word();
        let mut params = Vec::new();
        for neighbor in [Neighbor::Above, Neighbor::Below] {
            for transfer in [Transfer::Send, Transfer::Receive] {
                if exchange.steps.iter().any(|s| s.neighbor == neighbor && s.transfer == transfer) {
                    let name = stream_name(neighbor, transfer);
                    params.push((format!("hls::stream<{}> &{}", word, name), name));
                }
            }
        }
        params
    }

    fn emit_exchange(&mut self, exchange: &ExchangeProtocol) {
        let word = self.word();
        let mut params = vec![format!("{} *buf", word)];
        params.extend(self.exchange_params(exchange).into_iter().map(|(p, _)| p));
        self.open(format!("static void exchange({}) {{", params.join(", ")));
        for step in &exchange.steps {
            let words = exchange.words(step);
            let first = step.first_row * exchange.words_per_row;
            let stream = stream_name(step.neighbor, step.transfer);
            self.open(format!("for (int x = 0; x < {}; x++) {{", words));
            self.line("#pragma HLS pipeline II=1");
            match step.transfer {
                Transfer::Send => self.line(format!("{}.write(buf[{} + x]);", stream, first)),
                Transfer::Receive => self.line(format!("buf[{} + x] = {}.read();", first, stream)),
            }
            self.close("}");
        }
        self.close("}");
        self.line("");
    }

    fn emit_interface(&mut self) {
        let word = self.word();
        let kernel = self.kernel;
        let iterated = self.program.buffers.last().map(|b| b.var.clone()).unwrap_or_default();
        let output = self.output_var().to_string();
        let exchange_streams = kernel.exchange.as_ref().map(|e| self.exchange_params(e)).unwrap_or_default();

        let mut params: Vec<String> = self.program.buffers.iter().map(|b| format!("{} *{}", word, b.var)).collect();
        params.push(format!("{} *{}", word, output));
        params.extend(self.scalars().iter().map(|s| format!("float {}", s)));
        params.extend(exchange_streams.iter().map(|(p, _)| p.clone()));

        self.open(format!("extern \"C\" void {}({}) {{", kernel.name, params.join(", ")));
        let sweeps = kernel.schedule.sweeps.len();
        let stages = self.program.header.stage_count;
        let call = |reads: &str, writes: &str| -> String {
            let mut args: Vec<String> = self
                .program
                .buffers
                .iter()
                .map(|b| if b.var == iterated { reads.to_string() } else { b.var.clone() })
                .collect();
            args.push(writes.to_string());
            args.extend(self.scalars().iter().cloned());
            if stages > 1 {
                args.extend((0..stages).map(|s| format!("SKIPS[sweep][{}]", s)));
            }
            format!("backbone({});", args.join(", "))
        };
        let even = call(&iterated, &output);
        let odd = call(&output, &iterated);
        let stream_args: Vec<String> = exchange_streams.iter().map(|(_, n)| n.clone()).collect();

        if stages > 1 {
            let rows: Vec<String> = kernel
                .schedule
                .sweeps
                .iter()
                .map(|sweep| {
                    let flags: Vec<&str> = sweep.skips.iter().map(|&k| if k { "true" } else { "false" }).collect();
                    format!("{{{}}}", flags.join(", "))
                })
                .collect();
            self.line(format!(
                "static const bool SKIPS[{}][{}] = {{{}}};",
                sweeps,
                stages,
                rows.join(", ")
            ));
        }
        self.open(format!("for (int sweep = 0; sweep < {}; sweep++) {{", sweeps));
        self.open("if (sweep % 2 == 0) {");
        self.line(even);
        if kernel.exchange.is_some() {
            self.line(format!("if (sweep + 1 < {}) exchange({}, {});", sweeps, output, stream_args.join(", ")));
        }
        self.close("} else {");
        self.depth += 1;
        self.line(odd);
        if kernel.exchange.is_some() {
            self.line(format!("if (sweep + 1 < {}) exchange({}, {});", sweeps, iterated, stream_args.join(", ")));
        }
        self.close("}");
        self.close("}");
        self.close("}");
    }
}

fn stream_name(neighbor: Neighbor, transfer: Transfer) -> String {
    let direction = match neighbor {
        Neighbor::Above => "above",
        Neighbor::Below => "below",
    };
    match transfer {
        Transfer::Send => format!("to_{}", direction),
        Transfer::Receive => format!("from_{}", direction),
    }
}

fn lane_expr(slice: &LaneSlice) -> String {
    if slice.shift_bits >= 0 {
        format!("lane({}, k * {} + {})", slice.element, LANE_BITS, slice.shift_bits)
    } else {
        format!("lane({}, k * {} - {})", slice.element, LANE_BITS, -slice.shift_bits)
    }
}

fn read_at(source: &Endpoint, address: &str) -> String {
    match source {
        Endpoint::Memory { buffer } => format!("{}[{}]", buffer, address),
        Endpoint::Stream { name } => format!("{}.read()", name),
    }
}

fn take(element: &StorageElement) -> String {
    match element.kind {
        StorageKind::Queue { .. } => format!("{}.read()", element.name),
        _ => element.name.clone(),
    }
}

fn assign(target: &StorageElement, value: &str) -> String {
    match target.kind {
        StorageKind::Queue { .. } => format!("{}.write({});", target.name, value),
        _ => format!("{} = {};", target.name, value),
    }
}
