//! Relative-reference analysis
//!
//! Turns the absolute coordinates written in the output statement into offsets
//! relative to the output coordinate, groups them per input and per row, and
//! checks the program is something the accelerator can run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::ir::simplify::simplify;
use crate::ir::visit::rewrite;
use crate::ir::{Let, Node, OutputStmt, Program, Rewrite};
use crate::stencil::Stencil;

/// Coordinate difference between a reference and the output point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset(pub Vec<i64>);

impl Offset {
    pub fn row(&self) -> i64 {
        self.0.first().copied().unwrap_or(0)
    }

    pub fn col(&self) -> i64 {
        self.0.get(1).copied().unwrap_or(0)
    }

    pub fn is_origin(&self) -> bool {
        self.0.iter().all(|c| *c == 0)
    }
}

/// Offsets each input is read at
pub type Footprint = BTreeMap<String, BTreeSet<Offset>>;

/// Column offsets per row offset
pub type RowRefs = BTreeMap<i64, BTreeSet<i64>>;

/// `idx - origin`, coordinate by coordinate
pub fn relative(idx: &[i64], origin: &[i64]) -> CompileResult<Offset> {
    if idx.len() != origin.len() {
        return Err(CompileError::dimension_mismatch(origin.len(), idx.len()));
    }
    Ok(Offset(idx.iter().zip(origin).map(|(i, o)| i - o).collect()))
}

struct RefCollector {
    origin: Vec<i64>,
    refs: Footprint,
    error: Option<CompileError>,
}

/// Every array reference under `node`, relative to `origin`
pub fn collect_references(node: &Node, origin: &[i64]) -> CompileResult<Footprint> {
    let mut collector = RefCollector {
        origin: origin.to_vec(),
        refs: Footprint::new(),
        error: None,
    };
    rewrite(
        node,
        &mut |node: &mut Node, c: &mut RefCollector| {
            if let Node::Ref(r) = node {
                match relative(&r.idx, &c.origin) {
                    Ok(offset) => {
                        c.refs.entry(r.name.clone()).or_default().insert(offset);
                    }
                    Err(e) => {
                        c.error.get_or_insert(e);
                    }
                }
                return Rewrite::Replace(node.clone());
            }
            Rewrite::Descend
        },
        &mut collector,
    );
    match collector.error {
        Some(e) => Err(e),
        None => Ok(collector.refs),
    }
}

/// References of the whole output statement: lets first, then the expression
pub fn statement_references(stmt: &OutputStmt) -> CompileResult<Footprint> {
    let origin = &stmt.target.idx;
    let mut refs = Footprint::new();
    let exprs = stmt.lets.iter().map(|l| l.expr.as_ref()).chain(std::iter::once(stmt.expr.as_ref()));
    for expr in exprs {
        for (name, offsets) in collect_references(expr, origin)? {
            refs.entry(name).or_default().extend(offsets);
        }
    }
    Ok(refs)
}

/// Split 2-D offsets into rows
pub fn refs_by_row(offsets: &BTreeSet<Offset>) -> CompileResult<RowRefs> {
    let mut rows = RowRefs::new();
    for offset in offsets {
        if offset.0.len() != 2 {
            return Err(CompileError::UnsupportedDimensionality { dims: offset.0.len() });
        }
        rows.entry(offset.row()).or_default().insert(offset.col());
    }
    Ok(rows)
}

/// Names of every `Var` under `node`, in order of appearance
fn var_names(node: &Node) -> Vec<String> {
    let mut names = Vec::new();
    rewrite(
        node,
        &mut |node: &mut Node, names: &mut Vec<String>| {
            if let Node::Var(v) = node {
                if !names.contains(&v.name) {
                    names.push(v.name.clone());
                }
            }
            Rewrite::Descend
        },
        &mut names,
    );
    names
}

/// Analyzer for reference footprints and program checks
pub struct Analyzer {
    /// Declared input sizes
    shapes: HashMap<String, Vec<u64>>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            shapes: HashMap::new(),
        }
    }

    /// Analyze a program and produce the stencil model
    pub fn analyze(&mut self, program: &Program) -> CompileResult<Stencil> {
        let first = program
            .inputs
            .first()
            .ok_or_else(|| CompileError::config("program declares no inputs"))?;
        let size = first.size.clone();

        for input in &program.inputs {
            if input.size != size {
                return Err(CompileError::config(format!(
                    "input '{}' is {:?} but '{}' is {:?}; all inputs must share one grid",
                    input.name, input.size, first.name, size
                )));
            }
            if self.shapes.insert(input.name.clone(), input.size.clone()).is_some() {
                return Err(CompileError::config(format!("input '{}' declared twice", input.name)));
            }
        }

        self.check_header(program, &size)?;

        let output_var = program.output.name().to_string();
        if self.shapes.contains_key(&output_var) {
            return Err(CompileError::config(format!(
                "output '{}' must not also be an input",
                output_var
            )));
        }
        let output_idx = program.output.target.idx.clone();
        if output_idx.len() != size.len() {
            return Err(CompileError::dimension_mismatch(size.len(), output_idx.len()));
        }

        let output = self.simplify_statement(&program.output);
        let scalar_vars = self.scalar_vars(&output)?;

        let all_refs = statement_references(&output)?;
        for name in all_refs.keys() {
            if !self.shapes.contains_key(name) {
                return Err(CompileError::undefined(name.as_str()));
            }
        }
        let input_vars: Vec<String> = program.inputs.iter().map(|i| i.name.clone()).collect();
        for name in &input_vars {
            if !all_refs.contains_key(name) {
                return Err(CompileError::empty_footprint(name.as_str()));
            }
        }

        log::debug!(
            "analyzed '{}': {} inputs, {} ports, scalars {:?}",
            program.kernel_name,
            input_vars.len(),
            all_refs.values().map(BTreeSet::len).sum::<usize>(),
            scalar_vars
        );

        Ok(Stencil {
            iterate: program.iterate,
            kernel_name: program.kernel_name.clone(),
            partition_count: program.partition_count,
            size,
            input_vars,
            output_var,
            output_idx,
            output,
            all_refs,
            scalar_vars,
        })
    }

    fn check_header(&self, program: &Program, size: &[u64]) -> CompileResult<()> {
        if program.iterate == 0 {
            return Err(CompileError::config("ITERATE must be at least 1"));
        }
        if program.partition_count == 0 {
            return Err(CompileError::config("COUNT must be at least 1"));
        }
        let rows = size.first().copied().unwrap_or(0);
        if rows == 0 || rows % u64::from(program.partition_count) != 0 {
            return Err(CompileError::config(format!(
                "{} rows cannot be split evenly into {} partitions",
                rows, program.partition_count
            )));
        }
        Ok(())
    }

    fn simplify_statement(&self, stmt: &OutputStmt) -> OutputStmt {
        OutputStmt {
            target: stmt.target.clone(),
            lets: stmt
                .lets
                .iter()
                .map(|l| Let {
                    name: l.name.clone(),
                    expr: Box::new(simplify(&l.expr)),
                })
                .collect(),
            expr: Box::new(simplify(&stmt.expr)),
        }
    }

    /// Variables not bound by an earlier let become kernel parameters
    fn scalar_vars(&self, stmt: &OutputStmt) -> CompileResult<Vec<String>> {
        let bound: Vec<&str> = stmt.lets.iter().map(|l| l.name.as_str()).collect();
        let mut scalars = Vec::new();

        let exprs = stmt.lets.iter().map(|l| l.expr.as_ref()).chain(std::iter::once(stmt.expr.as_ref()));
        for (position, expr) in exprs.enumerate() {
            for name in var_names(expr) {
                if self.shapes.contains_key(&name) {
                    return Err(CompileError::config(format!(
                        "input '{}' is used without coordinates",
                        name
                    )));
                }
                match bound.iter().position(|b| *b == name) {
                    Some(at) if at < position => {}
                    Some(_) => return Err(CompileError::undefined(name)),
                    None if !scalars.contains(&name) => scalars.push(name),
                    None => {}
                }
            }
        }
        Ok(scalars)
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_program;
    use crate::parser::Parser;
    use proptest::prelude::*;

    fn analyze(source: &str) -> CompileResult<Stencil> {
        let ast = Parser::new(source).parse_program()?;
        let program = lower_program(&ast)?;
        Analyzer::new().analyze(&program)
    }

    fn offsets(list: &[[i64; 2]]) -> BTreeSet<Offset> {
        list.iter().map(|o| Offset(o.to_vec())).collect()
    }

    #[test]
    fn test_relative() {
        assert_eq!(relative(&[2, 3], &[1, 1]).unwrap(), Offset(vec![1, 2]));
        assert_eq!(relative(&[0, -1], &[0, 0]).unwrap(), Offset(vec![0, -1]));
        assert!(matches!(
            relative(&[1, 2, 3], &[0, 0]),
            Err(CompileError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_five_point_footprint() {
        let stencil = analyze(
            "ITERATE: 1 KERNEL: jacobi COUNT: 1 input a(5, 5)
             output b(0, 0) = a(-1, 0) + a(0, -1) + a(0, 0) + a(0, 1) + a(1, 0)",
        )
        .unwrap();

        let refs = stencil.refs("a").unwrap();
        assert_eq!(refs, &offsets(&[[-1, 0], [0, -1], [0, 0], [0, 1], [1, 0]]));

        let rows = refs_by_row(refs).unwrap();
        assert_eq!(rows[&-1], BTreeSet::from([0]));
        assert_eq!(rows[&0], BTreeSet::from([-1, 0, 1]));
        assert_eq!(rows[&1], BTreeSet::from([0]));
    }

    #[test]
    fn test_offsets_follow_output_coordinate() {
        let stencil = analyze(
            "ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) output b(1, 1) = a(1, 0) + a(2, 1)",
        )
        .unwrap();
        assert_eq!(stencil.refs("a").unwrap(), &offsets(&[[0, -1], [1, 0]]));
    }

    #[test]
    fn test_lets_contribute_references() {
        let stencil = analyze(
            "ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) input c(8, 8)
             output t = a(0, 1) * w
                    b(0, 0) = t + c(0, 0)",
        )
        .unwrap();
        assert_eq!(stencil.refs("a").unwrap(), &offsets(&[[0, 1]]));
        assert_eq!(stencil.scalar_vars, vec!["w".to_string()]);
        assert_eq!(stencil.iterated_var(), "c");
    }

    #[test]
    fn test_unused_input_is_an_error() {
        let result = analyze(
            "ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) input z(8, 8) output b(0, 0) = a(0, 0)",
        );
        assert!(matches!(result, Err(CompileError::EmptyFootprint { name }) if name == "z"));
    }

    #[test]
    fn test_reference_arity_is_checked() {
        let result = analyze("ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) output b(0, 0) = a(0)");
        assert!(matches!(result, Err(CompileError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_unknown_array_is_an_error() {
        let result = analyze("ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) output b(0, 0) = a(0, 0) + q(0, 0)");
        assert!(matches!(result, Err(CompileError::UndefinedVariable { name }) if name == "q"));
    }

    #[test]
    fn test_uneven_partitions_are_rejected() {
        let result = analyze("ITERATE: 1 KERNEL: k COUNT: 3 input a(8, 8) output b(0, 0) = a(0, 0)");
        assert!(matches!(result, Err(CompileError::ConfigError { .. })));
    }

    #[test]
    fn test_mismatched_input_sizes_are_rejected() {
        let result = analyze(
            "ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) input c(8, 16) output b(0, 0) = a(0, 0) + c(0, 0)",
        );
        assert!(matches!(result, Err(CompileError::ConfigError { .. })));
    }

    #[test]
    fn test_let_used_before_binding() {
        let result = analyze(
            "ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8)
             output s = t * 2
                    t = a(0, 0)
                    b(0, 0) = s",
        );
        assert!(matches!(result, Err(CompileError::UndefinedVariable { name }) if name == "t"));
    }

    #[test]
    fn test_refs_by_row_needs_two_dimensions() {
        let three_d: BTreeSet<Offset> = [Offset(vec![0, 0, 1])].into_iter().collect();
        assert!(matches!(
            refs_by_row(&three_d),
            Err(CompileError::UnsupportedDimensionality { dims: 3 })
        ));
    }

    proptest! {
        #[test]
        fn prop_relative_recovers_absolute(
            idx in proptest::collection::vec(-50i64..50, 2),
            origin in proptest::collection::vec(-50i64..50, 2),
        ) {
            let offset = relative(&idx, &origin).unwrap();
            let back: Vec<i64> = offset.0.iter().zip(&origin).map(|(d, o)| d + o).collect();
            prop_assert_eq!(back, idx);
        }

        #[test]
        fn prop_rows_partition_the_footprint(
            raw in proptest::collection::btree_set((-3i64..=3, -20i64..=20), 1..30),
        ) {
            let set: BTreeSet<Offset> = raw.iter().map(|(r, c)| Offset(vec![*r, *c])).collect();
            let rows = refs_by_row(&set).unwrap();
            let total: usize = rows.values().map(BTreeSet::len).sum();
            prop_assert_eq!(total, set.len());
            for (r, c) in &raw {
                prop_assert!(rows[r].contains(c));
            }
        }
    }
}
