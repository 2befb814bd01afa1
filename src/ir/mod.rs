//! Immutable stencil IR
//!
//! Every node is a plain value: equality and hashing are structural, and a
//! transform always produces a new tree (see [`visit`]). The leaves of an
//! expression are always wrapped in an [`Operand`], mirroring the grammar.

pub mod lower;
pub mod simplify;
pub mod visit;

use std::fmt;
use std::hash::{Hash, Hasher};

pub use visit::{visit, Rewrite};

/// Any IR node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Program(Program),
    InputStmt(InputStmt),
    OutputStmt(OutputStmt),
    Let(Let),
    Ref(Ref),
    Binary(BinaryOp),
    Unary(Unary),
    Operand(Operand),
    Call(Call),
    Var(Var),
    Num(Num),
}

/// Array access at absolute integer coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
    pub name: String,
    pub idx: Vec<i64>,
}

/// The binary precedence levels of the language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Expr,
    LogicAnd,
    BinaryOr,
    Xor,
    BinaryAnd,
    EqCmp,
    LtCmp,
    AddSub,
    MulDiv,
}

impl BinaryKind {
    /// Map a grammar rule name to its IR constructor
    pub fn from_rule(rule: &str) -> Option<Self> {
        match rule {
            "Expr" => Some(BinaryKind::Expr),
            "LogicAnd" => Some(BinaryKind::LogicAnd),
            "BinaryOr" => Some(BinaryKind::BinaryOr),
            "Xor" => Some(BinaryKind::Xor),
            "BinaryAnd" => Some(BinaryKind::BinaryAnd),
            "EqCmp" => Some(BinaryKind::EqCmp),
            "LtCmp" => Some(BinaryKind::LtCmp),
            "AddSub" => Some(BinaryKind::AddSub),
            "MulDiv" => Some(BinaryKind::MulDiv),
            _ => None,
        }
    }

    pub fn rule(&self) -> &'static str {
        match self {
            BinaryKind::Expr => "Expr",
            BinaryKind::LogicAnd => "LogicAnd",
            BinaryKind::BinaryOr => "BinaryOr",
            BinaryKind::Xor => "Xor",
            BinaryKind::BinaryAnd => "BinaryAnd",
            BinaryKind::EqCmp => "EqCmp",
            BinaryKind::LtCmp => "LtCmp",
            BinaryKind::AddSub => "AddSub",
            BinaryKind::MulDiv => "MulDiv",
        }
    }

    /// Operators this level accepts
    pub fn operators(&self) -> &'static [&'static str] {
        match self {
            BinaryKind::Expr => &["||"],
            BinaryKind::LogicAnd => &["&&"],
            BinaryKind::BinaryOr => &["|"],
            BinaryKind::Xor => &["^"],
            BinaryKind::BinaryAnd => &["&"],
            BinaryKind::EqCmp => &["==", "!="],
            BinaryKind::LtCmp => &["<=", ">=", "<", ">"],
            BinaryKind::AddSub => &["+", "-"],
            BinaryKind::MulDiv => &["*", "/", "%"],
        }
    }

    /// Levels with a single operator that may be regrouped freely
    pub fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryKind::Expr
                | BinaryKind::LogicAnd
                | BinaryKind::BinaryOr
                | BinaryKind::Xor
                | BinaryKind::BinaryAnd
        )
    }
}

/// `operand (operator operand)*`, left-associative
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryOp {
    pub kind: BinaryKind,
    pub operands: Vec<Node>,
    /// Always one shorter than `operands`
    pub operators: Vec<String>,
}

/// Prefix operators applied right to left; `operators[0]` is outermost
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unary {
    pub operand: Box<Node>,
    pub operators: Vec<String>,
}

/// Exactly one leaf alternative of an expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Call(Call),
    Ref(Ref),
    Num(Num),
    Expr(Box<Node>),
    Var(Var),
}

impl Operand {
    /// View the alternative as a node of its own
    pub fn to_node(&self) -> Node {
        match self {
            Operand::Call(c) => Node::Call(c.clone()),
            Operand::Ref(r) => Node::Ref(r.clone()),
            Operand::Num(n) => Node::Num(*n),
            Operand::Expr(e) => e.as_ref().clone(),
            Operand::Var(v) => Node::Var(v.clone()),
        }
    }

    /// Fit an arbitrary node back into an operand slot
    pub fn from_node(node: Node) -> Self {
        match node {
            Node::Call(c) => Operand::Call(c),
            Node::Ref(r) => Operand::Ref(r),
            Node::Num(n) => Operand::Num(n),
            Node::Var(v) => Operand::Var(v),
            Node::Operand(o) => o,
            other => Operand::Expr(Box::new(other)),
        }
    }
}

/// Call to one of the supported math functions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub name: String,
    pub args: Vec<Node>,
}

/// Scalar, non-indexed value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: String,
}

impl Var {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Numeric literal; equality and hashing use the bit pattern
#[derive(Debug, Clone, Copy)]
pub struct Num(pub f64);

impl PartialEq for Num {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Num {}

impl Hash for Num {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Named intermediate binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Let {
    pub name: String,
    pub expr: Box<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputStmt {
    pub name: String,
    pub size: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputStmt {
    pub target: Ref,
    pub lets: Vec<Let>,
    pub expr: Box<Node>,
}

impl OutputStmt {
    pub fn name(&self) -> &str {
        &self.target.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Program {
    pub iterate: u32,
    pub kernel_name: String,
    pub partition_count: u32,
    pub inputs: Vec<InputStmt>,
    pub output: OutputStmt,
}

impl Node {
    /// Leaf constructors, mostly for tests and rewrites
    pub fn reference(name: &str, idx: &[i64]) -> Self {
        Node::Operand(Operand::Ref(Ref {
            name: name.to_string(),
            idx: idx.to_vec(),
        }))
    }

    pub fn num(value: f64) -> Self {
        Node::Operand(Operand::Num(Num(value)))
    }

    pub fn var(name: &str) -> Self {
        Node::Operand(Operand::Var(Var::new(name)))
    }

    pub fn binary(kind: BinaryKind, operands: Vec<Node>, operators: &[&str]) -> Self {
        Node::Binary(BinaryOp {
            kind,
            operands,
            operators: operators.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Numeric value if this node is a literal
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Node::Num(n) | Node::Operand(Operand::Num(n)) => Some(n.0),
            _ => None,
        }
    }
}

/// Format a literal the way C expects a float constant
fn fmt_num(value: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.is_nan() {
        write!(f, "NAN")
    } else if value.is_infinite() {
        write!(f, "{}INFINITY", if value < 0.0 { "-" } else { "" })
    } else if value.abs() >= 1e15 {
        write!(f, "{:e}", value)
    } else if value.fract() == 0.0 {
        write!(f, "{:.1}", value)
    } else {
        write!(f, "{}", value)
    }
}

/// `-` `-` and `+` `+` side by side would lex as one C operator
fn fuses(left: &str, right: &str) -> bool {
    matches!(
        (left.chars().last(), right.chars().next()),
        (Some('-'), Some('-')) | (Some('+'), Some('+'))
    )
}

fn join<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(sep)
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, join(&self.idx, ", "))
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_num(self.0, f)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Call(c) => write!(f, "{}", Node::Call(c.clone())),
            Operand::Ref(r) => write!(f, "{}", r),
            Operand::Num(n) => write!(f, "{}", n),
            Operand::Expr(e) => write!(f, "({})", e),
            Operand::Var(v) => write!(f, "{}", v.name),
        }
    }
}

/// Expressions print as C; statements print in the DSL's own syntax
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Binary(op) => {
                write!(f, "{}", op.operands[0])?;
                for (operator, operand) in op.operators.iter().zip(&op.operands[1..]) {
                    write!(f, " {} {}", operator, operand)?;
                }
                Ok(())
            }
            Node::Unary(u) => {
                let mut text = String::new();
                for operator in &u.operators {
                    if fuses(&text, operator) {
                        text.push(' ');
                    }
                    text.push_str(operator);
                }
                let operand = u.operand.to_string();
                if fuses(&text, &operand) {
                    text.push(' ');
                }
                write!(f, "{}{}", text, operand)
            }
            Node::Operand(o) => write!(f, "{}", o),
            Node::Call(c) => write!(f, "{}({})", c.name, join(&c.args, ", ")),
            Node::Ref(r) => write!(f, "{}", r),
            Node::Var(v) => write!(f, "{}", v.name),
            Node::Num(n) => write!(f, "{}", n),
            Node::Let(l) => write!(f, "{} = {}", l.name, l.expr),
            Node::InputStmt(s) => write!(f, "input {}({})", s.name, join(&s.size, ", ")),
            Node::OutputStmt(s) => {
                for l in &s.lets {
                    writeln!(f, "{} = {}", l.name, l.expr)?;
                }
                write!(f, "output {} = {}", s.target, s.expr)
            }
            Node::Program(p) => {
                writeln!(f, "kernel: {}", p.kernel_name)?;
                writeln!(f, "iterate: {}", p.iterate)?;
                writeln!(f, "kernel count: {}", p.partition_count)?;
                for input in &p.inputs {
                    writeln!(f, "{}", Node::InputStmt(input.clone()))?;
                }
                write!(f, "{}", Node::OutputStmt(p.output.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sum() -> Node {
        Node::binary(
            BinaryKind::AddSub,
            vec![Node::reference("a", &[0, -1]), Node::num(2.0)],
            &["+"],
        )
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let mut set = HashSet::new();
        set.insert(sum());
        assert!(set.contains(&sum()));
        assert_ne!(sum(), Node::num(2.0));
    }

    #[test]
    fn test_num_compares_bit_patterns() {
        assert_eq!(Num(0.5), Num(0.5));
        assert_ne!(Num(0.0), Num(-0.0));
    }

    #[test]
    fn test_rule_mapping_round_trips() {
        for (rule, operators) in crate::ast::BINARY_RULES {
            let kind = BinaryKind::from_rule(rule).unwrap();
            assert_eq!(kind.rule(), rule);
            assert_eq!(kind.operators(), operators);
        }
        assert_eq!(BinaryKind::from_rule("Pow"), None);
    }

    #[test]
    fn test_display_as_c() {
        let nested = Node::binary(
            BinaryKind::MulDiv,
            vec![Node::Operand(Operand::Expr(Box::new(sum()))), Node::var("w")],
            &["*"],
        );
        assert_eq!(nested.to_string(), "(a(0, -1) + 2.0) * w");
    }

    #[test]
    fn test_adjacent_signs_stay_apart() {
        let twice = Node::Unary(Unary {
            operand: Box::new(Node::var("x")),
            operators: vec!["-".to_string(), "-".to_string()],
        });
        assert_eq!(twice.to_string(), "- -x");
        let negated = Node::Unary(Unary {
            operand: Box::new(Node::num(-3.0)),
            operators: vec!["-".to_string()],
        });
        assert_eq!(negated.to_string(), "- -3.0");
        let mixed = Node::Unary(Unary {
            operand: Box::new(Node::var("x")),
            operators: vec!["-".to_string(), "!".to_string()],
        });
        assert_eq!(mixed.to_string(), "-!x");
    }

    #[test]
    fn test_literals_are_valid_c_constants() {
        assert_eq!(Node::num(2.0).to_string(), "2.0");
        assert_eq!(Node::num(0.25).to_string(), "0.25");
        assert_eq!(Node::num(1e20).to_string(), "1e20");
        assert_eq!(Node::num(-2.5e16).to_string(), "-2.5e16");
        assert_eq!(Node::num(f64::INFINITY).to_string(), "INFINITY");
        assert_eq!(Node::num(f64::NEG_INFINITY).to_string(), "-INFINITY");
    }

    #[test]
    fn test_operand_from_node() {
        assert!(matches!(Operand::from_node(Node::Var(Var::new("x"))), Operand::Var(_)));
        assert!(matches!(Operand::from_node(sum()), Operand::Expr(_)));
        assert!(matches!(Operand::from_node(Node::num(1.0)), Operand::Num(_)));
    }
}
