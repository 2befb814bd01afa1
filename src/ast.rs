//! Abstract Syntax Tree definitions for the stencil DSL
//!
//! This is the contract between the front-end and the compiler core. The
//! parser in this crate produces it, but any front-end may hand one over as
//! JSON instead; lowering into the IR (see [`crate::ir::lower`]) validates it.
//!
//! Binary expressions keep the grammar rule they were reduced by (`"AddSub"`,
//! `"MulDiv"`, ...). Lowering maps those rule names to IR constructors.

use serde::{Deserialize, Serialize};

/// A complete stencil program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Number of stencil applications over the whole grid
    pub iterate: u32,
    /// Kernel name, used for generated identifiers
    pub app_name: String,
    /// Number of spatial partitions (kernels) the grid is split into
    pub kernel_count: u32,
    pub input_stmts: Vec<InputStmt>,
    pub output_stmt: OutputStmt,
}

/// `input name(rows, cols)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStmt {
    pub name: String,
    pub size: Vec<u64>,
}

/// `output let* ref = expr`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStmt {
    pub lets: Vec<Let>,
    pub target: Ref,
    pub expr: Expr,
}

/// Named intermediate binding: `name = expr`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Let {
    pub name: String,
    pub expr: Expr,
}

/// Array access at absolute integer coordinates: `a(-1, 0)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub name: String,
    pub idx: Vec<i64>,
}

/// Expression types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// One precedence level: `operand (operator operand)*`
    Binary {
        rule: String,
        operands: Vec<Expr>,
        operators: Vec<String>,
    },

    /// Prefix operators, outermost first: `-!x`
    Unary { operators: Vec<String>, operand: Box<Expr> },

    /// Function call: `fabs(x)`
    Call { name: String, args: Vec<Expr> },

    /// Array reference
    Ref(Ref),

    /// Numeric literal
    Num(f64),

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// Scalar variable (let-bound or a kernel parameter)
    Var(String),
}

impl Expr {
    pub fn binary(rule: &str, operands: Vec<Expr>, operators: Vec<&str>) -> Self {
        Expr::Binary {
            rule: rule.to_string(),
            operands,
            operators: operators.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn reference(name: &str, idx: &[i64]) -> Self {
        Expr::Ref(Ref {
            name: name.to_string(),
            idx: idx.to_vec(),
        })
    }
}

/// Grammar rules for binary precedence levels, loosest first, with the
/// operators each level accepts
pub const BINARY_RULES: [(&str, &[&str]); 9] = [
    ("Expr", &["||"]),
    ("LogicAnd", &["&&"]),
    ("BinaryOr", &["|"]),
    ("Xor", &["^"]),
    ("BinaryAnd", &["&"]),
    ("EqCmp", &["==", "!="]),
    ("LtCmp", &["<=", ">=", "<", ">"]),
    ("AddSub", &["+", "-"]),
    ("MulDiv", &["*", "/", "%"]),
];

/// Prefix operators accepted by `Unary`
pub const UNARY_OPERATORS: [&str; 4] = ["+", "-", "~", "!"];

/// Functions a stencil expression may call
pub const FUNCTIONS: [&str; 2] = ["fabs", "abs"];
