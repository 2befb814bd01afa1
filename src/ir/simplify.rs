//! Local simplification of the IR
//!
//! Runs bottom-up through the `post` hook of [`visit`](super::visit), so every
//! rule sees children that are already simplified:
//!
//! - single-operand precedence levels and operator-less `Unary` nodes collapse
//! - parentheses around a leaf are dropped
//! - parenthesized chains of the same level are flattened where regrouping
//!   keeps the meaning (`a - (b + c)` becomes `a - b - c`)
//! - leading runs of literals in `+ -` and `* / %` chains are folded, as are
//!   `-` and `+` applied to a literal
//! - a pair of adjacent `-` cancels

use super::visit::visit;
use super::{BinaryKind, BinaryOp, Node, Num, Operand, Rewrite, Unary};

/// Simplify a tree; the input is left untouched
pub fn simplify(node: &Node) -> Node {
    let mut post = |node: &mut Node, _: &mut ()| simplify_local(node);
    visit(
        node,
        &mut |_: &mut Node, _: &mut ()| Rewrite::Descend,
        &mut (),
        None,
        Some(&mut post),
    )
}

fn simplify_local(node: &mut Node) {
    let replacement = match node {
        Node::Binary(op) => simplify_binary(op),
        Node::Unary(u) => simplify_unary(u),
        Node::Operand(Operand::Expr(inner)) => match inner.as_ref() {
            Node::Operand(_) | Node::Call(_) | Node::Var(_) | Node::Num(_) | Node::Ref(_) => {
                Some(Node::Operand(Operand::from_node(inner.as_ref().clone())))
            }
            _ => None,
        },
        _ => None,
    };
    if let Some(r) = replacement {
        *node = r;
    }
}

fn simplify_binary(op: &mut BinaryOp) -> Option<Node> {
    flatten(op);
    fold_constants(op);
    if op.operands.len() == 1 {
        return op.operands.pop().map(as_operand);
    }
    None
}

/// A collapsed expression placed where an operand used to be
fn as_operand(node: Node) -> Node {
    match node {
        Node::Binary(_) | Node::Unary(_) | Node::Operand(_) => node,
        leaf => Node::Operand(Operand::from_node(leaf)),
    }
}

/// The same-kind chain hidden behind an operand, if any
fn nested_chain(node: &Node, kind: BinaryKind) -> Option<&BinaryOp> {
    let inner = match node {
        Node::Operand(Operand::Expr(inner)) => inner.as_ref(),
        other => other,
    };
    match inner {
        Node::Binary(b) if b.kind == kind => Some(b),
        _ => None,
    }
}

/// Splice nested chains of the same level into `op`
fn flatten(op: &mut BinaryOp) {
    let mut operands = Vec::with_capacity(op.operands.len());
    let mut operators: Vec<String> = Vec::with_capacity(op.operators.len());

    for (i, operand) in op.operands.iter().enumerate() {
        let before = if i == 0 { None } else { Some(op.operators[i - 1].as_str()) };

        let spliced = nested_chain(operand, op.kind).and_then(|inner| {
            let inner_ops: Option<Vec<String>> = match (op.kind, before) {
                // Leading operand: left associativity already groups it first
                (_, None) => Some(inner.operators.clone()),
                (kind, Some(_)) if kind.is_associative() => Some(inner.operators.clone()),
                (BinaryKind::AddSub, Some("+")) => Some(inner.operators.clone()),
                (BinaryKind::AddSub, Some("-")) => Some(
                    inner
                        .operators
                        .iter()
                        .map(|o| if o == "+" { "-".to_string() } else { "+".to_string() })
                        .collect(),
                ),
                (BinaryKind::MulDiv, Some("*")) if inner.operators.iter().all(|o| o == "*") => {
                    Some(inner.operators.clone())
                }
                _ => None,
            };
            inner_ops.map(|ops| (inner, ops))
        });

        match spliced {
            Some((inner, inner_ops)) => {
                if let Some(b) = before {
                    operators.push(b.to_string());
                }
                operands.extend(inner.operands.iter().cloned());
                operators.extend(inner_ops);
            }
            None => {
                if let Some(b) = before {
                    operators.push(b.to_string());
                }
                operands.push(operand.clone());
            }
        }
    }

    op.operands = operands;
    op.operators = operators;
}

fn apply(kind: BinaryKind, operator: &str, lhs: f64, rhs: f64) -> Option<f64> {
    match (kind, operator) {
        (BinaryKind::AddSub, "+") => Some(lhs + rhs),
        (BinaryKind::AddSub, "-") => Some(lhs - rhs),
        (BinaryKind::MulDiv, "*") => Some(lhs * rhs),
        (BinaryKind::MulDiv, "/") if rhs != 0.0 => Some(lhs / rhs),
        _ => None,
    }
}

/// Fold the leading run of literals
fn fold_constants(op: &mut BinaryOp) {
    while op.operands.len() > 1 {
        let (Some(lhs), Some(rhs)) = (op.operands[0].as_num(), op.operands[1].as_num()) else {
            break;
        };
        let Some(value) = apply(op.kind, &op.operators[0], lhs, rhs) else {
            break;
        };
        op.operands.drain(0..2);
        op.operands.insert(0, Node::Operand(Operand::Num(Num(value))));
        op.operators.remove(0);
    }
}

fn simplify_unary(u: &mut Unary) -> Option<Node> {
    let mut operators = u.operators.clone();
    let mut operand = u.operand.as_ref().clone();

    while let Some(last) = operators.last() {
        let len = operators.len();
        if last == "-" && len >= 2 && operators[len - 2] == "-" {
            operators.truncate(len - 2);
            continue;
        }
        let folded = match (last.as_str(), operand.as_num()) {
            ("+", _) => Some(operand.clone()),
            ("-", Some(v)) => Some(Node::Operand(Operand::Num(Num(-v)))),
            _ => None,
        };
        match folded {
            Some(n) => {
                operand = n;
                operators.pop();
            }
            None => break,
        }
    }

    if operators.is_empty() {
        return Some(as_operand(operand));
    }
    if operators != u.operators {
        return Some(Node::Unary(Unary {
            operand: Box::new(operand),
            operators,
        }));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::lower::lower_expr;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn simplified(expr: &str) -> String {
        let source = format!("ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) output b(0, 0) = {}", expr);
        let program = Parser::new(&source).parse_program().unwrap();
        let node = lower_expr(&program.output_stmt.expr).unwrap();
        simplify(&node).to_string()
    }

    #[test]
    fn test_trivial_levels_collapse() {
        assert_eq!(simplified("a(0, 0)"), "a(0, 0)");
        assert_eq!(simplified("a(0, 1) * 2"), "a(0, 1) * 2.0");
    }

    #[test]
    fn test_leaf_parentheses_dropped() {
        assert_eq!(simplified("((a(0, 0))) + (w)"), "a(0, 0) + w");
    }

    #[test]
    fn test_add_chains_flatten_with_sign_flip() {
        assert_eq!(
            simplified("a(0, -1) - (a(0, 0) + a(0, 1) - a(1, 0))"),
            "a(0, -1) - a(0, 0) - a(0, 1) + a(1, 0)"
        );
        assert_eq!(simplified("(a(0, 0) - a(0, 1)) + a(1, 0)"), "a(0, 0) - a(0, 1) + a(1, 0)");
    }

    #[test]
    fn test_division_does_not_flatten() {
        assert_eq!(simplified("a(0, 0) / (a(0, 1) * a(1, 0))"), "a(0, 0) / (a(0, 1) * a(1, 0))");
        assert_eq!(simplified("a(0, 0) * (a(0, 1) * a(1, 0))"), "a(0, 0) * a(0, 1) * a(1, 0)");
    }

    #[test]
    fn test_mixed_levels_keep_parentheses() {
        assert_eq!(simplified("(a(0, 0) + a(0, 1)) * 0.25"), "(a(0, 0) + a(0, 1)) * 0.25");
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(simplified("1 + 2 + a(0, 0)"), "3.0 + a(0, 0)");
        assert_eq!(simplified("1 / 4 * a(0, 0)"), "0.25 * a(0, 0)");
        assert_eq!(simplified("-2 * a(0, 0)"), "-2.0 * a(0, 0)");
        assert_eq!(simplified("a(0, 0) * -(-(3))"), "a(0, 0) * 3.0");
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        assert_eq!(simplified("1 / 0 + a(0, 0)"), "1.0 / 0.0 + a(0, 0)");
    }

    #[test]
    fn test_other_unary_operators_survive() {
        assert_eq!(simplified("!a(0, 0)"), "!a(0, 0)");
        assert_eq!(simplified("-+a(0, 0)"), "-a(0, 0)");
    }

    #[test]
    fn test_double_negation_cancels() {
        assert_eq!(simplified("- -a(0, 0)"), "a(0, 0)");
        assert_eq!(simplified("- - -a(0, 0)"), "-a(0, 0)");
        assert_eq!(simplified("!- -a(0, 0)"), "!a(0, 0)");
    }

    #[test]
    fn test_idempotent() {
        let source = "ITERATE: 1 KERNEL: k COUNT: 1 input a(8, 8) output b(0, 0) = (a(0, 0) + (a(0, 1) + 1 + 2)) * (w)";
        let program = Parser::new(source).parse_program().unwrap();
        let once = simplify(&lower_expr(&program.output_stmt.expr).unwrap());
        assert_eq!(simplify(&once), once);
    }
}
