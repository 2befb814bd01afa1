//! Lowering from the front-end AST into the IR
//!
//! This is where a hand-built or JSON-supplied AST gets checked: rule names,
//! operator counts and spellings, and function names.

use super::{BinaryKind, BinaryOp, Call, InputStmt, Let, Node, Num, Operand, OutputStmt, Program, Ref, Unary, Var};
use crate::ast;
use crate::error::{CompileError, CompileResult};

pub fn lower_program(program: &ast::Program) -> CompileResult<Program> {
    let inputs = program
        .input_stmts
        .iter()
        .map(|s| InputStmt {
            name: s.name.clone(),
            size: s.size.clone(),
        })
        .collect();

    Ok(Program {
        iterate: program.iterate,
        kernel_name: program.app_name.clone(),
        partition_count: program.kernel_count,
        inputs,
        output: lower_output(&program.output_stmt)?,
    })
}

fn lower_output(stmt: &ast::OutputStmt) -> CompileResult<OutputStmt> {
    let lets = stmt
        .lets
        .iter()
        .map(|l| {
            Ok(Let {
                name: l.name.clone(),
                expr: Box::new(lower_expr(&l.expr)?),
            })
        })
        .collect::<CompileResult<Vec<_>>>()?;

    Ok(OutputStmt {
        target: lower_ref(&stmt.target),
        lets,
        expr: Box::new(lower_expr(&stmt.expr)?),
    })
}

fn lower_ref(r: &ast::Ref) -> Ref {
    Ref {
        name: r.name.clone(),
        idx: r.idx.clone(),
    }
}

pub fn lower_expr(expr: &ast::Expr) -> CompileResult<Node> {
    match expr {
        ast::Expr::Binary {
            rule,
            operands,
            operators,
        } => {
            let kind = BinaryKind::from_rule(rule)
                .ok_or_else(|| CompileError::malformed(rule.as_str(), "unknown grammar rule"))?;
            if operands.is_empty() || operators.len() + 1 != operands.len() {
                return Err(CompileError::malformed(
                    rule.as_str(),
                    format!(
                        "{} operands need {} operators, found {}",
                        operands.len(),
                        operands.len().saturating_sub(1),
                        operators.len()
                    ),
                ));
            }
            if let Some(bad) = operators.iter().find(|op| !kind.operators().contains(&op.as_str())) {
                return Err(CompileError::malformed(
                    rule.as_str(),
                    format!("operator '{}' is not accepted here", bad),
                ));
            }
            Ok(Node::Binary(BinaryOp {
                kind,
                operands: operands.iter().map(lower_expr).collect::<CompileResult<_>>()?,
                operators: operators.clone(),
            }))
        }

        ast::Expr::Unary { operators, operand } => {
            if let Some(bad) = operators
                .iter()
                .find(|op| !ast::UNARY_OPERATORS.contains(&op.as_str()))
            {
                return Err(CompileError::malformed(
                    "Unary",
                    format!("operator '{}' is not a prefix operator", bad),
                ));
            }
            Ok(Node::Unary(Unary {
                operand: Box::new(lower_expr(operand)?),
                operators: operators.clone(),
            }))
        }

        ast::Expr::Call { name, args } => {
            if !ast::FUNCTIONS.contains(&name.as_str()) {
                return Err(CompileError::unknown_function(name.as_str()));
            }
            if args.is_empty() {
                return Err(CompileError::parse_error(format!("{}() needs an argument", name)));
            }
            Ok(Node::Operand(Operand::Call(Call {
                name: name.clone(),
                args: args.iter().map(lower_expr).collect::<CompileResult<_>>()?,
            })))
        }

        ast::Expr::Ref(r) => Ok(Node::Operand(Operand::Ref(lower_ref(r)))),
        ast::Expr::Num(n) => Ok(Node::Operand(Operand::Num(Num(*n)))),
        ast::Expr::Var(name) => Ok(Node::Operand(Operand::Var(Var::new(name.as_str())))),
        ast::Expr::Paren(inner) => Ok(Node::Operand(Operand::Expr(Box::new(lower_expr(inner)?)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn test_lower_keeps_shape() {
        let expr = Expr::binary(
            "AddSub",
            vec![
                Expr::reference("a", &[0, -1]),
                Expr::Paren(Box::new(Expr::binary(
                    "MulDiv",
                    vec![Expr::Num(0.5), Expr::Var("w".to_string())],
                    vec!["*"],
                ))),
            ],
            vec!["-"],
        );
        let node = lower_expr(&expr).unwrap();
        assert_eq!(node.to_string(), "a(0, -1) - (0.5 * w)");
    }

    #[test]
    fn test_unknown_rule() {
        let expr = Expr::binary("Pow", vec![Expr::Num(1.0), Expr::Num(2.0)], vec!["**"]);
        assert!(matches!(
            lower_expr(&expr),
            Err(CompileError::MalformedOperator { .. })
        ));
    }

    #[test]
    fn test_operator_count_must_match() {
        let expr = Expr::binary("AddSub", vec![Expr::Num(1.0), Expr::Num(2.0)], vec![]);
        assert!(matches!(
            lower_expr(&expr),
            Err(CompileError::MalformedOperator { .. })
        ));
    }

    #[test]
    fn test_operator_must_belong_to_rule() {
        let expr = Expr::binary("AddSub", vec![Expr::Num(1.0), Expr::Num(2.0)], vec!["*"]);
        let err = lower_expr(&expr).unwrap_err();
        assert!(err.to_string().contains("'*'"));
    }

    #[test]
    fn test_unknown_function() {
        let expr = Expr::Call {
            name: "sqrt".to_string(),
            args: vec![Expr::Num(4.0)],
        };
        assert!(matches!(
            lower_expr(&expr),
            Err(CompileError::UnknownFunction { name }) if name == "sqrt"
        ));
    }

    #[test]
    fn test_bad_unary_operator() {
        let expr = Expr::Unary {
            operators: vec!["*".to_string()],
            operand: Box::new(Expr::Num(1.0)),
        };
        assert!(lower_expr(&expr).is_err());
    }
}
