//! Parser for the stencil DSL
//!
//! Parses programs like:
//!
//! ```text
//! ITERATE: 4
//! KERNEL: jacobi
//! COUNT: 2
//! input a(64, 64)
//! output b(0, 0) = (a(-1, 0) + a(1, 0) + a(0, -1) + a(0, 1)) * 0.25
//! ```
//!
//! Every precedence level is kept as its own `Binary` node, named after the
//! grammar rule, even when it holds a single operand. Lowering collapses the
//! trivial levels.

use crate::ast::{Expr, InputStmt, Let, OutputStmt, Program, Ref, BINARY_RULES, FUNCTIONS, UNARY_OPERATORS};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, Token};

/// Parser for stencil programs
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    current: Option<Token>,
    /// Lexer failure hit while priming the first token
    error: Option<CompileError>,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        let mut parser = Self {
            lexer: Lexer::new(source),
            current: None,
            error: None,
        };
        if let Err(e) = parser.advance() {
            parser.error = Some(e);
        }
        parser
    }

    /// Advance to the next token, returning the previous one
    fn advance(&mut self) -> CompileResult<Option<Token>> {
        let next = match self.lexer.next() {
            Some(Ok(tok)) => Some(tok),
            Some(Err(())) => {
                let span = self.lexer.span();
                return Err(CompileError::LexerError {
                    position: span.start,
                    message: "unrecognized character".to_string(),
                });
            }
            None => None,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match &self.current {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<()> {
        if self.check(&expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(CompileError::parse_error(format!(
                "Expected '{}', got {}",
                expected,
                describe(&self.current)
            )))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.current.clone() {
            Some(Token::Ident(name)) => {
                self.advance()?;
                Ok(name)
            }
            other => Err(CompileError::parse_error(format!(
                "Expected identifier, got {}",
                describe(&other)
            ))),
        }
    }

    fn expect_int(&mut self) -> CompileResult<i64> {
        match self.current.clone() {
            Some(Token::Int(n)) => {
                self.advance()?;
                Ok(n)
            }
            other => Err(CompileError::parse_error(format!(
                "Expected integer, got {}",
                describe(&other)
            ))),
        }
    }

    /// Parse an optionally negated integer (array index)
    fn expect_signed_int(&mut self) -> CompileResult<i64> {
        if self.check(&Token::Minus) {
            self.advance()?;
            Ok(-self.expect_int()?)
        } else {
            self.expect_int()
        }
    }

    fn expect_count(&mut self, what: &str) -> CompileResult<u32> {
        let n = self.expect_int()?;
        u32::try_from(n).map_err(|_| CompileError::parse_error(format!("{} out of range: {}", what, n)))
    }

    /// Parse a complete program
    pub fn parse_program(&mut self) -> CompileResult<Program> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        self.expect(Token::Iterate)?;
        self.expect(Token::Colon)?;
        let iterate = self.expect_count("ITERATE")?;

        self.expect(Token::Kernel)?;
        self.expect(Token::Colon)?;
        let app_name = self.expect_ident()?;

        self.expect(Token::Count)?;
        self.expect(Token::Colon)?;
        let kernel_count = self.expect_count("COUNT")?;

        let mut input_stmts = vec![self.parse_input()?];
        while self.check(&Token::Input) {
            input_stmts.push(self.parse_input()?);
        }

        let output_stmt = self.parse_output()?;

        if self.current.is_some() {
            return Err(CompileError::parse_error(format!(
                "Unexpected trailing {}",
                describe(&self.current)
            )));
        }

        Ok(Program {
            iterate,
            app_name,
            kernel_count,
            input_stmts,
            output_stmt,
        })
    }

    /// Parse `input name(d0, d1, ...)`
    fn parse_input(&mut self) -> CompileResult<InputStmt> {
        self.expect(Token::Input)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;

        let mut size = Vec::new();
        loop {
            let n = self.expect_int()?;
            size.push(n as u64);
            if self.check(&Token::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }
        self.expect(Token::RParen)?;

        Ok(InputStmt { name, size })
    }

    /// Parse `output let* ref = expr`
    fn parse_output(&mut self) -> CompileResult<OutputStmt> {
        self.expect(Token::Output)?;

        let mut lets = Vec::new();
        // `name =` starts a binding, `name(` starts the output reference
        while matches!(self.current, Some(Token::Ident(_))) && self.lexer.check(&Token::Equals) {
            let name = self.expect_ident()?;
            self.expect(Token::Equals)?;
            let expr = self.parse_expr()?;
            lets.push(Let { name, expr });
        }

        let name = self.expect_ident()?;
        let target = self.parse_ref_indices(name)?;
        self.expect(Token::Equals)?;
        let expr = self.parse_expr()?;

        Ok(OutputStmt { lets, target, expr })
    }

    /// Parse an expression (the loosest precedence level)
    pub fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_level(0)
    }

    /// Parse one binary precedence level: `next (op next)*`
    fn parse_level(&mut self, level: usize) -> CompileResult<Expr> {
        if level == BINARY_RULES.len() {
            return self.parse_unary();
        }
        let (rule, accepted) = BINARY_RULES[level];

        let mut operands = vec![self.parse_level(level + 1)?];
        let mut operators = Vec::new();

        while let Some(op) = self.current.as_ref().and_then(Token::operator) {
            if !accepted.contains(&op) {
                break;
            }
            self.advance()?;
            operators.push(op.to_string());
            operands.push(self.parse_level(level + 1)?);
        }

        Ok(Expr::Binary {
            rule: rule.to_string(),
            operands,
            operators,
        })
    }

    /// Parse prefix operators followed by an operand
    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let mut operators = Vec::new();
        while let Some(op) = self.current.as_ref().and_then(Token::operator) {
            if !UNARY_OPERATORS.contains(&op) {
                break;
            }
            self.advance()?;
            operators.push(op.to_string());
        }

        let operand = self.parse_operand()?;
        Ok(Expr::Unary {
            operators,
            operand: Box::new(operand),
        })
    }

    /// Parse operands: calls, references, literals, parenthesized, variables
    fn parse_operand(&mut self) -> CompileResult<Expr> {
        match self.current.clone() {
            Some(Token::Int(n)) => {
                self.advance()?;
                Ok(Expr::Num(n as f64))
            }

            Some(Token::Float(n)) => {
                self.advance()?;
                Ok(Expr::Num(n))
            }

            Some(Token::Ident(name)) => {
                self.advance()?;

                if !self.check(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }

                if FUNCTIONS.contains(&name.as_str()) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { name, args });
                }

                Ok(Expr::Ref(self.parse_ref_indices(name)?))
            }

            Some(Token::LParen) => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }

            None => Err(CompileError::parse_error("Unexpected end of input")),

            other => Err(CompileError::parse_error(format!(
                "Unexpected token: {}",
                describe(&other)
            ))),
        }
    }

    /// Parse the `(i, j, ...)` part of a reference
    fn parse_ref_indices(&mut self, name: String) -> CompileResult<Ref> {
        self.expect(Token::LParen)?;

        let mut idx = vec![self.expect_signed_int()?];
        while self.check(&Token::Comma) {
            self.advance()?;
            idx.push(self.expect_signed_int()?);
        }
        self.expect(Token::RParen)?;

        Ok(Ref { name, idx })
    }

    /// Parse function arguments: (arg1, arg2, ...)
    fn parse_args(&mut self) -> CompileResult<Vec<Expr>> {
        self.expect(Token::LParen)?;

        let mut args = vec![self.parse_expr()?];
        while self.check(&Token::Comma) {
            self.advance()?;
            args.push(self.parse_expr()?);
        }

        self.expect(Token::RParen)?;
        Ok(args)
    }
}

fn describe(token: &Option<Token>) -> String {
    match token {
        Some(tok) => format!("'{}'", tok),
        None => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JACOBI: &str = "
        ITERATE: 4
        KERNEL: jacobi
        COUNT: 2
        input a(64, 64)
        output b(0, 0) = (a(-1, 0) + a(1, 0)) * 0.5
    ";

    /// Strip the single-operand precedence wrappers to reach the interesting node
    fn peel(expr: &Expr) -> &Expr {
        match expr {
            Expr::Binary { operands, .. } if operands.len() == 1 => peel(&operands[0]),
            Expr::Unary { operators, operand } if operators.is_empty() => peel(operand),
            other => other,
        }
    }

    #[test]
    fn test_parse_header() {
        let program = Parser::new(JACOBI).parse_program().unwrap();

        assert_eq!(program.iterate, 4);
        assert_eq!(program.app_name, "jacobi");
        assert_eq!(program.kernel_count, 2);
        assert_eq!(program.input_stmts.len(), 1);
        assert_eq!(program.input_stmts[0].size, vec![64, 64]);
        assert_eq!(program.output_stmt.target.name, "b");
        assert_eq!(program.output_stmt.target.idx, vec![0, 0]);
    }

    #[test]
    fn test_every_level_is_kept() {
        let program = Parser::new(JACOBI).parse_program().unwrap();

        if let Expr::Binary { rule, operands, .. } = &program.output_stmt.expr {
            assert_eq!(rule, "Expr");
            assert_eq!(operands.len(), 1);
        } else {
            panic!("Expected Binary at the top level");
        }
    }

    #[test]
    fn test_parse_precedence() {
        let program = Parser::new(JACOBI).parse_program().unwrap();

        if let Expr::Binary { rule, operands, operators } = peel(&program.output_stmt.expr) {
            assert_eq!(rule, "MulDiv");
            assert_eq!(operators, &vec!["*".to_string()]);
            assert!(matches!(peel(&operands[0]), Expr::Paren(_)));
            assert!(matches!(peel(&operands[1]), Expr::Num(n) if *n == 0.5));
        } else {
            panic!("Expected MulDiv");
        }
    }

    #[test]
    fn test_parse_negative_indices() {
        let source = "ITERATE: 1 KERNEL: k COUNT: 1 input a(4, 4) output b(0, 0) = a(-1, -2)";
        let program = Parser::new(source).parse_program().unwrap();

        if let Expr::Ref(r) = peel(&program.output_stmt.expr) {
            assert_eq!(r.idx, vec![-1, -2]);
        } else {
            panic!("Expected Ref");
        }
    }

    #[test]
    fn test_parse_lets_and_calls() {
        let source = "
            ITERATE: 1 KERNEL: k COUNT: 1
            input a(4, 4)
            output t = fabs(a(0, 1) - a(0, -1))
                   s = t * w
                   b(0, 0) = s + -t
        ";
        let program = Parser::new(source).parse_program().unwrap();

        let lets = &program.output_stmt.lets;
        assert_eq!(lets.len(), 2);
        assert_eq!(lets[0].name, "t");
        assert!(matches!(peel(&lets[0].expr), Expr::Call { name, args } if name == "fabs" && args.len() == 1));
        assert_eq!(lets[1].name, "s");
        assert_eq!(program.output_stmt.target.name, "b");
    }

    #[test]
    fn test_parse_unary_operators() {
        let source = "ITERATE: 1 KERNEL: k COUNT: 1 input a(4, 4) output b(0, 0) = -!a(0, 0)";
        let program = Parser::new(source).parse_program().unwrap();

        if let Expr::Unary { operators, .. } = peel(&program.output_stmt.expr) {
            assert_eq!(operators, &vec!["-".to_string(), "!".to_string()]);
        } else {
            panic!("Expected Unary");
        }
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let result = Parser::new("KERNEL: k").parse_program();
        assert!(matches!(result, Err(CompileError::ParseError { .. })));
    }

    #[test]
    fn test_lexer_error_is_reported() {
        let result = Parser::new("ITERATE: 1 KERNEL: k COUNT: 1 input a(4, 4) output b(0, 0) = a(0, 0) $").parse_program();
        assert!(matches!(result, Err(CompileError::LexerError { .. })));
    }

    #[test]
    fn test_non_integer_index_is_an_error() {
        let source = "ITERATE: 1 KERNEL: k COUNT: 1 input a(4, 4) output b(0, 0) = a(0.5, 0)";
        assert!(Parser::new(source).parse_program().is_err());
    }
}
