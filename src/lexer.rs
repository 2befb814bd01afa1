//! Lexer for the stencil DSL using logos
//!
//! Supports tokens like:
//! - Header keywords: ITERATE, KERNEL, COUNT
//! - Statement keywords: input, output
//! - Integers (grid sizes, indices) and floats (coefficients)
//! - The C operator set used by stencil expressions: `|| && | ^ & == != < <= > >= + - * / % ~ !`
//! - Punctuation: (, ), ,, =, :
//!
//! Line comments (`// ...`) and whitespace are skipped.

use logos::Logos;

/// Token types for the stencil language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // Keywords
    #[token("ITERATE")]
    Iterate,

    #[token("KERNEL")]
    Kernel,

    #[token("COUNT")]
    Count,

    #[token("input")]
    Input,

    #[token("output")]
    Output,

    // Literals
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("||")]
    OrOr,

    #[token("&&")]
    AndAnd,

    #[token("|")]
    Pipe,

    #[token("^")]
    Caret,

    #[token("&")]
    Amp,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("<=")]
    Le,

    #[token(">=")]
    Ge,

    #[token("<")]
    Lt,

    #[token(">")]
    Gt,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("~")]
    Tilde,

    #[token("!")]
    Bang,

    // Punctuation
    #[token("=")]
    Equals,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,
}

impl Token {
    /// Operator spelling, if this token is an expression operator
    pub fn operator(&self) -> Option<&'static str> {
        Some(match self {
            Token::OrOr => "||",
            Token::AndAnd => "&&",
            Token::Pipe => "|",
            Token::Caret => "^",
            Token::Amp => "&",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Tilde => "~",
            Token::Bang => "!",
            _ => return None,
        })
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(op) = self.operator() {
            return write!(f, "{}", op);
        }
        match self {
            Token::Iterate => write!(f, "ITERATE"),
            Token::Kernel => write!(f, "KERNEL"),
            Token::Count => write!(f, "COUNT"),
            Token::Input => write!(f, "input"),
            Token::Output => write!(f, "output"),
            Token::Float(n) => write!(f, "{}", n),
            Token::Int(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Equals => write!(f, "="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            _ => unreachable!("operators are handled above"),
        }
    }
}

/// Lexer wrapper that provides a stream of tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<Result<Token, ()>>>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
        }
    }

    /// Get current position in source
    pub fn span(&self) -> std::ops::Range<usize> {
        self.inner.span()
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> Option<&Result<Token, ()>> {
        if self.peeked.is_none() {
            self.peeked = Some(self.inner.next());
        }
        self.peeked.as_ref().and_then(|p| p.as_ref())
    }

    /// Check if the next token matches expected
    pub fn check(&mut self, expected: &Token) -> bool {
        match self.peek() {
            Some(Ok(tok)) => tok == expected,
            _ => false,
        }
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = Result<Token, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(peeked) = self.peeked.take() {
            peeked
        } else {
            self.inner.next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        Lexer::new(source).filter_map(Result::ok).collect()
    }

    #[test]
    fn test_header_tokens() {
        assert_eq!(
            tokens("ITERATE: 4\nKERNEL: jacobi"),
            vec![
                Token::Iterate,
                Token::Colon,
                Token::Int(4),
                Token::Kernel,
                Token::Colon,
                Token::Ident("jacobi".to_string()),
            ]
        );
    }

    #[test]
    fn test_reference() {
        assert_eq!(
            tokens("a(-1, 0)"),
            vec![
                Token::Ident("a".to_string()),
                Token::LParen,
                Token::Minus,
                Token::Int(1),
                Token::Comma,
                Token::Int(0),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_operators_prefer_longest_match() {
        assert_eq!(
            tokens("a <= b || c != d"),
            vec![
                Token::Ident("a".to_string()),
                Token::Le,
                Token::Ident("b".to_string()),
                Token::OrOr,
                Token::Ident("c".to_string()),
                Token::NotEq,
                Token::Ident("d".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("0.25 3 1e3"),
            vec![Token::Float(0.25), Token::Int(3), Token::Float(1000.0)]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokens("input a(8, 8) // the grid\noutput"),
            vec![
                Token::Input,
                Token::Ident("a".to_string()),
                Token::LParen,
                Token::Int(8),
                Token::Comma,
                Token::Int(8),
                Token::RParen,
                Token::Output,
            ]
        );
    }

    #[test]
    fn test_keywords_are_not_identifiers() {
        assert_eq!(tokens("inputs"), vec![Token::Ident("inputs".to_string())]);
        assert_eq!(tokens("input"), vec![Token::Input]);
    }
}
