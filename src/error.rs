//! Error types for the stencil compiler

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
///
/// Every variant is fatal: the driver aborts before emitting anything.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error("Dimension mismatch: expected {expected} coordinates, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Input variable '{name}' is never referenced by the output expression")]
    EmptyFootprint { name: String },

    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    #[error("Malformed operator list in {rule}: {message}")]
    MalformedOperator { rule: String, message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Unsupported dimensionality: {dims}-D grids are not handled by the row/column layout")]
    UnsupportedDimensionality { dims: usize },

    #[error("Unsupported lookback for '{name}' row {row}: column offset {offset} needs more than one popped register")]
    UnsupportedLookback { name: String, row: i64, offset: i64 },

    #[error("Code generation error: {message}")]
    CodeGenError { message: String },
}

impl CompileError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::ParseError { message: msg.into() }
    }

    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        CompileError::DimensionMismatch { expected, got }
    }

    pub fn empty_footprint(name: impl Into<String>) -> Self {
        CompileError::EmptyFootprint { name: name.into() }
    }

    pub fn unknown_function(name: impl Into<String>) -> Self {
        CompileError::UnknownFunction { name: name.into() }
    }

    pub fn malformed(rule: impl Into<String>, msg: impl Into<String>) -> Self {
        CompileError::MalformedOperator {
            rule: rule.into(),
            message: msg.into(),
        }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        CompileError::UndefinedVariable { name: name.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::ConfigError { message: msg.into() }
    }

    pub fn codegen(msg: impl Into<String>) -> Self {
        CompileError::CodeGenError { message: msg.into() }
    }
}
