//! Structured error kinds (spec §7) with optional source spans for
//! Parse/Compile errors, in the teacher's `miette`+`thiserror` style.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A `{line, column, offset}` triple as produced by the external parser
/// (spec §6 AST ingest contract). `offset` is a byte offset into the SQL
/// text and is what `miette` needs to underline the failing span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl SourceLocation {
    pub fn span(&self) -> SourceSpan {
        (self.offset, 1).into()
    }
}

/// Stable, tagged error kinds (spec §7).
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("compile error: {message}")]
    Compile {
        message: String,
        #[label("{message}")]
        span: Option<SourceSpan>,
        #[source_code]
        src: String,
    },

    #[error("constraint violation: {message}")]
    Constraint { message: String },

    #[error("misuse: {message}")]
    Misuse { message: String },

    #[error("attempt to write a readonly table: {message}")]
    Readonly { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("index out of range: {message}")]
    Range { message: String },

    #[error("internal invariant violated: {message}")]
    Internal { message: String },

    #[error("runtime error in {site} (pc={pc}): {message}")]
    Runtime {
        site: String,
        pc: usize,
        message: String,
    },

    #[error("type error: {message}")]
    Type { message: String },
}

impl Error {
    pub fn compile(message: impl Into<String>) -> Self {
        Error::Compile {
            message: message.into(),
            span: None,
            src: String::new(),
        }
    }

    pub fn compile_at(message: impl Into<String>, sql: &str, loc: SourceLocation) -> Self {
        Error::Compile {
            message: message.into(),
            span: Some(loc.span()),
            src: sql.to_string(),
        }
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        Error::Misuse {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Error::Constraint {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    pub fn runtime(site: impl Into<String>, pc: usize, message: impl Into<String>) -> Self {
        Error::Runtime {
            site: site.into(),
            pc,
            message: message.into(),
        }
    }

    /// Stable status code for this error, for the façade's `step` result.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Parse { .. } | Error::Compile { .. } => StatusCode::Error,
            Error::Constraint { .. } => StatusCode::Constraint,
            Error::Misuse { .. } => StatusCode::Misuse,
            Error::Readonly { .. } => StatusCode::Readonly,
            Error::NotFound { .. } => StatusCode::NotFound,
            Error::Range { .. } => StatusCode::Range,
            Error::Internal { .. } => StatusCode::Internal,
            Error::Runtime { .. } => StatusCode::Error,
            Error::Type { .. } => StatusCode::Error,
        }
    }
}

/// Stable status codes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Row,
    Done,
    Error,
    Internal,
    Misuse,
    Constraint,
    Readonly,
    Range,
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mirrors the teacher's `bail_parse_error!`-style macros for terse
/// early-return error construction at compile sites.
#[macro_export]
macro_rules! bail_compile_error {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::compile(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_misuse {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::misuse(format!($($arg)*)))
    };
}
