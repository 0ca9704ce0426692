use std::borrow::Cow;

use crate::span::Span;

/// A fatal grammar error. Raising one of these aborts the whole compile;
/// there is no recovery or partial output.
#[derive(Clone, Debug)]
pub struct GrammarError {
    pub message: Cow<'static, str>,
    pub span: Option<Span>,
}

impl GrammarError {
    pub fn new(message: impl Into<Cow<'static, str>>, span: Span) -> GrammarError {
        GrammarError {
            message: message.into(),
            span: Some(span),
        }
    }
    /// An error which cannot be attributed to a grammar location, e.g. a
    /// bad compile option.
    pub fn spanless(message: impl Into<Cow<'static, str>>) -> GrammarError {
        GrammarError {
            message: message.into(),
            span: None,
        }
    }
}

impl std::fmt::Display for GrammarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some(span) if !span.is_empty() => write!(f, "{} at {}", self.message, span),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for GrammarError {}

pub type Result<T, E = GrammarError> = std::result::Result<T, E>;
