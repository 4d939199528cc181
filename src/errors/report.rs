// src/errors/report.rs
//! The diagnostic stream handed to the external renderer.
//!
//! Rendering (colors, source excerpts, terminal layout) is not this crate's
//! concern; an `ErrorMsg` carries everything a renderer needs to pin the
//! message to a file location, plus any notes accumulated while the
//! offending resolution chain was in flight.

use std::path::PathBuf;

use crate::errors::sema::SemanticError;
use crate::frontend::Span;

/// A note attached to a parent diagnostic ("declared here", async trace
/// steps, and the like).
#[derive(Debug, Clone)]
pub struct ErrorNote {
    pub file: PathBuf,
    pub span: Span,
    pub text: String,
}

/// One entry in the diagnostic stream.
#[derive(Debug, Clone)]
pub struct ErrorMsg {
    pub file: PathBuf,
    pub span: Span,
    pub error: SemanticError,
    pub notes: Vec<ErrorNote>,
}

impl ErrorMsg {
    pub fn new(file: PathBuf, span: Span, error: SemanticError) -> Self {
        Self {
            file,
            span,
            error,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<ErrorNote>) -> Self {
        self.notes = notes;
        self
    }

    /// The message text, without location or notes.
    pub fn text(&self) -> String {
        self.error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_formats_the_payload() {
        let msg = ErrorMsg::new(
            PathBuf::from("a.ci"),
            Span::new(0, 4),
            SemanticError::EmptyEnum {
                span: Span::new(0, 4).into(),
            },
        );
        assert_eq!(msg.text(), "enums must have at least one field");
        assert!(msg.notes.is_empty());
    }
}
