// diag.rs — Compile diagnostics reported by optimizer passes
//
// Recoverable problems in the user's program (ambiguous types, ill-formed
// constant arithmetic) are reported as `Diagnostic`s and accumulated by the
// pipeline. Broken compiler state is an `InternalError` instead.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::ElementId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0001`).
///
/// Codes are `&'static str` constants defined in the `codes` module and are
/// never reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// The optimizer stopped after `max_loops` rounds that all changed.
    pub const W0001: DiagCode = DiagCode("W0001");
    /// An edge's type is still ambiguous after optimization.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// `vdot` applied to something other than two equal-length vectors.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Constant multiplication of more than one vector.
    pub const E0102: DiagCode = DiagCode("E0102");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related element ──────────────────────────────────────────────────────

/// A secondary graph element giving context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedElement {
    pub element: ElementId,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Graph element the diagnostic is about; `None` for whole-run messages.
    pub location: Option<ElementId>,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedElement>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint or related elements.
    pub fn new(level: DiagLevel, location: Option<ElementId>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn error(location: Option<ElementId>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message)
    }

    pub fn warning(location: Option<ElementId>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, location, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related element.
    pub fn with_related(mut self, element: ElementId, label: impl Into<String>) -> Self {
        self.related.push(RelatedElement {
            element,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        match &self.code {
            Some(code) => write!(f, "{}[{}]", level, code)?,
            None => write!(f, "{}", level)?,
        }
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        write!(f, ": {}", self.message)?;
        for related in &self.related {
            write!(f, "\n  note: {} ({})", related.label, related.element)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{EdgeId, OpId};

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, None, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_location() {
        let d = Diagnostic::warning(Some(ElementId::Edge(EdgeId(3))), "giving up")
            .with_code(codes::W0001);
        assert_eq!(format!("{d}"), "warning[W0001] at f3: giving up");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(Some(ElementId::Op(OpId(1))), "vector length mismatch")
            .with_code(codes::E0101)
            .with_related(ElementId::Edge(EdgeId(0)), "left operand")
            .with_hint("pad the shorter vector");

        assert_eq!(d.code, Some(codes::E0101));
        assert!(d.is_error());
        assert_eq!(d.related.len(), 1);
        assert_eq!(
            format!("{d}"),
            "error[E0101] at oi1: vector length mismatch\n  note: left operand (f0)\n  hint: pad the shorter vector"
        );
    }
}
