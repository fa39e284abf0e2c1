// error.rs — Fatal internal errors of the optimizer
//
// An `InternalError` means the compiler itself is broken (a corrupted graph,
// a rewrite that never converges), never that the user's program is wrong.
// User-facing problems travel as `Diagnostic`s instead.
//
// Preconditions: none.
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use thiserror::Error;

use crate::certify::Violation;

/// Build an [`InternalError::Malformed`] carrying the call site.
#[macro_export]
macro_rules! malformed {
    ($msg:expr) => {
        $crate::error::InternalError::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::InternalError::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Unrecoverable optimizer failure. Never downgraded to a diagnostic.
#[derive(Debug, Error)]
pub enum InternalError {
    /// A propagation pass exhausted its step budget.
    #[error("aborting {pass} due to apparent infinite loop after {visits} visits")]
    InfiniteLoop { pass: &'static str, visits: usize },

    /// The certifier found broken back-links.
    #[error("{stage}: back-pointer certification failed with {} violation(s)", violations.len())]
    Certification {
        stage: &'static str,
        violations: Vec<Violation>,
    },

    /// A graph operation met a structurally impossible state.
    #[error("malformed graph: {message} ({file}:{line})")]
    Malformed {
        message: String,
        file: &'static str,
        line: u32,
    },
}
