// config.rs — Optimizer configuration
//
// `OptimizerOptions` is read from an optional JSON file (`--config`) and then
// overridden by command-line flags. Missing keys take their defaults.
//
// Preconditions: none.
// Postconditions: a returned `OptimizerOptions` has passed `validate`.
// Failure modes: unreadable file, malformed JSON, unknown keys, zero limits,
//                non-rewrite passes in `passes` → `ConfigError`.
// Side effects: reads the file system in `from_path`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::pass::{descriptor, PassId, DEFAULT_PASSES};
use crate::passes::inline::DEFAULT_INLINE_THRESHOLD;
use crate::propagate::DEFAULT_LOOP_ABORT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {field} must be at least 1")]
    Zero { field: &'static str },
    #[error("invalid config: '{name}' cannot be scheduled as a rewrite pass")]
    NotARewritePass { name: &'static str },
}

/// Knobs of one optimizer run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerOptions {
    /// Upper bound on optimizer rounds.
    pub max_loops: usize,
    /// Certify after every pass, not only before and after the run.
    pub paranoid: bool,
    /// Multiplier of each pass's visit budget.
    pub loop_abort: usize,
    /// Size bound for inlining; `None` inlines every eligible call.
    pub inline_threshold: Option<usize>,
    /// Report ambiguous types after optimization.
    pub check_types: bool,
    /// Rewrite passes of each round, in order.
    pub passes: Vec<PassId>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        OptimizerOptions {
            max_loops: 10,
            paranoid: false,
            loop_abort: DEFAULT_LOOP_ABORT,
            inline_threshold: Some(DEFAULT_INLINE_THRESHOLD),
            check_types: false,
            passes: DEFAULT_PASSES.to_vec(),
        }
    }
}

impl OptimizerOptions {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let options: OptimizerOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_loops == 0 {
            return Err(ConfigError::Zero { field: "max_loops" });
        }
        if self.loop_abort == 0 {
            return Err(ConfigError::Zero {
                field: "loop_abort",
            });
        }
        for pass in &self.passes {
            let desc = descriptor(*pass);
            if !desc.rewrites {
                return Err(ConfigError::NotARewritePass { name: desc.name });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let options = OptimizerOptions::from_json_str("{}").unwrap();
        assert_eq!(options, OptimizerOptions::default());
        assert_eq!(options.max_loops, 10);
        assert_eq!(options.inline_threshold, Some(10));
        assert_eq!(options.passes.len(), 4);
    }

    #[test]
    fn explicit_null_disables_the_inline_threshold() {
        let options =
            OptimizerOptions::from_json_str(r#"{"inline_threshold": null, "paranoid": true}"#)
                .unwrap();
        assert_eq!(options.inline_threshold, None);
        assert!(options.paranoid);
    }

    #[test]
    fn pass_lists_use_pass_names() {
        let options =
            OptimizerOptions::from_json_str(r#"{"passes": ["dead-code", "fold"]}"#).unwrap();
        assert_eq!(options.passes, vec![PassId::DeadCode, PassId::ConstantFold]);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            OptimizerOptions::from_json_str(r#"{"max_loops": 0}"#),
            Err(ConfigError::Zero { field: "max_loops" })
        ));
        assert!(matches!(
            OptimizerOptions::from_json_str(r#"{"passes": ["certify"]}"#),
            Err(ConfigError::NotARewritePass { name: "certify" })
        ));
        assert!(matches!(
            OptimizerOptions::from_json_str(r#"{"max_loop": 3}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            OptimizerOptions::from_path(Path::new("/nonexistent/dfgopt.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
