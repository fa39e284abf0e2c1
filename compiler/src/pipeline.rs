// pipeline.rs — Optimizer state and pass orchestration
//
// Runs the configured rewrite passes in rounds until a round reports no
// change or `max_loops` rounds have run, certifying the graph on entry and
// exit (and after every pass when paranoid).
//
// Preconditions: the graph has an output and `relevant` is current.
// Postconditions: on `Ok`, the graph is certified and `relevant` recomputed.
// Failure modes: error-level diagnostics from a pass → `PipelineError::Compile`;
//                certification failure or runaway pass → `PipelineError::Internal`.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::certify::certify_stage;
use crate::config::OptimizerOptions;
use crate::diag::codes;
use crate::diag::Diagnostic;
use crate::error::InternalError;
use crate::graph::Graph;
use crate::pass::{descriptor, PassId};
use crate::passes::build_pass;
use crate::propagate::propagate_bounded;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Hashes identifying an input graph and the optimized result.
///
/// `input_hash`: SHA-256 of the raw input text.
/// `graph_hash`: SHA-256 of the printed (`Display`) form of the graph.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub input_hash: [u8; 32],
    pub graph_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Fingerprint {
    pub fn input_hash_hex(&self) -> String {
        bytes_to_hex(&self.input_hash)
    }

    pub fn graph_hash_hex(&self) -> String {
        bytes_to_hex(&self.graph_hash)
    }

    /// Serialize as a JSON string for `--emit fingerprint`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"input_hash\": \"{}\",\n  \"graph_hash\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.input_hash_hex(),
            self.graph_hash_hex(),
            self.compiler_version,
        )
    }
}

pub fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(text: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// SHA-256 of the printed graph.
pub fn graph_fingerprint(graph: &Graph) -> [u8; 32] {
    sha256(&graph.to_string())
}

pub fn compute_fingerprint(input: &str, graph: &Graph) -> Fingerprint {
    Fingerprint {
        input_hash: sha256(input),
        graph_hash: graph_fingerprint(graph),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Diagnostics and progress accumulated over one optimizer run.
#[derive(Debug, Default)]
pub struct OptimizeState {
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    /// Rounds started.
    pub rounds: usize,
    /// Whether the last round ran without changes.
    pub converged: bool,
}

impl OptimizeState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pass reported error-level diagnostics; they are in
    /// `OptimizeState.diagnostics`.
    #[error("{} reported errors", descriptor(*failing_pass).name)]
    Compile { failing_pass: PassId },
    #[error(transparent)]
    Internal(#[from] InternalError),
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

/// Per-pass post-processing: callback, accumulate, timing, error check.
fn finish_pass(
    state: &mut OptimizeState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    info!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError::Compile {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn run_certify(
    graph: &mut Graph,
    state: &mut OptimizeState,
    stage: &'static str,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let t = Instant::now();
    certify_stage(graph, stage)?;
    finish_pass(state, PassId::Certify, Vec::new(), t.elapsed(), on_pass_complete)
}

fn run_pass(
    graph: &mut Graph,
    state: &mut OptimizeState,
    pass_id: PassId,
    options: &OptimizerOptions,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<bool, PipelineError> {
    let Some(mut pass) = build_pass(pass_id, options) else {
        return Ok(false);
    };
    let t = Instant::now();
    let changed = propagate_bounded(pass.as_mut(), graph, options.loop_abort)?;
    let diags = pass.take_diagnostics();
    finish_pass(state, pass_id, diags, t.elapsed(), on_pass_complete)?;
    Ok(changed)
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Optimize `graph` to a fixpoint.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error
/// check → certify (paranoid only).
///
/// Preconditions: `graph.output()` is set and `graph.relevant()` is current.
/// Postconditions: on `Ok`, the graph passed final certification.
/// Failure modes: see module header.
/// Side effects: mutates the graph; calls `on_pass_complete` after each pass.
pub fn run_optimizer(
    graph: &mut Graph,
    state: &mut OptimizeState,
    options: &OptimizerOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    run_certify(graph, state, "start", &mut on_pass_complete)?;

    for round in 0..options.max_loops {
        state.rounds = round + 1;
        let mut changed = false;
        for &pass_id in &options.passes {
            changed |= run_pass(graph, state, pass_id, options, &mut on_pass_complete)?;
            if options.paranoid {
                run_certify(
                    graph,
                    state,
                    descriptor(pass_id).name,
                    &mut on_pass_complete,
                )?;
            }
        }
        if !changed {
            state.converged = true;
            break;
        }
    }

    if !state.converged {
        let message = format!("optimizer giving up after {} loops", options.max_loops);
        warn!("{message}");
        state
            .diagnostics
            .push(Diagnostic::warning(None, message).with_code(codes::W0001));
    }

    graph.determine_relevant()?;

    if options.check_types {
        run_pass(graph, state, PassId::CheckTypes, options, &mut on_pass_complete)?;
    }

    run_certify(graph, state, "end", &mut on_pass_complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Operator;
    use crate::registry::Registry;
    use crate::types::ValueType;

    fn prim(name: &str) -> Operator {
        Operator::Primitive(Registry::core().lookup(name).unwrap())
    }

    /// out = 1 + 2, plus an unused 2 * 2
    fn program() -> Graph {
        let mut g = Graph::new();
        let root = g.add_root_region();
        let one = g.add_literal(ValueType::scalar(1.0), root).unwrap();
        let two = g.add_literal(ValueType::scalar(2.0), root).unwrap();
        let sum = g.apply(root, prim("+"), &[one, two]).unwrap();
        g.apply(root, prim("*"), &[two, two]).unwrap();
        g.set_output(sum).unwrap();
        g.determine_relevant().unwrap();
        g
    }

    #[test]
    fn folds_to_a_single_literal() {
        let mut g = program();
        let mut state = OptimizeState::new();
        let mut seen = Vec::new();
        run_optimizer(&mut g, &mut state, &OptimizerOptions::default(), |id, _| {
            seen.push(id)
        })
        .unwrap();
        assert!(state.converged);
        assert!(state.diagnostics.is_empty());
        assert_eq!(g.node_count(), 1);
        let out = g.output().unwrap();
        assert_eq!(g.edge(out).unwrap().range(), &ValueType::scalar(3.0));
        assert_eq!(seen.first(), Some(&PassId::Certify));
        assert_eq!(seen.last(), Some(&PassId::Certify));
    }

    #[test]
    fn paranoid_certifies_after_every_pass() {
        let mut g = program();
        let mut state = OptimizeState::new();
        let options = OptimizerOptions {
            paranoid: true,
            ..OptimizerOptions::default()
        };
        let mut certs = 0;
        run_optimizer(&mut g, &mut state, &options, |id, _| {
            if id == PassId::Certify {
                certs += 1;
            }
        })
        .unwrap();
        assert_eq!(certs, 2 + state.rounds * options.passes.len());
    }

    #[test]
    fn giving_up_emits_a_warning() {
        let mut g = program();
        let mut state = OptimizeState::new();
        let options = OptimizerOptions {
            max_loops: 1,
            ..OptimizerOptions::default()
        };
        run_optimizer(&mut g, &mut state, &options, |_, _| {}).unwrap();
        assert!(!state.converged);
        assert_eq!(state.diagnostics.len(), 1);
        assert_eq!(state.diagnostics[0].code, Some(codes::W0001));
        assert_eq!(state.diagnostics[0].message, "optimizer giving up after 1 loops");
    }

    #[test]
    fn fold_errors_halt_after_the_pass() {
        let mut g = Graph::new();
        let root = g.add_root_region();
        let a = g.add_literal(ValueType::vector(&[1.0]), root).unwrap();
        let b = g.add_literal(ValueType::vector(&[1.0, 2.0]), root).unwrap();
        let dot = g.apply(root, prim("vdot"), &[a, b]).unwrap();
        g.set_output(dot).unwrap();
        g.determine_relevant().unwrap();

        let mut state = OptimizeState::new();
        let err = run_optimizer(&mut g, &mut state, &OptimizerOptions::default(), |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Compile {
                failing_pass: PassId::ConstantFold
            }
        ));
        assert!(state.has_error);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0101));
    }

    #[test]
    fn missing_output_is_an_internal_error() {
        let mut g = Graph::new();
        g.add_root_region();
        let mut state = OptimizeState::new();
        let err = run_optimizer(&mut g, &mut state, &OptimizerOptions::default(), |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Internal(InternalError::Certification { stage: "start", .. })
        ));
    }

    #[test]
    fn check_types_reports_ambiguity() {
        let mut g = Graph::new();
        let root = g.add_root_region();
        let sel = g.add_literal(ValueType::boolean(true), root).unwrap();
        let a = g.add_literal(ValueType::scalar(1.0), root).unwrap();
        let m = g.apply(root, prim("mux"), &[sel, a, a]).unwrap();
        g.set_output(m).unwrap();
        g.determine_relevant().unwrap();

        // no rewrite passes, so the `mux` output stays `any`
        let options = OptimizerOptions {
            passes: Vec::new(),
            check_types: true,
            ..OptimizerOptions::default()
        };
        let mut state = OptimizeState::new();
        let err = run_optimizer(&mut g, &mut state, &options, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Compile {
                failing_pass: PassId::CheckTypes
            }
        ));
        assert_eq!(state.diagnostics.len(), 1);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0100));
    }

    #[test]
    fn fingerprints_are_stable_hex() {
        let g = program();
        let fp = compute_fingerprint("{}", &g);
        assert_eq!(fp.graph_hash_hex().len(), 64);
        assert_eq!(fp, compute_fingerprint("{}", &program()));
        assert!(fp.to_json().contains("\"graph_hash\""));
        // empty input hashes to the well-known SHA-256 of ""
        assert_eq!(
            bytes_to_hex(&sha256("")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
