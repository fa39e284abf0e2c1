// pass.rs — Pass descriptor module: metadata for optimizer passes
//
// Declares the optimizer's passes, the element kinds each one visits, and
// whether it rewrites the graph. Used by the pipeline to build the pass list
// and to name passes in logs, timing and errors.

use serde::Deserialize;

use crate::propagate::Kinds;

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies each optimizer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassId {
    /// Back-pointer certification; never rewrites.
    Certify,
    #[serde(rename = "fold")]
    ConstantFold,
    Literalize,
    DeadCode,
    Inline,
    /// Post-optimization type concreteness check.
    CheckTypes,
}

impl PassId {
    /// Look a pass up by its descriptor name.
    pub fn from_name(name: &str) -> Option<PassId> {
        ALL_PASSES.iter().copied().find(|p| descriptor(*p).name == name)
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about an optimizer pass.
pub struct PassDescriptor {
    /// Name used in logs, timing output and the configuration file.
    pub name: &'static str,
    /// Element kinds the pass visits.
    pub kinds: Kinds,
    /// Whether the pass may mutate the graph.
    pub rewrites: bool,
    /// What holds after the pass reaches quiescence (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Certify => PassDescriptor {
            name: "certify",
            kinds: Kinds::ALL,
            rewrites: false,
            invariants: "every back-pointer of every relevant element is mirrored",
        },
        PassId::ConstantFold => PassDescriptor {
            name: "fold",
            kinds: Kinds::OPS,
            rewrites: true,
            invariants: "primitives over literal inputs have literal output types",
        },
        PassId::Literalize => PassDescriptor {
            name: "literalize",
            kinds: Kinds::EDGES.with(Kinds::OPS),
            rewrites: true,
            invariants: "literal-typed edges are produced by literal operators",
        },
        PassId::DeadCode => PassDescriptor {
            name: "dead-code",
            kinds: Kinds::EDGES.with(Kinds::REGIONS),
            rewrites: true,
            invariants: "every remaining edge and region can affect an output",
        },
        PassId::Inline => PassDescriptor {
            name: "inline",
            kinds: Kinds::OPS,
            rewrites: true,
            invariants: "no small non-recursive call sites remain",
        },
        PassId::CheckTypes => PassDescriptor {
            name: "check-types",
            kinds: Kinds::EDGES,
            rewrites: false,
            invariants: "every relevant edge has a concrete type",
        },
    }
}

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::Certify,
    PassId::ConstantFold,
    PassId::Literalize,
    PassId::DeadCode,
    PassId::Inline,
    PassId::CheckTypes,
];

/// Rewrite passes run by each optimizer round, in order.
pub const DEFAULT_PASSES: [PassId; 4] = [
    PassId::ConstantFold,
    PassId::Literalize,
    PassId::DeadCode,
    PassId::Inline,
];

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a stage's postconditions hold.
pub trait StageCert {
    /// Whether every obligation holds.
    fn all_pass(&self) -> bool;

    /// Each obligation by name with its outcome.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Tests ──────────────────────────────────────────────────────────────────
