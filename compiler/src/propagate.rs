// propagate.rs — Incremental worklist engine shared by every graph pass
//
// A pass declares which element kinds it visits (edges, ops, regions) and
// implements hooks for them. The engine seeds one ordered worklist per
// declared kind from the relevant regions, then visits round-robin until all
// worklists drain. Hooks request re-examination of neighbours through
// `PropagationCtx::note_change_*`, which floods outward from the changed
// element and enqueues what it touches.
//
// Preconditions: `graph.relevant` is current (see `Graph::determine_relevant`).
// Postconditions: returns whether any change was noted during the run.
// Failure modes: step budget `1 + loop_abort × initial worklist size`
//                exhausted → `InternalError::InfiniteLoop`; errors raised by
//                hooks propagate unchanged.
// Side effects: passes mutate the graph through the context.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, error, trace};

use crate::diag::Diagnostic;
use crate::error::InternalError;
use crate::graph::Graph;
use crate::id::{EdgeId, ElementId, OpId, RegionId};
use crate::operator::Operator;
use crate::types::ValueType;

/// Default multiplier of the step budget.
pub const DEFAULT_LOOP_ABORT: usize = 10;

// ── Kinds ───────────────────────────────────────────────────────────────────

/// Element kinds a pass visits. Undeclared kinds are never enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kinds {
    pub edges: bool,
    pub ops: bool,
    pub regions: bool,
}

impl Kinds {
    pub const NONE: Kinds = Kinds {
        edges: false,
        ops: false,
        regions: false,
    };
    pub const EDGES: Kinds = Kinds {
        edges: true,
        ..Kinds::NONE
    };
    pub const OPS: Kinds = Kinds {
        ops: true,
        ..Kinds::NONE
    };
    pub const REGIONS: Kinds = Kinds {
        regions: true,
        ..Kinds::NONE
    };
    pub const ALL: Kinds = Kinds {
        edges: true,
        ops: true,
        regions: true,
    };

    pub const fn with(self, other: Kinds) -> Kinds {
        Kinds {
            edges: self.edges || other.edges,
            ops: self.ops || other.ops,
            regions: self.regions || other.regions,
        }
    }
}

// ── Pass interface ──────────────────────────────────────────────────────────

/// A pass driven by the engine. Hooks for undeclared kinds are never called.
pub trait Propagator {
    fn name(&self) -> &'static str;

    fn kinds(&self) -> Kinds;

    /// Runs once after seeding, before the first visit.
    fn preprop(&mut self, _ctx: &mut PropagationCtx<'_>) -> Result<(), InternalError> {
        Ok(())
    }

    /// Runs once after the worklists drain.
    fn postprop(&mut self, _ctx: &mut PropagationCtx<'_>) -> Result<(), InternalError> {
        Ok(())
    }

    fn act_edge(&mut self, _ctx: &mut PropagationCtx<'_>, _edge: EdgeId) -> Result<(), InternalError> {
        Ok(())
    }

    fn act_op(&mut self, _ctx: &mut PropagationCtx<'_>, _op: OpId) -> Result<(), InternalError> {
        Ok(())
    }

    fn act_region(
        &mut self,
        _ctx: &mut PropagationCtx<'_>,
        _region: RegionId,
    ) -> Result<(), InternalError> {
        Ok(())
    }

    /// Compile diagnostics gathered since the last call.
    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        Vec::new()
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

/// State of one propagation run, handed to every hook.
pub struct PropagationCtx<'g> {
    pub graph: &'g mut Graph,
    kinds: Kinds,
    edges: BTreeSet<EdgeId>,
    ops: BTreeSet<OpId>,
    regions: BTreeSet<RegionId>,
    any_changes: bool,
}

impl<'g> PropagationCtx<'g> {
    /// A context with empty worklists.
    pub(crate) fn new(graph: &'g mut Graph, kinds: Kinds) -> Self {
        PropagationCtx {
            graph,
            kinds,
            edges: BTreeSet::new(),
            ops: BTreeSet::new(),
            regions: BTreeSet::new(),
            any_changes: false,
        }
    }

    /// A context whose worklists hold every element of each declared kind
    /// reachable from the relevant regions.
    fn seeded(graph: &'g mut Graph, kinds: Kinds) -> Self {
        let mut ctx = Self::new(graph, kinds);
        for &root in ctx.graph.relevant() {
            if kinds.edges {
                ctx.edges.extend(ctx.graph.collect_fields(root));
            }
            if kinds.ops {
                ctx.ops.extend(ctx.graph.collect_ops(root));
            }
            if kinds.regions {
                ctx.regions.extend(ctx.graph.collect_spaces(root));
            }
        }
        ctx
    }

    pub fn edge_worklist(&self) -> &BTreeSet<EdgeId> {
        &self.edges
    }

    pub fn op_worklist(&self) -> &BTreeSet<OpId> {
        &self.ops
    }

    pub fn region_worklist(&self) -> &BTreeSet<RegionId> {
        &self.regions
    }

    pub fn any_changes(&self) -> bool {
        self.any_changes
    }

    /// Override the run's change flag (used by sweeping passes in `postprop`).
    pub fn set_changed(&mut self, changed: bool) {
        self.any_changes = changed;
    }

    fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.ops.is_empty() && self.regions.is_empty()
    }

    pub fn note_change_edge(&mut self, edge: EdgeId) {
        self.flood(ElementId::Edge(edge));
    }

    pub fn note_change_op(&mut self, op: OpId) {
        self.flood(ElementId::Op(op));
    }

    pub fn note_change_region(&mut self, region: RegionId) {
        self.flood(ElementId::Region(region));
    }

    fn flood(&mut self, origin: ElementId) {
        self.any_changes = true;
        let mut flood = Flood {
            graph: &*self.graph,
            kinds: self.kinds,
            origin,
            queued: HashSet::new(),
            edges: &mut self.edges,
            ops: &mut self.ops,
            regions: &mut self.regions,
        };
        match origin {
            ElementId::Edge(e) => flood.edge(e, 0),
            ElementId::Op(o) => flood.op(o, 0),
            ElementId::Region(r) => flood.region(r, 0),
            ElementId::Function(_) => {}
        }
    }

    /// Narrow an edge's type. Mutates and notes the change only when the new
    /// type differs from the current one.
    pub fn maybe_set_range(&mut self, edge: EdgeId, range: ValueType) -> Result<bool, InternalError> {
        if self.graph.try_edge(edge)?.range == range {
            trace!(%edge, %range, "not changing type");
            return Ok(false);
        }
        debug!(%edge, %range, "changing type");
        self.graph.try_edge_mut(edge)?.range = range;
        self.note_change_edge(edge);
        Ok(true)
    }
}

// ── Flood ───────────────────────────────────────────────────────────────────

const EDGE_MARK: u8 = 1;
const OP_MARK: u8 = 2;
const REGION_MARK: u8 = 4;

/// Scratch state of one `note_change` walk. Each element is entered at most
/// once; a mark stops the walk from descending through a second element of
/// the same kind along one path.
struct Flood<'a> {
    graph: &'a Graph,
    kinds: Kinds,
    origin: ElementId,
    queued: HashSet<ElementId>,
    edges: &'a mut BTreeSet<EdgeId>,
    ops: &'a mut BTreeSet<OpId>,
    regions: &'a mut BTreeSet<RegionId>,
}

impl Flood<'_> {
    fn edge(&mut self, id: EdgeId, mut marks: u8) {
        if marks & EDGE_MARK != 0 || !self.queued.insert(ElementId::Edge(id)) {
            return;
        }
        let graph = self.graph;
        let Some(edge) = graph.edge(id) else {
            return;
        };
        if self.origin != ElementId::Edge(id) {
            if self.kinds.edges {
                self.edges.insert(id);
            }
            marks |= EDGE_MARK;
        }
        self.op(edge.producer(), marks);
        self.region(edge.domain(), marks);
        for &(consumer, _) in edge.consumers() {
            self.op(consumer, marks);
        }
        for &user in edge.selectors() {
            self.region(user, marks);
        }
    }

    fn op(&mut self, id: OpId, mut marks: u8) {
        if marks & OP_MARK != 0 || !self.queued.insert(ElementId::Op(id)) {
            return;
        }
        let graph = self.graph;
        let Some(node) = graph.node(id) else {
            return;
        };
        if self.origin != ElementId::Op(id) {
            if self.kinds.ops {
                self.ops.insert(id);
            }
            marks |= OP_MARK;
        }
        self.edge(node.output(), marks);
        for &input in node.inputs().iter().flatten() {
            self.edge(input, marks);
        }
        // A call site reaches into its callee: body, output and parameters.
        if let Operator::Compound(f) = node.op() {
            let Some(function) = graph.function(*f) else {
                return;
            };
            self.region(function.body, 0);
            if let Some(output) = function.output {
                self.edge(output, marks);
            }
            let Some(body) = graph.region(function.body) else {
                return;
            };
            for &field in body.fields() {
                let Some(producer) = graph.edge(field).map(|e| e.producer()) else {
                    continue;
                };
                if graph.node(producer).is_some_and(|n| n.op().is_parameter()) {
                    self.op(producer, 0);
                }
            }
        }
    }

    fn region(&mut self, id: RegionId, mut marks: u8) {
        if marks & REGION_MARK != 0 || !self.queued.insert(ElementId::Region(id)) {
            return;
        }
        let graph = self.graph;
        let Some(region) = graph.region(id) else {
            return;
        };
        let is_origin = self.origin == ElementId::Region(id);
        if !is_origin {
            if self.kinds.regions {
                self.regions.insert(id);
            }
            marks |= REGION_MARK;
        }
        // Edges and ops do not affect one another through a region.
        if is_origin {
            if let Some(parent) = region.parent() {
                self.region(parent, marks);
            }
            if let Some(selector) = region.selector() {
                self.edge(selector, marks);
            }
            for &child in region.children() {
                self.region(child, marks);
            }
            for &field in region.fields() {
                self.edge(field, marks);
            }
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// Run `pass` to quiescence with the default step budget.
pub fn propagate<P: Propagator + ?Sized>(pass: &mut P, graph: &mut Graph) -> Result<bool, InternalError> {
    propagate_bounded(pass, graph, DEFAULT_LOOP_ABORT)
}

/// Run `pass` to quiescence, aborting after `1 + loop_abort × n` visits where
/// `n` is the total size of the seeded worklists.
pub fn propagate_bounded<P: Propagator + ?Sized>(
    pass: &mut P,
    graph: &mut Graph,
    loop_abort: usize,
) -> Result<bool, InternalError> {
    let name = pass.name();
    debug!(pass = name, "executing");
    let mut ctx = PropagationCtx::seeded(graph, pass.kinds());
    pass.preprop(&mut ctx)?;

    let seeded = ctx.edges.len() + ctx.ops.len() + ctx.regions.len();
    let mut remaining = loop_abort.saturating_mul(seeded).saturating_add(1);
    let mut visits = 0usize;

    while remaining > 0 && !ctx.is_empty() {
        if let Some(edge) = ctx.edges.pop_first() {
            if ctx.graph.edge(edge).is_some() {
                pass.act_edge(&mut ctx, edge)?;
                remaining -= 1;
                visits += 1;
            }
        }
        if remaining == 0 {
            break;
        }
        if let Some(op) = ctx.ops.pop_first() {
            if ctx.graph.node(op).is_some() {
                pass.act_op(&mut ctx, op)?;
                remaining -= 1;
                visits += 1;
            }
        }
        if remaining == 0 {
            break;
        }
        if let Some(region) = ctx.regions.pop_first() {
            if ctx.graph.region(region).is_some() {
                pass.act_region(&mut ctx, region)?;
                remaining -= 1;
                visits += 1;
            }
        }
    }
    if remaining == 0 {
        error!(pass = name, visits, "apparent infinite loop");
        return Err(InternalError::InfiniteLoop { pass: name, visits });
    }

    pass.postprop(&mut ctx)?;
    let changed = ctx.any_changes;
    debug!(pass = name, changed, visits, "finished");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Signature;
    use crate::registry::Registry;

    fn prim(name: &str) -> Operator {
        Operator::Primitive(Registry::core().lookup(name).unwrap())
    }

    /// a = 1; b = -(a); child region selected by a; output b
    fn chain() -> (Graph, EdgeId, EdgeId, RegionId, RegionId) {
        let mut g = Graph::new();
        let root = g.add_root_region();
        let a = g.add_literal(ValueType::scalar(1.0), root).unwrap();
        let b = g.apply(root, prim("-"), &[a]).unwrap();
        let child = g.add_child_region(root, a).unwrap();
        g.set_output(b).unwrap();
        g.determine_relevant().unwrap();
        (g, a, b, root, child)
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<ElementId>,
    }

    impl Propagator for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn kinds(&self) -> Kinds {
            Kinds::ALL
        }
        fn act_edge(&mut self, _: &mut PropagationCtx<'_>, edge: EdgeId) -> Result<(), InternalError> {
            self.seen.push(ElementId::Edge(edge));
            Ok(())
        }
        fn act_op(&mut self, _: &mut PropagationCtx<'_>, op: OpId) -> Result<(), InternalError> {
            self.seen.push(ElementId::Op(op));
            Ok(())
        }
        fn act_region(&mut self, _: &mut PropagationCtx<'_>, r: RegionId) -> Result<(), InternalError> {
            self.seen.push(ElementId::Region(r));
            Ok(())
        }
    }

    struct InfiniteLoop;

    impl Propagator for InfiniteLoop {
        fn name(&self) -> &'static str {
            "infinite-loop"
        }
        fn kinds(&self) -> Kinds {
            Kinds::EDGES
        }
        fn act_edge(&mut self, ctx: &mut PropagationCtx<'_>, edge: EdgeId) -> Result<(), InternalError> {
            ctx.note_change_edge(edge);
            Ok(())
        }
    }

    struct Nop;

    impl Propagator for Nop {
        fn name(&self) -> &'static str {
            "nop"
        }
        fn kinds(&self) -> Kinds {
            Kinds::ALL
        }
    }

    #[test]
    fn visits_round_robin_in_id_order() {
        let (mut g, a, b, root, child) = chain();
        let mut rec = Recorder::default();
        let changed = propagate(&mut rec, &mut g).unwrap();
        assert!(!changed);
        let ops: Vec<OpId> = [a, b].iter().map(|e| g.edge(*e).unwrap().producer()).collect();
        assert_eq!(
            rec.seen,
            vec![
                ElementId::Edge(a),
                ElementId::Op(ops[0]),
                ElementId::Region(root),
                ElementId::Edge(b),
                ElementId::Op(ops[1]),
                ElementId::Region(child),
            ]
        );
    }

    #[test]
    fn nop_pass_reports_no_change() {
        let (mut g, ..) = chain();
        let before = g.to_string();
        assert!(!propagate(&mut Nop, &mut g).unwrap());
        assert_eq!(g.to_string(), before);
    }

    #[test]
    fn non_terminating_pass_aborts() {
        let (mut g, ..) = chain();
        let err = propagate_bounded(&mut InfiniteLoop, &mut g, 3).unwrap_err();
        match err {
            // two edges seeded: budget 1 + 3 * 2
            InternalError::InfiniteLoop { pass, visits } => {
                assert_eq!(pass, "infinite-loop");
                assert_eq!(visits, 7);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn deleted_items_are_skipped_without_budget() {
        struct Deleter {
            victim: OpId,
            seen: Vec<OpId>,
        }
        impl Propagator for Deleter {
            fn name(&self) -> &'static str {
                "deleter"
            }
            fn kinds(&self) -> Kinds {
                Kinds::OPS
            }
            fn act_op(&mut self, ctx: &mut PropagationCtx<'_>, op: OpId) -> Result<(), InternalError> {
                self.seen.push(op);
                if op != self.victim && ctx.graph.node(self.victim).is_some() {
                    ctx.graph.delete_node(self.victim)?;
                }
                Ok(())
            }
        }

        let mut g = Graph::new();
        let root = g.add_root_region();
        let a = g.add_literal(ValueType::scalar(1.0), root).unwrap();
        let b = g.add_literal(ValueType::scalar(2.0), root).unwrap();
        g.set_output(a).unwrap();
        g.determine_relevant().unwrap();
        let first = g.edge(a).unwrap().producer();
        let victim = g.edge(b).unwrap().producer();
        let mut pass = Deleter {
            victim,
            seen: Vec::new(),
        };
        propagate(&mut pass, &mut g).unwrap();
        assert_eq!(pass.seen, vec![first]);
    }

    #[test]
    fn edge_flood_reaches_producer_consumers_and_selector_users() {
        let (mut g, a, b, root, child) = chain();
        let producer = g.edge(a).unwrap().producer();
        let consumer = g.edge(b).unwrap().producer();
        let mut ctx = PropagationCtx::new(&mut g, Kinds::ALL);
        ctx.note_change_edge(a);
        assert!(ctx.any_changes());
        assert_eq!(ctx.edge_worklist().iter().copied().collect::<Vec<_>>(), vec![b]);
        assert_eq!(
            ctx.op_worklist().iter().copied().collect::<Vec<_>>(),
            vec![producer, consumer]
        );
        assert_eq!(
            ctx.region_worklist().iter().copied().collect::<Vec<_>>(),
            vec![root, child]
        );
    }

    #[test]
    fn flood_respects_declared_kinds() {
        let (mut g, a, ..) = chain();
        let mut ctx = PropagationCtx::new(&mut g, Kinds::EDGES);
        ctx.note_change_edge(a);
        assert!(ctx.op_worklist().is_empty());
        assert!(ctx.region_worklist().is_empty());
        assert_eq!(ctx.edge_worklist().len(), 1);
    }

    #[test]
    fn region_flood_expands_only_from_origin() {
        let (mut g, a, _, root, child) = chain();
        let mut ctx = PropagationCtx::new(&mut g, Kinds::ALL);
        ctx.note_change_region(child);
        // parent and selector are reached; the parent is not expanded
        assert!(ctx.region_worklist().contains(&root));
        assert!(!ctx.region_worklist().contains(&child));
        assert!(ctx.edge_worklist().contains(&a));
    }

    #[test]
    fn call_site_flood_reaches_callee() {
        let mut g = Graph::new();
        let main = g.add_root_region();
        let f = g.add_function("id", Signature::fixed(vec![ValueType::Any], ValueType::Any));
        let body = g.function(f).unwrap().body;
        let x = g.add_parameter(f, "x", 0).unwrap();
        let y = g.apply(body, prim("-"), &[x]).unwrap();
        g.set_function_output(f, y).unwrap();
        let one = g.add_literal(ValueType::scalar(1.0), main).unwrap();
        let call = g.apply(main, Operator::Compound(f), &[one]).unwrap();
        g.set_output(call).unwrap();
        g.determine_relevant().unwrap();
        let call_node = g.edge(call).unwrap().producer();
        let param_node = g.edge(x).unwrap().producer();

        let mut ctx = PropagationCtx::new(&mut g, Kinds::ALL);
        ctx.note_change_op(call_node);
        assert!(ctx.region_worklist().contains(&body));
        assert!(ctx.edge_worklist().contains(&y));
        assert!(ctx.edge_worklist().contains(&one));
        assert!(ctx.op_worklist().contains(&param_node));
        assert!(!ctx.op_worklist().contains(&call_node));
    }

    #[test]
    fn maybe_set_range_is_idempotent() {
        let (mut g, _, b, ..) = chain();
        let mut ctx = PropagationCtx::new(&mut g, Kinds::OPS);
        assert!(ctx.maybe_set_range(b, ValueType::scalar(-1.0)).unwrap());
        assert!(ctx.any_changes());
        ctx.set_changed(false);
        assert!(!ctx.maybe_set_range(b, ValueType::scalar(-1.0)).unwrap());
        assert!(!ctx.any_changes());
    }
}
