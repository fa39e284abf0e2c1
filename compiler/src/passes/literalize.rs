// literalize.rs — Replace computations of known values by literal nodes
//
// Two rewrites: an edge whose type is already a literal gets a fresh literal
// producer in its place, and `apply` of a literal lambda becomes a direct
// application of the lambda's operator. Side-effecting producers are kept.

use tracing::debug;

use crate::error::InternalError;
use crate::id::{EdgeId, OpId};
use crate::propagate::{Kinds, PropagationCtx, Propagator};

#[derive(Debug, Default)]
pub struct Literalizer;

impl Propagator for Literalizer {
    fn name(&self) -> &'static str {
        "literalize"
    }

    fn kinds(&self) -> Kinds {
        Kinds::EDGES.with(Kinds::OPS)
    }

    fn act_edge(&mut self, ctx: &mut PropagationCtx<'_>, edge: EdgeId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let e = graph.try_edge(edge)?;
        let producer = e.producer();
        let op = graph.try_node(producer)?.op();
        if op.is_literal() || graph.has_side_effect(op) || !e.range().is_literal() {
            return Ok(());
        }
        let (value, domain) = (e.range().clone(), e.domain());

        let literal = ctx.graph.add_literal(value, domain)?;
        debug!(%edge, %literal, %producer, "literalizing");
        ctx.graph.relocate_consumers(edge, literal)?;
        ctx.note_change_edge(edge);
        ctx.graph.delete_node(producer)
    }

    fn act_op(&mut self, ctx: &mut PropagationCtx<'_>, op: OpId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let node = graph.try_node(op)?;
        if node.op().primitive_name() != Some("apply") {
            return Ok(());
        }
        let Some(lambda) = node
            .input(0)
            .and_then(|e| graph.edge(e))
            .map(|e| e.range())
            .filter(|t| t.is_literal())
            .and_then(|t| t.lambda_value())
            .cloned()
        else {
            return Ok(());
        };
        let Some(args) = node.inputs()[1..].iter().copied().collect::<Option<Vec<EdgeId>>>() else {
            return Ok(());
        };
        let output = node.output();
        let domain = graph.try_edge(output)?.domain();

        let replacement = ctx.graph.apply(domain, lambda, &args)?;
        debug!(%op, %replacement, "literalizing apply of literal lambda");
        ctx.graph.relocate_consumers(output, replacement)?;
        ctx.note_change_op(op);
        ctx.graph.delete_node(op)
    }
}
