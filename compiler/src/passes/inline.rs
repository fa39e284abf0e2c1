// inline.rs — Inline calls of small non-recursive functions
//
// A call is inlined when the callee cannot reach the caller (or itself)
// through calls, its signature has fixed arity matching the call, and either
// the callee body or the caller's container is within the size threshold.

use tracing::{debug, trace};

use crate::error::InternalError;
use crate::id::OpId;
use crate::operator::Operator;
use crate::propagate::{Kinds, PropagationCtx, Propagator};

/// Default size threshold, in fields.
pub const DEFAULT_INLINE_THRESHOLD: usize = 10;

#[derive(Debug)]
pub struct FunctionInlining {
    /// `None` inlines regardless of size.
    threshold: Option<usize>,
}

impl FunctionInlining {
    pub fn new(threshold: Option<usize>) -> Self {
        FunctionInlining { threshold }
    }
}

impl Default for FunctionInlining {
    fn default() -> Self {
        Self::new(Some(DEFAULT_INLINE_THRESHOLD))
    }
}

impl Propagator for FunctionInlining {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn kinds(&self) -> Kinds {
        Kinds::OPS
    }

    fn act_op(&mut self, ctx: &mut PropagationCtx<'_>, op: OpId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let node = graph.try_node(op)?;
        let Operator::Compound(callee) = *node.op() else {
            return Ok(());
        };
        if graph.is_recursive(op)? {
            trace!(%op, %callee, "not inlining recursive call");
            return Ok(());
        }
        let function = graph.try_function(callee)?;
        if function.signature.rest.is_some()
            || !function.signature.legal_length(node.inputs().len())
            || function.output.is_none()
        {
            trace!(%op, %callee, "not inlining call with mismatched signature");
            return Ok(());
        }
        if let Some(threshold) = self.threshold {
            let body_size = graph.region_size(function.body);
            let container_size = graph.region_size(graph.root_of(graph.node_domain(op)?)?);
            if body_size > threshold && container_size > threshold {
                trace!(%op, body_size, container_size, "call too large to inline");
                return Ok(());
            }
        }
        debug!(%op, callee = %function.name, "inlining");
        ctx.note_change_op(op);
        ctx.graph.make_op_inline(op)
    }
}
