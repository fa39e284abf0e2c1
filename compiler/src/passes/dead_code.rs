// dead_code.rs — Remove edges and regions that cannot affect an output
//
// Everything starts out presumed dead. Outputs, side effects and selector
// uses make edges live; liveness spreads backwards through consumers and
// upwards through regions as the engine floods. Whatever is still presumed
// dead when the worklists drain is deleted.
//
// Preconditions: `graph.relevant` is current.
// Postconditions: every remaining relevant edge and region is live.
// Failure modes: malformed links → `InternalError::Malformed`.
// Side effects: deletes nodes and regions in `postprop`.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::InternalError;
use crate::id::{EdgeId, RegionId};
use crate::propagate::{Kinds, PropagationCtx, Propagator};

#[derive(Debug, Default)]
pub struct DeadCodeEliminator {
    kill_edges: BTreeSet<EdgeId>,
    kill_regions: BTreeSet<RegionId>,
}

impl DeadCodeEliminator {
    fn edge_is_live(&self, ctx: &PropagationCtx<'_>, id: EdgeId) -> Result<bool, InternalError> {
        let graph = &*ctx.graph;
        if graph.is_output(id) {
            return Ok(true);
        }
        let edge = graph.try_edge(id)?;
        if graph.has_side_effect(graph.try_node(edge.producer())?.op()) {
            return Ok(true);
        }
        for &(consumer, _) in edge.consumers() {
            // uses inside functions nobody calls do not count
            let root = graph.root_of(graph.node_domain(consumer)?)?;
            if !graph.relevant().contains(&root) {
                continue;
            }
            if !self.kill_edges.contains(&graph.try_node(consumer)?.output()) {
                return Ok(true);
            }
        }
        Ok(edge
            .selectors()
            .iter()
            .any(|r| !self.kill_regions.contains(r)))
    }
}

impl Propagator for DeadCodeEliminator {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn kinds(&self) -> Kinds {
        Kinds::EDGES.with(Kinds::REGIONS)
    }

    fn preprop(&mut self, ctx: &mut PropagationCtx<'_>) -> Result<(), InternalError> {
        self.kill_edges = ctx.edge_worklist().clone();
        self.kill_regions = ctx.region_worklist().clone();
        Ok(())
    }

    fn act_edge(&mut self, ctx: &mut PropagationCtx<'_>, edge: EdgeId) -> Result<(), InternalError> {
        if !self.kill_edges.contains(&edge) {
            return Ok(());
        }
        if self.edge_is_live(ctx, edge)? {
            self.kill_edges.remove(&edge);
            ctx.note_change_edge(edge);
        }
        Ok(())
    }

    fn act_region(&mut self, ctx: &mut PropagationCtx<'_>, id: RegionId) -> Result<(), InternalError> {
        if !self.kill_regions.contains(&id) {
            return Ok(());
        }
        let region = ctx.graph.try_region(id)?;
        let live = region.body_of().is_some()
            || region.children().iter().any(|c| !self.kill_regions.contains(c))
            || region.fields().iter().any(|f| !self.kill_edges.contains(f));
        if live {
            self.kill_regions.remove(&id);
            ctx.note_change_region(id);
        }
        Ok(())
    }

    fn postprop(&mut self, ctx: &mut PropagationCtx<'_>) -> Result<(), InternalError> {
        // Only deletions count as changes; liveness marks alone do not.
        ctx.set_changed(!self.kill_edges.is_empty() || !self.kill_regions.is_empty());
        for edge in std::mem::take(&mut self.kill_edges) {
            let Some(producer) = ctx.graph.edge(edge).map(|e| e.producer()) else {
                continue;
            };
            debug!(%edge, "deleting dead edge");
            ctx.graph.delete_node(producer)?;
        }
        for region in std::mem::take(&mut self.kill_regions) {
            if ctx.graph.region(region).is_none() {
                continue;
            }
            debug!(%region, "deleting dead region");
            ctx.graph.delete_space(region)?;
        }
        Ok(())
    }
}
