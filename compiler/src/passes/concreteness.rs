// concreteness.rs — Report edges whose type is still ambiguous

use crate::diag::{codes, Diagnostic};
use crate::error::InternalError;
use crate::id::{EdgeId, ElementId};
use crate::propagate::{Kinds, PropagationCtx, Propagator};

/// Emits an error for every relevant edge whose type contains `any`.
#[derive(Debug, Default)]
pub struct TypeConcreteness {
    diagnostics: Vec<Diagnostic>,
}

impl Propagator for TypeConcreteness {
    fn name(&self) -> &'static str {
        "check-types"
    }

    fn kinds(&self) -> Kinds {
        Kinds::EDGES
    }

    fn act_edge(&mut self, ctx: &mut PropagationCtx<'_>, edge: EdgeId) -> Result<(), InternalError> {
        let range = ctx.graph.try_edge(edge)?.range();
        if !range.is_concrete() {
            self.diagnostics.push(
                Diagnostic::error(
                    Some(ElementId::Edge(edge)),
                    format!("type is ambiguous: {edge} : {range}"),
                )
                .with_code(codes::E0100),
            );
        }
        Ok(())
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::operator::Operator;
    use crate::propagate::propagate;
    use crate::registry::Registry;
    use crate::types::{TupleType, ValueType};

    #[test]
    fn ambiguous_edges_are_reported() {
        let reg = Registry::core();
        let mut g = Graph::new();
        let root = g.add_root_region();
        let a = g.add_literal(ValueType::scalar(1.0), root).unwrap();
        // `mux` outputs `any` until folded
        let sel = g.add_literal(ValueType::boolean(true), root).unwrap();
        let m = g
            .apply(root, Operator::Primitive(reg.lookup("mux").unwrap()), &[sel, a, a])
            .unwrap();
        g.set_output(m).unwrap();
        g.determine_relevant().unwrap();

        let mut pass = TypeConcreteness::default();
        assert!(!propagate(&mut pass, &mut g).unwrap());
        let diags = pass.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::E0100));
        assert_eq!(diags[0].location, Some(ElementId::Edge(m)));
        assert_eq!(diags[0].message, format!("type is ambiguous: {m} : any"));
    }

    #[test]
    fn concrete_graphs_pass() {
        let mut g = Graph::new();
        let root = g.add_root_region();
        let t = ValueType::Tuple(TupleType::bounded(vec![
            ValueType::scalar(1.0),
            ValueType::Number,
        ]));
        let a = g.add_literal(ValueType::vector(&[1.0]), root).unwrap();
        g.set_range(a, t).unwrap();
        g.set_output(a).unwrap();
        g.determine_relevant().unwrap();
        let mut pass = TypeConcreteness::default();
        propagate(&mut pass, &mut g).unwrap();
        assert!(pass.take_diagnostics().is_empty());
    }
}
