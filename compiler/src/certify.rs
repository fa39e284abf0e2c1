// certify.rs — Back-pointer certifier for the dataflow graph
//
// Walks every relevant edge, op and region once and checks that each link
// recorded on one end is mirrored on the other. Runs as an ordinary
// propagation pass that never reports a change.
//
// Preconditions: `graph.relevant` is current.
// Postconditions: on success, every relevant element satisfies the rules in
//                 `Rule`; the graph is not modified.
// Failure modes: violations are collected, never fatal by themselves; callers
//                turn them into `InternalError::Certification`.
// Side effects: one `error!` event per violation.

use std::fmt;

use tracing::error;

use crate::error::InternalError;
use crate::graph::Graph;
use crate::id::{EdgeId, ElementId, OpId, RegionId};
use crate::operator::Operator;
use crate::pass::StageCert;
use crate::propagate::{propagate, Kinds, PropagationCtx, Propagator};

// ── Report types ────────────────────────────────────────────────────────────

/// The link family a violation was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rule {
    /// C0: the graph output exists.
    GraphOutput,
    /// C1: an edge's producer outputs that edge.
    EdgeProducer,
    /// C2: recorded consumers read the edge at the recorded position.
    EdgeConsumer,
    /// C3: recorded selector users are selected by the edge.
    EdgeSelector,
    /// C4: the edge's domain exists and lists it as a field.
    EdgeDomain,
    /// C5: an op's output edge names the op as producer.
    OpOutput,
    /// C6: every input slot is filled and mirrored as a consumer entry.
    OpInput,
    /// C7: a call's function, body back-link and output exist.
    CompoundLinks,
    /// C8: parent, children and selector of a region agree.
    RegionTree,
    /// C9: fields of a region name it as their domain.
    RegionFields,
    /// C10: a body region's function names it as body.
    RegionBody,
}

pub const ALL_RULES: [Rule; 11] = [
    Rule::GraphOutput,
    Rule::EdgeProducer,
    Rule::EdgeConsumer,
    Rule::EdgeSelector,
    Rule::EdgeDomain,
    Rule::OpOutput,
    Rule::OpInput,
    Rule::CompoundLinks,
    Rule::RegionTree,
    Rule::RegionFields,
    Rule::RegionBody,
];

impl Rule {
    pub fn name(self) -> &'static str {
        match self {
            Rule::GraphOutput => "C0_graph_output",
            Rule::EdgeProducer => "C1_edge_producer",
            Rule::EdgeConsumer => "C2_edge_consumer",
            Rule::EdgeSelector => "C3_edge_selector",
            Rule::EdgeDomain => "C4_edge_domain",
            Rule::OpOutput => "C5_op_output",
            Rule::OpInput => "C6_op_input",
            Rule::CompoundLinks => "C7_compound_links",
            Rule::RegionTree => "C8_region_tree",
            Rule::RegionFields => "C9_region_fields",
            Rule::RegionBody => "C10_region_body",
        }
    }
}

/// One broken link.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// The element on which the check ran; `None` for graph-level checks.
    pub element: Option<ElementId>,
    pub rule: Rule,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            Some(element) => write!(f, "[{}] {}: {}", self.rule.name(), element, self.message),
            None => write!(f, "[{}] {}", self.rule.name(), self.message),
        }
    }
}

/// Result of one certification run.
#[derive(Debug, Clone, Default)]
pub struct CertReport {
    pub violations: Vec<Violation>,
}

impl CertReport {
    pub fn violates(&self, rule: Rule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }
}

impl StageCert for CertReport {
    fn all_pass(&self) -> bool {
        self.violations.is_empty()
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        ALL_RULES
            .iter()
            .map(|rule| (rule.name(), !self.violates(*rule)))
            .collect()
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Check every relevant element, returning all violations found.
pub fn certify(graph: &mut Graph) -> Result<(), Vec<Violation>> {
    let report = certify_report(graph).map_err(|e| {
        vec![Violation {
            element: None,
            rule: Rule::GraphOutput,
            message: e.to_string(),
        }]
    })?;
    if report.violations.is_empty() {
        Ok(())
    } else {
        Err(report.violations)
    }
}

/// Run the certifier and return its full report.
pub fn certify_report(graph: &mut Graph) -> Result<CertReport, InternalError> {
    let mut certifier = Certifier::default();
    propagate(&mut certifier, graph)?;
    Ok(CertReport {
        violations: certifier.violations,
    })
}

/// Certify, turning any violation into a fatal error tagged with `stage`.
pub fn certify_stage(graph: &mut Graph, stage: &'static str) -> Result<(), InternalError> {
    let report = certify_report(graph)?;
    if report.violations.is_empty() {
        return Ok(());
    }
    for v in &report.violations {
        error!(stage, violation = %v, "certification failure");
    }
    Err(InternalError::Certification {
        stage,
        violations: report.violations,
    })
}

// ── Certifier pass ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Certifier {
    violations: Vec<Violation>,
}

impl Certifier {
    fn fail(&mut self, element: ElementId, rule: Rule, message: String) {
        self.violations.push(Violation {
            element: Some(element),
            rule,
            message,
        });
    }
}

impl Propagator for Certifier {
    fn name(&self) -> &'static str {
        "certify"
    }

    fn kinds(&self) -> Kinds {
        Kinds::ALL
    }

    fn preprop(&mut self, ctx: &mut PropagationCtx<'_>) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        match graph.output() {
            None => self.violations.push(Violation {
                element: None,
                rule: Rule::GraphOutput,
                message: "graph has no output".into(),
            }),
            Some(out) if graph.edge(out).is_none() => self.violations.push(Violation {
                element: Some(ElementId::Edge(out)),
                rule: Rule::GraphOutput,
                message: "graph output does not exist".into(),
            }),
            Some(_) => {}
        }
        Ok(())
    }

    fn act_edge(&mut self, ctx: &mut PropagationCtx<'_>, id: EdgeId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let here = ElementId::Edge(id);
        let edge = graph.try_edge(id)?;

        match graph.node(edge.producer()) {
            None => self.fail(here, Rule::EdgeProducer, format!("producer {} missing", edge.producer())),
            Some(node) if node.output() != id => self.fail(
                here,
                Rule::EdgeProducer,
                format!("producer {} outputs {}", edge.producer(), node.output()),
            ),
            Some(_) => {}
        }

        for &(consumer, index) in edge.consumers() {
            let Some(node) = graph.node(consumer) else {
                self.fail(here, Rule::EdgeConsumer, format!("consumer {consumer} missing"));
                continue;
            };
            if index >= node.inputs().len() {
                self.fail(
                    here,
                    Rule::EdgeConsumer,
                    format!("consumer {consumer} has no input {index}"),
                );
            } else if node.input(index) != Some(id) {
                self.fail(
                    here,
                    Rule::EdgeConsumer,
                    format!("input {index} of consumer {consumer} is not this edge"),
                );
            }
        }

        for &user in edge.selectors() {
            match graph.region(user) {
                None => self.fail(here, Rule::EdgeSelector, format!("selector user {user} missing")),
                Some(r) if r.selector() != Some(id) => self.fail(
                    here,
                    Rule::EdgeSelector,
                    format!("selector user {user} is not selected by this edge"),
                ),
                Some(_) => {}
            }
        }

        match graph.region(edge.domain()) {
            None => self.fail(here, Rule::EdgeDomain, format!("domain {} missing", edge.domain())),
            Some(r) if !r.fields().contains(&id) => self.fail(
                here,
                Rule::EdgeDomain,
                format!("domain {} does not list this edge", edge.domain()),
            ),
            Some(_) => {}
        }
        Ok(())
    }

    fn act_op(&mut self, ctx: &mut PropagationCtx<'_>, id: OpId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let here = ElementId::Op(id);
        let node = graph.try_node(id)?;

        match graph.edge(node.output()) {
            None => self.fail(here, Rule::OpOutput, format!("output {} missing", node.output())),
            Some(e) if e.producer() != id => self.fail(
                here,
                Rule::OpOutput,
                format!("output {} is produced by {}", node.output(), e.producer()),
            ),
            Some(_) => {}
        }

        for (index, input) in node.inputs().iter().enumerate() {
            let Some(input) = *input else {
                self.fail(here, Rule::OpInput, format!("input {index} is cleared"));
                continue;
            };
            match graph.edge(input) {
                None => self.fail(here, Rule::OpInput, format!("input {index} ({input}) missing")),
                Some(e) if !e.consumers().contains(&(id, index)) => self.fail(
                    here,
                    Rule::OpInput,
                    format!("input {index} ({input}) does not record this consumer"),
                ),
                Some(_) => {}
            }
        }

        if let Operator::Compound(fid) = node.op() {
            match graph.function(*fid) {
                None => self.fail(here, Rule::CompoundLinks, format!("function {fid} missing")),
                Some(f) => {
                    if graph.region(f.body).and_then(|r| r.body_of()) != Some(*fid) {
                        self.fail(
                            here,
                            Rule::CompoundLinks,
                            format!("body {} of {fid} does not link back", f.body),
                        );
                    }
                    match f.output {
                        None => self.fail(here, Rule::CompoundLinks, format!("{fid} has no output")),
                        Some(out) if graph.edge(out).is_none() => self.fail(
                            here,
                            Rule::CompoundLinks,
                            format!("output {out} of {fid} missing"),
                        ),
                        Some(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn act_region(&mut self, ctx: &mut PropagationCtx<'_>, id: RegionId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let here = ElementId::Region(id);
        let region = graph.try_region(id)?;

        if let Some(parent) = region.parent() {
            let selected = region
                .selector()
                .and_then(|s| graph.edge(s))
                .is_some_and(|e| e.selectors().contains(&id));
            if !selected {
                self.fail(here, Rule::RegionTree, "selector missing or not mirrored".into());
            }
            let listed = graph
                .region(parent)
                .is_some_and(|p| p.children().contains(&id));
            if !listed {
                self.fail(
                    here,
                    Rule::RegionTree,
                    format!("parent {parent} missing or does not list this region"),
                );
            }
        }

        for &child in region.children() {
            if graph.region(child).and_then(|c| c.parent()) != Some(id) {
                self.fail(
                    here,
                    Rule::RegionTree,
                    format!("child {child} missing or has another parent"),
                );
            }
        }

        for &field in region.fields() {
            if graph.edge(field).map(|e| e.domain()) != Some(id) {
                self.fail(
                    here,
                    Rule::RegionFields,
                    format!("field {field} missing or lives elsewhere"),
                );
            }
        }

        if let Some(fid) = region.body_of() {
            if graph.function(fid).map(|f| f.body) != Some(id) {
                self.fail(
                    here,
                    Rule::RegionBody,
                    format!("function {fid} missing or has another body"),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Signature;
    use crate::registry::Registry;
    use crate::types::ValueType;

    fn prim(name: &str) -> Operator {
        Operator::Primitive(Registry::core().lookup(name).unwrap())
    }

    struct Fixture {
        graph: Graph,
        a: EdgeId,
        b: EdgeId,
        child: RegionId,
        body: RegionId,
    }

    /// a = 1; b = -(id(a)); child region selected by a
    fn fixture() -> Fixture {
        let mut g = Graph::new();
        let root = g.add_root_region();
        let f = g.add_function("id", Signature::fixed(vec![ValueType::Any], ValueType::Any));
        let body = g.function(f).unwrap().body;
        let x = g.add_parameter(f, "x", 0).unwrap();
        g.set_function_output(f, x).unwrap();
        let a = g.add_literal(ValueType::scalar(1.0), root).unwrap();
        let call = g.apply(root, Operator::Compound(f), &[a]).unwrap();
        let b = g.apply(root, prim("-"), &[call]).unwrap();
        let child = g.add_child_region(root, a).unwrap();
        g.set_output(b).unwrap();
        g.determine_relevant().unwrap();
        Fixture {
            graph: g,
            a,
            b,
            child,
            body,
        }
    }

    fn rules(graph: &mut Graph) -> Vec<Rule> {
        let mut rules: Vec<Rule> = certify(graph)
            .unwrap_err()
            .into_iter()
            .map(|v| v.rule)
            .collect();
        rules.sort();
        rules.dedup();
        rules
    }

    #[test]
    fn consistent_graph_certifies() {
        let mut fx = fixture();
        assert!(certify(&mut fx.graph).is_ok());
        let report = certify_report(&mut fx.graph).unwrap();
        assert!(report.all_pass(), "{:?}", report.obligations());
        assert_eq!(report.obligations().len(), ALL_RULES.len());
    }

    #[test]
    fn missing_output_is_reported() {
        let mut fx = fixture();
        fx.graph.output = None;
        assert_eq!(rules(&mut fx.graph), vec![Rule::GraphOutput]);
    }

    #[test]
    fn dropped_consumer_entry_is_reported() {
        let mut fx = fixture();
        let a = fx.a;
        fx.graph.edges.get_mut(a).unwrap().consumers.clear();
        assert_eq!(rules(&mut fx.graph), vec![Rule::OpInput]);
    }

    #[test]
    fn stale_consumer_entry_is_reported() {
        let mut fx = fixture();
        let (a, b) = (fx.a, fx.b);
        let neg = fx.graph.edge(b).unwrap().producer();
        fx.graph.edges.get_mut(a).unwrap().consumers.insert((neg, 3));
        assert_eq!(rules(&mut fx.graph), vec![Rule::EdgeConsumer]);
    }

    #[test]
    fn cleared_input_slot_is_reported() {
        let mut fx = fixture();
        let b = fx.b;
        let neg = fx.graph.edge(b).unwrap().producer();
        let input = fx.graph.node(neg).unwrap().input(0).unwrap();
        fx.graph.nodes.get_mut(neg).unwrap().inputs[0] = None;
        fx.graph.edges.get_mut(input).unwrap().consumers.remove(&(neg, 0));
        assert_eq!(rules(&mut fx.graph), vec![Rule::OpInput]);
    }

    #[test]
    fn wrong_producer_is_reported() {
        let mut fx = fixture();
        let (a, b) = (fx.a, fx.b);
        let other = fx.graph.edge(b).unwrap().producer();
        fx.graph.edges.get_mut(a).unwrap().producer = other;
        // the orphaned producer is no longer reachable through any field
        assert_eq!(rules(&mut fx.graph), vec![Rule::EdgeProducer]);
    }

    #[test]
    fn wrong_output_is_reported() {
        let mut fx = fixture();
        let (a, b) = (fx.a, fx.b);
        let neg = fx.graph.edge(b).unwrap().producer();
        fx.graph.nodes.get_mut(neg).unwrap().output = a;
        assert_eq!(rules(&mut fx.graph), vec![Rule::EdgeProducer, Rule::OpOutput]);
    }

    #[test]
    fn broken_selector_is_reported() {
        let mut fx = fixture();
        let child = fx.child;
        fx.graph.regions.get_mut(child).unwrap().selector = None;
        assert_eq!(rules(&mut fx.graph), vec![Rule::EdgeSelector, Rule::RegionTree]);
    }

    #[test]
    fn field_outside_domain_is_reported() {
        let mut fx = fixture();
        let (a, child) = (fx.a, fx.child);
        fx.graph.edges.get_mut(a).unwrap().domain = child;
        assert_eq!(rules(&mut fx.graph), vec![Rule::EdgeDomain, Rule::RegionFields]);
    }

    #[test]
    fn broken_body_link_is_reported() {
        let mut fx = fixture();
        let body = fx.body;
        fx.graph.regions.get_mut(body).unwrap().body_of = None;
        assert_eq!(rules(&mut fx.graph), vec![Rule::CompoundLinks]);
    }

    #[test]
    fn certify_stage_wraps_violations() {
        let mut fx = fixture();
        fx.graph.output = None;
        let err = certify_stage(&mut fx.graph, "before optimization").unwrap_err();
        match err {
            InternalError::Certification { stage, violations } => {
                assert_eq!(stage, "before optimization");
                assert_eq!(violations.len(), 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn violation_display_names_rule_and_element() {
        let v = Violation {
            element: Some(ElementId::Edge(EdgeId(4))),
            rule: Rule::EdgeDomain,
            message: "domain am9 missing".into(),
        };
        assert_eq!(v.to_string(), "[C4_edge_domain] f4: domain am9 missing");
    }
}
