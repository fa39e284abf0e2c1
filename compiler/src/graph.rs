// graph.rs — Dataflow graph: regions, value edges and operator nodes
//
// The optimizer's IR. Regions form scope trees; every value edge lives in a
// domain region and is produced by exactly one operator node; function bodies
// are root regions linked back to their function. All elements live in
// append-only arenas owned by `Graph`, addressed by typed ids.
//
// Preconditions: none; graphs are built through the construction API below.
// Postconditions: every mutation keeps both ends of each link in sync
//                 (producer/output, consumer/input, selector/selector-user,
//                 parent/children, domain/fields, body/body_of).
// Failure modes: operations on absent ids → `InternalError::Malformed`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::InternalError;
use crate::id::{Arena, EdgeId, FunctionId, OpId, RegionId};
use crate::malformed;
use crate::operator::{Function, Operator, Signature};
use crate::types::ValueType;

// ── Public types ────────────────────────────────────────────────────────────

/// A use of an edge: the consuming node and the input position.
pub type Consumer = (OpId, usize);

/// A scope. Roots are either the program's main region or function bodies.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub(crate) parent: Option<RegionId>,
    /// Edge deciding membership in this region; `None` for roots.
    pub(crate) selector: Option<EdgeId>,
    pub(crate) children: BTreeSet<RegionId>,
    pub(crate) fields: BTreeSet<EdgeId>,
    pub(crate) body_of: Option<FunctionId>,
}

impl Region {
    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    pub fn selector(&self) -> Option<EdgeId> {
        self.selector
    }

    pub fn children(&self) -> &BTreeSet<RegionId> {
        &self.children
    }

    /// Edges whose domain is this region.
    pub fn fields(&self) -> &BTreeSet<EdgeId> {
        &self.fields
    }

    pub fn body_of(&self) -> Option<FunctionId> {
        self.body_of
    }
}

/// A single-assignment value.
#[derive(Debug, Clone)]
pub struct ValueEdge {
    pub(crate) domain: RegionId,
    pub(crate) range: ValueType,
    pub(crate) producer: OpId,
    pub(crate) consumers: BTreeSet<Consumer>,
    pub(crate) selectors: BTreeSet<RegionId>,
}

impl ValueEdge {
    pub fn domain(&self) -> RegionId {
        self.domain
    }

    /// Current type annotation.
    pub fn range(&self) -> &ValueType {
        &self.range
    }

    pub fn producer(&self) -> OpId {
        self.producer
    }

    pub fn consumers(&self) -> &BTreeSet<Consumer> {
        &self.consumers
    }

    /// Regions this edge is the selector of.
    pub fn selectors(&self) -> &BTreeSet<RegionId> {
        &self.selectors
    }
}

/// An operator application. An input slot is `None` only transiently, after
/// its producer was deleted and before this node is deleted too.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub(crate) op: Operator,
    pub(crate) inputs: Vec<Option<EdgeId>>,
    pub(crate) output: EdgeId,
}

impl OpNode {
    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn inputs(&self) -> &[Option<EdgeId>] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Option<EdgeId> {
        self.inputs.get(index).copied().flatten()
    }

    pub fn output(&self) -> EdgeId {
        self.output
    }
}

/// The whole IR plus output and live-function bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) regions: Arena<RegionId, Region>,
    pub(crate) edges: Arena<EdgeId, ValueEdge>,
    pub(crate) nodes: Arena<OpId, OpNode>,
    pub(crate) functions: Arena<FunctionId, Function>,
    pub(crate) output: Option<EdgeId>,
    /// Root regions reachable from the output through calls.
    pub(crate) relevant: BTreeSet<RegionId>,
    /// Nodes referring to each function.
    pub(crate) funcalls: BTreeMap<FunctionId, BTreeSet<OpId>>,
    gensym: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&ValueEdge> {
        self.edges.get(id)
    }

    pub fn node(&self, id: OpId) -> Option<&OpNode> {
        self.nodes.get(id)
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id)
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &ValueEdge)> {
        self.edges.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (OpId, &OpNode)> {
        self.nodes.iter()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions.iter()
    }

    pub fn output(&self) -> Option<EdgeId> {
        self.output
    }

    pub fn relevant(&self) -> &BTreeSet<RegionId> {
        &self.relevant
    }

    /// Nodes currently referring to `function`.
    pub fn callers(&self, function: FunctionId) -> Option<&BTreeSet<OpId>> {
        self.funcalls.get(&function)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    pub(crate) fn try_region(&self, id: RegionId) -> Result<&Region, InternalError> {
        self.regions
            .get(id)
            .ok_or_else(|| malformed!("no such region {}", id))
    }

    pub(crate) fn try_region_mut(&mut self, id: RegionId) -> Result<&mut Region, InternalError> {
        self.regions
            .get_mut(id)
            .ok_or_else(|| malformed!("no such region {}", id))
    }

    pub(crate) fn try_edge(&self, id: EdgeId) -> Result<&ValueEdge, InternalError> {
        self.edges
            .get(id)
            .ok_or_else(|| malformed!("no such edge {}", id))
    }

    pub(crate) fn try_edge_mut(&mut self, id: EdgeId) -> Result<&mut ValueEdge, InternalError> {
        self.edges
            .get_mut(id)
            .ok_or_else(|| malformed!("no such edge {}", id))
    }

    pub(crate) fn try_node(&self, id: OpId) -> Result<&OpNode, InternalError> {
        self.nodes
            .get(id)
            .ok_or_else(|| malformed!("no such node {}", id))
    }

    pub(crate) fn try_node_mut(&mut self, id: OpId) -> Result<&mut OpNode, InternalError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| malformed!("no such node {}", id))
    }

    pub(crate) fn try_function(&self, id: FunctionId) -> Result<&Function, InternalError> {
        self.functions
            .get(id)
            .ok_or_else(|| malformed!("no such function {}", id))
    }

    pub(crate) fn try_function_mut(
        &mut self,
        id: FunctionId,
    ) -> Result<&mut Function, InternalError> {
        self.functions
            .get_mut(id)
            .ok_or_else(|| malformed!("no such function {}", id))
    }

    /// Region holding the node's output.
    pub fn node_domain(&self, op: OpId) -> Result<RegionId, InternalError> {
        let output = self.try_node(op)?.output;
        Ok(self.try_edge(output)?.domain)
    }

    // ── Construction ────────────────────────────────────────────────────────

    pub fn add_root_region(&mut self) -> RegionId {
        self.regions.alloc(Region::default())
    }

    /// A region nested in `parent`, selected by `selector`.
    pub fn add_child_region(
        &mut self,
        parent: RegionId,
        selector: EdgeId,
    ) -> Result<RegionId, InternalError> {
        self.try_region(parent)?;
        self.try_edge(selector)?;
        let id = self.regions.alloc(Region {
            parent: Some(parent),
            selector: Some(selector),
            ..Region::default()
        });
        self.try_region_mut(parent)?.children.insert(id);
        self.try_edge_mut(selector)?.selectors.insert(id);
        Ok(id)
    }

    /// Declare a function with an empty body region.
    pub fn add_function(&mut self, name: impl Into<String>, signature: Signature) -> FunctionId {
        let id = self.functions.next_id();
        let body = self.regions.alloc(Region {
            body_of: Some(id),
            ..Region::default()
        });
        self.functions.alloc(Function {
            name: name.into(),
            signature,
            body,
            output: None,
            side_effect: false,
        })
    }

    pub fn set_function_output(
        &mut self,
        function: FunctionId,
        edge: EdgeId,
    ) -> Result<(), InternalError> {
        let body = self.try_function(function)?.body;
        let domain = self.try_edge(edge)?.domain;
        if domain != body {
            return Err(malformed!(
                "output {} of {} lies outside its body {}",
                edge,
                function,
                body
            ));
        }
        self.try_function_mut(function)?.output = Some(edge);
        Ok(())
    }

    fn output_type(&self, op: &Operator) -> Result<ValueType, InternalError> {
        Ok(match op {
            Operator::Literal(value) => value.clone(),
            Operator::Parameter {
                function, index, ..
            } => self
                .try_function(*function)?
                .signature
                .nth_type(*index)
                .cloned()
                .unwrap_or(ValueType::Any),
            Operator::Primitive(p) => p.signature.output.clone(),
            Operator::Compound(f) => self.try_function(*f)?.signature.output.clone(),
        })
    }

    /// Create a node applying `op` in `region`, with no inputs yet. Its output
    /// edge starts at the operator's declared output type.
    pub fn add_node(&mut self, op: Operator, region: RegionId) -> Result<OpId, InternalError> {
        self.try_region(region)?;
        let refs = op.function_refs();
        for f in &refs {
            self.try_function(*f)?;
        }
        let range = self.output_type(&op)?;
        let node = self.nodes.next_id();
        let output = self.edges.alloc(ValueEdge {
            domain: region,
            range,
            producer: node,
            consumers: BTreeSet::new(),
            selectors: BTreeSet::new(),
        });
        self.nodes.alloc(OpNode {
            op,
            inputs: Vec::new(),
            output,
        });
        self.try_region_mut(region)?.fields.insert(output);
        self.add_op_references(node, &refs)?;
        Ok(node)
    }

    /// Append `edge` as the node's next input.
    pub fn add_input(&mut self, node: OpId, edge: EdgeId) -> Result<usize, InternalError> {
        self.try_edge(edge)?;
        let n = self.try_node_mut(node)?;
        let index = n.inputs.len();
        n.inputs.push(Some(edge));
        self.try_edge_mut(edge)?.consumers.insert((node, index));
        Ok(index)
    }

    /// Create a node with the given inputs and return its output edge.
    pub fn apply(
        &mut self,
        region: RegionId,
        op: Operator,
        inputs: &[EdgeId],
    ) -> Result<EdgeId, InternalError> {
        let node = self.add_node(op, region)?;
        for edge in inputs {
            self.add_input(node, *edge)?;
        }
        Ok(self.try_node(node)?.output)
    }

    pub fn add_literal(
        &mut self,
        value: ValueType,
        region: RegionId,
    ) -> Result<EdgeId, InternalError> {
        if !value.is_literal() {
            return Err(malformed!("literal operator given non-literal value {}", value));
        }
        self.apply(region, Operator::Literal(value), &[])
    }

    /// Read the `index`th argument of `function` inside its body.
    pub fn add_parameter(
        &mut self,
        function: FunctionId,
        name: impl Into<String>,
        index: usize,
    ) -> Result<EdgeId, InternalError> {
        let body = self.try_function(function)?.body;
        let op = Operator::Parameter {
            function,
            index,
            name: name.into(),
        };
        self.apply(body, op, &[])
    }

    pub fn set_output(&mut self, edge: EdgeId) -> Result<(), InternalError> {
        self.try_edge(edge)?;
        self.output = Some(edge);
        Ok(())
    }

    /// Overwrite an edge's type. Rewrite passes narrow types through the
    /// propagation context instead, which also records the change.
    pub fn set_range(&mut self, edge: EdgeId, range: ValueType) -> Result<(), InternalError> {
        self.try_edge_mut(edge)?.range = range;
        Ok(())
    }

    fn add_op_references(&mut self, node: OpId, refs: &[FunctionId]) -> Result<(), InternalError> {
        for f in refs {
            let body = self.try_function(*f)?.body;
            self.funcalls.entry(*f).or_default().insert(node);
            self.relevant.insert(body);
        }
        Ok(())
    }

    fn delete_op_references(&mut self, node: OpId, refs: &[FunctionId]) {
        for f in refs {
            let Some(callers) = self.funcalls.get_mut(f) else {
                continue;
            };
            callers.remove(&node);
            if callers.is_empty() {
                self.funcalls.remove(f);
                if let Some(function) = self.functions.get(*f) {
                    self.relevant.remove(&function.body);
                }
            }
        }
    }

    // ── Rewiring ────────────────────────────────────────────────────────────

    /// Point input `index` of `consumer` at `new_src`.
    pub fn relocate_source(
        &mut self,
        consumer: OpId,
        index: usize,
        new_src: EdgeId,
    ) -> Result<(), InternalError> {
        self.try_edge(new_src)?;
        let slot = self
            .try_node_mut(consumer)?
            .inputs
            .get_mut(index)
            .ok_or_else(|| malformed!("{} has no input {}", consumer, index))?;
        let old = slot.replace(new_src);
        if let Some(edge) = old.and_then(|e| self.edges.get_mut(e)) {
            edge.consumers.remove(&(consumer, index));
        }
        self.try_edge_mut(new_src)?.consumers.insert((consumer, index));
        Ok(())
    }

    /// Move every use of `src` onto `dst`: consumer inputs, selector roles,
    /// the function output and the graph output.
    pub fn relocate_consumers(&mut self, src: EdgeId, dst: EdgeId) -> Result<(), InternalError> {
        if src == dst {
            return Ok(());
        }
        self.try_edge(dst)?;
        let (consumers, selectors, domain) = {
            let edge = self.try_edge_mut(src)?;
            (
                std::mem::take(&mut edge.consumers),
                std::mem::take(&mut edge.selectors),
                edge.domain,
            )
        };
        for &(node, index) in &consumers {
            let slot = self
                .try_node_mut(node)?
                .inputs
                .get_mut(index)
                .ok_or_else(|| malformed!("{} has no input {}", node, index))?;
            *slot = Some(dst);
        }
        for &region in &selectors {
            self.try_region_mut(region)?.selector = Some(dst);
        }
        let target = self.try_edge_mut(dst)?;
        target.consumers.extend(consumers);
        target.selectors.extend(selectors);

        if let Some(f) = self.regions.get(domain).and_then(|r| r.body_of) {
            let function = self.try_function_mut(f)?;
            if function.output == Some(src) {
                function.output = Some(dst);
            }
        }
        if self.output == Some(src) {
            self.output = Some(dst);
        }
        Ok(())
    }

    // ── Deletion ────────────────────────────────────────────────────────────

    /// Remove a node and its output edge. Inputs are released; any remaining
    /// consumer slots of the output are cleared, and selector uses dropped.
    pub fn delete_node(&mut self, op: OpId) -> Result<(), InternalError> {
        let node = self
            .nodes
            .remove(op)
            .ok_or_else(|| malformed!("no such node {}", op))?;
        for (index, input) in node.inputs.iter().enumerate() {
            if let Some(edge) = input.and_then(|e| self.edges.get_mut(e)) {
                edge.consumers.remove(&(op, index));
            }
        }
        let output = self
            .edges
            .remove(node.output)
            .ok_or_else(|| malformed!("{} has no output edge {}", op, node.output))?;
        for &(consumer, index) in &output.consumers {
            if let Some(slot) = self
                .nodes
                .get_mut(consumer)
                .and_then(|n| n.inputs.get_mut(index))
            {
                *slot = None;
            }
        }
        if let Some(region) = self.regions.get_mut(output.domain) {
            region.fields.remove(&node.output);
        }
        for &user in &output.selectors {
            if let Some(region) = self.regions.get_mut(user) {
                region.selector = None;
            }
        }
        self.delete_op_references(op, &node.op.function_refs());
        Ok(())
    }

    /// Remove an empty region. Its children become orphaned roots.
    pub fn delete_space(&mut self, region: RegionId) -> Result<(), InternalError> {
        let fields = self.try_region(region)?.fields.len();
        if fields > 0 {
            return Err(malformed!(
                "cannot delete {}: it still holds {} field(s)",
                region,
                fields
            ));
        }
        let removed = self
            .regions
            .remove(region)
            .ok_or_else(|| malformed!("no such region {}", region))?;
        if let Some(parent) = removed.parent.and_then(|p| self.regions.get_mut(p)) {
            parent.children.remove(&region);
        }
        if let Some(selector) = removed.selector.and_then(|s| self.edges.get_mut(s)) {
            selector.selectors.remove(&region);
        }
        for child in &removed.children {
            if let Some(c) = self.regions.get_mut(*child) {
                c.parent = None;
            }
        }
        self.relevant.remove(&region);
        Ok(())
    }

    // ── Splicing ────────────────────────────────────────────────────────────

    /// Move the fields and children of root region `src` into `target`, then
    /// delete `src`.
    pub fn remap_medium(&mut self, src: RegionId, target: RegionId) -> Result<(), InternalError> {
        if src == target {
            return Err(malformed!("cannot remap {} into itself", src));
        }
        self.try_region(target)?;
        let (fields, children) = {
            let region = self.try_region_mut(src)?;
            if region.parent.is_some() {
                return Err(malformed!("cannot remap non-root region {}", src));
            }
            (
                std::mem::take(&mut region.fields),
                std::mem::take(&mut region.children),
            )
        };
        for &field in &fields {
            self.try_edge_mut(field)?.domain = target;
        }
        for &child in &children {
            self.try_region_mut(child)?.parent = Some(target);
        }
        let t = self.try_region_mut(target)?;
        t.fields.extend(fields);
        t.children.extend(children);
        self.delete_space(src)
    }

    /// Deep-copy a function: its region tree, nodes and edges (with their
    /// current types). Inputs from outside the body stay shared.
    pub fn copy_function(&mut self, source: FunctionId) -> Result<FunctionId, InternalError> {
        let (name, signature, body, output, side_effect) = {
            let f = self.try_function(source)?;
            (
                f.name.clone(),
                f.signature.clone(),
                f.body,
                f.output,
                f.side_effect,
            )
        };
        let spaces = self.collect_spaces(body);

        let mut amap: BTreeMap<RegionId, RegionId> = BTreeMap::new();
        for &region in &spaces {
            amap.insert(region, self.regions.alloc(Region::default()));
        }
        let new_body = amap
            .get(&body)
            .copied()
            .ok_or_else(|| malformed!("body {} of {} does not exist", body, source))?;
        self.gensym += 1;
        let copy = self.functions.alloc(Function {
            name: format!("{}~{}", name, self.gensym),
            signature,
            body: new_body,
            output: None,
            side_effect,
        });
        self.try_region_mut(new_body)?.body_of = Some(copy);

        // Nodes and fields, region by region.
        let mut omap: BTreeMap<OpId, OpId> = BTreeMap::new();
        let mut fmap: BTreeMap<EdgeId, EdgeId> = BTreeMap::new();
        for &region in &spaces {
            let fields: Vec<EdgeId> = self.try_region(region)?.fields.iter().copied().collect();
            for field in fields {
                let (producer, range) = {
                    let edge = self.try_edge(field)?;
                    (edge.producer, edge.range.clone())
                };
                let op = match &self.try_node(producer)?.op {
                    Operator::Parameter {
                        function,
                        index,
                        name,
                    } if *function == source => Operator::Parameter {
                        function: copy,
                        index: *index,
                        name: name.clone(),
                    },
                    other => other.clone(),
                };
                let target = amap
                    .get(&region)
                    .copied()
                    .ok_or_else(|| malformed!("{} was not copied from {}", region, body))?;
                let node = self.add_node(op, target)?;
                let copied = self.try_node(node)?.output;
                self.try_edge_mut(copied)?.range = range;
                omap.insert(producer, node);
                fmap.insert(field, copied);
            }
        }

        // Region tree and selectors.
        for (&old, &new) in &amap {
            let (parent, selector) = {
                let r = self.try_region(old)?;
                (r.parent, r.selector)
            };
            let Some(parent) = parent else {
                continue;
            };
            let new_parent = *amap
                .get(&parent)
                .ok_or_else(|| malformed!("parent of {} lies outside {}", old, body))?;
            let new_selector = selector
                .and_then(|s| fmap.get(&s).copied())
                .ok_or_else(|| malformed!("selector of {} lies outside {}", old, body))?;
            let r = self.try_region_mut(new)?;
            r.parent = Some(new_parent);
            r.selector = Some(new_selector);
            self.try_region_mut(new_parent)?.children.insert(new);
            self.try_edge_mut(new_selector)?.selectors.insert(new);
        }

        // Inputs: internal references follow the copy, external ones are shared.
        for (&old, &new) in &omap {
            let inputs = self.try_node(old)?.inputs.clone();
            for (index, input) in inputs.into_iter().enumerate() {
                let edge = input.ok_or_else(|| malformed!("input {} of {} is cleared", index, old))?;
                self.add_input(new, fmap.get(&edge).copied().unwrap_or(edge))?;
            }
        }

        let new_output = output
            .map(|o| {
                fmap.get(&o)
                    .copied()
                    .ok_or_else(|| malformed!("output {} of {} lies outside its body", o, source))
            })
            .transpose()?;
        self.try_function_mut(copy)?.output = new_output;
        Ok(copy)
    }

    /// Replace a call node by a copy of the callee's body, merged into the
    /// call's region. Parameters are rewired to the call's arguments and the
    /// call's consumers to the copy's output.
    pub fn make_op_inline(&mut self, target: OpId) -> Result<(), InternalError> {
        let (callee, args, call_output) = {
            let node = self.try_node(target)?;
            match node.op {
                Operator::Compound(f) => (f, node.inputs.clone(), node.output),
                ref other => return Err(malformed!("cannot inline operator {}", other)),
            }
        };
        if self.try_function(callee)?.signature.rest.is_some() {
            return Err(malformed!("cannot inline variadic function {}", callee));
        }
        let domain = self.try_edge(call_output)?.domain;

        let copy = self.copy_function(callee)?;
        let (copy_body, mut new_output) = {
            let f = self.try_function(copy)?;
            (f.body, f.output)
        };
        let body_nodes = self.collect_ops(copy_body);
        self.remap_medium(copy_body, domain)?;

        for node in body_nodes {
            let (index, param) = match self.try_node(node)? {
                OpNode {
                    op: Operator::Parameter { function, index, .. },
                    output,
                    ..
                } if *function == copy => (*index, *output),
                _ => continue,
            };
            let arg = args
                .get(index)
                .copied()
                .flatten()
                .ok_or_else(|| malformed!("{} has no argument {} for {}", target, index, callee))?;
            if new_output == Some(param) {
                new_output = Some(arg);
            }
            self.relocate_consumers(param, arg)?;
            self.delete_node(node)?;
        }

        let new_output =
            new_output.ok_or_else(|| malformed!("inlined function {} has no output", callee))?;
        self.relocate_consumers(call_output, new_output)?;
        self.delete_node(target)?;
        self.functions.remove(copy);
        Ok(())
    }

    // ── Analysis ────────────────────────────────────────────────────────────

    /// Recompute `relevant` and the call map by reachability from the root
    /// region holding the output.
    pub fn determine_relevant(&mut self) -> Result<(), InternalError> {
        let Some(output) = self.output else {
            return Ok(());
        };
        let start = self.root_of(self.try_edge(output)?.domain)?;
        self.relevant.clear();
        self.funcalls.clear();
        let mut queue = BTreeSet::from([start]);
        while let Some(next) = queue.pop_first() {
            self.relevant.insert(next);
            for node in self.collect_ops(next) {
                for f in self.try_node(node)?.op.function_refs() {
                    self.funcalls.entry(f).or_default().insert(node);
                    let body = self.try_function(f)?.body;
                    if !self.relevant.contains(&body) {
                        queue.insert(body);
                    }
                }
            }
        }
        Ok(())
    }

    /// Root of the region tree containing `region`.
    pub fn root_of(&self, region: RegionId) -> Result<RegionId, InternalError> {
        let mut current = region;
        for _ in 0..=self.regions.len() {
            match self.try_region(current)?.parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
        Err(malformed!("region tree above {} has a cycle", region))
    }

    /// `region` and all regions nested in it. Absent ids are skipped.
    pub fn collect_spaces(&self, region: RegionId) -> BTreeSet<RegionId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![region];
        while let Some(next) = stack.pop() {
            let Some(r) = self.regions.get(next) else {
                continue;
            };
            if out.insert(next) {
                stack.extend(r.children.iter().copied());
            }
        }
        out
    }

    /// Every edge whose domain is `region` or nested in it.
    pub fn collect_fields(&self, region: RegionId) -> BTreeSet<EdgeId> {
        self.collect_spaces(region)
            .into_iter()
            .filter_map(|r| self.regions.get(r))
            .flat_map(|r| r.fields.iter().copied())
            .collect()
    }

    /// Producers of every edge in `region` and nested regions.
    pub fn collect_ops(&self, region: RegionId) -> BTreeSet<OpId> {
        self.collect_fields(region)
            .into_iter()
            .filter_map(|e| self.edges.get(e))
            .map(|e| e.producer)
            .collect()
    }

    /// Whether `region` lies strictly inside `ancestor`.
    pub fn child_of(&self, region: RegionId, ancestor: RegionId) -> bool {
        let mut current = self.regions.get(region).and_then(|r| r.parent);
        let mut steps = self.regions.len();
        while let Some(r) = current {
            if r == ancestor {
                return true;
            }
            if steps == 0 {
                return false;
            }
            steps -= 1;
            current = self.regions.get(r).and_then(|r| r.parent);
        }
        false
    }

    /// Number of fields in `region` and its nested regions.
    pub fn region_size(&self, region: RegionId) -> usize {
        self.collect_spaces(region)
            .into_iter()
            .filter_map(|r| self.regions.get(r))
            .map(|r| r.fields.len())
            .sum()
    }

    /// Whether `edge` is the graph output or the output of the function whose
    /// body it lives in.
    pub fn is_output(&self, edge: EdgeId) -> bool {
        if self.output == Some(edge) {
            return true;
        }
        self.edges
            .get(edge)
            .and_then(|e| self.regions.get(e.domain))
            .and_then(|r| r.body_of)
            .and_then(|f| self.functions.get(f))
            .is_some_and(|f| f.output == Some(edge))
    }

    pub fn has_side_effect(&self, op: &Operator) -> bool {
        match op {
            Operator::Primitive(p) => p.side_effect,
            Operator::Compound(f) => self.functions.get(*f).is_some_and(|f| f.side_effect),
            Operator::Literal(_) | Operator::Parameter { .. } => false,
        }
    }

    /// Mark every function whose body (transitively) contains a
    /// side-effecting operator.
    pub fn compute_side_effects(&mut self) {
        let ids: Vec<FunctionId> = self.functions.ids().collect();
        for &id in &ids {
            if let Some(f) = self.functions.get_mut(id) {
                f.side_effect = false;
            }
        }
        let mut changed = true;
        while changed {
            changed = false;
            for &id in &ids {
                let Some(body) = self.functions.get(id).filter(|f| !f.side_effect).map(|f| f.body)
                else {
                    continue;
                };
                let effectful = self
                    .collect_ops(body)
                    .into_iter()
                    .filter_map(|n| self.nodes.get(n))
                    .any(|n| self.has_side_effect(&n.op));
                if effectful {
                    if let Some(f) = self.functions.get_mut(id) {
                        f.side_effect = true;
                    }
                    changed = true;
                }
            }
        }
    }

    /// Whether a call node may (transitively) call back into its own
    /// function or the callee itself.
    pub fn is_recursive(&self, op: OpId) -> Result<bool, InternalError> {
        let callee = match self.try_node(op)?.op {
            Operator::Compound(f) => f,
            _ => return Ok(false),
        };
        let caller = self
            .try_region(self.root_of(self.node_domain(op)?)?)?
            .body_of;
        if caller == Some(callee) {
            return Ok(true);
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![callee];
        while let Some(f) = stack.pop() {
            if !seen.insert(f) {
                continue;
            }
            let body = self.try_function(f)?.body;
            for node in self.collect_ops(body) {
                for r in self.try_node(node)?.op.function_refs() {
                    if r == callee || Some(r) == caller {
                        return Ok(true);
                    }
                    stack.push(r);
                }
            }
        }
        Ok(false)
    }

    // ── Printing ────────────────────────────────────────────────────────────

    fn write_body(
        &self,
        f: &mut fmt::Formatter<'_>,
        root: RegionId,
        output: Option<EdgeId>,
    ) -> fmt::Result {
        for id in self.collect_spaces(root) {
            let Some(region) = self.regions.get(id) else {
                continue;
            };
            match (region.parent, region.selector) {
                (Some(parent), Some(selector)) => writeln!(f, "  {id} < {parent} | {selector}")?,
                _ => writeln!(f, "  {id}")?,
            }
            for &edge_id in &region.fields {
                let Some(edge) = self.edges.get(edge_id) else {
                    continue;
                };
                let Some(node) = self.nodes.get(edge.producer) else {
                    writeln!(f, "    {edge_id} = ? : {}", edge.range)?;
                    continue;
                };
                write!(f, "    {edge_id} = {}", node.op)?;
                if !node.inputs.is_empty() {
                    write!(f, "(")?;
                    for (i, input) in node.inputs.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        match input {
                            Some(e) => write!(f, "{e}")?,
                            None => write!(f, "_")?,
                        }
                    }
                    write!(f, ")")?;
                }
                writeln!(f, " : {}", edge.range)?;
            }
        }
        match output {
            Some(o) => writeln!(f, "  output {o}"),
            None => writeln!(f, "  output none"),
        }
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, function) in self.functions.iter() {
            if !self.relevant.contains(&function.body) {
                continue;
            }
            let calls = self.funcalls.get(&id).map_or(0, BTreeSet::len);
            writeln!(
                f,
                "function {id} {}{} called {calls} time(s)",
                function.name, function.signature
            )?;
            self.write_body(f, function.body, function.output)?;
        }
        match self.output.and_then(|o| self.edges.get(o)) {
            Some(edge) => {
                let root = self.root_of(edge.domain).map_err(|_| fmt::Error)?;
                writeln!(f, "main")?;
                self.write_body(f, root, self.output)
            }
            None => writeln!(f, "main: no output"),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
