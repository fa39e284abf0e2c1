// load.rs — JSON graph descriptions
//
// Builds a `Graph` from a JSON document describing extra primitives,
// functions and the main body. Bodies list child regions and nodes; nodes
// name their inputs by earlier node names, so every body is single
// assignment and acyclic by construction.
//
// Preconditions: none.
// Postconditions: the returned graph has its output set, function side
//                 effects computed and `relevant` determined.
// Failure modes: malformed JSON, unknown names, duplicate names, arity
//                mismatches, region cycles → `LoadError`.
// Side effects: none.
//
// Example:
//
//   {
//     "functions": [{
//       "name": "double",
//       "params": [{ "name": "x", "type": "number" }],
//       "output": "number",
//       "body": {
//         "nodes": [
//           { "name": "x", "param": "x" },
//           { "name": "y", "op": "+", "inputs": ["x", "x"] }
//         ],
//         "output": "y"
//       }
//     }],
//     "main": {
//       "nodes": [
//         { "name": "a", "literal": 21 },
//         { "name": "b", "call": "double", "inputs": ["a"] }
//       ],
//       "output": "b"
//     }
//   }

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use thiserror::Error;

use crate::error::InternalError;
use crate::graph::Graph;
use crate::id::{EdgeId, FunctionId, RegionId};
use crate::operator::{Operator, Primitive, Signature};
use crate::registry::{Registry, RegistryError};
use crate::types::{TupleType, ValueType};

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid graph description: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("unknown type '{name}'")]
    UnknownType { name: String },
    #[error("{scope}: unknown value '{name}'")]
    UnknownValue { scope: String, name: String },
    #[error("{scope}: unknown region '{name}'")]
    UnknownRegion { scope: String, name: String },
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("unknown operator '{name}' in lambda literal")]
    UnknownOperator { name: String },
    #[error("{scope}: duplicate name '{name}'")]
    Duplicate { scope: String, name: String },
    #[error("{scope}: region '{name}' is its own ancestor")]
    RegionCycle { scope: String, name: String },
    #[error("{scope}: node '{name}': {reason}")]
    BadNode {
        scope: String,
        name: String,
        reason: String,
    },
    #[error("{scope}: no output")]
    NoOutput { scope: String },
    #[error("{scope}: output '{name}' must be in the body's root region")]
    NestedOutput { scope: String, name: String },
    #[error(transparent)]
    Graph(#[from] InternalError),
}

// ── Document ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphSpec {
    #[serde(default)]
    primitives: Vec<PrimitiveSpec>,
    #[serde(default)]
    functions: Vec<FunctionSpec>,
    main: BodySpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrimitiveSpec {
    name: String,
    #[serde(default)]
    inputs: Vec<TypeSpec>,
    #[serde(default)]
    rest: Option<TypeSpec>,
    #[serde(default = "any_type")]
    output: TypeSpec,
    #[serde(default)]
    side_effect: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionSpec {
    name: String,
    #[serde(default)]
    params: Vec<ParamSpec>,
    #[serde(default)]
    rest: Option<TypeSpec>,
    #[serde(default = "any_type")]
    output: TypeSpec,
    body: BodySpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamSpec {
    name: String,
    #[serde(rename = "type", default = "any_type")]
    ty: TypeSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BodySpec {
    #[serde(default)]
    regions: Vec<RegionSpec>,
    #[serde(default)]
    nodes: Vec<NodeSpec>,
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegionSpec {
    name: String,
    /// `None` nests directly in the body's root region.
    #[serde(default)]
    parent: Option<String>,
    selector: String,
}

/// Exactly one of `literal`, `op`, `call` and `param` must be given.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeSpec {
    name: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    literal: Option<ValueSpec>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    call: Option<String>,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    inputs: Vec<String>,
    /// Type already known to the front-end; overrides the operator's
    /// declared output type.
    #[serde(rename = "type", default)]
    ty: Option<TypeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeSpec {
    Name(String),
    Compound(CompoundType),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CompoundType {
    Literal(ValueSpec),
    Tuple(Vec<TypeSpec>),
    Vector(Vec<TypeSpec>),
    Field(Box<TypeSpec>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ValueSpec {
    Boolean(bool),
    Number(f64),
    Symbol(String),
    List(Vec<ValueSpec>),
    Tagged(TaggedValue),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaggedValue {
    /// A function or primitive, functions first.
    Lambda(String),
    Field(Box<ValueSpec>),
}

fn any_type() -> TypeSpec {
    TypeSpec::Name("any".to_string())
}

// ── Loader ─────────────────────────────────────────────────────────────────

/// Build a graph from its JSON description, using the core primitive table
/// plus any primitives the document declares.
pub fn load_graph(text: &str) -> Result<Graph, LoadError> {
    let spec: GraphSpec = serde_json::from_str(text)?;
    let mut loader = Loader {
        graph: Graph::new(),
        registry: Registry::core(),
    };
    for p in &spec.primitives {
        let signature = loader.signature(&p.inputs, p.rest.as_ref(), &p.output)?;
        loader.registry.insert(Primitive {
            name: p.name.clone(),
            signature,
            side_effect: p.side_effect,
        })?;
    }

    let main = loader.graph.add_root_region();
    let mut functions = Vec::with_capacity(spec.functions.len());
    for f in &spec.functions {
        if loader.graph.function_by_name(&f.name).is_some() {
            return Err(LoadError::Duplicate {
                scope: "functions".to_string(),
                name: f.name.clone(),
            });
        }
        let params: Vec<ValueType> = f
            .params
            .iter()
            .map(|p| loader.value_type(&p.ty))
            .collect::<Result<_, _>>()?;
        let rest = f.rest.as_ref().map(|r| loader.value_type(r)).transpose()?;
        let output = loader.value_type(&f.output)?;
        let signature = match rest {
            Some(rest) => Signature::variadic(params, rest, output),
            None => Signature::fixed(params, output),
        };
        functions.push(loader.graph.add_function(f.name.clone(), signature));
    }

    for (f, id) in spec.functions.iter().zip(functions) {
        let body = loader.graph.function(id).map(|func| func.body);
        let Some(body) = body else {
            return Err(LoadError::UnknownFunction {
                name: f.name.clone(),
            });
        };
        let out = loader.body(&f.name, body, Some((id, f.params.as_slice())), &f.body)?;
        loader.graph.set_function_output(id, out)?;
    }
    let out = loader.body("main", main, None, &spec.main)?;
    loader.graph.set_output(out)?;

    let mut graph = loader.graph;
    graph.compute_side_effects();
    graph.determine_relevant()?;
    Ok(graph)
}

struct Loader {
    graph: Graph,
    registry: Registry,
}

/// Names visible while building one body.
struct Scope<'a> {
    name: &'a str,
    root: RegionId,
    function: Option<(FunctionId, &'a [ParamSpec])>,
    specs: &'a [RegionSpec],
    values: BTreeMap<&'a str, EdgeId>,
    regions: BTreeMap<&'a str, RegionId>,
}

impl Scope<'_> {
    fn bad_node(&self, node: &NodeSpec, reason: impl Into<String>) -> LoadError {
        LoadError::BadNode {
            scope: self.name.to_string(),
            name: node.name.clone(),
            reason: reason.into(),
        }
    }
}

impl Loader {
    fn signature(
        &self,
        inputs: &[TypeSpec],
        rest: Option<&TypeSpec>,
        output: &TypeSpec,
    ) -> Result<Signature, LoadError> {
        let inputs = inputs
            .iter()
            .map(|t| self.value_type(t))
            .collect::<Result<Vec<_>, _>>()?;
        let output = self.value_type(output)?;
        Ok(match rest {
            Some(rest) => Signature::variadic(inputs, self.value_type(rest)?, output),
            None => Signature::fixed(inputs, output),
        })
    }

    fn value_type(&self, spec: &TypeSpec) -> Result<ValueType, LoadError> {
        match spec {
            TypeSpec::Name(name) => Ok(match name.as_str() {
                "any" => ValueType::Any,
                "number" => ValueType::Number,
                "scalar" => ValueType::Scalar(None),
                "boolean" => ValueType::Boolean(None),
                "symbol" => ValueType::Symbol(None),
                "tuple" => ValueType::any_tuple(),
                "vector" => ValueType::any_vector(),
                "lambda" => ValueType::Lambda(None),
                "field" => ValueType::Field(None),
                _ => return Err(LoadError::UnknownType { name: name.clone() }),
            }),
            TypeSpec::Compound(CompoundType::Literal(v)) => self.value(v),
            TypeSpec::Compound(CompoundType::Tuple(elems)) => Ok(ValueType::Tuple(
                TupleType::bounded(self.value_types(elems)?),
            )),
            TypeSpec::Compound(CompoundType::Vector(elems)) => Ok(ValueType::Vector(
                TupleType::bounded(self.value_types(elems)?),
            )),
            TypeSpec::Compound(CompoundType::Field(inner)) => {
                Ok(ValueType::field_of(self.value_type(inner)?))
            }
        }
    }

    fn value_types(&self, specs: &[TypeSpec]) -> Result<Vec<ValueType>, LoadError> {
        specs.iter().map(|t| self.value_type(t)).collect()
    }

    /// Literal value. Lists of numbers are vectors; other lists are tuples.
    fn value(&self, spec: &ValueSpec) -> Result<ValueType, LoadError> {
        Ok(match spec {
            ValueSpec::Boolean(b) => ValueType::boolean(*b),
            ValueSpec::Number(n) => ValueType::scalar(*n),
            ValueSpec::Symbol(s) => ValueType::Symbol(Some(s.clone())),
            ValueSpec::List(items) => {
                let elems = items
                    .iter()
                    .map(|v| self.value(v))
                    .collect::<Result<Vec<_>, _>>()?;
                if elems.iter().all(|e| matches!(e, ValueType::Scalar(Some(_)))) {
                    ValueType::Vector(TupleType::bounded(elems))
                } else {
                    ValueType::Tuple(TupleType::bounded(elems))
                }
            }
            ValueSpec::Tagged(TaggedValue::Lambda(name)) => {
                if let Some(f) = self.graph.function_by_name(name) {
                    ValueType::lambda(Operator::Compound(f))
                } else if let Some(p) = self.registry.get(name) {
                    ValueType::lambda(Operator::Primitive(p.clone()))
                } else {
                    return Err(LoadError::UnknownOperator { name: name.clone() });
                }
            }
            ValueSpec::Tagged(TaggedValue::Field(inner)) => ValueType::field_of(self.value(inner)?),
        })
    }

    /// Build one body and return its output edge.
    fn body<'a>(
        &mut self,
        name: &'a str,
        root: RegionId,
        function: Option<(FunctionId, &'a [ParamSpec])>,
        spec: &'a BodySpec,
    ) -> Result<EdgeId, LoadError> {
        let mut scope = Scope {
            name,
            root,
            function,
            specs: &spec.regions,
            values: BTreeMap::new(),
            regions: BTreeMap::new(),
        };
        let mut region_names = BTreeSet::new();
        for r in &spec.regions {
            if !region_names.insert(r.name.as_str()) {
                return Err(LoadError::Duplicate {
                    scope: name.to_string(),
                    name: r.name.clone(),
                });
            }
        }

        for node in &spec.nodes {
            if scope.values.contains_key(node.name.as_str()) {
                return Err(LoadError::Duplicate {
                    scope: name.to_string(),
                    name: node.name.clone(),
                });
            }
            let edge = self.node(&mut scope, node)?;
            scope.values.insert(node.name.as_str(), edge);
        }
        // regions nothing was placed in
        for r in &spec.regions {
            self.region(&mut scope, &r.name, &mut BTreeSet::new())?;
        }

        let Some(out_name) = spec.output.as_deref() else {
            return Err(LoadError::NoOutput {
                scope: name.to_string(),
            });
        };
        let out = lookup_value(&scope, out_name)?;
        if self.graph.edge(out).map(|e| e.domain()) != Some(root) {
            return Err(LoadError::NestedOutput {
                scope: name.to_string(),
                name: out_name.to_string(),
            });
        }
        Ok(out)
    }

    fn region<'a>(
        &mut self,
        scope: &mut Scope<'a>,
        name: &str,
        visiting: &mut BTreeSet<String>,
    ) -> Result<RegionId, LoadError> {
        if let Some(&id) = scope.regions.get(name) {
            return Ok(id);
        }
        let specs = scope.specs;
        let Some(spec) = specs.iter().find(|r| r.name == name) else {
            return Err(LoadError::UnknownRegion {
                scope: scope.name.to_string(),
                name: name.to_string(),
            });
        };
        if !visiting.insert(spec.name.clone()) {
            return Err(LoadError::RegionCycle {
                scope: scope.name.to_string(),
                name: spec.name.clone(),
            });
        }
        let parent = match spec.parent.as_deref() {
            Some(p) => self.region(scope, p, visiting)?,
            None => scope.root,
        };
        let selector = lookup_value(scope, &spec.selector)?;
        let id = self.graph.add_child_region(parent, selector)?;
        scope.regions.insert(spec.name.as_str(), id);
        Ok(id)
    }

    fn node(&mut self, scope: &mut Scope<'_>, node: &NodeSpec) -> Result<EdgeId, LoadError> {
        let given = [
            node.literal.is_some(),
            node.op.is_some(),
            node.call.is_some(),
            node.param.is_some(),
        ];
        if given.iter().filter(|g| **g).count() != 1 {
            return Err(scope.bad_node(node, "needs exactly one of literal, op, call, param"));
        }
        let region = match node.region.as_deref() {
            Some(r) => self.region(scope, r, &mut BTreeSet::new())?,
            None => scope.root,
        };
        let inputs = node
            .inputs
            .iter()
            .map(|i| lookup_value(scope, i))
            .collect::<Result<Vec<_>, _>>()?;

        let edge = if let Some(value) = &node.literal {
            if !inputs.is_empty() {
                return Err(scope.bad_node(node, "literals take no inputs"));
            }
            let value = self.value(value)?;
            self.graph.add_literal(value, region)?
        } else if let Some(param) = &node.param {
            let Some((function, params)) = scope.function else {
                return Err(scope.bad_node(node, "parameters only exist inside functions"));
            };
            if !inputs.is_empty() || node.region.is_some() {
                return Err(scope.bad_node(node, "parameters take no inputs or region"));
            }
            let Some(index) = params.iter().position(|p| &p.name == param) else {
                return Err(scope.bad_node(node, format!("no parameter named '{param}'")));
            };
            self.graph.add_parameter(function, param.clone(), index)?
        } else {
            let op = match (&node.op, &node.call) {
                (Some(name), _) => Operator::Primitive(self.registry.lookup(name)?),
                (_, Some(name)) => match self.graph.function_by_name(name) {
                    Some(f) => Operator::Compound(f),
                    None => return Err(LoadError::UnknownFunction { name: name.clone() }),
                },
                (None, None) => return Err(scope.bad_node(node, "no operator")),
            };
            let legal = match &op {
                Operator::Primitive(p) => p.signature.legal_length(inputs.len()),
                Operator::Compound(f) => self
                    .graph
                    .function(*f)
                    .is_some_and(|func| func.signature.legal_length(inputs.len())),
                Operator::Literal(_) | Operator::Parameter { .. } => true,
            };
            if !legal {
                return Err(scope.bad_node(
                    node,
                    format!("{} cannot take {} inputs", op, inputs.len()),
                ));
            }
            self.graph.apply(region, op, &inputs)?
        };

        if let Some(ty) = &node.ty {
            let ty = self.value_type(ty)?;
            self.graph.set_range(edge, ty)?;
        }
        Ok(edge)
    }
}

fn lookup_value(scope: &Scope<'_>, name: &str) -> Result<EdgeId, LoadError> {
    scope
        .values
        .get(name)
        .copied()
        .ok_or_else(|| LoadError::UnknownValue {
            scope: scope.name.to_string(),
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUBLE: &str = r#"{
        "functions": [{
            "name": "double",
            "params": [{ "name": "x", "type": "number" }],
            "output": "number",
            "body": {
                "nodes": [
                    { "name": "x", "param": "x" },
                    { "name": "y", "op": "+", "inputs": ["x", "x"] }
                ],
                "output": "y"
            }
        }],
        "main": {
            "nodes": [
                { "name": "a", "literal": 21 },
                { "name": "b", "call": "double", "inputs": ["a"] }
            ],
            "output": "b"
        }
    }"#;

    #[test]
    fn loads_functions_and_calls() {
        let mut g = load_graph(DOUBLE).unwrap();
        let f = g.function_by_name("double").unwrap();
        assert_eq!(g.callers(f).unwrap().len(), 1);
        assert_eq!(g.relevant().len(), 2);
        let out = g.output().unwrap();
        assert_eq!(g.edge(out).unwrap().range(), &ValueType::Number);
        assert!(crate::certify::certify(&mut g).is_ok());
    }

    #[test]
    fn literal_values() {
        let g = load_graph(
            r#"{ "main": { "nodes": [
                { "name": "v", "literal": [1, 2] },
                { "name": "t", "literal": [1, true] },
                { "name": "s", "literal": "left" },
                { "name": "l", "literal": { "lambda": "+" } },
                { "name": "f", "literal": { "field": 3 } }
            ], "output": "v" } }"#,
        )
        .unwrap();
        let ranges: Vec<String> = g.edges().map(|(_, e)| e.range().to_string()).collect();
        assert_eq!(ranges[0], "vector<1, 2>");
        assert!(ranges[1].starts_with("tuple<"));
        assert_eq!(ranges[4], "field<3>");
    }

    #[test]
    fn regions_and_declared_types() {
        let g = load_graph(
            r#"{ "main": {
                "regions": [
                    { "name": "outer", "selector": "c" },
                    { "name": "inner", "parent": "outer", "selector": "c" }
                ],
                "nodes": [
                    { "name": "c", "literal": true },
                    { "name": "k", "literal": 2, "region": "inner" },
                    { "name": "m", "op": "mux", "inputs": ["c", "c", "c"], "type": "boolean" }
                ],
                "output": "m"
            } }"#,
        )
        .unwrap();
        assert_eq!(g.region_count(), 3);
        let out = g.output().unwrap();
        assert_eq!(g.edge(out).unwrap().range(), &ValueType::Boolean(None));
    }

    #[test]
    fn extra_primitives_are_registered() {
        let g = load_graph(
            r#"{
                "primitives": [{ "name": "buzz", "inputs": ["scalar"], "side_effect": true }],
                "main": { "nodes": [
                    { "name": "a", "literal": 1 },
                    { "name": "b", "op": "buzz", "inputs": ["a"] }
                ], "output": "a" }
            }"#,
        )
        .unwrap();
        let (_, node) = g
            .nodes()
            .find(|(_, n)| n.op().primitive_name() == Some("buzz"))
            .unwrap();
        assert!(g.has_side_effect(node.op()));
    }

    #[test]
    fn errors_name_the_problem() {
        let cases = [
            (r#"{ "main": { "nodes": [] } }"#, "main: no output"),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "op": "+", "inputs": ["b"] }], "output": "a" } }"#,
                "main: unknown value 'b'",
            ),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "op": "frobnicate" }], "output": "a" } }"#,
                "unknown primitive 'frobnicate'",
            ),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "literal": 1 }, { "name": "a", "literal": 2 }], "output": "a" } }"#,
                "main: duplicate name 'a'",
            ),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "param": "x" }], "output": "a" } }"#,
                "main: node 'a': parameters only exist inside functions",
            ),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "literal": 1, "op": "+" }], "output": "a" } }"#,
                "main: node 'a': needs exactly one of literal, op, call, param",
            ),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "literal": 1, "type": "quaternion" }], "output": "a" } }"#,
                "unknown type 'quaternion'",
            ),
            (
                r#"{ "main": { "nodes": [{ "name": "a", "call": "nope" }], "output": "a" } }"#,
                "unknown function 'nope'",
            ),
        ];
        for (text, expected) in cases {
            let err = load_graph(text).unwrap_err();
            assert_eq!(err.to_string(), expected, "for {text}");
        }
    }

    #[test]
    fn arity_and_region_cycles_are_rejected() {
        let err = load_graph(
            r#"{ "main": { "nodes": [
                { "name": "a", "literal": 1 },
                { "name": "n", "op": "not", "inputs": ["a", "a"] }
            ], "output": "a" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::BadNode { .. }));

        let err = load_graph(
            r#"{ "main": {
                "regions": [
                    { "name": "p", "parent": "q", "selector": "c" },
                    { "name": "q", "parent": "p", "selector": "c" }
                ],
                "nodes": [{ "name": "c", "literal": true }],
                "output": "c"
            } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::RegionCycle { .. }));
    }

    #[test]
    fn function_outputs_must_be_in_the_body_root() {
        let err = load_graph(
            r#"{
                "functions": [{ "name": "f", "body": {
                    "regions": [{ "name": "r", "selector": "c" }],
                    "nodes": [
                        { "name": "c", "literal": true },
                        { "name": "k", "literal": 1, "region": "r" }
                    ],
                    "output": "k"
                } }],
                "main": { "nodes": [{ "name": "a", "literal": 1 }], "output": "a" }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::NestedOutput { .. }));
    }
}
