// dot.rs — Graphviz DOT output for dataflow graphs
//
// Renders every region tree as nested clusters (function bodies and main at
// the top level, child regions inside their parents), one DOT node per
// OpNode labelled with its operator and output type, and one DOT edge per
// input use.
//
// Preconditions: none; dangling references are skipped.
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::{self, Write};

use crate::graph::{Graph, Region};
use crate::id::{OpId, RegionId};
use crate::operator::Operator;

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(graph: &Graph) -> String {
    let mut buf = String::new();
    // writing into a String cannot fail
    let _ = write_dot(&mut buf, graph);
    buf
}

fn write_dot(buf: &mut String, graph: &Graph) -> fmt::Result {
    writeln!(buf, "digraph dfg {{")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    // Functions first, then main, matching the text form
    let mut roots: Vec<(RegionId, &Region)> = graph
        .regions()
        .filter(|(_, r)| r.parent().is_none())
        .collect();
    roots.sort_by_key(|(id, r)| (r.body_of().is_none(), *id));
    for (id, _) in roots {
        writeln!(buf)?;
        write_region(buf, graph, id, 1)?;
    }

    writeln!(buf)?;
    writeln!(buf, "    // Dataflow")?;
    for (op, node) in graph.nodes() {
        let numbered = node.inputs().len() > 1;
        for (index, input) in node.inputs().iter().enumerate() {
            let Some(producer) = input.and_then(|e| graph.edge(e)).map(|e| e.producer()) else {
                continue;
            };
            if numbered {
                writeln!(buf, "    {producer} -> {op} [label=\"{index}\"];")?;
            } else {
                writeln!(buf, "    {producer} -> {op};")?;
            }
        }
        if let Operator::Compound(f) = node.op() {
            if graph.function(*f).is_some_and(|func| func.output.is_some()) {
                writeln!(
                    buf,
                    "    {op} -> {f}_ret [style=dotted, color=gray50, constraint=false];"
                )?;
            }
        }
    }

    writeln!(buf)?;
    writeln!(buf, "    // Selectors and outputs")?;
    for (id, region) in graph.regions() {
        let Some(producer) = region
            .selector()
            .and_then(|s| graph.edge(s))
            .map(|e| e.producer())
        else {
            continue;
        };
        writeln!(buf, "    {producer} -> {id}_sel [style=dashed, color=gray50];")?;
    }
    for (f, func) in graph.functions() {
        if let Some(producer) = func.output.and_then(|e| graph.edge(e)).map(|e| e.producer()) {
            writeln!(buf, "    {producer} -> {f}_ret;")?;
        }
    }
    if let Some(producer) = graph
        .output()
        .and_then(|e| graph.edge(e))
        .map(|e| e.producer())
    {
        writeln!(buf, "    output [shape=doublecircle, label=\"output\"];")?;
        writeln!(buf, "    {producer} -> output;")?;
    }

    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn region_label(graph: &Graph, id: RegionId, region: &Region) -> String {
    if let Some(f) = region.body_of() {
        return match graph.function(f) {
            Some(func) => format!("function: {}", func.name),
            None => format!("function: {f}"),
        };
    }
    if let Some(selector) = region.selector() {
        return format!("{id} | {selector}");
    }
    let holds_output = graph
        .output()
        .and_then(|e| graph.edge(e))
        .is_some_and(|e| graph.root_of(e.domain()).ok() == Some(id));
    if holds_output {
        "main".to_string()
    } else {
        id.to_string()
    }
}

/// DOT attributes for one OpNode.
fn node_attrs(graph: &Graph, op: OpId) -> Option<String> {
    let node = graph.node(op)?;
    let (shape, color) = match node.op() {
        Operator::Literal(_) => ("box", "lightyellow"),
        Operator::Parameter { .. } => ("invhouse", "lightsalmon"),
        Operator::Primitive(p) if p.side_effect => ("box", "lightgreen"),
        Operator::Primitive(_) => ("box", "lightblue"),
        Operator::Compound(_) => ("box3d", "plum"),
    };
    let name = match node.op() {
        Operator::Compound(f) => graph
            .function(*f)
            .map_or_else(|| f.to_string(), |func| func.name.clone()),
        other => other.to_string(),
    };
    let range = graph
        .edge(node.output())
        .map(|e| e.range().to_string())
        .unwrap_or_default();
    Some(format!(
        "shape={shape}, style=filled, fillcolor={color}, label=\"{}\\n{}\"",
        escape(&name),
        escape(&range)
    ))
}

fn write_region(buf: &mut String, graph: &Graph, id: RegionId, depth: usize) -> fmt::Result {
    let Some(region) = graph.region(id) else {
        return Ok(());
    };
    let indent = "    ".repeat(depth);
    let (style, color) = if region.parent().is_none() {
        ("rounded", "gray50")
    } else {
        ("dashed", "gray70")
    };
    writeln!(buf, "{indent}subgraph cluster_{id} {{")?;
    writeln!(
        buf,
        "{indent}    label=\"{}\";",
        escape(&region_label(graph, id, region))
    )?;
    writeln!(buf, "{indent}    style={style};")?;
    writeln!(buf, "{indent}    color={color};")?;
    if region.selector().is_some() {
        writeln!(buf, "{indent}    {id}_sel [shape=point];")?;
    }
    if let Some(f) = region.body_of() {
        if graph.function(f).is_some_and(|func| func.output.is_some()) {
            writeln!(buf, "{indent}    {f}_ret [shape=house, label=\"return\"];")?;
        }
    }
    for field in region.fields() {
        let Some(producer) = graph.edge(*field).map(|e| e.producer()) else {
            continue;
        };
        if let Some(attrs) = node_attrs(graph, producer) {
            writeln!(buf, "{indent}    {producer} [{attrs}];")?;
        }
    }
    for child in region.children() {
        write_region(buf, graph, *child, depth + 1)?;
    }
    writeln!(buf, "{indent}}}")
}
