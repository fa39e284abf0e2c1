// fold.rs — Constant folding of primitive operators
//
// Narrows the output type of a primitive node to a literal when its inputs
// determine the result. `mux` and `len` fold from partial information; every
// other primitive needs all inputs literal. Folding only narrows types: the
// literalizer then replaces the node.
//
// Preconditions: none.
// Postconditions: every foldable primitive's output edge carries its literal.
// Failure modes: ill-formed constant arithmetic (several vectors in `*`,
//                mismatched `vdot`) → error diagnostic, node left unfolded.
// Side effects: none beyond type narrowing.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::trace;

use crate::diag::{codes, Diagnostic};
use crate::error::InternalError;
use crate::id::{EdgeId, ElementId, OpId};
use crate::operator::Operator;
use crate::propagate::{Kinds, PropagationCtx, Propagator};
use crate::types::{TupleType, ValueType};

// ── Numbers ─────────────────────────────────────────────────────────────────

/// A literal number: a scalar or a vector of scalars.
#[derive(Debug, Clone, PartialEq)]
enum Num {
    Scalar(f64),
    Vector { elems: Vec<f64>, bounded: bool },
}

impl Num {
    /// Booleans count as scalars; tuples count as vectors when every element
    /// is numeric.
    fn from_type(t: &ValueType) -> Option<Num> {
        if let Some(s) = t.scalar_value() {
            return Some(Num::Scalar(s));
        }
        let tuple = t.as_tuple()?;
        let elems = tuple
            .elems
            .iter()
            .map(ValueType::scalar_value)
            .collect::<Option<Vec<f64>>>()?;
        Some(Num::Vector {
            elems,
            bounded: tuple.bounded,
        })
    }

    fn into_type(self) -> ValueType {
        match self {
            Num::Scalar(s) => ValueType::scalar(s),
            Num::Vector { elems, bounded } => ValueType::Vector(TupleType {
                elems: elems.into_iter().map(ValueType::scalar).collect(),
                bounded,
            }),
        }
    }

    fn negate(self) -> Num {
        match self {
            Num::Scalar(s) => Num::Scalar(-s),
            Num::Vector { elems, bounded } => Num::Vector {
                elems: elems.into_iter().map(|v| -v).collect(),
                bounded,
            },
        }
    }
}

/// Sum of two numbers. A scalar added to a vector lands on its first
/// element; two vectors add elementwise, the shorter padded with zeros.
fn add_consts(a: &Num, b: &Num) -> Num {
    match (a, b) {
        (Num::Scalar(x), Num::Scalar(y)) => Num::Scalar(x + y),
        (Num::Scalar(s), Num::Vector { elems, bounded })
        | (Num::Vector { elems, bounded }, Num::Scalar(s)) => {
            let mut elems = elems.clone();
            if let Some(first) = elems.first_mut() {
                *first += s;
            }
            Num::Vector {
                elems,
                bounded: *bounded,
            }
        }
        (
            Num::Vector {
                elems: va,
                bounded: ba,
            },
            Num::Vector {
                elems: vb,
                bounded: bb,
            },
        ) => {
            let len = va.len().max(vb.len());
            let at = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);
            Num::Vector {
                elems: (0..len).map(|i| at(va, i) + at(vb, i)).collect(),
                bounded: *ba && *bb,
            }
        }
    }
}

fn order(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if a > b {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

/// Compare two numbers. Scalars and shorter vectors read as zero-padded.
fn compare_numbers(a: &Num, b: &Num) -> Ordering {
    match (a, b) {
        (Num::Scalar(x), Num::Scalar(y)) => order(*x, *y),
        (Num::Scalar(s), Num::Vector { elems, .. }) => compare_scalar_vector(*s, elems).reverse(),
        (Num::Vector { elems, .. }, Num::Scalar(s)) => compare_scalar_vector(*s, elems),
        (Num::Vector { elems: va, .. }, Num::Vector { elems: vb, .. }) => {
            let len = va.len().max(vb.len());
            let at = |v: &[f64], i: usize| v.get(i).copied().unwrap_or(0.0);
            (0..len)
                .map(|i| order(at(va, i), at(vb, i)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        }
    }
}

/// Ordering of vector `v` relative to scalar `s`.
fn compare_scalar_vector(s: f64, v: &[f64]) -> Ordering {
    let head = v.first().copied().unwrap_or(0.0);
    if head != s {
        return if head > s {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    match v.iter().skip(1).find(|x| **x != 0.0) {
        Some(x) if *x > 0.0 => Ordering::Greater,
        Some(_) => Ordering::Less,
        None => Ordering::Equal,
    }
}

/// Modulo whose result takes the sign of the divisor.
fn proto_mod(dividend: f64, divisor: f64) -> f64 {
    let val = dividend.abs() % divisor.abs();
    if divisor < 0.0 && dividend < 0.0 {
        -val
    } else if dividend < 0.0 {
        divisor - val
    } else if divisor < 0.0 {
        val + divisor
    } else {
        val
    }
}

// ── Folding rules ───────────────────────────────────────────────────────────

fn scalar_at(inputs: &[ValueType], i: usize) -> Option<f64> {
    inputs.get(i).and_then(ValueType::scalar_value)
}

fn unary(inputs: &[ValueType], f: impl Fn(f64) -> f64) -> Option<ValueType> {
    scalar_at(inputs, 0).map(|x| ValueType::scalar(f(x)))
}

fn binary(inputs: &[ValueType], f: impl Fn(f64, f64) -> f64) -> Option<ValueType> {
    Some(ValueType::scalar(f(scalar_at(inputs, 0)?, scalar_at(inputs, 1)?)))
}

fn numbers(inputs: &[ValueType]) -> Option<Vec<Num>> {
    inputs.iter().map(Num::from_type).collect()
}

fn sum(nums: &[Num]) -> Num {
    nums.iter()
        .fold(Num::Scalar(0.0), |acc, n| add_consts(&acc, n))
}

/// The first input minus the sum of the rest.
fn difference(nums: &[Num]) -> Option<Num> {
    let (first, rest) = nums.split_first()?;
    Some(add_consts(&sum(rest).negate(), first))
}

fn product(nums: &[Num]) -> Result<Num, Diagnostic> {
    let mut mults = 1.0;
    let mut vector: Option<(&[f64], bool)> = None;
    for n in nums {
        match n {
            Num::Scalar(s) => mults *= s,
            Num::Vector { .. } if vector.is_some() => {
                return Err(Diagnostic::error(None, "more than one vector in multiplication")
                    .with_code(codes::E0102)
                    .with_hint("use vdot for the product of two vectors"));
            }
            Num::Vector { elems, bounded } => vector = Some((elems, *bounded)),
        }
    }
    Ok(match vector {
        Some((elems, bounded)) => Num::Vector {
            elems: elems.iter().map(|v| v * mults).collect(),
            bounded,
        },
        None => Num::Scalar(mults),
    })
}

fn quotient(nums: &[Num]) -> Option<Num> {
    let (numerator, rest) = nums.split_first()?;
    let mut denom = 1.0;
    for n in rest {
        match n {
            Num::Scalar(s) => denom *= s,
            Num::Vector { .. } => return None,
        }
    }
    Some(match numerator {
        Num::Scalar(s) => Num::Scalar(s / denom),
        Num::Vector { elems, bounded } => Num::Vector {
            elems: elems.iter().map(|v| v / denom).collect(),
            bounded: *bounded,
        },
    })
}

fn vdot(inputs: &[ValueType]) -> Result<ValueType, Diagnostic> {
    let vectors: Vec<&TupleType> = inputs
        .iter()
        .filter_map(|t| match t {
            ValueType::Vector(v) => Some(v),
            _ => None,
        })
        .collect();
    let [a, b] = vectors.as_slice() else {
        return Err(Diagnostic::error(None, "dot product requires exactly 2 vectors")
            .with_code(codes::E0101));
    };
    if inputs.len() != 2 {
        return Err(Diagnostic::error(None, "dot product requires exactly 2 vectors")
            .with_code(codes::E0101));
    }
    if a.elems.len() != b.elems.len() {
        return Err(Diagnostic::error(
            None,
            format!(
                "dot product requires 2 equal-size vectors, got sizes {} and {}",
                a.elems.len(),
                b.elems.len()
            ),
        )
        .with_code(codes::E0101));
    }
    let mut total = 0.0;
    for (x, y) in a.elems.iter().zip(&b.elems) {
        match (x.scalar_value(), y.scalar_value()) {
            (Some(x), Some(y)) => total += x * y,
            _ => {
                return Err(Diagnostic::error(None, "dot product of non-numeric vectors")
                    .with_code(codes::E0101))
            }
        }
    }
    Ok(ValueType::scalar(total))
}

fn fold_mux(inputs: &[ValueType]) -> Option<ValueType> {
    let [test, then, otherwise] = inputs else {
        return None;
    };
    if test.is_literal() {
        let chosen = if test.scalar_value()? != 0.0 {
            then
        } else {
            otherwise
        };
        return Some(chosen.clone());
    }
    if then.is_literal() && then == otherwise {
        return Some(then.clone());
    }
    None
}

/// The literal output type of primitive `name` applied to inputs of the
/// given types, if it can be computed.
pub fn fold_primitive(name: &str, inputs: &[ValueType]) -> Result<Option<ValueType>, Diagnostic> {
    match name {
        "mux" => return Ok(fold_mux(inputs)),
        "len" => {
            return Ok(inputs
                .first()
                .and_then(ValueType::as_tuple)
                .filter(|t| t.bounded)
                .map(|t| ValueType::scalar(t.elems.len() as f64)))
        }
        _ => {}
    }
    if !inputs.iter().all(ValueType::is_literal) {
        return Ok(None);
    }

    let compare = |keep: fn(Ordering) -> bool| -> Option<ValueType> {
        let nums = numbers(inputs)?;
        let [a, b] = nums.as_slice() else {
            return None;
        };
        Some(ValueType::boolean(keep(compare_numbers(a, b))))
    };

    let folded = match name {
        "not" => scalar_at(inputs, 0).map(|x| ValueType::boolean(x == 0.0)),
        "+" => numbers(inputs).map(|nums| sum(&nums).into_type()),
        "-" => numbers(inputs)
            .and_then(|nums| difference(&nums))
            .map(Num::into_type),
        "*" => match numbers(inputs) {
            Some(nums) => Some(product(&nums)?.into_type()),
            None => None,
        },
        "/" => numbers(inputs)
            .and_then(|nums| quotient(&nums))
            .map(Num::into_type),
        ">" => compare(|o| o == Ordering::Greater),
        "<" => compare(|o| o == Ordering::Less),
        "=" => compare(|o| o == Ordering::Equal),
        "<=" => compare(|o| o != Ordering::Greater),
        ">=" => compare(|o| o != Ordering::Less),
        "abs" => unary(inputs, f64::abs),
        "floor" => unary(inputs, f64::floor),
        "ceil" => unary(inputs, f64::ceil),
        "round" => unary(inputs, f64::round_ties_even),
        "sqrt" => unary(inputs, f64::sqrt),
        "log" => unary(inputs, f64::ln),
        "sin" => unary(inputs, f64::sin),
        "cos" => unary(inputs, f64::cos),
        "tan" => unary(inputs, f64::tan),
        "asin" => unary(inputs, f64::asin),
        "acos" => unary(inputs, f64::acos),
        "sinh" => unary(inputs, f64::sinh),
        "cosh" => unary(inputs, f64::cosh),
        "tanh" => unary(inputs, f64::tanh),
        "mod" => binary(inputs, proto_mod),
        "rem" => binary(inputs, |a, b| a % b),
        "pow" => binary(inputs, f64::powf),
        "atan2" => binary(inputs, f64::atan2),
        "vdot" => Some(vdot(inputs)?),
        "min-hood" | "max-hood" | "any-hood" | "all-hood" => {
            inputs.first().and_then(ValueType::field_value).cloned()
        }
        _ => None,
    };
    Ok(folded)
}

// ── Pass ────────────────────────────────────────────────────────────────────

/// Narrows primitive outputs to literals.
#[derive(Default)]
pub struct ConstantFolder {
    diagnostics: Vec<Diagnostic>,
    reported: BTreeSet<OpId>,
}

impl Propagator for ConstantFolder {
    fn name(&self) -> &'static str {
        "fold"
    }

    fn kinds(&self) -> Kinds {
        Kinds::OPS
    }

    fn act_op(&mut self, ctx: &mut PropagationCtx<'_>, op: OpId) -> Result<(), InternalError> {
        let graph = &*ctx.graph;
        let node = graph.try_node(op)?;
        let Operator::Primitive(primitive) = node.op() else {
            return Ok(());
        };
        let Some(inputs) = node
            .inputs()
            .iter()
            .map(|i| i.and_then(|e| graph.edge(e)).map(|e| e.range().clone()))
            .collect::<Option<Vec<ValueType>>>()
        else {
            return Ok(());
        };
        let output = node.output();
        let vector_operands: Vec<(usize, EdgeId)> = node
            .inputs()
            .iter()
            .zip(&inputs)
            .enumerate()
            .filter_map(|(index, (edge, ty))| match ty {
                ValueType::Vector(_) => edge.map(|e| (index, e)),
                _ => None,
            })
            .collect();
        match fold_primitive(&primitive.name, &inputs) {
            Ok(Some(value)) => {
                ctx.maybe_set_range(output, value)?;
            }
            Ok(None) => trace!(%op, "nothing to fold"),
            Err(mut diag) => {
                if self.reported.insert(op) {
                    diag.location = Some(ElementId::Op(op));
                    for (index, edge) in vector_operands {
                        diag = diag
                            .with_related(ElementId::Edge(edge), format!("vector operand {index}"));
                    }
                    self.diagnostics.push(diag);
                }
            }
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
    use crate::propagate::propagate;
    use crate::registry::Registry;

    fn s(v: f64) -> ValueType {
        ValueType::scalar(v)
    }

    fn fold(name: &str, inputs: &[ValueType]) -> Option<ValueType> {
        fold_primitive(name, inputs).unwrap()
    }

    #[test]
    fn addition_of_scalars_and_vectors() {
        assert_eq!(fold("+", &[s(2.0), s(3.0)]), Some(s(5.0)));
        assert_eq!(fold("+", &[]), Some(s(0.0)));
        assert_eq!(
            fold("+", &[ValueType::vector(&[1.0, 2.0]), ValueType::vector(&[10.0])]),
            Some(ValueType::vector(&[11.0, 2.0]))
        );
        // a scalar lands on the first element
        assert_eq!(
            fold("+", &[s(5.0), ValueType::vector(&[1.0, 2.0])]),
            Some(ValueType::vector(&[6.0, 2.0]))
        );
        assert_eq!(fold("+", &[s(1.0), ValueType::Scalar(None)]), None);
    }

    #[test]
    fn subtraction_takes_rest_from_first() {
        assert_eq!(fold("-", &[s(10.0), s(3.0), s(2.0)]), Some(s(5.0)));
        assert_eq!(
            fold("-", &[ValueType::vector(&[5.0, 5.0]), ValueType::vector(&[1.0, 2.0])]),
            Some(ValueType::vector(&[4.0, 3.0]))
        );
    }

    #[test]
    fn multiplication_allows_one_vector() {
        assert_eq!(fold("*", &[s(2.0), s(4.0)]), Some(s(8.0)));
        assert_eq!(
            fold("*", &[s(2.0), ValueType::vector(&[1.0, 3.0])]),
            Some(ValueType::vector(&[2.0, 6.0]))
        );
        let err = fold_primitive(
            "*",
            &[ValueType::vector(&[1.0]), ValueType::vector(&[2.0])],
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0102));
    }

    #[test]
    fn division_by_product_of_rest() {
        assert_eq!(fold("/", &[s(12.0), s(2.0), s(3.0)]), Some(s(2.0)));
        assert_eq!(
            fold("/", &[ValueType::vector(&[4.0, 8.0]), s(4.0)]),
            Some(ValueType::vector(&[1.0, 2.0]))
        );
        assert_eq!(fold("/", &[s(1.0), s(0.0)]), Some(s(f64::INFINITY)));
    }

    #[test]
    fn comparisons_pad_with_zeros() {
        assert_eq!(fold("<", &[s(1.0), s(2.0)]), Some(ValueType::boolean(true)));
        assert_eq!(fold(">=", &[s(2.0), s(2.0)]), Some(ValueType::boolean(true)));
        assert_eq!(
            fold("=", &[ValueType::vector(&[1.0, 0.0]), ValueType::vector(&[1.0])]),
            Some(ValueType::boolean(true))
        );
        // scalar 1 against <1, 0, -2>: the first non-zero tail element decides
        assert_eq!(
            fold(">", &[s(1.0), ValueType::vector(&[1.0, 0.0, -2.0])]),
            Some(ValueType::boolean(true))
        );
        assert_eq!(
            fold("<", &[s(1.0), ValueType::vector(&[1.0, 0.0, 3.0])]),
            Some(ValueType::boolean(true))
        );
        assert_eq!(
            fold("<=", &[ValueType::vector(&[3.0]), s(2.0)]),
            Some(ValueType::boolean(false))
        );
    }

    #[test]
    fn mux_folds_on_selector_or_equal_branches() {
        let t = ValueType::boolean(true);
        let f = ValueType::boolean(false);
        assert_eq!(fold("mux", &[t, s(1.0), s(2.0)]), Some(s(1.0)));
        assert_eq!(fold("mux", &[f, s(1.0), s(2.0)]), Some(s(2.0)));
        assert_eq!(
            fold("mux", &[ValueType::Boolean(None), s(7.0), s(7.0)]),
            Some(s(7.0))
        );
        assert_eq!(fold("mux", &[ValueType::Boolean(None), s(7.0), s(8.0)]), None);
        // selector picks a branch even when that branch is not literal
        assert_eq!(
            fold("mux", &[s(0.0), s(1.0), ValueType::Number]),
            Some(ValueType::Number)
        );
    }

    #[test]
    fn len_needs_only_a_bounded_tuple() {
        let t = ValueType::Tuple(TupleType::bounded(vec![ValueType::Any, ValueType::Number]));
        assert_eq!(fold("len", &[t]), Some(s(2.0)));
        assert_eq!(fold("len", &[ValueType::any_tuple()]), None);
    }

    #[test]
    fn mod_follows_divisor_sign() {
        assert_eq!(proto_mod(7.0, 3.0), 1.0);
        assert_eq!(proto_mod(-7.0, 3.0), 2.0);
        assert_eq!(proto_mod(7.0, -3.0), -2.0);
        assert_eq!(proto_mod(-7.0, -3.0), -1.0);
        assert_eq!(fold("rem", &[s(-7.0), s(3.0)]), Some(s(-1.0)));
    }

    #[test]
    fn rounding_ties_to_even() {
        assert_eq!(fold("round", &[s(2.5)]), Some(s(2.0)));
        assert_eq!(fold("round", &[s(3.5)]), Some(s(4.0)));
        assert_eq!(fold("round", &[s(-2.5)]), Some(s(-2.0)));
        assert_eq!(fold("floor", &[s(-1.5)]), Some(s(-2.0)));
    }

    #[test]
    fn unary_math_and_not() {
        assert_eq!(fold("not", &[s(0.0)]), Some(ValueType::boolean(true)));
        assert_eq!(fold("not", &[ValueType::boolean(true)]), Some(ValueType::boolean(false)));
        assert_eq!(fold("sqrt", &[s(9.0)]), Some(s(3.0)));
        assert_eq!(fold("abs", &[s(-4.0)]), Some(s(4.0)));
        assert_eq!(fold("pow", &[s(2.0), s(10.0)]), Some(s(1024.0)));
        assert!(matches!(
            fold("sqrt", &[s(-1.0)]),
            Some(ValueType::Scalar(Some(v))) if v.is_nan()
        ));
    }

    #[test]
    fn vdot_requires_two_equal_vectors() {
        assert_eq!(
            fold("vdot", &[ValueType::vector(&[1.0, 2.0]), ValueType::vector(&[3.0, 4.0])]),
            Some(s(11.0))
        );
        let err = fold_primitive(
            "vdot",
            &[ValueType::vector(&[1.0]), ValueType::vector(&[3.0, 4.0])],
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0101));
        assert!(fold_primitive("vdot", &[s(1.0), s(2.0)]).is_err());
    }

    #[test]
    fn hood_summaries_pass_field_values_through() {
        let field = ValueType::field_of(s(4.0));
        assert_eq!(fold("min-hood", &[field.clone()]), Some(s(4.0)));
        assert_eq!(fold("all-hood", &[field]), Some(s(4.0)));
    }

    #[test]
    fn unknown_primitives_do_not_fold() {
        assert_eq!(fold("tup", &[s(1.0)]), None);
        assert_eq!(fold("red", &[s(1.0)]), None);
    }

    fn graph_with(name: &str, inputs: &[ValueType]) -> (Graph, EdgeId) {
        let reg = Registry::core();
        let mut g = Graph::new();
        let root = g.add_root_region();
        let args: Vec<EdgeId> = inputs
            .iter()
            .map(|v| g.add_literal(v.clone(), root).unwrap())
            .collect();
        let out = g
            .apply(root, Operator::Primitive(reg.lookup(name).unwrap()), &args)
            .unwrap();
        g.set_output(out).unwrap();
        g.determine_relevant().unwrap();
        (g, out)
    }

    #[test]
    fn pass_narrows_output_edges() {
        let (mut g, out) = graph_with("+", &[s(2.0), s(3.0)]);
        let mut pass = ConstantFolder::default();
        assert!(propagate(&mut pass, &mut g).unwrap());
        assert_eq!(g.edge(out).unwrap().range(), &s(5.0));
        assert!(pass.take_diagnostics().is_empty());
        // second run finds nothing new
        assert!(!propagate(&mut pass, &mut g).unwrap());
    }

    #[test]
    fn pass_folds_chains_in_one_run() {
        let reg = Registry::core();
        let mut g = Graph::new();
        let root = g.add_root_region();
        let a = g.add_literal(s(2.0), root).unwrap();
        let b = g.add_literal(s(3.0), root).unwrap();
        let prim = |n: &str| Operator::Primitive(reg.lookup(n).unwrap());
        let sum = g.apply(root, prim("+"), &[a, b]).unwrap();
        let prod = g.apply(root, prim("*"), &[sum, sum]).unwrap();
        g.set_output(prod).unwrap();
        g.determine_relevant().unwrap();
        assert!(propagate(&mut ConstantFolder::default(), &mut g).unwrap());
        assert_eq!(g.edge(prod).unwrap().range(), &s(25.0));
    }

    #[test]
    fn pass_reports_errors_once_and_leaves_node() {
        let (mut g, out) = graph_with(
            "*",
            &[ValueType::vector(&[1.0]), ValueType::vector(&[2.0])],
        );
        let mut pass = ConstantFolder::default();
        assert!(!propagate(&mut pass, &mut g).unwrap());
        assert_eq!(g.edge(out).unwrap().range(), &ValueType::Number);
        let diags = pass.take_diagnostics();
        assert_eq!(diags.len(), 1);
        let producer = g.edge(out).unwrap().producer();
        assert_eq!(diags[0].location, Some(ElementId::Op(producer)));
        // both vector operands are pointed at
        let operands: Vec<ElementId> = g
            .node(producer)
            .unwrap()
            .inputs()
            .iter()
            .map(|e| ElementId::Edge(e.unwrap()))
            .collect();
        let related: Vec<ElementId> = diags[0].related.iter().map(|r| r.element).collect();
        assert_eq!(related, operands);
        assert_eq!(diags[0].related[1].label, "vector operand 1");
        assert!(diags[0].to_string().contains("note: vector operand 0"));
    }
}
