// types.rs — Value types carried on dataflow-graph edges
//
// A `ValueType` is the "range" annotation of a value edge: what the compiler
// currently knows about the value flowing along it. Every variant can be
// either abstract (`Scalar(None)`) or literal (`Scalar(Some(2.0))`); rewrite
// passes narrow edges from abstract to literal.
//
// Float payloads compare bit-for-bit (with 0.0 == -0.0) so that narrowing an
// edge to NaN is idempotent.

use std::fmt;

use crate::operator::Operator;

/// Elements of a tuple or vector type.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleType {
    pub elems: Vec<ValueType>,
    /// `false` when further elements of unknown type may follow.
    pub bounded: bool,
}

impl TupleType {
    pub fn bounded(elems: Vec<ValueType>) -> Self {
        TupleType {
            elems,
            bounded: true,
        }
    }

    pub fn unbounded() -> Self {
        TupleType {
            elems: Vec::new(),
            bounded: false,
        }
    }
}

/// The type annotation of a value edge.
#[derive(Debug, Clone)]
pub enum ValueType {
    /// Nothing is known yet.
    Any,
    /// A scalar or a vector, not yet known which.
    Number,
    Scalar(Option<f64>),
    Boolean(Option<bool>),
    Symbol(Option<String>),
    Tuple(TupleType),
    /// A tuple whose elements are all numbers.
    Vector(TupleType),
    Lambda(Option<Box<Operator>>),
    /// A field over a region, optionally with a known per-point value.
    Field(Option<Box<ValueType>>),
}

impl ValueType {
    pub fn scalar(v: f64) -> Self {
        ValueType::Scalar(Some(v))
    }

    pub fn boolean(b: bool) -> Self {
        ValueType::Boolean(Some(b))
    }

    /// A bounded literal vector.
    pub fn vector(values: &[f64]) -> Self {
        ValueType::Vector(TupleType::bounded(
            values.iter().map(|v| ValueType::scalar(*v)).collect(),
        ))
    }

    /// An unbounded vector of unknown length.
    pub fn any_vector() -> Self {
        ValueType::Vector(TupleType::unbounded())
    }

    pub fn any_tuple() -> Self {
        ValueType::Tuple(TupleType::unbounded())
    }

    pub fn lambda(op: Operator) -> Self {
        ValueType::Lambda(Some(Box::new(op)))
    }

    pub fn field_of(inner: ValueType) -> Self {
        ValueType::Field(Some(Box::new(inner)))
    }

    /// Whether this type pins down exactly one value.
    pub fn is_literal(&self) -> bool {
        match self {
            ValueType::Any | ValueType::Number => false,
            ValueType::Scalar(v) => v.is_some(),
            ValueType::Boolean(v) => v.is_some(),
            ValueType::Symbol(v) => v.is_some(),
            ValueType::Tuple(t) | ValueType::Vector(t) => {
                t.bounded && t.elems.iter().all(ValueType::is_literal)
            }
            ValueType::Lambda(op) => op.is_some(),
            ValueType::Field(inner) => inner.as_deref().is_some_and(ValueType::is_literal),
        }
    }

    /// Whether the type is specific enough to generate code for.
    pub fn is_concrete(&self) -> bool {
        match self {
            ValueType::Any => false,
            ValueType::Number
            | ValueType::Scalar(_)
            | ValueType::Boolean(_)
            | ValueType::Symbol(_)
            | ValueType::Lambda(_) => true,
            ValueType::Tuple(t) | ValueType::Vector(t) => t.elems.iter().all(ValueType::is_concrete),
            ValueType::Field(inner) => inner.as_deref().map_or(true, ValueType::is_concrete),
        }
    }

    /// Numeric value of a literal scalar; booleans read as 1 and 0.
    pub fn scalar_value(&self) -> Option<f64> {
        match self {
            ValueType::Scalar(v) => *v,
            ValueType::Boolean(b) => b.map(|b| if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Tuple view of tuples and vectors.
    pub fn as_tuple(&self) -> Option<&TupleType> {
        match self {
            ValueType::Tuple(t) | ValueType::Vector(t) => Some(t),
            _ => None,
        }
    }

    /// Per-point value of a literal field.
    pub fn field_value(&self) -> Option<&ValueType> {
        match self {
            ValueType::Field(inner) => inner.as_deref(),
            _ => None,
        }
    }

    /// Operator carried by a literal lambda.
    pub fn lambda_value(&self) -> Option<&Operator> {
        match self {
            ValueType::Lambda(op) => op.as_deref(),
            _ => None,
        }
    }
}

fn same_number(a: &Option<f64>, b: &Option<f64>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x.to_bits() == y.to_bits() || x == y,
        (None, None) => true,
        _ => false,
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ValueType::Any, ValueType::Any) | (ValueType::Number, ValueType::Number) => true,
            (ValueType::Scalar(a), ValueType::Scalar(b)) => same_number(a, b),
            (ValueType::Boolean(a), ValueType::Boolean(b)) => a == b,
            (ValueType::Symbol(a), ValueType::Symbol(b)) => a == b,
            (ValueType::Tuple(a), ValueType::Tuple(b)) => a == b,
            (ValueType::Vector(a), ValueType::Vector(b)) => a == b,
            (ValueType::Lambda(a), ValueType::Lambda(b)) => a == b,
            (ValueType::Field(a), ValueType::Field(b)) => a == b,
            _ => false,
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

fn write_elems(f: &mut fmt::Formatter<'_>, name: &str, t: &TupleType) -> fmt::Result {
    write!(f, "{name}<")?;
    for (i, elem) in t.elems.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{elem}")?;
    }
    if !t.bounded {
        if !t.elems.is_empty() {
            write!(f, ", ")?;
        }
        write!(f, "...")?;
    }
    write!(f, ">")
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "any"),
            ValueType::Number => write!(f, "number"),
            ValueType::Scalar(None) => write!(f, "scalar"),
            ValueType::Scalar(Some(v)) => write!(f, "{v}"),
            ValueType::Boolean(None) => write!(f, "boolean"),
            ValueType::Boolean(Some(true)) => write!(f, "#t"),
            ValueType::Boolean(Some(false)) => write!(f, "#f"),
            ValueType::Symbol(None) => write!(f, "symbol"),
            ValueType::Symbol(Some(s)) => write!(f, "'{s}"),
            ValueType::Tuple(t) => write_elems(f, "tuple", t),
            ValueType::Vector(t) => write_elems(f, "vector", t),
            ValueType::Lambda(None) => write!(f, "lambda"),
            ValueType::Lambda(Some(op)) => write!(f, "lambda<{op}>"),
            ValueType::Field(None) => write!(f, "field"),
            ValueType::Field(Some(inner)) => write!(f, "field<{inner}>"),
        }
    }
}
