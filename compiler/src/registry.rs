// registry.rs — Primitive operator registry
//
// Maps primitive names to their shared `Primitive` descriptors. The core
// table covers arithmetic, comparison, math, tuple, neighborhood and
// actuator primitives; front-ends may declare more.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::operator::{Primitive, Signature};
use crate::types::{TupleType, ValueType};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors that can occur while populating the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicatePrimitive { name: String },
    UnknownPrimitive { name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicatePrimitive { name } => {
                write!(f, "duplicate primitive '{}'", name)
            }
            RegistryError::UnknownPrimitive { name } => {
                write!(f, "unknown primitive '{}'", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ── Core table ──────────────────────────────────────────────────────────────

/// Input shape of a core primitive.
enum Arity {
    Fixed(&'static [Kind]),
    Rest(&'static [Kind], Kind),
}

/// Compact type tags for the core table.
#[derive(Clone, Copy)]
enum Kind {
    Any,
    Number,
    Scalar,
    Boolean,
    Tuple,
    Vector,
    Lambda,
    Field,
}

impl Kind {
    fn to_type(self) -> ValueType {
        match self {
            Kind::Any => ValueType::Any,
            Kind::Number => ValueType::Number,
            Kind::Scalar => ValueType::Scalar(None),
            Kind::Boolean => ValueType::Boolean(None),
            Kind::Tuple => ValueType::Tuple(TupleType::unbounded()),
            Kind::Vector => ValueType::any_vector(),
            Kind::Lambda => ValueType::Lambda(None),
            Kind::Field => ValueType::Field(None),
        }
    }
}

use Arity::{Fixed, Rest};
use Kind::*;

/// (name, inputs, output, side effect)
const CORE: &[(&str, Arity, Kind, bool)] = &[
    ("+", Rest(&[], Number), Number, false),
    ("-", Rest(&[Number], Number), Number, false),
    ("*", Rest(&[], Number), Number, false),
    ("/", Rest(&[Number], Scalar), Number, false),
    ("<", Fixed(&[Number, Number]), Boolean, false),
    (">", Fixed(&[Number, Number]), Boolean, false),
    ("=", Fixed(&[Number, Number]), Boolean, false),
    ("<=", Fixed(&[Number, Number]), Boolean, false),
    (">=", Fixed(&[Number, Number]), Boolean, false),
    ("not", Fixed(&[Scalar]), Boolean, false),
    ("abs", Fixed(&[Scalar]), Scalar, false),
    ("floor", Fixed(&[Scalar]), Scalar, false),
    ("ceil", Fixed(&[Scalar]), Scalar, false),
    ("round", Fixed(&[Scalar]), Scalar, false),
    ("sqrt", Fixed(&[Scalar]), Scalar, false),
    ("log", Fixed(&[Scalar]), Scalar, false),
    ("sin", Fixed(&[Scalar]), Scalar, false),
    ("cos", Fixed(&[Scalar]), Scalar, false),
    ("tan", Fixed(&[Scalar]), Scalar, false),
    ("asin", Fixed(&[Scalar]), Scalar, false),
    ("acos", Fixed(&[Scalar]), Scalar, false),
    ("sinh", Fixed(&[Scalar]), Scalar, false),
    ("cosh", Fixed(&[Scalar]), Scalar, false),
    ("tanh", Fixed(&[Scalar]), Scalar, false),
    ("mod", Fixed(&[Scalar, Scalar]), Scalar, false),
    ("rem", Fixed(&[Scalar, Scalar]), Scalar, false),
    ("pow", Fixed(&[Scalar, Scalar]), Scalar, false),
    ("atan2", Fixed(&[Scalar, Scalar]), Scalar, false),
    ("vdot", Fixed(&[Vector, Vector]), Scalar, false),
    ("mux", Fixed(&[Boolean, Any, Any]), Any, false),
    ("len", Fixed(&[Tuple]), Scalar, false),
    ("tup", Rest(&[], Any), Tuple, false),
    ("elt", Fixed(&[Tuple, Scalar]), Any, false),
    ("apply", Rest(&[Lambda], Any), Any, false),
    ("nbr", Fixed(&[Any]), Field, false),
    ("min-hood", Fixed(&[Field]), Number, false),
    ("max-hood", Fixed(&[Field]), Number, false),
    ("any-hood", Fixed(&[Field]), Boolean, false),
    ("all-hood", Fixed(&[Field]), Boolean, false),
    ("mov", Fixed(&[Vector]), Vector, true),
    ("red", Fixed(&[Scalar]), Scalar, true),
    ("green", Fixed(&[Scalar]), Scalar, true),
    ("blue", Fixed(&[Scalar]), Scalar, true),
    ("probe", Fixed(&[Any, Scalar]), Any, true),
];

fn core_signature(arity: &Arity, output: Kind) -> Signature {
    match arity {
        Fixed(inputs) => Signature::fixed(
            inputs.iter().map(|k| k.to_type()).collect(),
            output.to_type(),
        ),
        Rest(inputs, rest) => Signature::variadic(
            inputs.iter().map(|k| k.to_type()).collect(),
            rest.to_type(),
            output.to_type(),
        ),
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Primitive registry. Names iterate in sorted order.
#[derive(Debug, Clone)]
pub struct Registry {
    primitives: BTreeMap<String, Rc<Primitive>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            primitives: BTreeMap::new(),
        }
    }

    /// A registry holding the core primitive table.
    pub fn core() -> Self {
        let mut primitives = BTreeMap::new();
        for (name, arity, output, side_effect) in CORE {
            primitives.insert(
                (*name).to_string(),
                Rc::new(Primitive {
                    name: (*name).to_string(),
                    signature: core_signature(arity, *output),
                    side_effect: *side_effect,
                }),
            );
        }
        Registry { primitives }
    }

    /// Declare an additional primitive.
    pub fn insert(&mut self, primitive: Primitive) -> Result<Rc<Primitive>, RegistryError> {
        if self.primitives.contains_key(&primitive.name) {
            return Err(RegistryError::DuplicatePrimitive {
                name: primitive.name,
            });
        }
        let shared = Rc::new(primitive);
        self.primitives
            .insert(shared.name.clone(), Rc::clone(&shared));
        Ok(shared)
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Primitive>> {
        self.primitives.get(name)
    }

    /// Look up a primitive, failing with `UnknownPrimitive`.
    pub fn lookup(&self, name: &str) -> Result<Rc<Primitive>, RegistryError> {
        self.primitives
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownPrimitive {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.primitives.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}
