// operator.rs — Operators applied by graph nodes
//
// The operator set is closed: literals, function parameters, primitives from
// the registry, and calls of user-defined functions. Function bodies live in
// the graph's function arena and are referenced by `FunctionId`.

use std::fmt;
use std::rc::Rc;

use crate::id::FunctionId;
use crate::types::ValueType;

/// Input and output types of an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Fixed positional inputs.
    pub inputs: Vec<ValueType>,
    /// Type of any further inputs; `None` for fixed arity.
    pub rest: Option<ValueType>,
    pub output: ValueType,
}

impl Signature {
    pub fn fixed(inputs: Vec<ValueType>, output: ValueType) -> Self {
        Signature {
            inputs,
            rest: None,
            output,
        }
    }

    pub fn variadic(inputs: Vec<ValueType>, rest: ValueType, output: ValueType) -> Self {
        Signature {
            inputs,
            rest: Some(rest),
            output,
        }
    }

    pub fn n_fixed(&self) -> usize {
        self.inputs.len()
    }

    /// Whether a call with `n` inputs fits this signature.
    pub fn legal_length(&self, n: usize) -> bool {
        if self.rest.is_some() {
            n >= self.n_fixed()
        } else {
            n == self.n_fixed()
        }
    }

    /// Declared type of the `n`th input.
    pub fn nth_type(&self, n: usize) -> Option<&ValueType> {
        self.inputs.get(n).or(self.rest.as_ref())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, input) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        if let Some(rest) = &self.rest {
            if !self.inputs.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "{rest}...")?;
        }
        write!(f, ") -> {}", self.output)
    }
}

/// A built-in operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub name: String,
    pub signature: Signature,
    /// Actuators and probes: never removed or replaced by a rewrite.
    pub side_effect: bool,
}

/// A user-defined function. Its body is a root region of the graph.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub body: crate::id::RegionId,
    pub output: Option<crate::id::EdgeId>,
    pub side_effect: bool,
}

/// The operator an `OpNode` applies.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    /// A constant; the value is always a literal type.
    Literal(ValueType),
    /// The `index`th argument of `function`, read inside its body.
    Parameter {
        function: FunctionId,
        index: usize,
        name: String,
    },
    Primitive(Rc<Primitive>),
    /// A call of a user-defined function.
    Compound(FunctionId),
}

impl Operator {
    /// Name of the primitive, if this is one.
    pub fn primitive_name(&self) -> Option<&str> {
        match self {
            Operator::Primitive(p) => Some(&p.name),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Operator::Literal(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self, Operator::Parameter { .. })
    }

    /// Functions this operator refers to: the callee of a call, and any
    /// function held by a literal lambda (possibly nested in tuples or fields).
    pub fn function_refs(&self) -> Vec<FunctionId> {
        let mut refs = Vec::new();
        collect_op_refs(self, &mut refs);
        refs
    }
}

fn collect_op_refs(op: &Operator, refs: &mut Vec<FunctionId>) {
    match op {
        Operator::Compound(id) => refs.push(*id),
        Operator::Literal(value) => collect_type_refs(value, refs),
        Operator::Parameter { .. } | Operator::Primitive(_) => {}
    }
}

fn collect_type_refs(t: &ValueType, refs: &mut Vec<FunctionId>) {
    match t {
        ValueType::Lambda(Some(op)) => {
            if let Operator::Compound(id) = op.as_ref() {
                refs.push(*id);
            }
        }
        ValueType::Tuple(tt) | ValueType::Vector(tt) => {
            for elem in &tt.elems {
                collect_type_refs(elem, refs);
            }
        }
        ValueType::Field(Some(inner)) => collect_type_refs(inner, refs),
        _ => {}
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Literal(v) => write!(f, "{v}"),
            Operator::Parameter { name, index, .. } => write!(f, "param:{name}#{index}"),
            Operator::Primitive(p) => write!(f, "{}", p.name),
            Operator::Compound(id) => write!(f, "call:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TupleType;

    #[test]
    fn legal_length_respects_rest_inputs() {
        let fixed = Signature::fixed(vec![ValueType::Number, ValueType::Number], ValueType::Boolean(None));
        assert!(fixed.legal_length(2));
        assert!(!fixed.legal_length(3));
        let variadic = Signature::variadic(vec![], ValueType::Number, ValueType::Number);
        assert!(variadic.legal_length(0));
        assert!(variadic.legal_length(5));
        assert_eq!(variadic.nth_type(4), Some(&ValueType::Number));
        assert_eq!(fixed.to_string(), "(number, number) -> boolean");
        assert_eq!(variadic.to_string(), "(number...) -> number");
    }

    #[test]
    fn function_refs_look_through_literal_lambdas() {
        assert_eq!(Operator::Compound(FunctionId(2)).function_refs(), vec![FunctionId(2)]);
        let nested = Operator::Literal(ValueType::Tuple(TupleType::bounded(vec![
            ValueType::lambda(Operator::Compound(FunctionId(0))),
            ValueType::field_of(ValueType::lambda(Operator::Compound(FunctionId(1)))),
        ])));
        assert_eq!(nested.function_refs(), vec![FunctionId(0), FunctionId(1)]);
        assert!(Operator::Literal(ValueType::scalar(1.0)).function_refs().is_empty());
    }
}
