use crate::iterator::value_filter::{ValueFilter, ValuePredicate};
use crate::shape::Shape;
use crate::store::QueryableStore;
use quadmodel::Value;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::rc::Rc;

/// Comparison operator.
///
/// Equality is deliberately missing: it is expressed by intersecting with a
/// `Fixed` of one value, which keeps the index usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Operator {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Less => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Greater => ordering == Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
        })
    }
}

/// Order predicate against a fixed operand, dispatched by value kind.
///
/// Only like kinds compare: integers against integers, floats against
/// floats, strings, IRIs and blank nodes lexicographically against the same
/// kind, timestamps against timestamps. Any kind mismatch filters the
/// candidate out; it is never an error. There is no numeric coercion.
#[derive(Debug, Clone)]
pub struct Comparison {
    op: Operator,
    operand: Value,
}

impl Comparison {
    pub fn new(op: Operator, operand: Value) -> Self {
        Self { op, operand }
    }

    /// The filter shape comparing `sub`'s resolved values against `operand`.
    pub fn filter<D: QueryableStore>(
        store: D,
        sub: Rc<dyn Shape<D>>,
        op: Operator,
        operand: Value,
    ) -> ValueFilter<D> {
        ValueFilter::new(store, sub, Rc::new(Self::new(op, operand)))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.operand)
    }
}

impl ValuePredicate for Comparison {
    fn test(&self, v: &Value) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let ordering = match (v, &self.operand) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b))
            | (Value::Iri(a), Value::Iri(b))
            | (Value::BNode(a), Value::BNode(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            (_, _) => None,
        };
        Ok(ordering.is_some_and(|ordering| self.op.matches(ordering)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::fixed::Fixed;
    use crate::shape::EvalContext;
    use crate::store::{MemRef, MemoryStore};
    use crate::QueryableStore;
    use oxsdatatypes::DateTime;
    use quadmodel::QuadSet;
    use std::str::FromStr;

    fn store() -> MemoryStore {
        MemoryStore::new(QuadSet::new())
    }

    fn passes(op: Operator, operand: Value, candidate: Value) -> bool {
        Comparison::new(op, operand).test(&candidate).unwrap()
    }

    #[test]
    fn integers_compare_naturally() {
        assert!(passes(Operator::Less, Value::Int(3), Value::Int(2)));
        assert!(!passes(Operator::Less, Value::Int(3), Value::Int(3)));
        assert!(passes(Operator::LessOrEqual, Value::Int(3), Value::Int(3)));
        assert!(passes(Operator::Greater, Value::Int(3), Value::Int(4)));
        assert!(passes(Operator::GreaterOrEqual, Value::Int(3), Value::Int(3)));
    }

    #[test]
    fn strings_compare_bytewise() {
        assert!(passes(
            Operator::Less,
            Value::from("b"),
            Value::from("a")
        ));
        assert!(!passes(
            Operator::Greater,
            Value::from("b"),
            Value::from("a")
        ));
    }

    #[test]
    fn kind_mismatch_is_false_not_an_error() {
        // no Int/Float coercion
        assert!(!passes(Operator::Less, Value::Int(3), Value::Float(2.0)));
        assert!(!passes(Operator::Less, Value::Float(3.0), Value::Int(2)));
        assert!(!passes(
            Operator::Less,
            Value::from("b"),
            Value::Iri("a".into())
        ));
        assert!(!passes(Operator::Less, Value::Int(3), Value::Bool(true)));
    }

    #[test]
    fn nan_never_matches() {
        assert!(!passes(
            Operator::LessOrEqual,
            Value::Float(3.0),
            Value::Float(f64::NAN)
        ));
    }

    #[test]
    fn equal_instants_satisfy_the_inclusive_operators() {
        let t = Value::Time(DateTime::from_str("2024-05-01T12:00:00Z").unwrap());
        assert!(passes(Operator::LessOrEqual, t.clone(), t.clone()));
        assert!(passes(Operator::GreaterOrEqual, t.clone(), t.clone()));
        assert!(!passes(Operator::Less, t.clone(), t.clone()));
        assert!(!passes(Operator::Greater, t.clone(), t));
    }

    #[test]
    fn filters_a_scan() {
        let ctx = EvalContext::new();
        let store = store();
        let refs: Vec<MemRef> = (0..5)
            .map(|i| store.internalize_value(&Value::Int(i)).unwrap())
            .collect();
        let filter = Comparison::filter(
            store.clone(),
            Rc::new(Fixed::new(refs.clone())),
            Operator::Less,
            Value::Int(3),
        );
        let mut scanner = filter.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(out, refs[..3].to_vec());

        let mut indexer = filter.lookup();
        assert!(indexer.contains(&ctx, &refs[2]));
        assert!(!indexer.contains(&ctx, &refs[3]));
        indexer.close().unwrap();
    }
}
