use crate::{Direction, Value};
use std::fmt;

/// An ordered `(subject, predicate, object, label)` tuple.
///
/// The label is optional: a quad without a label belongs to the default
/// (unlabeled) graph.
///
/// ```
/// use quadmodel::{Direction, Quad};
///
/// let q = Quad::new("alice", "follows", "bob");
/// assert_eq!(q.value(Direction::Object), Some(&"bob".into()));
/// assert_eq!(q.value(Direction::Label), None);
/// ```
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Quad {
    pub subject: Value,
    pub predicate: Value,
    pub object: Value,
    pub label: Option<Value>,
}

impl Quad {
    /// Builds an unlabeled quad.
    #[inline]
    pub fn new(
        subject: impl Into<Value>,
        predicate: impl Into<Value>,
        object: impl Into<Value>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            label: None,
        }
    }

    /// Builds a quad inside the graph named by `label`.
    #[inline]
    pub fn new_in(
        subject: impl Into<Value>,
        predicate: impl Into<Value>,
        object: impl Into<Value>,
        label: impl Into<Value>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            label: Some(label.into()),
        }
    }

    /// The value at the given direction, if any.
    ///
    /// Only [`Direction::Label`] may be absent.
    #[inline]
    pub fn value(&self, d: Direction) -> Option<&Value> {
        match d {
            Direction::Subject => Some(&self.subject),
            Direction::Predicate => Some(&self.predicate),
            Direction::Object => Some(&self.object),
            Direction::Label => self.label.as_ref(),
        }
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(label) = &self.label {
            write!(f, " {label}")?;
        }
        write!(f, " .")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection() {
        let q = Quad::new_in("s", "p", "o", "l");
        for d in Direction::ALL {
            assert!(q.value(d).is_some());
        }
        assert_eq!(q.value(Direction::Label), Some(&"l".into()));
    }

    #[test]
    fn display() {
        assert_eq!(Quad::new("s", "p", "o").to_string(), "\"s\" \"p\" \"o\" .");
        assert_eq!(
            Quad::new_in(Value::Iri("s".into()), "p", "o", "l").to_string(),
            "<s> \"p\" \"o\" \"l\" ."
        );
    }
}
