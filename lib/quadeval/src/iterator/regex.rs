use crate::iterator::value_filter::{ValueFilter, ValuePredicate};
use crate::shape::Shape;
use crate::store::QueryableStore;
use quadmodel::Value;
use regex::Regex;
use std::error::Error;
use std::fmt;
use std::rc::Rc;

/// Regular-expression predicate over string-like values.
///
/// Matches plain, language-tagged and typed string literals. Matching IRIs
/// and blank node names is opt-in: it defeats indexing, so most plans should
/// leave it off.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    re: Regex,
    refs: bool,
}

impl RegexFilter {
    pub fn new(re: Regex) -> Self {
        Self { re, refs: false }
    }

    /// Also match IRI and blank-node references.
    pub fn with_refs(re: Regex) -> Self {
        Self { re, refs: true }
    }

    /// The filter shape keeping `sub`'s results whose value matches `re`.
    pub fn filter<D: QueryableStore>(
        store: D,
        sub: Rc<dyn Shape<D>>,
        re: Regex,
    ) -> ValueFilter<D> {
        ValueFilter::new(store, sub, Rc::new(Self::new(re)))
    }
}

impl fmt::Display for RegexFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "regex /{}/", self.re)?;
        if self.refs {
            f.write_str(" including refs")?;
        }
        Ok(())
    }
}

impl ValuePredicate for RegexFilter {
    fn test(&self, v: &Value) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(match v {
            Value::String(s)
            | Value::LangString { value: s, .. }
            | Value::TypedString { value: s, .. } => self.re.is_match(s),
            Value::Iri(s) | Value::BNode(s) => self.refs && self.re.is_match(s),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Time(_) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::fixed::Fixed;
    use crate::shape::EvalContext;
    use crate::store::MemoryStore;
    use crate::QueryableStore;
    use quadmodel::QuadSet;

    fn matches(predicate: &RegexFilter, v: Value) -> bool {
        predicate.test(&v).unwrap()
    }

    #[test]
    fn matches_string_like_values_only() {
        let predicate = RegexFilter::new(Regex::new("^ab+$").unwrap());
        assert!(matches(&predicate, Value::from("abb")));
        assert!(matches(
            &predicate,
            Value::LangString {
                value: "ab".into(),
                lang: "en".into()
            }
        ));
        assert!(!matches(&predicate, Value::Iri("abb".into())));
        assert!(!matches(&predicate, Value::Int(1)));
    }

    #[test]
    fn ref_matching_is_opt_in() {
        let predicate = RegexFilter::with_refs(Regex::new("example").unwrap());
        assert!(matches(&predicate, Value::Iri("http://example.com/".into())));
        assert!(matches(&predicate, Value::BNode("example1".into())));
    }

    #[test]
    fn filters_a_scan() {
        let ctx = EvalContext::new();
        let store = MemoryStore::new(QuadSet::new());
        let refs: Vec<_> = ["alice", "bob", "claire"]
            .into_iter()
            .map(|s| store.internalize_value(&s.into()).unwrap())
            .collect();
        let filter = RegexFilter::filter(
            store.clone(),
            Rc::new(Fixed::new(refs.clone())),
            Regex::new("^.l").unwrap(),
        );
        let mut scanner = filter.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(out, vec![refs[0].clone(), refs[2].clone()]);
    }
}
