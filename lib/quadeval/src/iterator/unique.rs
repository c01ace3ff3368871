use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use rustc_hash::FxHashSet;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Hash-based de-duplication by the store key, preserving the first
/// occurrence of each value and its tags.
///
/// De-duplication does not change membership, so probing delegates to the
/// sub-iterator.
pub struct Unique<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
}

impl<D: QueryableStore> Unique<D> {
    pub fn new(sub: Rc<dyn Shape<D>>) -> Self {
        Self { sub }
    }
}

impl<D: QueryableStore> fmt::Display for Unique<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unique")
    }
}

impl<D: QueryableStore> Shape<D> for Unique<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(UniqueNext {
            sub: self.sub.iterate(),
            seen: FxHashSet::default(),
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        self.sub.lookup()
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        Ok(Costs {
            next_cost: sub.next_cost,
            contains_cost: sub.contains_cost,
            // an upper bound; how many duplicates there are is unknowable
            size: Size::estimate(sub.size.value),
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (Rc::new(Self::new(sub)), true)
        } else {
            (self, false)
        }
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<D>>> {
        vec![Rc::clone(&self.sub)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct UniqueNext<D: QueryableStore> {
    sub: Box<dyn Scanner<D>>,
    seen: FxHashSet<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for UniqueNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.sub.next(ctx) {
            let Some(v) = self.sub.result() else {
                continue;
            };
            if self.seen.insert(v) {
                return true;
            }
        }
        self.err = self.sub.err();
        false
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.sub.next_path(ctx) {
            return true;
        }
        self.err = self.sub.err();
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.sub.result()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        self.sub.tag_results(dst);
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.seen.clear();
        self.sub.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::fixed::Fixed;
    use crate::store::{MemRef, MemoryStore};
    use quadmodel::Value;

    fn refs(values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| MemRef::Node(Rc::new(Value::Int(i))))
            .collect()
    }

    #[test]
    fn keeps_first_occurrences_in_order() {
        let ctx = EvalContext::new();
        let unique: Unique<MemoryStore> =
            Unique::new(Rc::new(Fixed::new(refs([3, 1, 3, 2, 1]))));
        let mut scanner = unique.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(out, refs([3, 1, 2]));
    }

    #[test]
    fn size_becomes_an_estimate() {
        let ctx = EvalContext::new();
        let unique: Unique<MemoryStore> = Unique::new(Rc::new(Fixed::new(refs([1, 1]))));
        let stats = unique.stats(&ctx).unwrap();
        assert!(!stats.size.exact);
        assert_eq!(stats.size.value, 2);
    }
}
