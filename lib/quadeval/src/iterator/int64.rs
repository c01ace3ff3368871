use crate::error::QueryEvaluationError;
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use quadmodel::Value;
use std::any::Any;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

/// A synthetic source of integer-encoded nodes over the half-open range
/// `[lo, hi)`.
#[derive(Debug, Clone)]
pub struct Int64Range<D: QueryableStore> {
    store: D,
    lo: i64,
    hi: i64,
    step: i64,
}

impl<D: QueryableStore> Int64Range<D> {
    pub fn new(store: D, range: Range<i64>) -> Self {
        Self {
            store,
            lo: range.start,
            hi: range.end,
            step: 1,
        }
    }

    /// A range advancing by `step`, which must be at least 1.
    pub fn with_step(
        store: D,
        range: Range<i64>,
        step: i64,
    ) -> Result<Self, QueryEvaluationError> {
        if step < 1 {
            return Err(QueryEvaluationError::Plan(format!(
                "an integer range requires a positive step, got {step}"
            )));
        }
        Ok(Self {
            store,
            lo: range.start,
            hi: range.end,
            step,
        })
    }

    fn size(&self) -> i64 {
        if self.hi <= self.lo {
            0
        } else {
            (self.hi - self.lo + self.step - 1) / self.step
        }
    }
}

impl<D: QueryableStore> fmt::Display for Int64Range<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step == 1 {
            write!(f, "Int64Range({}, {})", self.lo, self.hi)
        } else {
            write!(f, "Int64Range({}, {}, step={})", self.lo, self.hi, self.step)
        }
    }
}

impl<D: QueryableStore> Shape<D> for Int64Range<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(Int64Next {
            store: self.store.clone(),
            cur: self.lo,
            hi: self.hi,
            step: self.step,
            result: None,
            err: None,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(Int64Contains {
            store: self.store.clone(),
            lo: self.lo,
            hi: self.hi,
            step: self.step,
            result: None,
            err: None,
        })
    }

    fn stats(&self, _ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        Ok(Costs {
            next_cost: 1,
            contains_cost: 1,
            size: Size::exact(self.size()),
        })
    }

    fn optimize(self: Rc<Self>, _ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        (self, false)
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<D>>> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Int64Next<D: QueryableStore> {
    store: D,
    cur: i64,
    hi: i64,
    step: i64,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
}

impl<D: QueryableStore> Scanner<D> for Int64Next<D> {
    fn next(&mut self, _ctx: &EvalContext) -> bool {
        if self.err.is_some() || self.cur >= self.hi {
            self.result = None;
            return false;
        }
        match self.store.internalize_value(&Value::Int(self.cur)) {
            Ok(r) => {
                self.result = Some(r);
                self.cur += self.step;
                true
            }
            Err(e) => {
                self.err = Some(QueryEvaluationError::store(e));
                self.result = None;
                false
            }
        }
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

struct Int64Contains<D: QueryableStore> {
    store: D,
    lo: i64,
    hi: i64,
    step: i64,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
}

impl<D: QueryableStore> Indexer<D> for Int64Contains<D> {
    fn contains(&mut self, _ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        let value = match self.store.name_of(v) {
            Ok(value) => value,
            Err(e) => {
                self.err = Some(QueryEvaluationError::store(e));
                return false;
            }
        };
        let found = matches!(
            value,
            Some(Value::Int(i)) if i >= self.lo && i < self.hi && (i - self.lo) % self.step == 0
        );
        self.result = found.then(|| v.clone());
        found
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use quadmodel::QuadSet;

    fn store() -> MemoryStore {
        MemoryStore::new(QuadSet::new())
    }

    #[test]
    fn scans_the_half_open_range() {
        let ctx = EvalContext::new();
        let range = Int64Range::new(store(), 1..4);
        assert_eq!(range.stats(&ctx).unwrap().size, Size::exact(3));
        let mut scanner = range.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        assert_eq!(out.len(), 3);
        scanner.close().unwrap();
    }

    #[test]
    fn step_changes_membership_and_size() {
        let ctx = EvalContext::new();
        let store = store();
        let range = Int64Range::with_step(store.clone(), 0..10, 3).unwrap();
        assert_eq!(range.stats(&ctx).unwrap().size, Size::exact(4)); // 0, 3, 6, 9
        let mut indexer = range.lookup();
        let six = store.internalize_value(&Value::Int(6)).unwrap();
        let seven = store.internalize_value(&Value::Int(7)).unwrap();
        assert!(indexer.contains(&ctx, &six));
        assert!(!indexer.contains(&ctx, &seven));
        indexer.close().unwrap();
    }

    #[test]
    fn rejects_non_positive_steps() {
        assert!(matches!(
            Int64Range::with_step(store(), 0..10, 0),
            Err(QueryEvaluationError::Plan(_))
        ));
    }

    #[test]
    fn membership_is_by_value_not_presence() {
        let ctx = EvalContext::new();
        let store = store();
        let range = Int64Range::new(store.clone(), 0..5);
        let mut indexer = range.lookup();
        let string_ref = store.internalize_value(&"3".into()).unwrap();
        assert!(!indexer.contains(&ctx, &string_ref));
        indexer.close().unwrap();
    }
}
