use crate::error::QueryEvaluationError;
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use quadmodel::Value;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Yields a single integer node holding the sub-iterator's result count.
///
/// When the sub-iterator reports an exact size the scan is bypassed
/// entirely. Paths do not multiply the count.
pub struct Count<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
}

impl<D: QueryableStore> Count<D> {
    pub fn new(store: D, sub: Rc<dyn Shape<D>>) -> Self {
        Self { store, sub }
    }
}

impl<D: QueryableStore> fmt::Display for Count<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Count")
    }
}

/// Counts the sub-iterator's results, preferring the exact size report.
fn count_results<D: QueryableStore>(
    store: &D,
    sub: &Rc<dyn Shape<D>>,
    ctx: &EvalContext,
) -> Result<D::Ref, QueryEvaluationError> {
    let stats = sub.stats(ctx)?;
    let n = if stats.size.exact {
        stats.size.value
    } else {
        let mut scanner = sub.iterate();
        let mut n = 0i64;
        loop {
            if let Err(e) = ctx.check() {
                let _ = scanner.close();
                return Err(e);
            }
            if !scanner.next(ctx) {
                break;
            }
            n += 1;
        }
        let err = scanner.err();
        let close_result = scanner.close();
        if let Some(e) = err {
            return Err(e);
        }
        close_result?;
        n
    };
    store
        .internalize_value(&Value::Int(n))
        .map_err(QueryEvaluationError::store)
}

impl<D: QueryableStore> Shape<D> for Count<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(CountNext {
            store: self.store.clone(),
            sub: Rc::clone(&self.sub),
            done: false,
            result: None,
            err: None,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(CountContains {
            store: self.store.clone(),
            sub: Rc::clone(&self.sub),
            count: None,
            result: None,
            err: None,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        Ok(Costs {
            next_cost: if sub.size.exact {
                1
            } else {
                sub.next_cost.saturating_mul(sub.size.value.max(1))
            },
            contains_cost: sub.next_cost.saturating_mul(sub.size.value.max(1)),
            size: Size::exact(1),
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if changed {
            (Rc::new(Self::new(self.store.clone(), sub)), true)
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

struct CountNext<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    done: bool,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
}

impl<D: QueryableStore> Scanner<D> for CountNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() || self.done {
            self.result = None;
            return false;
        }
        self.done = true;
        match count_results(&self.store, &self.sub, ctx) {
            Ok(r) => {
                self.result = Some(r);
                true
            }
            Err(e) => {
                self.err = Some(e);
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

struct CountContains<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    count: Option<D::Ref>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
}

impl<D: QueryableStore> Indexer<D> for CountContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        if self.count.is_none() {
            match count_results(&self.store, &self.sub, ctx) {
                Ok(r) => self.count = Some(r),
                Err(e) => {
                    self.err = Some(e);
                    return false;
                }
            }
        }
        let found = self.count.as_ref() == Some(v);
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
    use crate::iterator::fixed::Fixed;
    use crate::iterator::unique::Unique;
    use crate::store::{MemRef, MemoryStore};
    use crate::QueryableStore;
    use quadmodel::QuadSet;

    fn store() -> MemoryStore {
        MemoryStore::new(QuadSet::new())
    }

    fn refs(values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| MemRef::Node(Rc::new(Value::Int(i))))
            .collect()
    }

    #[test]
    fn yields_one_synthetic_count_node() {
        let ctx = EvalContext::new();
        let store = store();
        let count = Count::new(store.clone(), Rc::new(Fixed::new(refs([5, 6, 7]))));
        let mut scanner = count.iterate();
        assert!(scanner.next(&ctx));
        assert_eq!(
            store.name_of(&scanner.result().unwrap()).unwrap(),
            Some(Value::Int(3))
        );
        assert!(!scanner.next(&ctx));
        scanner.close().unwrap();
    }

    #[test]
    fn inexact_sub_iterators_are_scanned() {
        let ctx = EvalContext::new();
        let store = store();
        // Unique reports an inexact size, forcing the scan path
        let unique: Rc<dyn Shape<MemoryStore>> =
            Rc::new(Unique::new(Rc::new(Fixed::new(refs([1, 1, 2])))));
        assert!(!unique.stats(&ctx).unwrap().size.exact);
        let count = Count::new(store.clone(), unique);
        let mut scanner = count.iterate();
        assert!(scanner.next(&ctx));
        assert_eq!(
            store.name_of(&scanner.result().unwrap()).unwrap(),
            Some(Value::Int(2))
        );
        scanner.close().unwrap();
    }

    #[test]
    fn probes_match_the_count_only() {
        let ctx = EvalContext::new();
        let store = store();
        let count = Count::new(store.clone(), Rc::new(Fixed::new(refs([5, 6]))));
        let mut indexer = count.lookup();
        let two = store.internalize_value(&Value::Int(2)).unwrap();
        let three = store.internalize_value(&Value::Int(3)).unwrap();
        assert!(indexer.contains(&ctx, &two));
        assert!(!indexer.contains(&ctx, &three));
        indexer.close().unwrap();
    }
}
