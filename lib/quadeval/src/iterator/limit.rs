use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Caps the number of results; a limit of 0 means unbounded.
///
/// Only `next` successes count towards the limit. Paths of an emitted result
/// are not limited here; the driver enforces its own bound when asked to.
/// Probing delegates to the sub-iterator.
pub struct Limit<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
    limit: usize,
}

impl<D: QueryableStore> Limit<D> {
    pub fn new(sub: Rc<dyn Shape<D>>, limit: usize) -> Self {
        Self { sub, limit }
    }
}

impl<D: QueryableStore> fmt::Display for Limit<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Limit({})", self.limit)
    }
}

impl<D: QueryableStore> Shape<D> for Limit<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(LimitNext {
            sub: self.sub.iterate(),
            limit: self.limit,
            emitted: 0,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        self.sub.lookup()
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        let size = if self.limit == 0 {
            sub.size
        } else {
            Size {
                value: sub.size.value.min(self.limit as i64),
                exact: sub.size.exact,
            }
        };
        Ok(Costs {
            next_cost: sub.next_cost,
            contains_cost: sub.contains_cost,
            size,
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if self.limit == 0 {
            return (sub, true);
        }
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (
                Rc::new(Self {
                    sub,
                    limit: self.limit,
                }),
                true,
            )
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

struct LimitNext<D: QueryableStore> {
    sub: Box<dyn Scanner<D>>,
    limit: usize,
    emitted: usize,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for LimitNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.limit != 0 && self.emitted >= self.limit {
            return false;
        }
        if self.sub.next(ctx) {
            self.emitted += 1;
            return true;
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
        self.sub.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::fixed::Fixed;
    use crate::iterator::skip::Skip;
    use crate::store::{MemRef, MemoryStore};
    use quadmodel::Value;

    fn refs(values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| MemRef::Node(Rc::new(Value::Int(i))))
            .collect()
    }

    fn scan(shape: &dyn Shape<MemoryStore>) -> Vec<MemRef> {
        let ctx = EvalContext::new();
        let mut scanner = shape.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        out
    }

    #[test]
    fn caps_the_result_count() {
        let limit: Limit<MemoryStore> = Limit::new(Rc::new(Fixed::new(refs([1, 2, 3, 4]))), 2);
        assert_eq!(scan(&limit), refs([1, 2]));
    }

    #[test]
    fn zero_is_unbounded_and_optimizes_away() {
        let ctx = EvalContext::new();
        let limit: Rc<Limit<MemoryStore>> =
            Rc::new(Limit::new(Rc::new(Fixed::new(refs([1, 2]))), 0));
        assert_eq!(scan(limit.as_ref()), refs([1, 2]));
        let (shape, changed) = limit.optimize(&ctx);
        assert!(changed);
        assert!(shape.as_any().is::<Fixed<MemoryStore>>());
    }

    #[test]
    fn skip_then_limit_windows_the_results() {
        // Skip(a) then Limit(b): at most b results, the k-th being the
        // sub-iterator's (a+k)-th
        let skipped: Rc<dyn Shape<MemoryStore>> =
            Rc::new(Skip::new(Rc::new(Fixed::new(refs([1, 2, 3, 4, 5]))), 1));
        let limit: Limit<MemoryStore> = Limit::new(skipped, 3);
        assert_eq!(scan(&limit), refs([2, 3, 4]));
    }

    #[test]
    fn size_is_capped() {
        let ctx = EvalContext::new();
        let limit: Limit<MemoryStore> = Limit::new(Rc::new(Fixed::new(refs([1, 2, 3]))), 2);
        assert_eq!(limit.stats(&ctx).unwrap().size, Size::exact(2));
    }
}
