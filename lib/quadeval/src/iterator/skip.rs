use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Drops the first `skip` results of the sub-iterator.
///
/// Probing is unaffected: membership does not depend on scan position, so
/// `lookup` delegates to the sub-iterator.
pub struct Skip<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
    skip: usize,
}

impl<D: QueryableStore> Skip<D> {
    pub fn new(sub: Rc<dyn Shape<D>>, skip: usize) -> Self {
        Self { sub, skip }
    }
}

impl<D: QueryableStore> fmt::Display for Skip<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Skip({})", self.skip)
    }
}

impl<D: QueryableStore> Shape<D> for Skip<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(SkipNext {
            sub: self.sub.iterate(),
            skip: self.skip,
            skipped: 0,
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
            size: Size {
                value: (sub.size.value - self.skip as i64).max(0),
                exact: sub.size.exact,
            },
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if self.skip == 0 {
            return (sub, true);
        }
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (
                Rc::new(Self {
                    sub,
                    skip: self.skip,
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

struct SkipNext<D: QueryableStore> {
    sub: Box<dyn Scanner<D>>,
    skip: usize,
    skipped: usize,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for SkipNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.skipped < self.skip {
            if !self.sub.next(ctx) {
                self.err = self.sub.err();
                return false;
            }
            self.skipped += 1;
        }
        if self.sub.next(ctx) {
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
        if self.skipped < self.skip {
            None
        } else {
            self.sub.result()
        }
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
