use crate::error::QueryEvaluationError;
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// The empty set.
///
/// Absorbing for intersections, identity for unions. Produced by the
/// optimizer whenever a subtree is statically known to yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Null;

impl Null {
    pub fn new() -> Self {
        Self
    }
}

impl fmt::Display for Null {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Null")
    }
}

impl<D: QueryableStore> Shape<D> for Null {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(NullCursor { err: None })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(NullCursor { err: None })
    }

    fn stats(&self, _ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        Ok(Costs {
            next_cost: 0,
            contains_cost: 0,
            size: Size::exact(0),
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

/// Whether a shape has been simplified down to [`Null`].
pub(crate) fn is_null<D: QueryableStore>(shape: &Rc<dyn Shape<D>>) -> bool {
    shape.as_any().is::<Null>()
}

struct NullCursor {
    err: Option<QueryEvaluationError>,
}

impl<D: QueryableStore> Scanner<D> for NullCursor {
    fn next(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        None
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

impl<D: QueryableStore> Indexer<D> for NullCursor {
    fn contains(&mut self, _ctx: &EvalContext, _v: &D::Ref) -> bool {
        false
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        None
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

/// Zero results carrying a deferred error.
///
/// The error is latched on the first `next` or `contains` call, surfacing
/// construction-time failures through the regular cursor contract.
#[derive(Debug, Clone)]
pub struct ErrorShape {
    error: QueryEvaluationError,
}

impl ErrorShape {
    pub fn new(error: QueryEvaluationError) -> Self {
        Self { error }
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({})", self.error)
    }
}

impl<D: QueryableStore> Shape<D> for ErrorShape {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        error_scanner(self.error.clone())
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        error_indexer(self.error.clone())
    }

    fn stats(&self, _ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        Ok(Costs {
            next_cost: 0,
            contains_cost: 0,
            size: Size::exact(0),
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

/// A scanner that latches `error` on its first advance.
pub(crate) fn error_scanner<D: QueryableStore>(
    error: QueryEvaluationError,
) -> Box<dyn Scanner<D>> {
    Box::new(ErrorCursor {
        pending: Some(error),
        err: None,
    })
}

/// An indexer that latches `error` on its first probe.
pub(crate) fn error_indexer<D: QueryableStore>(
    error: QueryEvaluationError,
) -> Box<dyn Indexer<D>> {
    Box::new(ErrorCursor {
        pending: Some(error),
        err: None,
    })
}

struct ErrorCursor {
    pending: Option<QueryEvaluationError>,
    err: Option<QueryEvaluationError>,
}

impl ErrorCursor {
    fn latch(&mut self) {
        if self.err.is_none() {
            self.err = self.pending.take();
        }
    }
}

impl<D: QueryableStore> Scanner<D> for ErrorCursor {
    fn next(&mut self, _ctx: &EvalContext) -> bool {
        self.latch();
        false
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        None
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

impl<D: QueryableStore> Indexer<D> for ErrorCursor {
    fn contains(&mut self, _ctx: &EvalContext, _v: &D::Ref) -> bool {
        self.latch();
        false
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        None
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

    #[test]
    fn null_is_empty_and_exact() {
        let ctx = EvalContext::new();
        let shape: Rc<dyn Shape<MemoryStore>> = Rc::new(Null);
        let mut scanner = shape.iterate();
        assert!(!scanner.next(&ctx));
        assert!(scanner.err().is_none());
        scanner.close().unwrap();
        assert_eq!(shape.stats(&ctx).unwrap().size, Size::exact(0));
    }

    #[test]
    fn error_latches_on_first_advance() {
        let ctx = EvalContext::new();
        let shape: Rc<dyn Shape<MemoryStore>> =
            Rc::new(ErrorShape::new(QueryEvaluationError::Plan("boom".into())));
        let mut scanner = shape.iterate();
        assert!(scanner.err().is_none());
        assert!(!scanner.next(&ctx));
        assert!(matches!(
            scanner.err(),
            Some(QueryEvaluationError::Plan(m)) if m == "boom"
        ));
        // sticky until close
        assert!(!scanner.next(&ctx));
        assert!(scanner.err().is_some());
        scanner.close().unwrap();
    }
}
