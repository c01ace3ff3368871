use crate::error::QueryEvaluationError;
use crate::store::QueryableStore;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tag bindings for the current result of a cursor.
///
/// Each sub-iterator writes only its own and its descendants' bindings;
/// on key collision the last writer wins.
pub type TagMap<D> = FxHashMap<String, <D as QueryableStore>::Ref>;

/// An advisory result-set size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Size {
    pub value: i64,
    pub exact: bool,
}

impl Size {
    #[inline]
    pub fn exact(value: i64) -> Self {
        Self { value, exact: true }
    }

    #[inline]
    pub fn estimate(value: i64) -> Self {
        Self {
            value,
            exact: false,
        }
    }
}

/// Advisory cost estimates for one plan node.
///
/// Stats are not required to be tight, with one exception: an empty iterator
/// reports size 0 exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Costs {
    pub next_cost: i64,
    pub contains_cost: i64,
    pub size: Size,
}

/// An immutable node of a physical query plan.
///
/// A shape carries no iteration state; it is a factory for [`Scanner`]s
/// (streaming) and [`Indexer`]s (membership probing). Cursors derived from
/// the same shape are independent, and a shape may be instantiated any number
/// of times.
///
/// The [`fmt::Display`] implementation names the node and its own parameters
/// but not its children; [`plan_description`] renders the whole tree.
pub trait Shape<D: QueryableStore>: fmt::Display {
    /// Allocates a fresh streaming cursor.
    fn iterate(&self) -> Box<dyn Scanner<D>>;

    /// Allocates a fresh probing cursor.
    fn lookup(&self) -> Box<dyn Indexer<D>>;

    /// Advisory cost estimates for this subtree.
    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError>;

    /// Applies local rewrites, returning the rewritten shape and whether
    /// anything changed.
    ///
    /// Must be idempotent: optimizing an already optimized tree returns an
    /// equal structure and `false`.
    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool);

    /// Direct children, for plan inspection.
    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<D>>>;

    /// Downcasting hook for the optimizer's structural inspections.
    fn as_any(&self) -> &dyn Any;
}

/// A streaming cursor over a shape's result set.
///
/// After `next` returns `true`, [`Scanner::result`] stays the same reference
/// until the next call to `next` or `next_path`. Once an error is latched,
/// `next` and `next_path` return `false` and [`Scanner::err`] reports the
/// error until the cursor is closed.
pub trait Scanner<D: QueryableStore> {
    /// Advances to the next result.
    fn next(&mut self, ctx: &EvalContext) -> bool;

    /// Advances to the next combination of sub-iterator tag bindings that
    /// still yields the current result, without changing the result itself.
    fn next_path(&mut self, ctx: &EvalContext) -> bool;

    /// The current result, if any.
    fn result(&self) -> Option<D::Ref>;

    /// Writes this cursor's and its sub-cursors' tag bindings for the
    /// current result into `dst`.
    fn tag_results(&self, dst: &mut TagMap<D>);

    /// The latched error, if any.
    fn err(&self) -> Option<QueryEvaluationError>;

    /// Releases the cursor and its sub-cursors, post-order. Idempotent.
    fn close(&mut self) -> Result<(), QueryEvaluationError>;
}

/// A probing cursor answering membership questions for a shape's result set.
///
/// After `contains` returns `true`, [`Indexer::result`] equals the probed
/// reference until the next probe. Error and close semantics are the same as
/// for [`Scanner`].
pub trait Indexer<D: QueryableStore> {
    /// Tests whether `v` belongs to the result set.
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool;

    /// Advances to the next tag-binding combination for the current result.
    fn next_path(&mut self, ctx: &EvalContext) -> bool;

    /// The current result, if any.
    fn result(&self) -> Option<D::Ref>;

    /// Writes the tag bindings for the current result into `dst`.
    fn tag_results(&self, dst: &mut TagMap<D>);

    /// The latched error, if any.
    fn err(&self) -> Option<QueryEvaluationError>;

    /// Releases the cursor and its sub-cursors, post-order. Idempotent.
    fn close(&mut self) -> Result<(), QueryEvaluationError>;
}

/// Cancellation and deadline handle threaded through every cursor call.
///
/// The driver checks it between results and long-running inner loops check
/// it between steps. The core owns no timer: a deadline is only compared
/// against the clock when [`EvalContext::check`] runs.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl EvalContext {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Requests cancellation. All clones of this context observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    #[inline]
    pub fn check(&self) -> Result<(), QueryEvaluationError> {
        if self.is_cancelled() {
            Err(QueryEvaluationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Renders a whole plan tree, e.g. `And(Fixed([1, 2]), AllNodes)`.
///
/// The rendering doubles as the structural signature the optimizer uses to
/// de-duplicate identical subtrees.
pub fn plan_description<D: QueryableStore>(shape: &dyn Shape<D>) -> String {
    let sub = shape.sub_iterators();
    if sub.is_empty() {
        shape.to_string()
    } else {
        format!(
            "{}({})",
            shape,
            sub.iter()
                .map(|s| plan_description(s.as_ref()))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

static CURSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic cursor id, only surfaced in debug logs.
pub(crate) fn next_cursor_id() -> u64 {
    CURSOR_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_between_clones() {
        let ctx = EvalContext::new();
        let clone = ctx.clone();
        assert!(ctx.check().is_ok());
        clone.cancel();
        assert!(matches!(
            ctx.check(),
            Err(QueryEvaluationError::Cancelled)
        ));
    }

    #[test]
    fn deadline_in_the_past_cancels() {
        let ctx = EvalContext::with_timeout(Duration::ZERO);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn cursor_ids_are_monotonic() {
        let a = next_cursor_id();
        let b = next_cursor_id();
        assert!(b > a);
    }
}
