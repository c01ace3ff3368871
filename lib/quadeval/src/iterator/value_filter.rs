use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use quadmodel::Value;
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::rc::Rc;

/// A predicate over resolved [`Value`]s.
///
/// The [`fmt::Display`] implementation describes the predicate in plan
/// renderings.
pub trait ValuePredicate: fmt::Display {
    /// Whether the candidate passes the filter.
    ///
    /// An error fails the whole filter, not just the candidate.
    fn test(&self, v: &Value) -> Result<bool, Box<dyn Error + Send + Sync>>;
}

/// Keeps the sub-iterator's results whose resolved value passes a predicate.
///
/// References the store cannot resolve are filtered out. This shape is the
/// shared machinery behind the comparison and regex filters, and accepts any
/// caller-supplied predicate.
pub struct ValueFilter<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    predicate: Rc<dyn ValuePredicate>,
}

impl<D: QueryableStore> ValueFilter<D> {
    pub fn new(store: D, sub: Rc<dyn Shape<D>>, predicate: Rc<dyn ValuePredicate>) -> Self {
        Self {
            store,
            sub,
            predicate,
        }
    }

    /// A filter from a plain function.
    pub fn with_fn(
        store: D,
        sub: Rc<dyn Shape<D>>,
        f: impl Fn(&Value) -> Result<bool, Box<dyn Error + Send + Sync>> + 'static,
    ) -> Self {
        struct FnPredicate<F>(F);
        impl<F> fmt::Display for FnPredicate<F> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("fn")
            }
        }
        impl<F: Fn(&Value) -> Result<bool, Box<dyn Error + Send + Sync>>> ValuePredicate
            for FnPredicate<F>
        {
            fn test(&self, v: &Value) -> Result<bool, Box<dyn Error + Send + Sync>> {
                (self.0)(v)
            }
        }
        Self::new(store, sub, Rc::new(FnPredicate(f)))
    }
}

/// Resolves `v` and applies the predicate, mapping failures to the right
/// error kinds.
fn test_ref<D: QueryableStore>(
    store: &D,
    predicate: &dyn ValuePredicate,
    v: &D::Ref,
) -> Result<bool, QueryEvaluationError> {
    let Some(value) = store.name_of(v).map_err(QueryEvaluationError::store)? else {
        return Ok(false);
    };
    predicate
        .test(&value)
        .map_err(QueryEvaluationError::predicate)
}

impl<D: QueryableStore> fmt::Display for ValueFilter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueFilter({})", self.predicate)
    }
}

impl<D: QueryableStore> Shape<D> for ValueFilter<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(FilterNext {
            store: self.store.clone(),
            sub: self.sub.iterate(),
            predicate: Rc::clone(&self.predicate),
            result: None,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(FilterContains {
            store: self.store.clone(),
            sub: self.sub.lookup(),
            predicate: Rc::clone(&self.predicate),
            result: None,
            err: None,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        Ok(Costs {
            next_cost: sub.next_cost,
            contains_cost: sub.contains_cost,
            size: Size::estimate(sub.size.value / 2),
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (
                Rc::new(Self {
                    store: self.store.clone(),
                    sub,
                    predicate: Rc::clone(&self.predicate),
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

struct FilterNext<D: QueryableStore> {
    store: D,
    sub: Box<dyn Scanner<D>>,
    predicate: Rc<dyn ValuePredicate>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for FilterNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.sub.next(ctx) {
            let Some(v) = self.sub.result() else {
                continue;
            };
            match test_ref(&self.store, self.predicate.as_ref(), &v) {
                Ok(true) => {
                    self.result = Some(v);
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    self.err = Some(e);
                    self.result = None;
                    return false;
                }
            }
        }
        self.err = self.sub.err();
        self.result = None;
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
        self.result.clone()
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

struct FilterContains<D: QueryableStore> {
    store: D,
    sub: Box<dyn Indexer<D>>,
    predicate: Rc<dyn ValuePredicate>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for FilterContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        // test the predicate first: it is usually cheaper than the probe
        match test_ref(&self.store, self.predicate.as_ref(), v) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                self.err = Some(e);
                return false;
            }
        }
        if self.sub.contains(ctx, v) {
            self.result = Some(v.clone());
            true
        } else {
            self.err = self.sub.err();
            false
        }
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
        self.result.clone()
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
