use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Set complement: everything in `universe` that the forbidden set does not
/// contain.
///
/// The universe is always explicit; callers that want "all nodes" pass the
/// store's universe iterator themselves.
pub struct Not<D: QueryableStore> {
    forbidden: Rc<dyn Shape<D>>,
    universe: Rc<dyn Shape<D>>,
}

impl<D: QueryableStore> Not<D> {
    pub fn new(forbidden: Rc<dyn Shape<D>>, universe: Rc<dyn Shape<D>>) -> Self {
        Self {
            forbidden,
            universe,
        }
    }
}

impl<D: QueryableStore> fmt::Display for Not<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Not")
    }
}

impl<D: QueryableStore> Shape<D> for Not<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(NotNext {
            universe: self.universe.iterate(),
            forbidden: self.forbidden.lookup(),
            result: None,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(NotContains {
            forbidden: self.forbidden.lookup(),
            result: None,
            err: None,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let universe = self.universe.stats(ctx)?;
        let forbidden = self.forbidden.stats(ctx)?;
        Ok(Costs {
            next_cost: universe.next_cost.saturating_add(forbidden.contains_cost),
            contains_cost: 1 + forbidden.contains_cost,
            // the complement's size is opaque; all we have is the universe
            size: Size::estimate(universe.size.value),
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (forbidden, forbidden_changed) = self.forbidden.clone().optimize(ctx);
        let (universe, universe_changed) = self.universe.clone().optimize(ctx);
        if is_null(&universe) {
            return (Rc::new(Null), true);
        }
        if is_null(&forbidden) {
            // the complement of nothing is the whole universe
            return (universe, true);
        }
        if forbidden_changed || universe_changed {
            (Rc::new(Self::new(forbidden, universe)), true)
        } else {
            (self, false)
        }
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<D>>> {
        vec![Rc::clone(&self.forbidden), Rc::clone(&self.universe)]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct NotNext<D: QueryableStore> {
    universe: Box<dyn Scanner<D>>,
    forbidden: Box<dyn Indexer<D>>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for NotNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.universe.next(ctx) {
            let Some(v) = self.universe.result() else {
                continue;
            };
            if !self.forbidden.contains(ctx, &v) {
                if let Some(e) = self.forbidden.err() {
                    self.err = Some(e);
                    self.result = None;
                    return false;
                }
                self.result = Some(v);
                return true;
            }
        }
        self.err = self.universe.err();
        self.result = None;
        false
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.universe.next_path(ctx) {
            return true;
        }
        self.err = self.universe.err();
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        self.universe.tag_results(dst);
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.universe.close();
        let forbidden_result = self.forbidden.close();
        if result.is_ok() {
            forbidden_result
        } else {
            result
        }
    }
}

struct NotContains<D: QueryableStore> {
    forbidden: Box<dyn Indexer<D>>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for NotContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        // universe membership is assumed for externally supplied probes
        if self.forbidden.contains(ctx, v) {
            false
        } else {
            if let Some(e) = self.forbidden.err() {
                self.err = Some(e);
                return false;
            }
            self.result = Some(v.clone());
            true
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
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.forbidden.close()
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
    fn complements_against_the_universe() {
        let ctx = EvalContext::new();
        let not: Not<MemoryStore> = Not::new(
            Rc::new(Fixed::new(refs([2, 4]))),
            Rc::new(Fixed::new(refs([1, 2, 3, 4, 5]))),
        );
        let mut scanner = not.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(out, refs([1, 3, 5]));
    }

    #[test]
    fn probes_invert_the_forbidden_set() {
        let ctx = EvalContext::new();
        let not: Not<MemoryStore> = Not::new(
            Rc::new(Fixed::new(refs([2]))),
            Rc::new(Fixed::new(refs([1, 2, 3]))),
        );
        let mut indexer = not.lookup();
        assert!(indexer.contains(&ctx, &refs([1])[0]));
        assert!(!indexer.contains(&ctx, &refs([2])[0]));
        // outside the universe, but universe membership is the caller's duty
        assert!(indexer.contains(&ctx, &refs([9])[0]));
        indexer.close().unwrap();
    }

    #[test]
    fn null_forbidden_set_becomes_the_universe() {
        let ctx = EvalContext::new();
        let universe: Rc<dyn Shape<MemoryStore>> = Rc::new(Fixed::new(refs([1, 2])));
        let not: Rc<Not<MemoryStore>> = Rc::new(Not::new(Rc::new(Null), universe));
        let (shape, changed) = not.optimize(&ctx);
        assert!(changed);
        assert!(shape.as_any().is::<Fixed<MemoryStore>>());
    }
}
