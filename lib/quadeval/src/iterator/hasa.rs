use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use quadmodel::Direction;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Probe fanout assumed when the store does not report one: how many quads
/// share a value at one direction, on average.
const PROBE_FANOUT: i64 = 30;

/// Projects a sub-iterator over quads to the nodes at one direction.
///
/// Scanning may emit the same node several times when distinct quads share
/// it; each duplicate is a distinct tag binding, which is what `next_path`
/// enumerates in probe mode.
pub struct HasA<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    direction: Direction,
}

impl<D: QueryableStore> HasA<D> {
    pub fn new(store: D, sub: Rc<dyn Shape<D>>, direction: Direction) -> Self {
        Self {
            store,
            sub,
            direction,
        }
    }
}

impl<D: QueryableStore> fmt::Display for HasA<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HasA({})", self.direction)
    }
}

impl<D: QueryableStore> Shape<D> for HasA<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(HasANext {
            store: self.store.clone(),
            sub: self.sub.iterate(),
            direction: self.direction,
            result: None,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(HasAContains {
            store: self.store.clone(),
            sub: self.sub.lookup(),
            direction: self.direction,
            pending: None,
            result: None,
            err: None,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        Ok(Costs {
            next_cost: 1 + sub.next_cost,
            contains_cost: PROBE_FANOUT.saturating_mul(sub.contains_cost.max(1)),
            size: Size::estimate(sub.size.value),
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (
                Rc::new(Self::new(self.store.clone(), sub, self.direction)),
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

struct HasANext<D: QueryableStore> {
    store: D,
    sub: Box<dyn Scanner<D>>,
    direction: Direction,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for HasANext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.sub.next(ctx) {
            let Some(quad) = self.sub.result() else {
                continue;
            };
            match self.store.quad_direction(&quad, self.direction) {
                Ok(Some(node)) => {
                    self.result = Some(node);
                    return true;
                }
                Ok(None) => {}
                Err(e) => {
                    self.err = Some(QueryEvaluationError::store(e));
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

struct HasAContains<D: QueryableStore> {
    store: D,
    sub: Box<dyn Indexer<D>>,
    direction: Direction,
    /// Remaining quads of the current probe's result set, for `next_path`.
    pending: Option<Box<dyn Scanner<D>>>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> HasAContains<D> {
    fn drop_pending(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            let _ = pending.close();
        }
    }

    /// Advances `pending` until a quad matches the sub-indexer.
    fn advance_pending(&mut self, ctx: &EvalContext) -> bool {
        let Some(pending) = &mut self.pending else {
            return false;
        };
        loop {
            if let Err(e) = ctx.check() {
                self.err = Some(e);
                return false;
            }
            if !pending.next(ctx) {
                self.err = pending.err();
                return false;
            }
            let Some(quad) = pending.result() else {
                continue;
            };
            if self.sub.contains(ctx, &quad) {
                return true;
            }
            if let Some(e) = self.sub.err() {
                self.err = Some(e);
                return false;
            }
        }
    }
}

impl<D: QueryableStore> Indexer<D> for HasAContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        self.drop_pending();
        self.pending = Some(self.store.quad_iterator(self.direction, v).iterate());
        if self.advance_pending(ctx) {
            self.result = Some(v.clone());
            true
        } else {
            self.drop_pending();
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
        if let Some(e) = self.sub.err() {
            self.err = Some(e);
            return false;
        }
        // the sub-iterator is out of paths for the current quad: move to the
        // next quad of the probe result set that still matches
        self.advance_pending(ctx)
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
        let result = self.sub.close();
        if let Some(mut pending) = self.pending.take() {
            let pending_result = pending.close();
            if result.is_ok() {
                return pending_result;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::QueryableStore;
    use quadmodel::{Quad, Value};

    fn store() -> MemoryStore {
        MemoryStore::from_iter([
            Quad::new("a", "status", "cool"),
            Quad::new("b", "status", "cool"),
            Quad::new("c", "status", "fun"),
        ])
    }

    fn subjects_of_all_quads(store: &MemoryStore) -> HasA<MemoryStore> {
        HasA::new(
            store.clone(),
            store.quads_all_iterator(),
            Direction::Subject,
        )
    }

    #[test]
    fn scans_project_quads_to_nodes() {
        let ctx = EvalContext::new();
        let store = store();
        let hasa = subjects_of_all_quads(&store);
        let mut scanner = hasa.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(store.name_of(&scanner.result().unwrap()).unwrap().unwrap());
        }
        assert_eq!(
            out,
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
        scanner.close().unwrap();
    }

    #[test]
    fn probes_check_the_quads_having_the_value() {
        let ctx = EvalContext::new();
        let store = store();
        let hasa = subjects_of_all_quads(&store);
        let mut indexer = hasa.lookup();
        let a = store.internalize_value(&"a".into()).unwrap();
        let cool = store.internalize_value(&"cool".into()).unwrap();
        assert!(indexer.contains(&ctx, &a));
        assert_eq!(indexer.result(), Some(a));
        // "cool" is a node but never a subject
        assert!(!indexer.contains(&ctx, &cool));
        indexer.close().unwrap();
    }

    #[test]
    fn null_sub_iterator_absorbs() {
        let ctx = EvalContext::new();
        let store = store();
        let hasa: Rc<HasA<MemoryStore>> = Rc::new(HasA::new(
            store,
            Rc::new(Null),
            Direction::Object,
        ));
        let (shape, changed) = hasa.optimize(&ctx);
        assert!(changed);
        assert!(shape.as_any().is::<Null>());
    }
}
