use crate::error::QueryEvaluationError;
use crate::iterator::fixed::Fixed;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use quadmodel::Direction;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Scan fanout assumed when the sub-iterator's size cannot be computed
/// exactly: how many quads link to one node, on average.
const SIZE_FANOUT: i64 = 20;

/// Expands a sub-iterator over nodes to the quads having those nodes at one
/// direction. The dual of `HasA`.
pub struct LinksTo<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    direction: Direction,
}

impl<D: QueryableStore> LinksTo<D> {
    pub fn new(store: D, sub: Rc<dyn Shape<D>>, direction: Direction) -> Self {
        Self {
            store,
            sub,
            direction,
        }
    }
}

impl<D: QueryableStore> fmt::Display for LinksTo<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinksTo({})", self.direction)
    }
}

impl<D: QueryableStore> Shape<D> for LinksTo<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(LinksToNext {
            store: self.store.clone(),
            sub: self.sub.iterate(),
            direction: self.direction,
            current: None,
            result: None,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(LinksToContains {
            store: self.store.clone(),
            sub: self.sub.lookup(),
            direction: self.direction,
            result: None,
            err: None,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        // A Fixed sub-iterator makes the size exact: sum the per-value quad
        // counts the store reports.
        let size = if let Some(fixed) = self.sub.as_any().downcast_ref::<Fixed<D>>() {
            let mut value = 0i64;
            let mut exact = true;
            for v in fixed.values() {
                let s = self
                    .store
                    .quad_iterator_size(self.direction, v)
                    .map_err(QueryEvaluationError::store)?;
                value = value.saturating_add(s.value);
                exact &= s.exact;
            }
            Size { value, exact }
        } else {
            Size::estimate(sub.size.value.saturating_mul(SIZE_FANOUT))
        };
        Ok(Costs {
            next_cost: 2 + sub.next_cost,
            contains_cost: 1 + sub.contains_cost,
            size,
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

struct LinksToNext<D: QueryableStore> {
    store: D,
    sub: Box<dyn Scanner<D>>,
    direction: Direction,
    /// Quads linking to the sub-iterator's current node.
    current: Option<Box<dyn Scanner<D>>>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for LinksToNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        loop {
            if let Some(current) = &mut self.current {
                if current.next(ctx) {
                    self.result = current.result();
                    return true;
                }
                if let Some(e) = current.err() {
                    self.err = Some(e);
                    self.result = None;
                    return false;
                }
            }
            if let Some(mut exhausted) = self.current.take() {
                let _ = exhausted.close();
            }
            if !self.sub.next(ctx) {
                self.err = self.sub.err();
                self.result = None;
                return false;
            }
            let Some(node) = self.sub.result() else {
                continue;
            };
            self.current = Some(
                self.store
                    .quad_iterator(self.direction, &node)
                    .iterate(),
            );
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
        let result = self.sub.close();
        if let Some(mut current) = self.current.take() {
            let current_result = current.close();
            if result.is_ok() {
                return current_result;
            }
        }
        result
    }
}

struct LinksToContains<D: QueryableStore> {
    store: D,
    sub: Box<dyn Indexer<D>>,
    direction: Direction,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for LinksToContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        let node = match self.store.quad_direction(v, self.direction) {
            Ok(Some(node)) => node,
            Ok(None) => return false,
            Err(e) => {
                self.err = Some(QueryEvaluationError::store(e));
                return false;
            }
        };
        if self.sub.contains(ctx, &node) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::QueryableStore;
    use quadmodel::Quad;

    fn store() -> MemoryStore {
        MemoryStore::from_iter([
            Quad::new("a", "status", "cool"),
            Quad::new("b", "status", "cool"),
            Quad::new("c", "status", "fun"),
        ])
    }

    #[test]
    fn scans_expand_nodes_to_quads() {
        let ctx = EvalContext::new();
        let store = store();
        let cool = store.internalize_value(&"cool".into()).unwrap();
        let links = LinksTo::new(
            store.clone(),
            Rc::new(Fixed::new([cool])),
            Direction::Object,
        );
        let mut scanner = links.iterate();
        let mut subjects = Vec::new();
        while scanner.next(&ctx) {
            let quad = scanner.result().unwrap();
            subjects.push(
                store
                    .quad_direction(&quad, Direction::Subject)
                    .unwrap()
                    .unwrap(),
            );
        }
        scanner.close().unwrap();
        assert_eq!(
            subjects,
            vec![
                store.internalize_value(&"a".into()).unwrap(),
                store.internalize_value(&"b".into()).unwrap(),
            ]
        );
    }

    #[test]
    fn probes_project_the_quad_first() {
        let ctx = EvalContext::new();
        let store = store();
        let fun = store.internalize_value(&"fun".into()).unwrap();
        let links = LinksTo::new(
            store.clone(),
            Rc::new(Fixed::new([fun.clone()])),
            Direction::Object,
        );
        let mut indexer = links.lookup();
        let mut all = store.quads_all_iterator().iterate();
        let mut matched = Vec::new();
        while all.next(&ctx) {
            let quad = all.result().unwrap();
            if indexer.contains(&ctx, &quad) {
                matched.push(quad);
            }
        }
        all.close().unwrap();
        indexer.close().unwrap();
        assert_eq!(matched.len(), 1);
        // probing a node reference is simply false
        assert!(!links.lookup().contains(&ctx, &fun));
    }

    #[test]
    fn fixed_sub_iterator_gives_exact_size() {
        let ctx = EvalContext::new();
        let store = store();
        let cool = store.internalize_value(&"cool".into()).unwrap();
        let links = LinksTo::new(
            store.clone(),
            Rc::new(Fixed::new([cool])),
            Direction::Object,
        );
        assert_eq!(links.stats(&ctx).unwrap().size, Size::exact(2));

        let estimated = LinksTo::new(store.clone(), store.nodes_all_iterator(), Direction::Object);
        let stats = estimated.stats(&ctx).unwrap();
        assert!(!stats.size.exact);
    }
}
