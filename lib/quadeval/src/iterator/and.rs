use crate::error::QueryEvaluationError;
use crate::iterator::fixed::Fixed;
use crate::iterator::null::{error_indexer, error_scanner, is_null, Null};
use crate::iterator::sort::Sort;
use crate::shape::{plan_description, Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use rustc_hash::FxHashSet;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use tracing::{trace, warn};

/// Multi-way intersection.
///
/// On instantiation one child is selected as the primary scanner and the
/// others are probed, cheapest rejecter first, for every primary result.
pub struct And<D: QueryableStore> {
    sub: Vec<Rc<dyn Shape<D>>>,
}

impl<D: QueryableStore> And<D> {
    /// Builds an intersection of `sub`, which must not be empty.
    pub fn new(sub: Vec<Rc<dyn Shape<D>>>) -> Result<Self, QueryEvaluationError> {
        if sub.is_empty() {
            return Err(QueryEvaluationError::Plan(
                "an intersection requires at least one sub-iterator".into(),
            ));
        }
        Ok(Self { sub })
    }

    /// Picks the primary child and orders the secondaries.
    ///
    /// Children are ranked by (size, next cost), ties broken by construction
    /// order; the best rank scans, everything else probes in ascending
    /// contains cost. A `Sort` child must stay on the scanned side to keep
    /// its ordering observable.
    fn plan(&self, ctx: &EvalContext) -> Result<(usize, Vec<usize>), QueryEvaluationError> {
        let stats = self
            .sub
            .iter()
            .map(|s| s.stats(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let mut primary = (0..self.sub.len())
            .min_by_key(|&i| (stats[i].size.value, stats[i].next_cost))
            .unwrap_or(0);
        if let Some(sorted) = self.sub.iter().position(|s| s.as_any().is::<Sort<D>>()) {
            if sorted != primary {
                warn!(
                    child = %self.sub[sorted],
                    "keeping a Sort child on the primary side of an intersection"
                );
                primary = sorted;
            }
        }
        let mut secondaries: Vec<usize> = (0..self.sub.len()).filter(|&i| i != primary).collect();
        secondaries.sort_by_key(|&i| stats[i].contains_cost);
        trace!(primary = %self.sub[primary], "intersection primary chosen");
        Ok((primary, secondaries))
    }
}

impl<D: QueryableStore> fmt::Display for And<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("And")
    }
}

impl<D: QueryableStore> Shape<D> for And<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        match self.plan(&EvalContext::new()) {
            Ok((primary, secondaries)) => Box::new(AndNext {
                primary: self.sub[primary].iterate(),
                secondaries: secondaries.iter().map(|&i| self.sub[i].lookup()).collect(),
                result: None,
                err: None,
                closed: false,
            }),
            Err(e) => error_scanner(e),
        }
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        match self.plan(&EvalContext::new()) {
            Ok((primary, secondaries)) => {
                // the primary gets a fresh indexer too; it probes first since
                // it has the smallest result set
                let mut subs = Vec::with_capacity(self.sub.len());
                subs.push(self.sub[primary].lookup());
                subs.extend(secondaries.iter().map(|&i| self.sub[i].lookup()));
                Box::new(AndContains {
                    subs,
                    result: None,
                    err: None,
                    closed: false,
                })
            }
            Err(e) => error_indexer(e),
        }
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let stats = self
            .sub
            .iter()
            .map(|s| s.stats(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let smallest = stats
            .iter()
            .map(|c| c.size.value)
            .min()
            .unwrap_or_default();
        let next_cost = stats
            .iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { c.next_cost } else { c.contains_cost })
            .fold(0i64, i64::saturating_add);
        let contains_cost = stats
            .iter()
            .map(|c| c.contains_cost)
            .fold(0i64, i64::saturating_add);
        Ok(Costs {
            next_cost,
            contains_cost,
            size: if self.sub.len() == 1 {
                stats[0].size
            } else {
                Size::estimate(smallest)
            },
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let mut changed = false;
        // optimize children, absorb Null and flatten nested intersections
        let mut sub: Vec<Rc<dyn Shape<D>>> = Vec::with_capacity(self.sub.len());
        for s in &self.sub {
            let (s, child_changed) = Rc::clone(s).optimize(ctx);
            changed |= child_changed;
            if is_null(&s) {
                return (Rc::new(Null), true);
            }
            if let Some(and) = s.as_any().downcast_ref::<Self>() {
                sub.extend(and.sub.iter().map(Rc::clone));
                changed = true;
            } else {
                sub.push(s);
            }
        }
        // constant-fold multiple Fixed children into their intersection
        let fixed_positions: Vec<usize> = sub
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_any().is::<Fixed<D>>())
            .map(|(i, _)| i)
            .collect();
        if fixed_positions.len() > 1 {
            let mut values = Vec::new();
            if let Some(first) = sub[fixed_positions[0]].as_any().downcast_ref::<Fixed<D>>() {
                values = first.values().to_vec();
            }
            for &i in &fixed_positions[1..] {
                if let Some(other) = sub[i].as_any().downcast_ref::<Fixed<D>>() {
                    values.retain(|v| other.values().contains(v));
                }
            }
            if values.is_empty() {
                return (Rc::new(Null), true);
            }
            for &i in fixed_positions.iter().skip(1).rev() {
                sub.remove(i);
            }
            sub[fixed_positions[0]] = Rc::new(Fixed::new(values));
            changed = true;
        }
        // stable de-dup of structurally identical children
        let mut seen = FxHashSet::default();
        let before = sub.len();
        sub.retain(|s| seen.insert(plan_description(s.as_ref())));
        changed |= sub.len() != before;
        if sub.len() == 1 {
            return (sub.remove(0), true);
        }
        // keep the cheapest children first so the scan order is predictable
        if let Ok(stats) = sub
            .iter()
            .map(|s| s.stats(ctx))
            .collect::<Result<Vec<_>, _>>()
        {
            let mut order: Vec<usize> = (0..sub.len()).collect();
            order.sort_by_key(|&i| (stats[i].size.value, stats[i].next_cost));
            if order.iter().enumerate().any(|(pos, &i)| pos != i) {
                let reordered = order.into_iter().map(|i| Rc::clone(&sub[i])).collect();
                sub = reordered;
                changed = true;
            }
        }
        if changed {
            (Rc::new(Self { sub }), true)
        } else {
            (self, false)
        }
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<D>>> {
        self.sub.iter().map(Rc::clone).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AndNext<D: QueryableStore> {
    primary: Box<dyn Scanner<D>>,
    secondaries: Vec<Box<dyn Indexer<D>>>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for AndNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        'primary: while self.primary.next(ctx) {
            let Some(v) = self.primary.result() else {
                continue;
            };
            for secondary in &mut self.secondaries {
                if !secondary.contains(ctx, &v) {
                    if let Some(e) = secondary.err() {
                        self.err = Some(e);
                        self.result = None;
                        return false;
                    }
                    continue 'primary;
                }
            }
            self.result = Some(v);
            return true;
        }
        self.err = self.primary.err();
        self.result = None;
        false
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.primary.next_path(ctx) {
            return true;
        }
        if let Some(e) = self.primary.err() {
            self.err = Some(e);
            return false;
        }
        for secondary in &mut self.secondaries {
            if secondary.next_path(ctx) {
                return true;
            }
            if let Some(e) = secondary.err() {
                self.err = Some(e);
                return false;
            }
        }
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        self.primary.tag_results(dst);
        for secondary in &self.secondaries {
            secondary.tag_results(dst);
        }
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = self.primary.close();
        for secondary in &mut self.secondaries {
            let r = secondary.close();
            if result.is_ok() {
                result = r;
            }
        }
        result
    }
}

struct AndContains<D: QueryableStore> {
    subs: Vec<Box<dyn Indexer<D>>>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for AndContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        for sub in &mut self.subs {
            if !sub.contains(ctx, v) {
                self.err = sub.err();
                return false;
            }
        }
        self.result = Some(v.clone());
        true
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        for sub in &mut self.subs {
            if sub.next_path(ctx) {
                return true;
            }
            if let Some(e) = sub.err() {
                self.err = Some(e);
                return false;
            }
        }
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        for sub in &self.subs {
            sub.tag_results(dst);
        }
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut result = Ok(());
        for sub in &mut self.subs {
            let r = sub.close();
            if result.is_ok() {
                result = r;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemRef, MemoryStore};
    use crate::QueryableStore;
    use quadmodel::{Quad, Value};

    fn refs(values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| MemRef::Node(Rc::new(Value::Int(i))))
            .collect()
    }

    #[test]
    fn rejects_empty_construction() {
        assert!(matches!(
            And::<MemoryStore>::new(Vec::new()),
            Err(QueryEvaluationError::Plan(_))
        ));
    }

    #[test]
    fn scans_the_intersection() {
        let ctx = EvalContext::new();
        let and: And<MemoryStore> = And::new(vec![
            Rc::new(Fixed::new(refs([1, 2, 3, 4]))),
            Rc::new(Fixed::new(refs([2, 4, 5]))),
        ])
        .unwrap();
        let mut scanner = and.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(out, refs([2, 4]));
    }

    #[test]
    fn smallest_child_becomes_primary() {
        let store = MemoryStore::from_iter(
            (0..100).map(|i| Quad::new(Value::Int(i), "follows", Value::Int(i + 1))),
        );
        let ctx = EvalContext::new();
        let and: And<MemoryStore> = And::new(vec![
            store.nodes_all_iterator(),
            Rc::new(Fixed::new(refs([7, 8, 9]))),
        ])
        .unwrap();
        let (primary, secondaries) = and.plan(&ctx).unwrap();
        assert_eq!(primary, 1);
        assert_eq!(secondaries, vec![0]);
    }

    #[test]
    fn null_child_absorbs_everything() {
        let ctx = EvalContext::new();
        let and: Rc<And<MemoryStore>> = Rc::new(
            And::new(vec![
                Rc::new(Fixed::new(refs([1, 2]))),
                Rc::new(Null),
            ])
            .unwrap(),
        );
        let (shape, changed) = and.optimize(&ctx);
        assert!(changed);
        assert!(shape.as_any().is::<Null>());
    }

    #[test]
    fn nested_intersections_flatten_and_fold() {
        let ctx = EvalContext::new();
        let inner: Rc<dyn Shape<MemoryStore>> =
            Rc::new(And::new(vec![Rc::new(Fixed::new(refs([2, 3, 4])))]).unwrap());
        let and: Rc<And<MemoryStore>> = Rc::new(
            And::new(vec![Rc::new(Fixed::new(refs([1, 2, 3]))), inner]).unwrap(),
        );
        let (shape, changed) = and.optimize(&ctx);
        assert!(changed);
        // And(Fixed([1,2,3]), And(Fixed([2,3,4]))) folds to Fixed([2,3])
        let fixed = shape.as_any().downcast_ref::<Fixed<MemoryStore>>().unwrap();
        assert_eq!(fixed.values(), refs([2, 3]));
    }

    #[test]
    fn structurally_identical_children_dedup() {
        let ctx = EvalContext::new();
        let store = MemoryStore::from_iter([Quad::new("a", "b", "c")]);
        let and: Rc<And<MemoryStore>> = Rc::new(
            And::new(vec![
                store.nodes_all_iterator(),
                store.nodes_all_iterator(),
            ])
            .unwrap(),
        );
        let (shape, changed) = and.optimize(&ctx);
        assert!(changed);
        // both children were AllNodes, so the And collapses to one of them
        assert!(shape.as_any().downcast_ref::<And<MemoryStore>>().is_none());
    }

    #[test]
    fn optimize_is_idempotent() {
        let ctx = EvalContext::new();
        let and: Rc<And<MemoryStore>> = Rc::new(
            And::new(vec![
                Rc::new(Fixed::new(refs([1, 2, 3]))),
                Rc::new(Fixed::new(refs([2, 3]))),
            ])
            .unwrap(),
        );
        let (once, changed) = and.optimize(&ctx);
        assert!(changed);
        let description = plan_description(once.as_ref());
        let (twice, changed_again) = once.optimize(&ctx);
        assert!(!changed_again);
        assert_eq!(plan_description(twice.as_ref()), description);
    }
}
