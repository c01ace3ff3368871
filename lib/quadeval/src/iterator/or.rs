use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Union of its children.
///
/// The standard variant concatenates every child's results, duplicates
/// included. The short-circuit variant replays only the first child that
/// yields anything, which expresses optional patterns.
pub struct Or<D: QueryableStore> {
    sub: Vec<Rc<dyn Shape<D>>>,
    short_circuit: bool,
}

impl<D: QueryableStore> Or<D> {
    pub fn new(sub: Vec<Rc<dyn Shape<D>>>) -> Self {
        Self {
            sub,
            short_circuit: false,
        }
    }

    pub fn new_short_circuit(sub: Vec<Rc<dyn Shape<D>>>) -> Self {
        Self {
            sub,
            short_circuit: true,
        }
    }
}

impl<D: QueryableStore> fmt::Display for Or<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.short_circuit {
            f.write_str("ShortCircuitOr")
        } else {
            f.write_str("Or")
        }
    }
}

impl<D: QueryableStore> Shape<D> for Or<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(OrNext {
            subs: self.sub.iter().map(|s| s.iterate()).collect(),
            cur: 0,
            emitted_from_cur: false,
            short_circuit: self.short_circuit,
            result: None,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(OrContains {
            subs: self.sub.iter().map(|s| s.lookup()).collect(),
            matched: None,
            result: None,
            err: None,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let stats = self
            .sub
            .iter()
            .map(|s| s.stats(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let next_cost = stats.iter().map(|c| c.next_cost).max().unwrap_or_default();
        let contains_cost = stats
            .iter()
            .map(|c| c.contains_cost)
            .fold(0i64, i64::saturating_add);
        let size = if self.short_circuit {
            // whichever non-empty child wins, it yields at most this many
            Size {
                value: stats.iter().map(|c| c.size.value).max().unwrap_or_default(),
                exact: !stats.is_empty() && stats.iter().all(|c| c.size.exact),
            }
        } else {
            Size::estimate(
                stats
                    .iter()
                    .map(|c| c.size.value)
                    .fold(0i64, i64::saturating_add),
            )
        };
        Ok(Costs {
            next_cost,
            contains_cost,
            size,
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let mut changed = false;
        let mut sub: Vec<Rc<dyn Shape<D>>> = Vec::with_capacity(self.sub.len());
        for s in &self.sub {
            let (s, child_changed) = Rc::clone(s).optimize(ctx);
            changed |= child_changed;
            if is_null(&s) {
                // Null is the union identity
                changed = true;
                continue;
            }
            match s.as_any().downcast_ref::<Self>() {
                Some(or) if !self.short_circuit && !or.short_circuit => {
                    sub.extend(or.sub.iter().map(Rc::clone));
                    changed = true;
                }
                _ => sub.push(s),
            }
        }
        if sub.is_empty() {
            return (Rc::new(Null), true);
        }
        if sub.len() == 1 {
            return (sub.remove(0), true);
        }
        if changed {
            (
                Rc::new(Self {
                    sub,
                    short_circuit: self.short_circuit,
                }),
                true,
            )
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

struct OrNext<D: QueryableStore> {
    subs: Vec<Box<dyn Scanner<D>>>,
    cur: usize,
    emitted_from_cur: bool,
    short_circuit: bool,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for OrNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        while self.cur < self.subs.len() {
            if self.subs[self.cur].next(ctx) {
                self.emitted_from_cur = true;
                self.result = self.subs[self.cur].result();
                return true;
            }
            if let Some(e) = self.subs[self.cur].err() {
                self.err = Some(e);
                self.result = None;
                return false;
            }
            if self.short_circuit && self.emitted_from_cur {
                break;
            }
            self.cur += 1;
            self.emitted_from_cur = false;
        }
        self.result = None;
        false
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        let Some(active) = self.subs.get_mut(self.cur) else {
            return false;
        };
        if active.next_path(ctx) {
            return true;
        }
        self.err = active.err();
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        if let Some(active) = self.subs.get(self.cur) {
            active.tag_results(dst);
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

struct OrContains<D: QueryableStore> {
    subs: Vec<Box<dyn Indexer<D>>>,
    matched: Option<usize>,
    result: Option<D::Ref>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for OrContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.matched = None;
        self.result = None;
        if self.err.is_some() {
            return false;
        }
        for (i, sub) in self.subs.iter_mut().enumerate() {
            if sub.contains(ctx, v) {
                self.matched = Some(i);
                self.result = Some(v.clone());
                return true;
            }
            if let Some(e) = sub.err() {
                self.err = Some(e);
                return false;
            }
        }
        false
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        let Some(matched) = self.matched else {
            return false;
        };
        if self.subs[matched].next_path(ctx) {
            return true;
        }
        self.err = self.subs[matched].err();
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        if let Some(matched) = self.matched {
            self.subs[matched].tag_results(dst);
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
