use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Replays the sub-iterator ordered by the lexicographic form of each
/// result's resolved value.
///
/// The whole sub-iterator is materialized on the first `next`. References
/// the store cannot resolve sort first, keyed by the empty string. Probing
/// delegates to the sub-iterator since order is irrelevant to membership.
pub struct Sort<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
}

impl<D: QueryableStore> Sort<D> {
    pub fn new(store: D, sub: Rc<dyn Shape<D>>) -> Self {
        Self { store, sub }
    }
}

impl<D: QueryableStore> fmt::Display for Sort<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sort")
    }
}

impl<D: QueryableStore> Shape<D> for Sort<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(SortNext {
            store: self.store.clone(),
            sub: Rc::clone(&self.sub),
            entries: None,
            pos: None,
            path: 0,
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
            size: sub.size,
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (Rc::new(Self::new(self.store.clone(), sub)), true)
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

struct SortEntry<D: QueryableStore> {
    value: D::Ref,
    key: String,
    paths: Vec<TagMap<D>>,
}

struct SortNext<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    entries: Option<Vec<SortEntry<D>>>,
    pos: Option<usize>,
    path: usize,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> SortNext<D> {
    fn fill(&mut self, ctx: &EvalContext) -> Result<Vec<SortEntry<D>>, QueryEvaluationError> {
        let mut scanner = self.sub.iterate();
        let mut entries = Vec::new();
        loop {
            if let Err(e) = ctx.check() {
                let _ = scanner.close();
                return Err(e);
            }
            if !scanner.next(ctx) {
                break;
            }
            let Some(value) = scanner.result() else {
                continue;
            };
            let key = self
                .store
                .name_of(&value)
                .map_err(QueryEvaluationError::store)?
                .map(|v| v.to_string())
                .unwrap_or_default();
            let mut paths = Vec::new();
            loop {
                let mut snapshot = TagMap::<D>::default();
                scanner.tag_results(&mut snapshot);
                paths.push(snapshot);
                if !scanner.next_path(ctx) {
                    break;
                }
            }
            entries.push(SortEntry { value, key, paths });
        }
        let err = scanner.err();
        let close_result = scanner.close();
        if let Some(e) = err {
            return Err(e);
        }
        close_result?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

impl<D: QueryableStore> Scanner<D> for SortNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        if self.entries.is_none() {
            match self.fill(ctx) {
                Ok(entries) => self.entries = Some(entries),
                Err(e) => {
                    self.err = Some(e);
                    return false;
                }
            }
        }
        let Some(entries) = &self.entries else {
            return false;
        };
        let next = self.pos.map_or(0, |p| p + 1);
        if next < entries.len() {
            self.pos = Some(next);
            self.path = 0;
            true
        } else {
            false
        }
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        match (&self.entries, self.pos) {
            (Some(entries), Some(pos)) => {
                if self.path + 1 < entries[pos].paths.len() {
                    self.path += 1;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn result(&self) -> Option<D::Ref> {
        match (&self.entries, self.pos) {
            (Some(entries), Some(pos)) => Some(entries[pos].value.clone()),
            _ => None,
        }
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        if let (Some(entries), Some(pos)) = (&self.entries, self.pos) {
            for (tag, value) in &entries[pos].paths[self.path] {
                dst.insert(tag.clone(), value.clone());
            }
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
        self.entries = None;
        Ok(())
    }
}
