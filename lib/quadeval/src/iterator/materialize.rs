use crate::error::QueryEvaluationError;
use crate::iterator::fixed::Fixed;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, TagMap};
use crate::store::QueryableStore;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// How many results (paths included) a materialization may buffer before it
/// gives up and falls back to the sub-iterator.
pub const MATERIALIZE_LIMIT: usize = 1000;

/// Buffers a sub-iterator's scan so that replays and probes are cheap.
///
/// The cache belongs to the cursor, is allocated lazily on its first use and
/// is released on close. A value's multiplicity is preserved as multiple tag
/// snapshots rather than duplicate values. When the fill exceeds the limit
/// the buffer is discarded and the cursor becomes a plain pass-through.
pub struct Materialize<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
    limit: usize,
}

impl<D: QueryableStore> Materialize<D> {
    pub fn new(sub: Rc<dyn Shape<D>>) -> Self {
        Self {
            sub,
            limit: MATERIALIZE_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl<D: QueryableStore> fmt::Display for Materialize<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Materialize(limit={})", self.limit)
    }
}

impl<D: QueryableStore> Shape<D> for Materialize<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(MaterializeNext {
            sub: Rc::clone(&self.sub),
            limit: self.limit,
            state: NextState::Pending,
            err: None,
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(MaterializeContains {
            sub: Rc::clone(&self.sub),
            limit: self.limit,
            state: ContainsState::Pending,
            err: None,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        Ok(Costs {
            next_cost: 1,
            contains_cost: 1,
            size: sub.size,
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        // a Fixed is its own materialization
        if sub.as_any().is::<Fixed<D>>() {
            return (sub, true);
        }
        if changed {
            (
                Rc::new(Self {
                    sub,
                    limit: self.limit,
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

struct CacheEntry<D: QueryableStore> {
    value: D::Ref,
    paths: Vec<TagMap<D>>,
}

struct Buffer<D: QueryableStore> {
    entries: Vec<CacheEntry<D>>,
    index: FxHashMap<D::Ref, usize>,
    /// Error the sub-iterator hit after the buffered results; surfaced once
    /// the replay reaches the end of the buffer.
    tail_err: Option<QueryEvaluationError>,
}

enum FillOutcome<D: QueryableStore> {
    Cached(Buffer<D>),
    Overflow,
    Failed(QueryEvaluationError),
}

fn record<D: QueryableStore>(buffer: &mut Buffer<D>, v: D::Ref, snapshot: TagMap<D>) {
    match buffer.index.get(&v) {
        Some(&i) => buffer.entries[i].paths.push(snapshot),
        None => {
            buffer.index.insert(v.clone(), buffer.entries.len());
            buffer.entries.push(CacheEntry {
                value: v,
                paths: vec![snapshot],
            });
        }
    }
}

fn fill<D: QueryableStore>(
    sub: &Rc<dyn Shape<D>>,
    limit: usize,
    ctx: &EvalContext,
) -> FillOutcome<D> {
    let mut scanner = sub.iterate();
    let mut buffer = Buffer {
        entries: Vec::new(),
        index: FxHashMap::default(),
        tail_err: None,
    };
    let mut total = 0usize;
    loop {
        if let Err(e) = ctx.check() {
            let _ = scanner.close();
            return FillOutcome::Failed(e);
        }
        if !scanner.next(ctx) {
            buffer.tail_err = scanner.err();
            break;
        }
        let Some(v) = scanner.result() else {
            continue;
        };
        let mut snapshot = TagMap::<D>::default();
        scanner.tag_results(&mut snapshot);
        record(&mut buffer, v.clone(), snapshot);
        total += 1;
        if total > limit {
            debug!(limit, "materialize exceeded its limit, aborting the buffer");
            let _ = scanner.close();
            return FillOutcome::Overflow;
        }
        while scanner.next_path(ctx) {
            if let Err(e) = ctx.check() {
                let _ = scanner.close();
                return FillOutcome::Failed(e);
            }
            let mut snapshot = TagMap::<D>::default();
            scanner.tag_results(&mut snapshot);
            record(&mut buffer, v.clone(), snapshot);
            total += 1;
            if total > limit {
                debug!(limit, "materialize exceeded its limit, aborting the buffer");
                let _ = scanner.close();
                return FillOutcome::Overflow;
            }
        }
        if let Some(e) = scanner.err() {
            buffer.tail_err = Some(e);
            break;
        }
    }
    let _ = scanner.close();
    FillOutcome::Cached(buffer)
}

enum NextState<D: QueryableStore> {
    Pending,
    Cached {
        buffer: Buffer<D>,
        pos: Option<usize>,
        path: usize,
    },
    Passthrough(Box<dyn Scanner<D>>),
}

struct MaterializeNext<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
    limit: usize,
    state: NextState<D>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for MaterializeNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        loop {
            match &mut self.state {
                NextState::Pending => match fill(&self.sub, self.limit, ctx) {
                    FillOutcome::Cached(buffer) => {
                        self.state = NextState::Cached {
                            buffer,
                            pos: None,
                            path: 0,
                        };
                    }
                    FillOutcome::Overflow => {
                        self.state = NextState::Passthrough(self.sub.iterate());
                    }
                    FillOutcome::Failed(e) => {
                        self.err = Some(e);
                        return false;
                    }
                },
                NextState::Cached { buffer, pos, path } => {
                    let next = pos.map_or(0, |p| p + 1);
                    if next < buffer.entries.len() {
                        *pos = Some(next);
                        *path = 0;
                        return true;
                    }
                    if let Some(e) = buffer.tail_err.take() {
                        self.err = Some(e);
                    }
                    return false;
                }
                NextState::Passthrough(inner) => {
                    if inner.next(ctx) {
                        return true;
                    }
                    self.err = inner.err();
                    return false;
                }
            }
        }
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        match &mut self.state {
            NextState::Cached {
                buffer,
                pos: Some(pos),
                path,
            } => {
                if *path + 1 < buffer.entries[*pos].paths.len() {
                    *path += 1;
                    true
                } else {
                    false
                }
            }
            NextState::Passthrough(inner) => {
                if inner.next_path(ctx) {
                    return true;
                }
                self.err = inner.err();
                false
            }
            _ => false,
        }
    }

    fn result(&self) -> Option<D::Ref> {
        match &self.state {
            NextState::Cached {
                buffer,
                pos: Some(pos),
                ..
            } => Some(buffer.entries[*pos].value.clone()),
            NextState::Passthrough(inner) => inner.result(),
            _ => None,
        }
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        match &self.state {
            NextState::Cached {
                buffer,
                pos: Some(pos),
                path,
            } => {
                for (tag, value) in &buffer.entries[*pos].paths[*path] {
                    dst.insert(tag.clone(), value.clone());
                }
            }
            NextState::Passthrough(inner) => inner.tag_results(dst),
            _ => {}
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
        match std::mem::replace(&mut self.state, NextState::Pending) {
            NextState::Passthrough(mut inner) => inner.close(),
            _ => Ok(()),
        }
    }
}

enum ContainsState<D: QueryableStore> {
    Pending,
    Cached {
        buffer: Buffer<D>,
        cur: Option<usize>,
        path: usize,
    },
    Passthrough(Box<dyn Indexer<D>>),
}

struct MaterializeContains<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
    limit: usize,
    state: ContainsState<D>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for MaterializeContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        if self.err.is_some() {
            return false;
        }
        loop {
            match &mut self.state {
                ContainsState::Pending => match fill(&self.sub, self.limit, ctx) {
                    FillOutcome::Cached(buffer) => {
                        if buffer.tail_err.is_some() {
                            // an incomplete buffer cannot prove absence
                            self.state = ContainsState::Passthrough(self.sub.lookup());
                        } else {
                            self.state = ContainsState::Cached {
                                buffer,
                                cur: None,
                                path: 0,
                            };
                        }
                    }
                    FillOutcome::Overflow => {
                        self.state = ContainsState::Passthrough(self.sub.lookup());
                    }
                    FillOutcome::Failed(e) => {
                        self.err = Some(e);
                        return false;
                    }
                },
                ContainsState::Cached { buffer, cur, path } => {
                    return match buffer.index.get(v) {
                        Some(&i) => {
                            *cur = Some(i);
                            *path = 0;
                            true
                        }
                        None => {
                            *cur = None;
                            false
                        }
                    };
                }
                ContainsState::Passthrough(inner) => {
                    let found = inner.contains(ctx, v);
                    if !found {
                        self.err = inner.err();
                    }
                    return found;
                }
            }
        }
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        match &mut self.state {
            ContainsState::Cached {
                buffer,
                cur: Some(cur),
                path,
            } => {
                if *path + 1 < buffer.entries[*cur].paths.len() {
                    *path += 1;
                    true
                } else {
                    false
                }
            }
            ContainsState::Passthrough(inner) => {
                if inner.next_path(ctx) {
                    return true;
                }
                self.err = inner.err();
                false
            }
            _ => false,
        }
    }

    fn result(&self) -> Option<D::Ref> {
        match &self.state {
            ContainsState::Cached {
                buffer,
                cur: Some(cur),
                ..
            } => Some(buffer.entries[*cur].value.clone()),
            ContainsState::Passthrough(inner) => inner.result(),
            _ => None,
        }
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        match &self.state {
            ContainsState::Cached {
                buffer,
                cur: Some(cur),
                path,
            } => {
                for (tag, value) in &buffer.entries[*cur].paths[*path] {
                    dst.insert(tag.clone(), value.clone());
                }
            }
            ContainsState::Passthrough(inner) => inner.tag_results(dst),
            _ => {}
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
        match std::mem::replace(&mut self.state, ContainsState::Pending) {
            ContainsState::Passthrough(mut inner) => inner.close(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::null::ErrorShape;
    use crate::iterator::or::Or;
    use crate::store::{MemRef, MemoryStore};
    use quadmodel::Value;

    fn refs(values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| MemRef::Node(Rc::new(Value::Int(i))))
            .collect()
    }

    fn scan(shape: &dyn Shape<MemoryStore>) -> (Vec<MemRef>, Option<QueryEvaluationError>) {
        let ctx = EvalContext::new();
        let mut scanner = shape.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        let err = scanner.err();
        scanner.close().unwrap();
        (out, err)
    }

    #[test]
    fn replays_the_sub_iterator() {
        let materialize: Materialize<MemoryStore> =
            Materialize::new(Rc::new(Fixed::new(refs([1, 2, 3]))));
        let (out, err) = scan(&materialize);
        assert_eq!(out, refs([1, 2, 3]));
        assert!(err.is_none());
    }

    #[test]
    fn duplicates_become_paths_not_values() {
        let ctx = EvalContext::new();
        let materialize: Materialize<MemoryStore> = Materialize::new(Rc::new(Or::new(vec![
            Rc::new(Fixed::new(refs([7]))),
            Rc::new(Fixed::new(refs([7]))),
        ])));
        let mut scanner = materialize.iterate();
        assert!(scanner.next(&ctx));
        // the second occurrence is an alternative path of the same value
        assert!(scanner.next_path(&ctx));
        assert!(!scanner.next_path(&ctx));
        assert!(!scanner.next(&ctx));
        scanner.close().unwrap();
    }

    #[test]
    fn probes_hit_the_cache() {
        let ctx = EvalContext::new();
        let materialize: Materialize<MemoryStore> =
            Materialize::new(Rc::new(Fixed::new(refs([1, 2]))));
        let mut indexer = materialize.lookup();
        assert!(indexer.contains(&ctx, &refs([2])[0]));
        assert_eq!(indexer.result(), Some(refs([2])[0].clone()));
        assert!(!indexer.contains(&ctx, &refs([3])[0]));
        indexer.close().unwrap();
    }

    #[test]
    fn overflow_aborts_to_pass_through() {
        let materialize: Materialize<MemoryStore> =
            Materialize::new(Rc::new(Fixed::new(refs(0..50)))).with_limit(10);
        // behavior is unchanged, only the buffering is gone
        let (out, err) = scan(&materialize);
        assert_eq!(out, refs(0..50));
        assert!(err.is_none());
    }

    #[test]
    fn fill_errors_surface_after_the_buffered_results() {
        let materialize: Materialize<MemoryStore> = Materialize::new(Rc::new(Or::new(vec![
            Rc::new(Fixed::new(refs([1, 2]))),
            Rc::new(ErrorShape::new(QueryEvaluationError::Plan("e".into()))),
        ])));
        let (out, err) = scan(&materialize);
        assert_eq!(out, refs([1, 2]));
        assert!(matches!(err, Some(QueryEvaluationError::Plan(m)) if m == "e"));
    }

    #[test]
    fn fixed_needs_no_materialization() {
        let ctx = EvalContext::new();
        let materialize: Rc<Materialize<MemoryStore>> =
            Rc::new(Materialize::new(Rc::new(Fixed::new(refs([1])))));
        let (shape, changed) = materialize.optimize(&ctx);
        assert!(changed);
        assert!(shape.as_any().is::<Fixed<MemoryStore>>());
    }
}
