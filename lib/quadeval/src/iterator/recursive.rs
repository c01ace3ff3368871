use crate::error::QueryEvaluationError;
use crate::iterator::fixed::Fixed;
use crate::iterator::null::{is_null, Null};
use crate::iterator::save::Save;
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use quadmodel::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Default bound on the number of morphism applications.
pub const MAX_RECURSIVE_DEPTH: usize = 50;

/// Reserved tag carried by the per-level frontier; stripped from
/// user-visible tag maps before results are emitted.
pub const BASE_RECURSIVE_TAG: &str = "__base_recursive";

/// A function from a set of nodes to their successors, applied once per
/// recursion level.
pub type Morphism<D> = Rc<dyn Fn(Rc<dyn Shape<D>>) -> Rc<dyn Shape<D>>>;

/// Breadth-first fixed point of a morphism over the sub-iterator's results.
///
/// The seeds themselves are not emitted; every emitted value is the first
/// reach at some depth in `1..=max_depth`. Optional depth tags bind the
/// numeric depth of the current result.
pub struct Recursive<D: QueryableStore> {
    store: D,
    sub: Rc<dyn Shape<D>>,
    morphism: Morphism<D>,
    max_depth: usize,
    depth_tags: Vec<String>,
}

impl<D: QueryableStore> Recursive<D> {
    pub fn new(store: D, sub: Rc<dyn Shape<D>>, morphism: Morphism<D>) -> Self {
        Self {
            store,
            sub,
            morphism,
            max_depth: MAX_RECURSIVE_DEPTH,
            depth_tags: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Binds `tag` to the depth at which each result was first reached.
    pub fn with_depth_tag(mut self, tag: impl Into<String>) -> Self {
        self.depth_tags.push(tag.into());
        self
    }
}

impl<D: QueryableStore> fmt::Display for Recursive<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Recursive(max_depth={})", self.max_depth)
    }
}

impl<D: QueryableStore> Shape<D> for Recursive<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(self.scan_state())
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(RecursiveContains {
            inner: self.scan_state(),
            emitted: FxHashMap::default(),
            cur: None,
            path: 0,
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let sub = self.sub.stats(ctx)?;
        // the reachable set can explode combinatorially; this estimate is
        // deliberately enormous so intersections scan something else
        let size = sub.size.value.saturating_mul(20).saturating_pow(5);
        Ok(Costs {
            next_cost: sub.next_cost,
            contains_cost: sub
                .next_cost
                .saturating_add(sub.size.value)
                .saturating_mul(self.max_depth as i64),
            size: Size::estimate(size),
        })
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            // no seeds, nothing to reach
            return (Rc::new(Null), true);
        }
        if changed {
            (
                Rc::new(Self {
                    store: self.store.clone(),
                    sub,
                    morphism: Rc::clone(&self.morphism),
                    max_depth: self.max_depth,
                    depth_tags: self.depth_tags.clone(),
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

impl<D: QueryableStore> Recursive<D> {
    fn scan_state(&self) -> RecursiveNext<D> {
        RecursiveNext {
            store: self.store.clone(),
            morphism: Rc::clone(&self.morphism),
            max_depth: self.max_depth,
            depth_tags: self.depth_tags.clone(),
            phase: Phase::Seeding(self.sub.iterate()),
            seen: FxHashSet::default(),
            frontier: Vec::new(),
            current: None,
            err: None,
            closed: false,
        }
    }
}

enum Phase<D: QueryableStore> {
    /// Draining the sub-iterator into the depth-0 frontier.
    Seeding(Box<dyn Scanner<D>>),
    /// Scanning the morphism applied to the previous frontier.
    Advancing {
        depth: usize,
        scanner: Box<dyn Scanner<D>>,
        depth_ref: Option<D::Ref>,
    },
    Done,
}

struct CurrentResult<D: QueryableStore> {
    value: D::Ref,
    paths: Vec<TagMap<D>>,
    path: usize,
}

struct RecursiveNext<D: QueryableStore> {
    store: D,
    morphism: Morphism<D>,
    max_depth: usize,
    depth_tags: Vec<String>,
    phase: Phase<D>,
    seen: FxHashSet<D::Ref>,
    /// Values discovered at the depth currently being scanned.
    frontier: Vec<D::Ref>,
    current: Option<CurrentResult<D>>,
    err: Option<QueryEvaluationError>,
    closed: bool,
}

impl<D: QueryableStore> RecursiveNext<D> {
    /// Builds the next-level scanner from the current frontier, or moves to
    /// `Done` when there is nothing left to expand.
    fn advance_level(&mut self, depth: usize) -> Result<(), QueryEvaluationError> {
        if self.frontier.is_empty() || depth > self.max_depth {
            self.phase = Phase::Done;
            return Ok(());
        }
        let base: Rc<dyn Shape<D>> = Rc::new(Save::new(
            Rc::new(Fixed::new(self.frontier.drain(..))),
            BASE_RECURSIVE_TAG,
        ));
        let depth_ref = if self.depth_tags.is_empty() {
            None
        } else {
            Some(
                self.store
                    .internalize_value(&Value::Int(depth as i64))
                    .map_err(QueryEvaluationError::store)?,
            )
        };
        self.phase = Phase::Advancing {
            depth,
            scanner: (self.morphism)(base).iterate(),
            depth_ref,
        };
        Ok(())
    }

    /// Collects the tag snapshots of the scanner's current result, stripping
    /// the reserved frontier tag and binding the depth tags.
    fn collect_paths(
        scanner: &mut Box<dyn Scanner<D>>,
        ctx: &EvalContext,
        depth_tags: &[String],
        depth_ref: Option<&D::Ref>,
    ) -> Vec<TagMap<D>> {
        let mut paths = Vec::new();
        loop {
            let mut snapshot = TagMap::<D>::default();
            scanner.tag_results(&mut snapshot);
            snapshot.remove(BASE_RECURSIVE_TAG);
            if let Some(depth_ref) = depth_ref {
                for tag in depth_tags {
                    snapshot.insert(tag.clone(), depth_ref.clone());
                }
            }
            paths.push(snapshot);
            if !scanner.next_path(ctx) {
                break;
            }
        }
        paths
    }
}

impl<D: QueryableStore> Scanner<D> for RecursiveNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        self.current = None;
        loop {
            if let Err(e) = ctx.check() {
                self.err = Some(e);
                return false;
            }
            match &mut self.phase {
                Phase::Seeding(base) => {
                    while base.next(ctx) {
                        if let Some(v) = base.result() {
                            if self.seen.insert(v.clone()) {
                                self.frontier.push(v);
                            }
                        }
                    }
                    if let Some(e) = base.err() {
                        self.err = Some(e);
                        return false;
                    }
                    let _ = base.close();
                    if let Err(e) = self.advance_level(1) {
                        self.err = Some(e);
                        return false;
                    }
                }
                Phase::Advancing {
                    depth,
                    scanner,
                    depth_ref,
                } => {
                    if scanner.next(ctx) {
                        let Some(v) = scanner.result() else {
                            continue;
                        };
                        if !self.seen.insert(v.clone()) {
                            continue;
                        }
                        let paths = Self::collect_paths(
                            scanner,
                            ctx,
                            &self.depth_tags,
                            depth_ref.as_ref(),
                        );
                        self.frontier.push(v.clone());
                        self.current = Some(CurrentResult {
                            value: v,
                            paths,
                            path: 0,
                        });
                        return true;
                    }
                    if let Some(e) = scanner.err() {
                        self.err = Some(e);
                        return false;
                    }
                    let _ = scanner.close();
                    let next_depth = *depth + 1;
                    if let Err(e) = self.advance_level(next_depth) {
                        self.err = Some(e);
                        return false;
                    }
                }
                Phase::Done => return false,
            }
        }
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        if self.err.is_some() {
            return false;
        }
        match &mut self.current {
            Some(current) if current.path + 1 < current.paths.len() => {
                current.path += 1;
                true
            }
            _ => false,
        }
    }

    fn result(&self) -> Option<D::Ref> {
        self.current.as_ref().map(|c| c.value.clone())
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        if let Some(current) = &self.current {
            for (tag, value) in &current.paths[current.path] {
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
        self.seen.clear();
        self.frontier.clear();
        self.current = None;
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Seeding(mut base) => base.close(),
            Phase::Advancing { mut scanner, .. } => scanner.close(),
            Phase::Done => Ok(()),
        }
    }
}

struct RecursiveContains<D: QueryableStore> {
    inner: RecursiveNext<D>,
    /// Everything the inner scan has emitted so far.
    emitted: FxHashMap<D::Ref, Vec<TagMap<D>>>,
    cur: Option<D::Ref>,
    path: usize,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for RecursiveContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.cur = None;
        self.path = 0;
        if self.inner.err.is_some() {
            return false;
        }
        // short-circuit through what previous probes already discovered
        if self.emitted.contains_key(v) {
            self.cur = Some(v.clone());
            return true;
        }
        while self.inner.next(ctx) {
            let Some(current) = &self.inner.current else {
                continue;
            };
            let value = current.value.clone();
            self.emitted.insert(value.clone(), current.paths.clone());
            if value == *v {
                self.cur = Some(value);
                return true;
            }
        }
        false
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        if self.inner.err.is_some() {
            return false;
        }
        match &self.cur {
            Some(cur) => {
                let paths = self.emitted.get(cur).map_or(0, Vec::len);
                if self.path + 1 < paths {
                    self.path += 1;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    fn result(&self) -> Option<D::Ref> {
        self.cur.clone()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        if let Some(cur) = &self.cur {
            if let Some(paths) = self.emitted.get(cur) {
                if let Some(path) = paths.get(self.path) {
                    for (tag, value) in path {
                        dst.insert(tag.clone(), value.clone());
                    }
                }
            }
        }
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.inner.err.clone()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.emitted.clear();
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::hasa::HasA;
    use crate::iterator::linksto::LinksTo;
    use crate::store::{MemRef, MemoryStore};
    use crate::QueryableStore;
    use quadmodel::{Direction, Quad};

    /// A chain a -> b -> c -> d plus a cycle d -> a.
    fn store() -> MemoryStore {
        MemoryStore::from_iter([
            Quad::new("a", "next", "b"),
            Quad::new("b", "next", "c"),
            Quad::new("c", "next", "d"),
            Quad::new("d", "next", "a"),
        ])
    }

    /// Morphism following the "next" predicate one step.
    fn follow_next(store: &MemoryStore) -> Morphism<MemoryStore> {
        let store = store.clone();
        Rc::new(move |base: Rc<dyn Shape<MemoryStore>>| {
            let next = store.internalize_value(&"next".into()).unwrap();
            let and = crate::iterator::and::And::new(vec![
                Rc::new(LinksTo::new(store.clone(), base, Direction::Subject)),
                Rc::new(LinksTo::new(
                    store.clone(),
                    Rc::new(Fixed::new([next])),
                    Direction::Predicate,
                )),
            ])
            .unwrap();
            Rc::new(HasA::new(store.clone(), Rc::new(and), Direction::Object))
        })
    }

    fn seed(store: &MemoryStore, v: &str) -> Rc<dyn Shape<MemoryStore>> {
        let r = store.internalize_value(&v.into()).unwrap();
        Rc::new(Fixed::new([r]))
    }

    fn names(store: &MemoryStore, refs: Vec<MemRef>) -> Vec<String> {
        refs.iter()
            .map(|r| store.name_of(r).unwrap().unwrap().to_string())
            .collect()
    }

    #[test]
    fn bounded_depth_reaches_the_right_nodes() {
        let ctx = EvalContext::new();
        let store = store();
        let recursive =
            Recursive::new(store.clone(), seed(&store, "a"), follow_next(&store))
                .with_max_depth(2);
        let mut scanner = recursive.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(names(&store, out), vec!["\"b\"", "\"c\""]);
    }

    #[test]
    fn cycles_terminate_early() {
        let ctx = EvalContext::new();
        let store = store();
        let recursive = Recursive::new(store.clone(), seed(&store, "a"), follow_next(&store));
        let mut scanner = recursive.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        scanner.close().unwrap();
        // b, c, d are reached; a is a seed and never re-emitted
        assert_eq!(names(&store, out), vec!["\"b\"", "\"c\"", "\"d\""]);
    }

    #[test]
    fn contains_scans_until_found() {
        let ctx = EvalContext::new();
        let store = store();
        let recursive =
            Recursive::new(store.clone(), seed(&store, "a"), follow_next(&store))
                .with_max_depth(2);
        let mut indexer = recursive.lookup();
        let c = store.internalize_value(&"c".into()).unwrap();
        let d = store.internalize_value(&"d".into()).unwrap();
        assert!(indexer.contains(&ctx, &c));
        // repeated probes short-circuit through the seen map
        assert!(indexer.contains(&ctx, &c));
        assert!(!indexer.contains(&ctx, &d));
        indexer.close().unwrap();
    }

    #[test]
    fn depth_tags_bind_the_discovery_depth() {
        let ctx = EvalContext::new();
        let store = store();
        let recursive =
            Recursive::new(store.clone(), seed(&store, "a"), follow_next(&store))
                .with_max_depth(3)
                .with_depth_tag("depth");
        let mut scanner = recursive.iterate();
        let mut depths = Vec::new();
        while scanner.next(&ctx) {
            let mut tags = TagMap::<MemoryStore>::default();
            scanner.tag_results(&mut tags);
            assert!(!tags.contains_key(BASE_RECURSIVE_TAG));
            depths.push(store.name_of(&tags["depth"]).unwrap().unwrap());
        }
        scanner.close().unwrap();
        assert_eq!(
            depths,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }
}
