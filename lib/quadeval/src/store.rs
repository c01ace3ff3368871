use crate::error::QueryEvaluationError;
use crate::iterator::Fixed;
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use quadmodel::{Direction, Quad, QuadId, QuadSet, Value};
use std::any::Any;
use std::convert::Infallible;
use std::error::Error;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

/// A quad store that can be queried through the iterator algebra.
///
/// The store hands out opaque references for nodes and quads and resolves
/// them back to [`Value`]s on demand. It is shared by every cursor of a plan,
/// so implementations should be cheap handles (the reference implementation
/// wraps an [`Rc`]).
pub trait QueryableStore: Clone + 'static {
    /// Internal representation of a node or quad reference.
    ///
    /// Equality and hashing define the store key: two references compare
    /// equal iff they denote the same graph value.
    type Ref: Clone + Eq + Hash + fmt::Debug + 'static;

    /// Error returned by the store.
    type Error: Error + Send + Sync + 'static;

    /// A shape over all quads having `v` at direction `d`.
    fn quad_iterator(&self, d: Direction, v: &Self::Ref) -> Rc<dyn Shape<Self>>;

    /// Size of the [`QueryableStore::quad_iterator`] result set, exact when
    /// that is cheap.
    fn quad_iterator_size(&self, d: Direction, v: &Self::Ref) -> Result<Size, Self::Error>;

    /// Projects a quad reference to one of its four positions.
    ///
    /// Returns `None` when `quad` is not a quad reference or has nothing at
    /// `d` (an absent label).
    fn quad_direction(
        &self,
        quad: &Self::Ref,
        d: Direction,
    ) -> Result<Option<Self::Ref>, Self::Error>;

    /// Resolves a reference into its externally meaningful value.
    ///
    /// `None` means unknown; quad references in particular have no value
    /// form.
    fn name_of(&self, v: &Self::Ref) -> Result<Option<Value>, Self::Error>;

    /// The reference already stored for `v`, if any.
    fn value_of(&self, v: &Value) -> Result<Option<Self::Ref>, Self::Error>;

    /// Mints a reference for an arbitrary value, whether or not the value
    /// appears in the store.
    ///
    /// Synthetic sources (integer ranges, counts, recursion depths) rely on
    /// this; the returned reference must compare equal to the stored one
    /// when the value is present.
    fn internalize_value(&self, v: &Value) -> Result<Self::Ref, Self::Error>;

    /// Universe shape over all nodes.
    fn nodes_all_iterator(&self) -> Rc<dyn Shape<Self>>;

    /// Universe shape over all quads.
    fn quads_all_iterator(&self) -> Rc<dyn Shape<Self>>;
}

/// Reference into a [`MemoryStore`]: either a node value or a quad id.
///
/// Node references carry their value, so references minted by
/// [`QueryableStore::internalize_value`] for values absent from the store
/// still compare by value against stored ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemRef {
    Node(Rc<Value>),
    Quad(QuadId),
}

/// In-memory reference store over a [`QuadSet`].
///
/// ```
/// use quadeval::{Chain, MemoryStore, QueryableStore};
/// use quadmodel::Quad;
///
/// let store = MemoryStore::from_iter([Quad::new("a", "follows", "b")]);
/// assert_eq!(Chain::new(store.quads_all_iterator()).count()?, 1);
/// # Result::<_, quadeval::QueryEvaluationError>::Ok(())
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Rc<QuadSet>,
}

impl MemoryStore {
    pub fn new(data: QuadSet) -> Self {
        Self { data: Rc::new(data) }
    }

    pub fn data(&self) -> &QuadSet {
        &self.data
    }
}

impl From<QuadSet> for MemoryStore {
    fn from(data: QuadSet) -> Self {
        Self::new(data)
    }
}

impl FromIterator<Quad> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = Quad>>(iter: I) -> Self {
        Self::new(QuadSet::from_iter(iter))
    }
}

impl QueryableStore for MemoryStore {
    type Ref = MemRef;
    type Error = Infallible;

    fn quad_iterator(&self, d: Direction, v: &MemRef) -> Rc<dyn Shape<Self>> {
        match v {
            MemRef::Node(value) => Rc::new(Fixed::new(
                self.data
                    .quads_with(d, value)
                    .iter()
                    .map(|&id| MemRef::Quad(id)),
            )),
            MemRef::Quad(_) => Rc::new(Fixed::new([])),
        }
    }

    fn quad_iterator_size(&self, d: Direction, v: &MemRef) -> Result<Size, Infallible> {
        Ok(match v {
            MemRef::Node(value) => Size::exact(self.data.quads_with(d, value).len() as i64),
            MemRef::Quad(_) => Size::exact(0),
        })
    }

    fn quad_direction(&self, quad: &MemRef, d: Direction) -> Result<Option<MemRef>, Infallible> {
        Ok(match quad {
            MemRef::Quad(id) => self
                .data
                .quad_value(*id, d)
                .map(|value| MemRef::Node(Rc::clone(value))),
            MemRef::Node(_) => None,
        })
    }

    fn name_of(&self, v: &MemRef) -> Result<Option<Value>, Infallible> {
        Ok(match v {
            MemRef::Node(value) => Some(value.as_ref().clone()),
            MemRef::Quad(_) => None,
        })
    }

    fn value_of(&self, v: &Value) -> Result<Option<MemRef>, Infallible> {
        Ok(self.data.node(v).map(|value| MemRef::Node(Rc::clone(value))))
    }

    fn internalize_value(&self, v: &Value) -> Result<MemRef, Infallible> {
        Ok(MemRef::Node(match self.data.node(v) {
            Some(interned) => Rc::clone(interned),
            None => Rc::new(v.clone()),
        }))
    }

    fn nodes_all_iterator(&self) -> Rc<dyn Shape<Self>> {
        Rc::new(AllNodes {
            store: self.clone(),
        })
    }

    fn quads_all_iterator(&self) -> Rc<dyn Shape<Self>> {
        Rc::new(AllQuads {
            store: self.clone(),
        })
    }
}

/// Universe shape over all distinct values of a [`MemoryStore`].
struct AllNodes {
    store: MemoryStore,
}

impl fmt::Display for AllNodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AllNodes")
    }
}

impl Shape<MemoryStore> for AllNodes {
    fn iterate(&self) -> Box<dyn Scanner<MemoryStore>> {
        Box::new(AllNodesNext {
            store: self.store.clone(),
            pos: 0,
            result: None,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<MemoryStore>> {
        Box::new(AllNodesContains {
            store: self.store.clone(),
            result: None,
        })
    }

    fn stats(&self, _ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        let size = self.store.data.node_count() as i64;
        Ok(Costs {
            next_cost: 1,
            contains_cost: 1,
            size: Size::exact(size),
        })
    }

    fn optimize(self: Rc<Self>, _ctx: &EvalContext) -> (Rc<dyn Shape<MemoryStore>>, bool) {
        (self, false)
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<MemoryStore>>> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AllNodesNext {
    store: MemoryStore,
    pos: usize,
    result: Option<MemRef>,
}

impl Scanner<MemoryStore> for AllNodesNext {
    fn next(&mut self, _ctx: &EvalContext) -> bool {
        match self.store.data.nodes().nth(self.pos) {
            Some(value) => {
                self.result = Some(MemRef::Node(Rc::clone(value)));
                self.pos += 1;
                true
            }
            None => {
                self.result = None;
                false
            }
        }
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<MemRef> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<MemoryStore>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        None
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

struct AllNodesContains {
    store: MemoryStore,
    result: Option<MemRef>,
}

impl Indexer<MemoryStore> for AllNodesContains {
    fn contains(&mut self, _ctx: &EvalContext, v: &MemRef) -> bool {
        let found = match v {
            MemRef::Node(value) => self.store.data.node(value).is_some(),
            MemRef::Quad(_) => false,
        };
        self.result = found.then(|| v.clone());
        found
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<MemRef> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<MemoryStore>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        None
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

/// Universe shape over all quads of a [`MemoryStore`].
struct AllQuads {
    store: MemoryStore,
}

impl fmt::Display for AllQuads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AllQuads")
    }
}

impl Shape<MemoryStore> for AllQuads {
    fn iterate(&self) -> Box<dyn Scanner<MemoryStore>> {
        Box::new(AllQuadsNext {
            len: self.store.data.len(),
            pos: 0,
            result: None,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<MemoryStore>> {
        Box::new(AllQuadsContains {
            len: self.store.data.len(),
            result: None,
        })
    }

    fn stats(&self, _ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        Ok(Costs {
            next_cost: 1,
            contains_cost: 1,
            size: Size::exact(self.store.data.len() as i64),
        })
    }

    fn optimize(self: Rc<Self>, _ctx: &EvalContext) -> (Rc<dyn Shape<MemoryStore>>, bool) {
        (self, false)
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<MemoryStore>>> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AllQuadsNext {
    len: usize,
    pos: usize,
    result: Option<MemRef>,
}

impl Scanner<MemoryStore> for AllQuadsNext {
    fn next(&mut self, _ctx: &EvalContext) -> bool {
        if self.pos < self.len {
            self.result = Some(MemRef::Quad(self.pos));
            self.pos += 1;
            true
        } else {
            self.result = None;
            false
        }
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<MemRef> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<MemoryStore>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        None
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

struct AllQuadsContains {
    len: usize,
    result: Option<MemRef>,
}

impl Indexer<MemoryStore> for AllQuadsContains {
    fn contains(&mut self, _ctx: &EvalContext, v: &MemRef) -> bool {
        let found = matches!(v, MemRef::Quad(id) if *id < self.len);
        self.result = found.then(|| v.clone());
        found
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<MemRef> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<MemoryStore>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        None
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::from_iter([
            Quad::new("a", "follows", "b"),
            Quad::new("b", "follows", "c"),
        ])
    }

    #[test]
    fn internalized_values_compare_with_stored_ones() {
        let store = store();
        let stored = store.value_of(&"a".into()).unwrap().unwrap();
        let minted = store.internalize_value(&"a".into()).unwrap();
        assert_eq!(stored, minted);
        assert!(store.value_of(&"unknown".into()).unwrap().is_none());
        let fresh = store.internalize_value(&"unknown".into()).unwrap();
        assert_eq!(store.name_of(&fresh).unwrap(), Some("unknown".into()));
    }

    #[test]
    fn quad_projection() {
        let store = store();
        let b = store.internalize_value(&"b".into()).unwrap();
        let ctx = EvalContext::new();
        let mut quads = store.quad_iterator(Direction::Subject, &b).iterate();
        assert!(quads.next(&ctx));
        let quad = quads.result().unwrap();
        assert_eq!(
            store.quad_direction(&quad, Direction::Object).unwrap(),
            Some(store.internalize_value(&"c".into()).unwrap())
        );
        assert!(!quads.next(&ctx));
        quads.close().unwrap();
    }

    #[test]
    fn universes_have_exact_sizes() {
        let store = store();
        let ctx = EvalContext::new();
        let nodes = store.nodes_all_iterator().stats(&ctx).unwrap();
        assert_eq!(nodes.size, Size::exact(4)); // a, b, c, follows
        let quads = store.quads_all_iterator().stats(&ctx).unwrap();
        assert_eq!(quads.size, Size::exact(2));
    }
}
