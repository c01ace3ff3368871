use crate::{Direction, Quad, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

/// Identifier of a quad inside a [`QuadSet`], stable for the set's lifetime.
pub type QuadId = usize;

type IndexedQuad = [Option<Rc<Value>>; 4];

/// An in-memory quad container with one index per [`Direction`].
///
/// Inserted values are interned: two quads sharing a value share the same
/// allocation, and the set can hand out the interned [`Rc<Value>`] for any
/// value it has seen. Insertion has set semantics; duplicate quads are
/// ignored.
///
/// ```
/// use quadmodel::{Direction, Quad, QuadSet};
///
/// let mut set = QuadSet::new();
/// assert!(set.insert(Quad::new("a", "follows", "b")));
/// assert!(!set.insert(Quad::new("a", "follows", "b")));
/// assert_eq!(set.quads_with(Direction::Subject, &"a".into()).len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QuadSet {
    quads: Vec<IndexedQuad>,
    quad_set: FxHashSet<IndexedQuad>,
    nodes: Vec<Rc<Value>>,
    node_set: FxHashSet<Rc<Value>>,
    indexes: [FxHashMap<Rc<Value>, Vec<QuadId>>; 4],
}

impl QuadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a quad, returning `false` if it was already present.
    pub fn insert(&mut self, quad: Quad) -> bool {
        let indexed: IndexedQuad = [
            Some(self.intern(quad.subject)),
            Some(self.intern(quad.predicate)),
            Some(self.intern(quad.object)),
            quad.label.map(|l| self.intern(l)),
        ];
        if self.quad_set.contains(&indexed) {
            return false;
        }
        let id = self.quads.len();
        for (position, value) in indexed.iter().enumerate() {
            if let Some(value) = value {
                self.indexes[position]
                    .entry(Rc::clone(value))
                    .or_default()
                    .push(id);
            }
        }
        self.quad_set.insert(indexed.clone());
        self.quads.push(indexed);
        true
    }

    fn intern(&mut self, value: Value) -> Rc<Value> {
        if let Some(interned) = self.node_set.get(&value) {
            return Rc::clone(interned);
        }
        let interned = Rc::new(value);
        self.node_set.insert(Rc::clone(&interned));
        self.nodes.push(Rc::clone(&interned));
        interned
    }

    /// Number of quads in the set.
    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    /// Number of distinct values appearing in any quad position.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Distinct values in first-insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Rc<Value>> {
        self.nodes.iter()
    }

    /// The interned handle for `value`, if it appears in the set.
    pub fn node(&self, value: &Value) -> Option<&Rc<Value>> {
        self.node_set.get(value)
    }

    /// Ids of all quads having `value` at direction `d`.
    pub fn quads_with(&self, d: Direction, value: &Value) -> &[QuadId] {
        self.indexes[d.index()]
            .get(value)
            .map_or(&[], Vec::as_slice)
    }

    /// The value of quad `id` at direction `d`.
    ///
    /// Returns `None` if `id` is out of range or the quad has no label.
    pub fn quad_value(&self, id: QuadId, d: Direction) -> Option<&Rc<Value>> {
        self.quads.get(id)?[d.index()].as_ref()
    }

    /// Rebuilds the quad with the given id.
    pub fn quad(&self, id: QuadId) -> Option<Quad> {
        let indexed = self.quads.get(id)?;
        Some(Quad {
            subject: indexed[0].as_deref()?.clone(),
            predicate: indexed[1].as_deref()?.clone(),
            object: indexed[2].as_deref()?.clone(),
            label: indexed[3].as_deref().cloned(),
        })
    }

    /// All quads, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Quad> + '_ {
        (0..self.quads.len()).filter_map(|id| self.quad(id))
    }
}

impl FromIterator<Quad> for QuadSet {
    fn from_iter<I: IntoIterator<Item = Quad>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<Quad> for QuadSet {
    fn extend<I: IntoIterator<Item = Quad>>(&mut self, iter: I) {
        for quad in iter {
            self.insert(quad);
        }
    }
}
