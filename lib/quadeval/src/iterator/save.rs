use crate::error::QueryEvaluationError;
use crate::iterator::null::{is_null, Null};
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Binds one or more tag names to the sub-iterator's current result without
/// otherwise changing its behavior.
pub struct Save<D: QueryableStore> {
    sub: Rc<dyn Shape<D>>,
    tags: Vec<String>,
}

impl<D: QueryableStore> Save<D> {
    pub fn new(sub: Rc<dyn Shape<D>>, tag: impl Into<String>) -> Self {
        Self {
            sub,
            tags: vec![tag.into()],
        }
    }

    pub fn with_tags(sub: Rc<dyn Shape<D>>, tags: Vec<String>) -> Self {
        Self { sub, tags }
    }
}

impl<D: QueryableStore> fmt::Display for Save<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Save({:?})", self.tags)
    }
}

impl<D: QueryableStore> Shape<D> for Save<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(SaveNext {
            sub: self.sub.iterate(),
            tags: self.tags.clone(),
            closed: false,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(SaveContains {
            sub: self.sub.lookup(),
            tags: self.tags.clone(),
            closed: false,
        })
    }

    fn stats(&self, ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        self.sub.stats(ctx)
    }

    fn optimize(self: Rc<Self>, ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        let (sub, changed) = self.sub.clone().optimize(ctx);
        if is_null(&sub) {
            return (Rc::new(Null), true);
        }
        if changed {
            (
                Rc::new(Self {
                    sub,
                    tags: self.tags.clone(),
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

struct SaveNext<D: QueryableStore> {
    sub: Box<dyn Scanner<D>>,
    tags: Vec<String>,
    closed: bool,
}

impl<D: QueryableStore> Scanner<D> for SaveNext<D> {
    fn next(&mut self, ctx: &EvalContext) -> bool {
        self.sub.next(ctx)
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        self.sub.next_path(ctx)
    }

    fn result(&self) -> Option<D::Ref> {
        self.sub.result()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        self.sub.tag_results(dst);
        if let Some(result) = self.sub.result() {
            for tag in &self.tags {
                dst.insert(tag.clone(), result.clone());
            }
        }
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.sub.err()
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sub.close()
    }
}

struct SaveContains<D: QueryableStore> {
    sub: Box<dyn Indexer<D>>,
    tags: Vec<String>,
    closed: bool,
}

impl<D: QueryableStore> Indexer<D> for SaveContains<D> {
    fn contains(&mut self, ctx: &EvalContext, v: &D::Ref) -> bool {
        self.sub.contains(ctx, v)
    }

    fn next_path(&mut self, ctx: &EvalContext) -> bool {
        self.sub.next_path(ctx)
    }

    fn result(&self) -> Option<D::Ref> {
        self.sub.result()
    }

    fn tag_results(&self, dst: &mut TagMap<D>) {
        self.sub.tag_results(dst);
        if let Some(result) = self.sub.result() {
            for tag in &self.tags {
                dst.insert(tag.clone(), result.clone());
            }
        }
    }

    fn err(&self) -> Option<QueryEvaluationError> {
        self.sub.err()
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
    use crate::iterator::fixed::Fixed;
    use crate::store::{MemRef, MemoryStore};
    use quadmodel::Value;

    #[test]
    fn binds_tags_to_the_current_result() {
        let ctx = EvalContext::new();
        let one = MemRef::Node(Rc::new(Value::Int(1)));
        let save: Save<MemoryStore> =
            Save::new(Rc::new(Fixed::new([one.clone()])), "id");
        let mut scanner = save.iterate();
        assert!(scanner.next(&ctx));
        let mut tags = TagMap::<MemoryStore>::default();
        scanner.tag_results(&mut tags);
        assert_eq!(tags["id"], one);
        scanner.close().unwrap();
    }

    #[test]
    fn probe_results_are_tagged_too() {
        let ctx = EvalContext::new();
        let one = MemRef::Node(Rc::new(Value::Int(1)));
        let save: Save<MemoryStore> =
            Save::with_tags(Rc::new(Fixed::new([one.clone()])), vec!["a".into(), "b".into()]);
        let mut indexer = save.lookup();
        assert!(indexer.contains(&ctx, &one));
        let mut tags = TagMap::<MemoryStore>::default();
        indexer.tag_results(&mut tags);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["b"], one);
        indexer.close().unwrap();
    }
}
