use crate::error::QueryEvaluationError;
use crate::iterator::null::Null;
use crate::shape::{Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap};
use crate::store::QueryableStore;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// An externally seeded set of references, yielded in insertion order.
#[derive(Debug, Clone)]
pub struct Fixed<D: QueryableStore> {
    values: Vec<D::Ref>,
}

impl<D: QueryableStore> Fixed<D> {
    pub fn new(values: impl IntoIterator<Item = D::Ref>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn values(&self) -> &[D::Ref] {
        &self.values
    }
}

impl<D: QueryableStore> fmt::Display for Fixed<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({:?})", self.values)
    }
}

impl<D: QueryableStore> Shape<D> for Fixed<D> {
    fn iterate(&self) -> Box<dyn Scanner<D>> {
        Box::new(FixedNext {
            values: self.values.clone(),
            pos: 0,
            result: None,
        })
    }

    fn lookup(&self) -> Box<dyn Indexer<D>> {
        Box::new(FixedContains {
            values: self.values.clone(),
            result: None,
        })
    }

    fn stats(&self, _ctx: &EvalContext) -> Result<Costs, QueryEvaluationError> {
        Ok(Costs {
            next_cost: 1,
            contains_cost: 1,
            size: Size::exact(self.values.len() as i64),
        })
    }

    fn optimize(self: Rc<Self>, _ctx: &EvalContext) -> (Rc<dyn Shape<D>>, bool) {
        if self.values.is_empty() {
            (Rc::new(Null), true)
        } else {
            (self, false)
        }
    }

    fn sub_iterators(&self) -> Vec<Rc<dyn Shape<D>>> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FixedNext<D: QueryableStore> {
    values: Vec<D::Ref>,
    pos: usize,
    result: Option<D::Ref>,
}

impl<D: QueryableStore> Scanner<D> for FixedNext<D> {
    fn next(&mut self, _ctx: &EvalContext) -> bool {
        match self.values.get(self.pos) {
            Some(value) => {
                self.result = Some(value.clone());
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

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

    fn err(&self) -> Option<QueryEvaluationError> {
        None
    }

    fn close(&mut self) -> Result<(), QueryEvaluationError> {
        Ok(())
    }
}

struct FixedContains<D: QueryableStore> {
    values: Vec<D::Ref>,
    result: Option<D::Ref>,
}

impl<D: QueryableStore> Indexer<D> for FixedContains<D> {
    fn contains(&mut self, _ctx: &EvalContext, v: &D::Ref) -> bool {
        let found = self.values.contains(v);
        self.result = found.then(|| v.clone());
        found
    }

    fn next_path(&mut self, _ctx: &EvalContext) -> bool {
        false
    }

    fn result(&self) -> Option<D::Ref> {
        self.result.clone()
    }

    fn tag_results(&self, _dst: &mut TagMap<D>) {}

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
    use crate::store::{MemRef, MemoryStore};
    use quadmodel::Value;

    fn refs(values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| MemRef::Node(Rc::new(Value::Int(i))))
            .collect()
    }

    #[test]
    fn scans_in_insertion_order() {
        let ctx = EvalContext::new();
        let fixed: Fixed<MemoryStore> = Fixed::new(refs([3, 1, 2]));
        let mut scanner = fixed.iterate();
        let mut out = Vec::new();
        while scanner.next(&ctx) {
            out.push(scanner.result().unwrap());
        }
        assert_eq!(out, refs([3, 1, 2]));
        scanner.close().unwrap();
    }

    #[test]
    fn probes_by_store_key() {
        let ctx = EvalContext::new();
        let fixed: Fixed<MemoryStore> = Fixed::new(refs([1, 2]));
        let mut indexer = fixed.lookup();
        let two = MemRef::Node(Rc::new(Value::Int(2)));
        assert!(indexer.contains(&ctx, &two));
        assert_eq!(indexer.result(), Some(two));
        assert!(!indexer.contains(&ctx, &MemRef::Node(Rc::new(Value::Int(9)))));
        assert_eq!(indexer.result(), None);
        indexer.close().unwrap();
    }

    #[test]
    fn empty_fixed_optimizes_to_null() {
        let ctx = EvalContext::new();
        let fixed: Rc<Fixed<MemoryStore>> = Rc::new(Fixed::new([]));
        let (shape, changed) = fixed.optimize(&ctx);
        assert!(changed);
        assert!(shape.as_any().is::<Null>());
    }
}
