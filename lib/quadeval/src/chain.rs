use crate::error::QueryEvaluationError;
use crate::shape::{next_cursor_id, plan_description, EvalContext, Scanner, Shape, TagMap};
use crate::store::QueryableStore;
use quadmodel::Value;
use rustc_hash::FxHashMap;
use std::rc::Rc;
use std::sync::mpsc::Sender;
use tracing::debug;

/// Builder-style driver over a plan root.
///
/// ```
/// use quadeval::iterator::Int64Range;
/// use quadeval::{Chain, MemoryStore};
/// use quadmodel::{QuadSet, Value};
/// use std::rc::Rc;
///
/// let store = MemoryStore::new(QuadSet::new());
/// let range = Rc::new(Int64Range::new(store.clone(), 0..5));
/// let values = Chain::new(range).on(store).all_values()?;
/// assert_eq!(values.len(), 5);
/// assert_eq!(values[0], Value::Int(0));
/// # Result::<_, quadeval::QueryEvaluationError>::Ok(())
/// ```
pub struct Chain<D: QueryableStore> {
    shape: Rc<dyn Shape<D>>,
    ctx: EvalContext,
    store: Option<D>,
    limit: Option<usize>,
    paths: bool,
    optimize: bool,
}

impl<D: QueryableStore> Chain<D> {
    pub fn new(shape: Rc<dyn Shape<D>>) -> Self {
        Self {
            shape,
            ctx: EvalContext::new(),
            store: None,
            limit: None,
            paths: true,
            optimize: true,
        }
    }

    /// Evaluates under the given context; cancellation is honored between
    /// results and between paths.
    #[must_use]
    pub fn with_context(mut self, ctx: EvalContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// The store used to resolve references by the `*_value` methods.
    #[must_use]
    pub fn on(mut self, store: D) -> Self {
        self.store = Some(store);
        self
    }

    /// Upper bound on emitted results, paths included. Unbounded by default.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether to also emit `next_path` results. On by default.
    #[must_use]
    pub fn paths(mut self, paths: bool) -> Self {
        self.paths = paths;
        self
    }

    /// Whether to optimize the plan before iterating. On by default.
    #[must_use]
    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    fn namer(&self) -> Result<D, QueryEvaluationError> {
        self.store.clone().ok_or_else(|| {
            QueryEvaluationError::Plan(
                "no value namer configured, call on() before resolving values".into(),
            )
        })
    }

    /// Runs the scan loop, calling `on_result` for every emitted result and
    /// path. The callback may stop the iteration early by returning
    /// `Ok(false)`.
    fn run(
        self,
        mut on_result: impl FnMut(&mut dyn Scanner<D>) -> Result<bool, QueryEvaluationError>,
    ) -> Result<(), QueryEvaluationError> {
        let shape = if self.optimize {
            let (optimized, changed) = self.shape.clone().optimize(&self.ctx);
            if changed {
                debug!(plan = %plan_description(optimized.as_ref()), "optimized plan");
            }
            optimized
        } else {
            self.shape
        };
        let id = next_cursor_id();
        debug!(id, plan = %plan_description(shape.as_ref()), "starting iteration");
        let ctx = self.ctx;
        let limit = self.limit;
        let paths = self.paths;
        let mut scanner = shape.iterate();
        let scan_result = (|| {
            let mut emitted = 0usize;
            'scan: while limit.is_none_or(|l| emitted < l) {
                ctx.check()?;
                if !scanner.next(&ctx) {
                    break;
                }
                if !on_result(scanner.as_mut())? {
                    break 'scan;
                }
                emitted += 1;
                if paths {
                    while limit.is_none_or(|l| emitted < l) {
                        ctx.check()?;
                        if !scanner.next_path(&ctx) {
                            break;
                        }
                        if !on_result(scanner.as_mut())? {
                            break 'scan;
                        }
                        emitted += 1;
                    }
                }
            }
            if let Some(e) = scanner.err() {
                return Err(e);
            }
            Ok(())
        })();
        let close_result = scanner.close();
        scan_result?;
        close_result
    }

    /// Calls `f` with every emitted reference.
    pub fn each(self, mut f: impl FnMut(&D::Ref)) -> Result<(), QueryEvaluationError> {
        self.run(|scanner| {
            if let Some(r) = scanner.result() {
                f(&r);
            }
            Ok(true)
        })
    }

    /// Collects every emitted reference.
    pub fn all(self) -> Result<Vec<D::Ref>, QueryEvaluationError> {
        let mut out = Vec::new();
        self.run(|scanner| {
            if let Some(r) = scanner.result() {
                out.push(r);
            }
            Ok(true)
        })?;
        Ok(out)
    }

    /// The first emitted reference, if any.
    pub fn first(self) -> Result<Option<D::Ref>, QueryEvaluationError> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    /// Number of results, without paths.
    ///
    /// When the optimized plan reports an exact size and no driver limit is
    /// set, the scan is skipped entirely.
    pub fn count(mut self) -> Result<i64, QueryEvaluationError> {
        if self.optimize {
            self.shape = self.shape.clone().optimize(&self.ctx).0;
            self.optimize = false;
        }
        if self.limit.is_none() {
            let stats = self.shape.stats(&self.ctx)?;
            if stats.size.exact {
                return Ok(stats.size.value);
            }
        }
        self.paths = false;
        let mut n = 0i64;
        self.run(|_| {
            n += 1;
            Ok(true)
        })?;
        Ok(n)
    }

    /// Sends every emitted reference into `sender`, stopping early when the
    /// receiving end is gone.
    pub fn send(self, sender: &Sender<D::Ref>) -> Result<(), QueryEvaluationError> {
        self.run(|scanner| {
            match scanner.result() {
                Some(r) => Ok(sender.send(r).is_ok()),
                None => Ok(true),
            }
        })
    }

    /// Calls `f` with the tag bindings of every emitted result.
    pub fn tag_each(self, mut f: impl FnMut(&TagMap<D>)) -> Result<(), QueryEvaluationError> {
        self.run(|scanner| {
            let mut tags = TagMap::<D>::default();
            scanner.tag_results(&mut tags);
            f(&tags);
            Ok(true)
        })
    }

    /// Calls `f` with every emitted reference resolved to its value.
    ///
    /// References the namer cannot resolve are skipped.
    pub fn each_value(self, mut f: impl FnMut(Value)) -> Result<(), QueryEvaluationError> {
        let store = self.namer()?;
        self.run(|scanner| {
            if let Some(r) = scanner.result() {
                if let Some(v) = store.name_of(&r).map_err(QueryEvaluationError::store)? {
                    f(v);
                }
            }
            Ok(true)
        })
    }

    /// Collects every emitted reference resolved to its value.
    pub fn all_values(self) -> Result<Vec<Value>, QueryEvaluationError> {
        let mut out = Vec::new();
        let store = self.namer()?;
        self.run(|scanner| {
            if let Some(r) = scanner.result() {
                if let Some(v) = store.name_of(&r).map_err(QueryEvaluationError::store)? {
                    out.push(v);
                }
            }
            Ok(true)
        })?;
        Ok(out)
    }

    /// The first emitted reference resolved to its value, if any.
    pub fn first_value(self) -> Result<Option<Value>, QueryEvaluationError> {
        Ok(self.limit(1).all_values()?.into_iter().next())
    }

    /// Calls `f` with the tag bindings of every emitted result, resolved to
    /// values. Unresolvable bindings are skipped.
    pub fn tag_each_value(
        self,
        mut f: impl FnMut(FxHashMap<String, Value>),
    ) -> Result<(), QueryEvaluationError> {
        let store = self.namer()?;
        self.run(|scanner| {
            let mut tags = TagMap::<D>::default();
            scanner.tag_results(&mut tags);
            let mut resolved = FxHashMap::default();
            for (tag, r) in tags {
                if let Some(v) = store.name_of(&r).map_err(QueryEvaluationError::store)? {
                    resolved.insert(tag, v);
                }
            }
            f(resolved);
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::{Fixed, Int64Range, Save};
    use crate::store::{MemRef, MemoryStore};
    use crate::QueryableStore;
    use quadmodel::QuadSet;
    use std::sync::mpsc::channel;

    fn store() -> MemoryStore {
        MemoryStore::new(QuadSet::new())
    }

    fn int_refs(store: &MemoryStore, values: impl IntoIterator<Item = i64>) -> Vec<MemRef> {
        values
            .into_iter()
            .map(|i| store.internalize_value(&Value::Int(i)).unwrap())
            .collect()
    }

    #[test]
    fn all_and_first_and_count() {
        let store = store();
        let fixed = Rc::new(Fixed::<MemoryStore>::new(int_refs(&store, [1, 2, 3])));
        assert_eq!(Chain::new(fixed.clone()).all().unwrap().len(), 3);
        assert_eq!(
            Chain::new(fixed.clone()).first().unwrap(),
            Some(int_refs(&store, [1]).remove(0))
        );
        assert_eq!(Chain::new(fixed).count().unwrap(), 3);
    }

    #[test]
    fn limit_caps_emission() {
        let store = store();
        let range = Rc::new(Int64Range::new(store.clone(), 0..100));
        assert_eq!(Chain::new(range).limit(7).all().unwrap().len(), 7);
    }

    #[test]
    fn value_methods_require_a_namer() {
        let store = store();
        let fixed = Rc::new(Fixed::new(int_refs(&store, [1])));
        assert!(matches!(
            Chain::new(fixed.clone()).all_values(),
            Err(QueryEvaluationError::Plan(_))
        ));
        assert_eq!(
            Chain::new(fixed).on(store).all_values().unwrap(),
            vec![Value::Int(1)]
        );
    }

    #[test]
    fn tag_each_sees_save_bindings() {
        let store = store();
        let saved = Rc::new(Save::new(
            Rc::new(Fixed::new(int_refs(&store, [5]))),
            "n",
        ));
        let mut rows = Vec::new();
        Chain::new(saved)
            .on(store)
            .tag_each_value(|row| rows.push(row))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], Value::Int(5));
    }

    #[test]
    fn send_stops_when_the_receiver_hangs_up() {
        let store = store();
        let range = Rc::new(Int64Range::new(store.clone(), 0..1000));
        let (tx, rx) = channel();
        drop(rx);
        // not an error, just an early stop
        Chain::new(range).send(&tx).unwrap();
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let store = store();
        let ctx = EvalContext::new();
        ctx.cancel();
        let range = Rc::new(Int64Range::new(store.clone(), 0..1000));
        assert!(matches!(
            Chain::new(range).with_context(ctx).all(),
            Err(QueryEvaluationError::Cancelled)
        ));
    }
}
