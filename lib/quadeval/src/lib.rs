#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod chain;
mod error;
pub mod iterator;
mod shape;
mod store;

pub use crate::chain::Chain;
pub use crate::error::QueryEvaluationError;
pub use crate::shape::{
    plan_description, Costs, EvalContext, Indexer, Scanner, Shape, Size, TagMap,
};
pub use crate::store::{MemRef, MemoryStore, QueryableStore};
