//! The iterator algebra: every operator a physical query plan is built from.
//!
//! Each operator is an immutable [`Shape`](crate::Shape) that can be
//! instantiated as a streaming scanner or a probing indexer. Operators
//! compose freely; the driver in [`Chain`](crate::Chain) pulls from the
//! root.

mod and;
mod comparison;
mod count;
mod fixed;
mod hasa;
mod int64;
mod limit;
mod linksto;
mod materialize;
mod not;
mod null;
mod or;
mod recursive;
mod regex;
mod save;
mod skip;
mod sort;
mod unique;
mod value_filter;

pub use self::and::And;
pub use self::comparison::{Comparison, Operator};
pub use self::count::Count;
pub use self::fixed::Fixed;
pub use self::hasa::HasA;
pub use self::int64::Int64Range;
pub use self::limit::Limit;
pub use self::linksto::LinksTo;
pub use self::materialize::{Materialize, MATERIALIZE_LIMIT};
pub use self::not::Not;
pub use self::null::{ErrorShape, Null};
pub use self::or::Or;
pub use self::recursive::{Morphism, Recursive, BASE_RECURSIVE_TAG, MAX_RECURSIVE_DEPTH};
pub use self::regex::RegexFilter;
pub use self::save::Save;
pub use self::skip::Skip;
pub use self::sort::Sort;
pub use self::unique::Unique;
pub use self::value_filter::{ValueFilter, ValuePredicate};
