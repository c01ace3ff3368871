#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod dataset;
mod direction;
mod quad;
mod value;

pub use crate::dataset::{QuadId, QuadSet};
pub use crate::direction::Direction;
pub use crate::quad::Quad;
pub use crate::value::Value;
