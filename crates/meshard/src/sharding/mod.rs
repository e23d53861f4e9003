//! Tensor sharding specs and their placement on values.

mod annotation;
mod spec;

pub use annotation::*;
pub use spec::*;
