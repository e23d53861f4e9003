//! Device-mesh topologies, axis selections, and the symbol registry.

mod axes;
mod registry;
mod topology;

pub use axes::*;
pub use registry::*;
pub use topology::*;
