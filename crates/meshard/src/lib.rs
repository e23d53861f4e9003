#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Symbolic modeling of device meshes, tensor sharding, and collective
//! communication.

extern crate alloc;

mod canonicalize;
mod collective;
mod program;
mod tensor;
mod verify;

pub mod interp;
pub mod mesh;
pub mod sharding;

pub use canonicalize::*;
pub use collective::*;
pub use program::*;
pub use tensor::*;
pub use verify::*;
