use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::mesh::DimSize;

/// Scalar element type of a tensor.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ElementType {
    F16,
    BF16,
    F32,
    F64,
    I1,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I1 => "i1",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
        };
        write!(f, "{token}")
    }
}

/// A ranked tensor type: per-dimension extents plus an element type.
///
/// Extents reuse [`DimSize`], so dimensions may be statically known or
/// unknown; shape checks against unknown dimensions are admitted and
/// deferred. Prints in the `tensor<2x4xf32>` form, with `?` standing in for
/// unknown extents.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorType {
    /// Per-dimension extents.
    shape: Vec<DimSize>,
    /// Scalar element type.
    element: ElementType,
}

impl TensorType {
    /// Constructs a tensor type from per-dimension extents.
    pub fn new<I: IntoIterator<Item = DimSize>>(shape: I, element: ElementType) -> Self {
        Self {
            shape: shape.into_iter().collect(),
            element,
        }
    }

    /// Constructs a tensor type whose extents are all statically known.
    pub fn known<I: IntoIterator<Item = usize>>(shape: I, element: ElementType) -> Self {
        Self::new(shape.into_iter().map(DimSize::Known), element)
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of one dimension, or `None` when out of range.
    pub fn dim(&self, dim: usize) -> Option<DimSize> {
        self.shape.get(dim).copied()
    }

    /// Per-dimension extents.
    pub fn shape(&self) -> &[DimSize] {
        &self.shape
    }

    /// Scalar element type.
    pub fn element(&self) -> ElementType {
        self.element
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<")?;
        for size in &self.shape {
            write!(f, "{size}x")?;
        }
        write!(f, "{}>", self.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tensor_type_display() {
        let ty = TensorType::known([2, 4], ElementType::F32);
        assert_eq!(ty.to_string(), "tensor<2x4xf32>");

        let dynamic = TensorType::new(
            [DimSize::Known(2), DimSize::Unknown],
            ElementType::I8,
        );
        assert_eq!(dynamic.to_string(), "tensor<2x?xi8>");

        let scalar = TensorType::known([], ElementType::F64);
        assert_eq!(scalar.to_string(), "tensor<f64>");
    }

    #[test]
    fn test_tensor_type_dims() {
        let ty = TensorType::known([2, 4], ElementType::F32);

        assert_eq!(ty.rank(), 2);
        assert_eq!(ty.dim(1), Some(DimSize::Known(4)));
        assert_eq!(ty.dim(2), None);
        assert_eq!(ty.element(), ElementType::F32);
    }
}
