use alloc::vec::Vec;

use super::{Element, InterpError};
use crate::collective::ReductionKind;

/// A row-major dense tensor holding one device's data in the evaluator.
///
/// Deliberately minimal: construction, indexing, splitting and
/// concatenating along an axis, and elementwise reduction across equally
/// shaped tensors are all the collectives need.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseTensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> DenseTensor<T> {
    /// Wraps row-major data in a shape.
    ///
    /// The data length must match the shape's element count, which must fit
    /// `usize`.
    pub fn new<S: Into<Vec<usize>>>(shape: S, data: Vec<T>) -> Result<Self, InterpError> {
        let shape = shape.into();
        let expected = checked_product(&shape)?;
        if data.len() != expected {
            return Err(InterpError::DataLength {
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Per-dimension extents.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The elements, in row-major order.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// The element at a multi-index, or `None` when out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut linear = 0;
        for (&coord, &extent) in index.iter().zip(&self.shape) {
            if coord >= extent {
                return None;
            }
            linear = linear * extent + coord;
        }
        self.data.get(linear)
    }
}

impl<T: Copy> DenseTensor<T> {
    /// Splits the tensor into equally sized pieces along one axis.
    pub fn split(&self, axis: usize, parts: usize) -> Result<Vec<Self>, InterpError> {
        if axis >= self.rank() {
            return Err(InterpError::AxisOutOfBounds {
                axis,
                rank: self.rank(),
            });
        }
        let size = self.shape[axis];
        if parts == 0 || size % parts != 0 {
            return Err(InterpError::NonDivisibleSplit { axis, size, parts });
        }

        let outer = checked_product(&self.shape[..axis])?;
        let inner = checked_product(&self.shape[axis + 1..])?;
        let piece = size / parts;
        let mut piece_shape = self.shape.clone();
        piece_shape[axis] = piece;

        let stride = size
            .checked_mul(inner)
            .ok_or(InterpError::ShapeOverflow)?;
        let chunk = piece * inner;
        let mut pieces = Vec::with_capacity(parts);
        for part in 0..parts {
            let mut data = Vec::with_capacity(outer * chunk);
            for block in 0..outer {
                let start = block * stride + part * chunk;
                data.extend_from_slice(&self.data[start..start + chunk]);
            }
            pieces.push(Self {
                shape: piece_shape.clone(),
                data,
            });
        }
        Ok(pieces)
    }

    /// Concatenates tensors along one axis, in the order given.
    ///
    /// All parts must agree on every other dimension.
    pub fn concat(axis: usize, parts: &[Self]) -> Result<Self, InterpError> {
        let first = parts.first().ok_or(InterpError::EmptyGroup)?;
        if axis >= first.rank() {
            return Err(InterpError::AxisOutOfBounds {
                axis,
                rank: first.rank(),
            });
        }
        for part in &parts[1..] {
            let agrees = part.rank() == first.rank()
                && part
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(dim, (a, b))| dim == axis || a == b);
            if !agrees {
                return Err(InterpError::PartShapeMismatch {
                    expected: first.shape.clone(),
                    found: part.shape.clone(),
                });
            }
        }

        let outer = checked_product(&first.shape[..axis])?;
        let inner = checked_product(&first.shape[axis + 1..])?;
        let total = parts
            .iter()
            .try_fold(0usize, |sum, part| sum.checked_add(part.shape[axis]))
            .ok_or(InterpError::ShapeOverflow)?;
        let mut shape = first.shape.clone();
        shape[axis] = total;

        let count = outer
            .checked_mul(total)
            .and_then(|count| count.checked_mul(inner))
            .ok_or(InterpError::ShapeOverflow)?;
        let mut data = Vec::with_capacity(count);
        for block in 0..outer {
            for part in parts {
                let chunk = part.shape[axis] * inner;
                let start = block * chunk;
                data.extend_from_slice(&part.data[start..start + chunk]);
            }
        }
        Ok(Self { shape, data })
    }
}

impl<T: Element> DenseTensor<T> {
    /// Reduces equally shaped tensors elementwise.
    pub fn reduce(kind: ReductionKind, parts: &[Self]) -> Result<Self, InterpError> {
        let first = parts.first().ok_or(InterpError::EmptyGroup)?;
        for part in &parts[1..] {
            if part.shape != first.shape {
                return Err(InterpError::PartShapeMismatch {
                    expected: first.shape.clone(),
                    found: part.shape.clone(),
                });
            }
        }

        let mut data = first.data.clone();
        for part in &parts[1..] {
            for (acc, &value) in data.iter_mut().zip(&part.data) {
                *acc = combine(kind, *acc, value);
            }
        }
        Ok(Self {
            shape: first.shape.clone(),
            data,
        })
    }
}

fn checked_product(extents: &[usize]) -> Result<usize, InterpError> {
    extents
        .iter()
        .try_fold(1usize, |count, &size| count.checked_mul(size))
        .ok_or(InterpError::ShapeOverflow)
}

fn combine<T: Element>(kind: ReductionKind, a: T, b: T) -> T {
    match kind {
        ReductionKind::Sum => a + b,
        ReductionKind::Product => a * b,
        ReductionKind::Min => {
            if b < a {
                b
            } else {
                a
            }
        }
        ReductionKind::Max => {
            if b > a {
                b
            } else {
                a
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    fn tensor_2x2(data: [i32; 4]) -> DenseTensor<i32> {
        DenseTensor::new([2, 2], data.to_vec()).unwrap()
    }

    #[test]
    fn test_data_length_must_match_shape() {
        let tensor = DenseTensor::new([2, 3], vec![0i32; 5]);
        assert_eq!(
            tensor.unwrap_err(),
            InterpError::DataLength {
                expected: 6,
                found: 5,
            }
        );
    }

    #[test]
    fn test_oversized_shapes_are_rejected() {
        let tensor = DenseTensor::new([usize::MAX, 2], vec![0i32; 3]);
        assert_eq!(tensor.unwrap_err(), InterpError::ShapeOverflow);

        // zero-count tensors may still carry extents too large to combine
        let wide = DenseTensor::new([usize::MAX, 0], Vec::<i32>::new()).unwrap();
        assert_eq!(
            DenseTensor::concat(0, &[wide.clone(), wide]),
            Err(InterpError::ShapeOverflow)
        );
    }

    #[test]
    fn test_get_is_row_major() {
        let tensor = tensor_2x2([1, 2, 3, 4]);

        assert_eq!(tensor.get(&[0, 1]), Some(&2));
        assert_eq!(tensor.get(&[1, 0]), Some(&3));
        assert_eq!(tensor.get(&[2, 0]), None);
        assert_eq!(tensor.get(&[0]), None);
    }

    #[test]
    fn test_split_then_concat_round_trips() {
        let tensor = DenseTensor::new([2, 4], (0..8).collect()).unwrap();

        let pieces = tensor.split(1, 2).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].shape(), &[2, 2]);
        assert_eq!(pieces[0].data(), &[0, 1, 4, 5]);
        assert_eq!(pieces[1].data(), &[2, 3, 6, 7]);

        let back = DenseTensor::concat(1, &pieces).unwrap();
        assert_eq!(back, tensor);
    }

    #[test]
    fn test_split_requires_divisibility() {
        let tensor = DenseTensor::new([3, 2], vec![0i32; 6]).unwrap();
        assert_eq!(
            tensor.split(0, 2).unwrap_err(),
            InterpError::NonDivisibleSplit {
                axis: 0,
                size: 3,
                parts: 2,
            }
        );
    }

    #[test]
    fn test_concat_checks_other_dimensions() {
        let a = DenseTensor::new([2, 2], vec![0i32; 4]).unwrap();
        let b = DenseTensor::new([3, 2], vec![0i32; 6]).unwrap();

        assert!(DenseTensor::concat(0, &[a.clone(), b]).is_ok());

        let c = DenseTensor::new([2, 3], vec![0i32; 6]).unwrap();
        assert_eq!(
            DenseTensor::concat(0, &[a, c]).unwrap_err(),
            InterpError::PartShapeMismatch {
                expected: vec![2, 2],
                found: vec![2, 3],
            }
        );
    }

    #[test]
    fn test_reduce_combines_elementwise() {
        let a = tensor_2x2([1, 2, 3, 4]);
        let b = tensor_2x2([10, 1, 30, 1]);

        let sum = DenseTensor::reduce(ReductionKind::Sum, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(sum.data(), &[11, 3, 33, 5]);

        let min = DenseTensor::reduce(ReductionKind::Min, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(min.data(), &[1, 1, 3, 1]);

        let max = DenseTensor::reduce(ReductionKind::Max, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(max.data(), &[10, 2, 30, 4]);

        let product = DenseTensor::reduce(ReductionKind::Product, &[a, b]).unwrap();
        assert_eq!(product.data(), &[10, 2, 90, 4]);
    }

    #[test]
    fn test_reduce_rejects_empty_and_mismatched_groups() {
        assert_eq!(
            DenseTensor::<i32>::reduce(ReductionKind::Sum, &[]).unwrap_err(),
            InterpError::EmptyGroup
        );

        let a = tensor_2x2([1, 2, 3, 4]);
        let b = DenseTensor::new([4], vec![0, 0, 0, 0]).unwrap();
        assert_eq!(
            DenseTensor::reduce(ReductionKind::Sum, &[a, b]).unwrap_err(),
            InterpError::PartShapeMismatch {
                expected: vec![2, 2],
                found: vec![4],
            }
        );
    }
}
