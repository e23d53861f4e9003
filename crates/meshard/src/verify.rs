//! Structural verification of sharding specs and collective ops.

use alloc::vec::Vec;
use derive_new::new;
use hashbrown::HashSet;
use thiserror::Error;

use crate::collective::{CollectiveKind, CollectiveOp};
use crate::mesh::{DimSize, MeshAxis, MeshAxisSet, MeshRegistry, MeshTopology, SymbolName};
use crate::sharding::{OpId, ShardOp, ShardingSpec, ValueId};
use crate::tensor::{ElementType, TensorType};

/// Why verification rejected an op or spec.
///
/// Every variant names the violated rule and carries the offending
/// identifiers; none is retryable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// A referenced mesh symbol is not declared.
    #[error("unknown mesh symbol {symbol}")]
    UnresolvedSymbol {
        /// The symbol that failed to resolve.
        symbol: SymbolName,
    },
    /// A mesh axis index is not a valid axis of the resolved mesh.
    #[error("mesh axis {axis} is out of range for a mesh of rank {rank}")]
    AxisOutOfRange {
        /// The offending axis.
        axis: MeshAxis,
        /// Rank of the resolved mesh.
        rank: usize,
    },
    /// A mesh axis is mentioned more than once where each axis may play at
    /// most one role.
    #[error("mesh axis {axis} is listed more than once")]
    DuplicateMeshAxis {
        /// The repeated axis.
        axis: MeshAxis,
    },
    /// A tensor's rank is incompatible with the declared transform.
    #[error("tensor of rank {found} where the transform requires rank {expected}")]
    RankMismatch {
        /// Rank the transform requires.
        expected: usize,
        /// Rank found.
        found: usize,
    },
    /// A result dimension disagrees with the transform's shape relation.
    #[error("result dimension {dim} should have size {expected}, found {found}")]
    ShapeMismatch {
        /// The offending dimension.
        dim: usize,
        /// Size the shape relation requires.
        expected: DimSize,
        /// Size found.
        found: DimSize,
    },
    /// A dimension must divide evenly across the device group and does not.
    #[error("tensor dimension {dim} of size {size} is not divisible by the device group size {group}")]
    NonDivisibleDim {
        /// The offending dimension.
        dim: usize,
        /// Size of that dimension.
        size: usize,
        /// Number of group members it must split across.
        group: usize,
    },
    /// A computed device-group or dimension size does not fit `usize`.
    #[error("size {size} scaled by {factor} overflows the index range")]
    SizeOverflow {
        /// The size being scaled.
        size: usize,
        /// The factor it is scaled by.
        factor: usize,
    },
    /// The result element type differs where the transform cannot convert.
    #[error("result element type {found} does not match input element type {expected}")]
    ElementTypeMismatch {
        /// Input element type.
        expected: ElementType,
        /// Result element type.
        found: ElementType,
    },
    /// A value already carries a different result-position annotation.
    #[error("value {value} already carries a different result sharding annotation")]
    DuplicateResultAnnotation {
        /// The doubly annotated value.
        value: ValueId,
    },
    /// A `(value, consumer)` use already carries a different annotation.
    #[error("value {value} already carries a different sharding annotation for consumer op {consumer}")]
    ConflictingOperandAnnotation {
        /// The doubly annotated value.
        value: ValueId,
        /// The consuming op the annotations are scoped to.
        consumer: OpId,
    },
    /// A result-position annotation arrived after an operand-position one.
    #[error("result sharding annotation for value {value} placed after an operand annotation")]
    OrderingViolation {
        /// The value annotated out of order.
        value: ValueId,
    },
    /// A root or endpoint multi-index does not address a group member.
    #[error("root {root:?} lies outside the device group")]
    RootOutOfRange {
        /// The offending multi-index.
        root: Vec<usize>,
    },
    /// A shift op's axis is not one of its participating axes.
    #[error("shift axis {axis} is not one of the participating mesh axes")]
    RotateAxisNotInSet {
        /// The axis the data was asked to move along.
        axis: MeshAxis,
    },
}

/// A verification failure attributed to one op of a program.
#[derive(Clone, Debug, Error, PartialEq, Eq, new)]
#[error("op {op}: {error}")]
pub struct Diagnostic {
    /// The failing op.
    pub op: OpId,
    /// The violated rule.
    pub error: VerificationError,
}

fn resolve<'a>(
    meshes: &'a MeshRegistry,
    symbol: &SymbolName,
) -> Result<&'a MeshTopology, VerificationError> {
    meshes
        .resolve(symbol)
        .ok_or_else(|| VerificationError::UnresolvedSymbol {
            symbol: symbol.clone(),
        })
}

/// Resolves an axis set against a mesh, rejecting out-of-range and repeated
/// axes. The empty set stands for all axes.
fn effective_axes(
    set: &MeshAxisSet,
    mesh: &MeshTopology,
) -> Result<Vec<MeshAxis>, VerificationError> {
    let rank = mesh.rank();
    if set.is_empty() {
        return Ok((0..rank).collect());
    }
    let mut seen = HashSet::new();
    for axis in set.iter() {
        if axis >= rank {
            return Err(VerificationError::AxisOutOfRange { axis, rank });
        }
        if !seen.insert(axis) {
            return Err(VerificationError::DuplicateMeshAxis { axis });
        }
    }
    Ok(set.effective(rank))
}

/// Number of devices in each group: the product of the effective axes'
/// extents, unknown as soon as any participating extent is. A product past
/// `usize::MAX` names more devices than can be indexed and is rejected.
fn group_extent(mesh: &MeshTopology, axes: &[MeshAxis]) -> Result<DimSize, VerificationError> {
    let mut extent = 1usize;
    for &axis in axes {
        match mesh.dim_size(axis) {
            Some(DimSize::Known(size)) => {
                extent = extent
                    .checked_mul(size)
                    .ok_or(VerificationError::SizeOverflow {
                        size: extent,
                        factor: size,
                    })?;
            }
            _ => return Ok(DimSize::Unknown),
        }
    }
    Ok(DimSize::Known(extent))
}

fn check_tensor_axis(axis: usize, input: &TensorType) -> Result<(), VerificationError> {
    if axis >= input.rank() {
        return Err(VerificationError::RankMismatch {
            expected: axis + 1,
            found: input.rank(),
        });
    }
    Ok(())
}

fn check_root(
    root: &[usize],
    axes: &[MeshAxis],
    mesh: &MeshTopology,
) -> Result<(), VerificationError> {
    if root.len() != axes.len() {
        return Err(VerificationError::RootOutOfRange {
            root: root.to_vec(),
        });
    }
    for (coord, &axis) in root.iter().zip(axes) {
        if let Some(DimSize::Known(extent)) = mesh.dim_size(axis) {
            if *coord >= extent {
                return Err(VerificationError::RootOutOfRange {
                    root: root.to_vec(),
                });
            }
        }
    }
    Ok(())
}

fn scaled_up(size: DimSize, group: DimSize) -> Result<DimSize, VerificationError> {
    match (size, group) {
        (DimSize::Known(s), DimSize::Known(g)) => s
            .checked_mul(g)
            .map(DimSize::Known)
            .ok_or(VerificationError::SizeOverflow { size: s, factor: g }),
        _ => Ok(DimSize::Unknown),
    }
}

fn scaled_down(dim: usize, size: DimSize, group: DimSize) -> Result<DimSize, VerificationError> {
    match (size, group) {
        (DimSize::Known(s), DimSize::Known(g)) => {
            if s % g != 0 {
                return Err(VerificationError::NonDivisibleDim { dim, size: s, group: g });
            }
            Ok(DimSize::Known(s / g))
        }
        _ => Ok(DimSize::Unknown),
    }
}

/// The result shape the kind's transform implies for the given input.
fn expected_result_dims(
    kind: &CollectiveKind,
    input: &TensorType,
    group: DimSize,
) -> Result<Vec<DimSize>, VerificationError> {
    let mut dims: Vec<DimSize> = input.shape().to_vec();
    match kind {
        CollectiveKind::AllGather { gather_axis }
        | CollectiveKind::Gather { gather_axis, .. } => {
            dims[*gather_axis] = scaled_up(dims[*gather_axis], group)?;
        }
        CollectiveKind::AllToAll {
            split_axis,
            concat_axis,
        } if split_axis == concat_axis => {
            // net size is unchanged, but the group must still divide it
            scaled_down(*split_axis, dims[*split_axis], group)?;
        }
        CollectiveKind::AllToAll {
            split_axis,
            concat_axis,
        } => {
            dims[*split_axis] = scaled_down(*split_axis, dims[*split_axis], group)?;
            dims[*concat_axis] = scaled_up(dims[*concat_axis], group)?;
        }
        CollectiveKind::ReduceScatter { scatter_axis, .. }
        | CollectiveKind::Scatter { scatter_axis, .. } => {
            dims[*scatter_axis] = scaled_down(*scatter_axis, dims[*scatter_axis], group)?;
        }
        CollectiveKind::AllReduce { .. }
        | CollectiveKind::Reduce { .. }
        | CollectiveKind::Broadcast { .. }
        | CollectiveKind::Send { .. }
        | CollectiveKind::Recv { .. }
        | CollectiveKind::Shift { .. } => {}
    }
    Ok(dims)
}

/// Whether the kind reduces across the group and may therefore convert the
/// element type.
fn may_convert_element(kind: &CollectiveKind) -> bool {
    matches!(
        kind,
        CollectiveKind::AllReduce { .. }
            | CollectiveKind::Reduce { .. }
            | CollectiveKind::ReduceScatter { .. }
    )
}

/// Checks a sharding spec against its mesh.
///
/// Every mentioned axis (split lists and the partial block) must be in
/// range, and no axis may be mentioned twice.
pub fn verify_sharding(
    spec: &ShardingSpec,
    meshes: &MeshRegistry,
) -> Result<(), VerificationError> {
    let mesh = resolve(meshes, spec.mesh())?;
    let rank = mesh.rank();

    let mut seen = HashSet::new();
    let split = spec.split_axes().iter().flat_map(|axes| axes.iter());
    let partial = spec.partial().map(|p| p.axes.iter()).into_iter().flatten();
    for axis in split.chain(partial) {
        if axis >= rank {
            return Err(VerificationError::AxisOutOfRange { axis, rank });
        }
        if !seen.insert(axis) {
            return Err(VerificationError::DuplicateMeshAxis { axis });
        }
    }
    Ok(())
}

/// Checks a shard op: its spec against its mesh, and the split-list length
/// against the annotated tensor's rank.
pub fn verify_shard_op(op: &ShardOp, meshes: &MeshRegistry) -> Result<(), VerificationError> {
    verify_sharding(&op.spec, meshes)?;
    if op.spec.split_axes().len() > op.ty.rank() {
        return Err(VerificationError::RankMismatch {
            expected: op.spec.split_axes().len(),
            found: op.ty.rank(),
        });
    }
    Ok(())
}

/// Checks a collective op's structural legality.
///
/// Checks run in order: mesh resolution; axis range and uniqueness; group
/// sizing; kind-specific parameters (tensor-axis bounds, root and endpoint
/// multi-indices, shift-axis membership); then the shape relation (rank,
/// element type, per-dimension sizes). A check that depends on an unknown
/// extent is admitted and deferred. The first violation is returned.
pub fn verify_collective(
    op: &CollectiveOp,
    meshes: &MeshRegistry,
) -> Result<(), VerificationError> {
    let mesh = resolve(meshes, &op.mesh)?;
    let axes = effective_axes(&op.mesh_axes, mesh)?;
    let group = group_extent(mesh, &axes)?;
    let input = &op.input_type;
    let result = &op.result_type;

    match &op.kind {
        CollectiveKind::AllGather { gather_axis } => {
            check_tensor_axis(*gather_axis, input)?;
        }
        CollectiveKind::AllReduce { .. } => {}
        CollectiveKind::AllToAll {
            split_axis,
            concat_axis,
        } => {
            check_tensor_axis(*split_axis, input)?;
            check_tensor_axis(*concat_axis, input)?;
        }
        CollectiveKind::Broadcast { root } => {
            check_root(root, &axes, mesh)?;
        }
        CollectiveKind::Gather { gather_axis, root } => {
            check_tensor_axis(*gather_axis, input)?;
            check_root(root, &axes, mesh)?;
        }
        CollectiveKind::Reduce { root, .. } => {
            check_root(root, &axes, mesh)?;
        }
        CollectiveKind::ReduceScatter { scatter_axis, .. } => {
            check_tensor_axis(*scatter_axis, input)?;
        }
        CollectiveKind::Scatter { scatter_axis, root } => {
            check_tensor_axis(*scatter_axis, input)?;
            check_root(root, &axes, mesh)?;
        }
        CollectiveKind::Send { destination } => {
            check_root(destination, &axes, mesh)?;
        }
        CollectiveKind::Recv { source } => {
            check_root(source, &axes, mesh)?;
        }
        CollectiveKind::Shift { shift_axis, .. } => {
            if !axes.contains(shift_axis) {
                return Err(VerificationError::RotateAxisNotInSet { axis: *shift_axis });
            }
        }
    }

    if input.rank() != result.rank() {
        return Err(VerificationError::RankMismatch {
            expected: input.rank(),
            found: result.rank(),
        });
    }
    if !may_convert_element(&op.kind) && input.element() != result.element() {
        return Err(VerificationError::ElementTypeMismatch {
            expected: input.element(),
            found: result.element(),
        });
    }
    let expected = expected_result_dims(&op.kind, input, group)?;
    for (dim, (expected, found)) in expected.iter().zip(result.shape()).enumerate() {
        if !found.compatible_with(expected) {
            return Err(VerificationError::ShapeMismatch {
                dim,
                expected: *expected,
                found: *found,
            });
        }
    }
    Ok(())
}
