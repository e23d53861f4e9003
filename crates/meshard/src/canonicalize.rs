//! Folding of degenerate collectives.

use alloc::vec::Vec;

use crate::collective::{CollectiveKind, CollectiveOp};
use crate::mesh::{DimSize, MeshRegistry};

/// Replacement a canonicalization proposes for an op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rewrite {
    /// The op forwards its input unchanged; uses of the result can take the
    /// input directly.
    Identity,
}

/// Proposes a rewrite for a collective that provably does nothing.
///
/// A collective folds when every participating axis has a statically known
/// extent of 1 (every device group is a singleton), and a shift additionally
/// folds on a provably zero effective offset: an offset of 0, or a rotation
/// by a multiple of the axis extent. In both cases the input and result
/// types must be identical, since a folded op can no longer convert.
///
/// Never fires on unknown extents, and never on an op whose mesh does not
/// resolve; proposing a rewrite requires proof, reporting an error is the
/// verifier's job.
pub fn canonicalize_collective(op: &CollectiveOp, meshes: &MeshRegistry) -> Option<Rewrite> {
    let mesh = meshes.resolve(&op.mesh)?;
    let axes = op.mesh_axes.effective(mesh.rank());

    let mut extents = Vec::with_capacity(axes.len());
    for &axis in &axes {
        match mesh.dim_size(axis) {
            Some(DimSize::Known(extent)) => extents.push(extent),
            _ => return None,
        }
    }
    if op.input_type != op.result_type {
        return None;
    }

    let singleton_groups = extents.iter().all(|&extent| extent == 1);
    match op.kind {
        CollectiveKind::Shift {
            shift_axis,
            offset,
            rotate,
        } => {
            if singleton_groups || offset == 0 {
                return Some(Rewrite::Identity);
            }
            if rotate {
                let position = axes.iter().position(|&axis| axis == shift_axis)?;
                let extent = extents[position] as i128;
                if i128::from(offset).rem_euclid(extent) == 0 {
                    return Some(Rewrite::Identity);
                }
            }
            None
        }
        _ if singleton_groups => Some(Rewrite::Identity),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::ReductionKind;
    use crate::mesh::{MeshAxisSet, MeshTopology};
    use crate::sharding::ValueId;
    use crate::tensor::{ElementType, TensorType};
    use alloc::vec;
    use pretty_assertions::assert_eq;

    fn registry() -> MeshRegistry {
        let mut meshes = MeshRegistry::new();
        meshes
            .declare(MeshTopology::with_shape("trivial", [1, 1]).unwrap())
            .unwrap();
        meshes
            .declare(MeshTopology::with_shape("mesh0", [1, 4]).unwrap())
            .unwrap();
        meshes
            .declare(MeshTopology::new("dyn", 1, vec![]).unwrap())
            .unwrap();
        meshes
    }

    fn all_reduce(mesh: &str, mesh_axes: impl Into<MeshAxisSet>) -> CollectiveOp {
        let ty = TensorType::known([2, 2], ElementType::F32);
        CollectiveOp {
            mesh: mesh.into(),
            mesh_axes: mesh_axes.into(),
            input: ValueId(0),
            input_type: ty.clone(),
            result: ValueId(1),
            result_type: ty,
            kind: CollectiveKind::AllReduce {
                reduction: ReductionKind::Sum,
            },
        }
    }

    #[test]
    fn test_singleton_groups_fold_to_identity() {
        let op = all_reduce("trivial", MeshAxisSet::all());
        assert_eq!(
            canonicalize_collective(&op, &registry()),
            Some(Rewrite::Identity)
        );

        let partial = all_reduce("mesh0", [0]);
        assert_eq!(
            canonicalize_collective(&partial, &registry()),
            Some(Rewrite::Identity)
        );
    }

    #[test]
    fn test_real_groups_do_not_fold() {
        let op = all_reduce("mesh0", [1]);
        assert_eq!(canonicalize_collective(&op, &registry()), None);
    }

    #[test]
    fn test_unknown_extent_never_folds() {
        let op = all_reduce("dyn", [0]);
        assert_eq!(canonicalize_collective(&op, &registry()), None);
    }

    #[test]
    fn test_converting_op_never_folds() {
        let mut op = all_reduce("trivial", MeshAxisSet::all());
        op.result_type = TensorType::known([2, 2], ElementType::F64);
        assert_eq!(canonicalize_collective(&op, &registry()), None);
    }

    #[test]
    fn test_shift_folds_on_zero_effective_offset() {
        let shift = |offset: i64, rotate: bool| {
            let mut op = all_reduce("mesh0", [1]);
            op.kind = CollectiveKind::Shift {
                shift_axis: 1,
                offset,
                rotate,
            };
            op
        };
        let meshes = registry();

        assert_eq!(
            canonicalize_collective(&shift(0, false), &meshes),
            Some(Rewrite::Identity)
        );
        assert_eq!(
            canonicalize_collective(&shift(8, true), &meshes),
            Some(Rewrite::Identity)
        );
        assert_eq!(
            canonicalize_collective(&shift(-4, true), &meshes),
            Some(Rewrite::Identity)
        );
        assert_eq!(
            canonicalize_collective(&shift(i64::MIN, true), &meshes),
            Some(Rewrite::Identity)
        );
        assert_eq!(canonicalize_collective(&shift(8, false), &meshes), None);
        assert_eq!(canonicalize_collective(&shift(3, true), &meshes), None);
        assert_eq!(canonicalize_collective(&shift(i64::MIN, false), &meshes), None);
    }
}
