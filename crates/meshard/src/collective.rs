//! The collective-communication op family.

use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::mesh::{MeshAxis, MeshAxisSet, SymbolName};
use crate::sharding::ValueId;
use crate::tensor::TensorType;

/// Elementwise combination applied by the reducing collectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReductionKind {
    /// Elementwise addition.
    Sum,
    /// Elementwise multiplication.
    Product,
    /// Elementwise minimum.
    Min,
    /// Elementwise maximum.
    Max,
}

impl fmt::Display for ReductionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ReductionKind::Sum => "sum",
            ReductionKind::Product => "product",
            ReductionKind::Min => "min",
            ReductionKind::Max => "max",
        };
        write!(f, "{token}")
    }
}

/// Per-kind payload of a collective op.
///
/// Tensor-dimension parameters (`gather_axis`, `split_axis`, ...) index the
/// input tensor's dimensions. Root and endpoint parameters are multi-indices
/// into the device group, one coordinate per effective mesh axis, in the
/// order the axes are listed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectiveKind {
    /// Every member receives the concatenation of all members' tensors.
    AllGather {
        /// Tensor dimension the slices concatenate along.
        gather_axis: usize,
    },
    /// Every member receives the elementwise reduction over the group.
    AllReduce {
        /// Combination applied across members.
        reduction: ReductionKind,
    },
    /// Every member sends one slice to each member and concatenates what it
    /// receives.
    AllToAll {
        /// Tensor dimension each member splits into group-size slices.
        split_axis: usize,
        /// Tensor dimension the received slices concatenate along.
        concat_axis: usize,
    },
    /// The root's tensor replaces every member's tensor.
    Broadcast {
        /// Group member the data originates from.
        root: Vec<usize>,
    },
    /// The root receives the concatenation of all members' tensors.
    Gather {
        /// Tensor dimension the slices concatenate along.
        gather_axis: usize,
        /// Group member the data lands on.
        root: Vec<usize>,
    },
    /// The root receives the elementwise reduction over the group.
    Reduce {
        /// Combination applied across members.
        reduction: ReductionKind,
        /// Group member the result lands on.
        root: Vec<usize>,
    },
    /// The group reduction is split back across the members.
    ReduceScatter {
        /// Combination applied across members.
        reduction: ReductionKind,
        /// Tensor dimension the reduction is split along.
        scatter_axis: usize,
    },
    /// The root's tensor is split and one piece lands on each member.
    Scatter {
        /// Tensor dimension the root's tensor is split along.
        scatter_axis: usize,
        /// Group member the data originates from.
        root: Vec<usize>,
    },
    /// Point-to-point transfer towards a group member.
    Send {
        /// Receiving group member.
        destination: Vec<usize>,
    },
    /// Point-to-point transfer from a group member.
    Recv {
        /// Sending group member.
        source: Vec<usize>,
    },
    /// Each member's tensor moves a fixed number of positions along one
    /// mesh axis.
    Shift {
        /// Mesh axis the data moves along; must be a participating axis.
        shift_axis: MeshAxis,
        /// Number of positions to move by; may be negative.
        offset: i64,
        /// Wrap around the axis instead of leaving boundary positions
        /// undefined.
        rotate: bool,
    },
}

impl CollectiveKind {
    /// The op's grammar token.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CollectiveKind::AllGather { .. } => "all_gather",
            CollectiveKind::AllReduce { .. } => "all_reduce",
            CollectiveKind::AllToAll { .. } => "all_to_all",
            CollectiveKind::Broadcast { .. } => "broadcast",
            CollectiveKind::Gather { .. } => "gather",
            CollectiveKind::Reduce { .. } => "reduce",
            CollectiveKind::ReduceScatter { .. } => "reduce_scatter",
            CollectiveKind::Scatter { .. } => "scatter",
            CollectiveKind::Send { .. } => "send",
            CollectiveKind::Recv { .. } => "recv",
            CollectiveKind::Shift { .. } => "shift",
        }
    }
}

/// A collective-communication op over a device mesh.
///
/// The mesh's devices are partitioned into disjoint groups: coordinates
/// outside `mesh_axes` are held fixed, coordinates along the listed axes
/// vary, and the collective acts independently within each group. An empty
/// `mesh_axes` selects every axis, so the whole mesh forms one group.
///
/// Prints in the op grammar, e.g.
/// `mesh.all_gather %0 on @mesh0 mesh_axes = [1] gather_axis = 1 : tensor<2x2xi8> -> tensor<2x4xi8>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectiveOp {
    /// Mesh the op communicates over.
    pub mesh: SymbolName,
    /// Participating axes; empty selects every axis.
    pub mesh_axes: MeshAxisSet,
    /// Value the op consumes.
    pub input: ValueId,
    /// Type of the consumed value.
    pub input_type: TensorType,
    /// Value the op produces.
    pub result: ValueId,
    /// Type of the produced value.
    pub result_type: TensorType,
    /// The transform this op performs.
    pub kind: CollectiveKind,
}

fn fmt_index(f: &mut fmt::Formatter<'_>, index: &[usize]) -> fmt::Result {
    write!(f, "[")?;
    for (i, coord) in index.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{coord}")?;
    }
    write!(f, "]")
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh.{} {} on {}", self.kind.mnemonic(), self.input, self.mesh)?;
        if !self.mesh_axes.is_empty() {
            write!(f, " mesh_axes = {}", self.mesh_axes)?;
        }
        match &self.kind {
            CollectiveKind::AllGather { gather_axis } => {
                write!(f, " gather_axis = {gather_axis}")?;
            }
            CollectiveKind::AllReduce { reduction } => {
                write!(f, " reduction = {reduction}")?;
            }
            CollectiveKind::AllToAll {
                split_axis,
                concat_axis,
            } => {
                write!(f, " split_axis = {split_axis} concat_axis = {concat_axis}")?;
            }
            CollectiveKind::Broadcast { root } => {
                write!(f, " root = ")?;
                fmt_index(f, root)?;
            }
            CollectiveKind::Gather { gather_axis, root } => {
                write!(f, " gather_axis = {gather_axis} root = ")?;
                fmt_index(f, root)?;
            }
            CollectiveKind::Reduce { reduction, root } => {
                write!(f, " reduction = {reduction} root = ")?;
                fmt_index(f, root)?;
            }
            CollectiveKind::ReduceScatter {
                reduction,
                scatter_axis,
            } => {
                write!(f, " reduction = {reduction} scatter_axis = {scatter_axis}")?;
            }
            CollectiveKind::Scatter { scatter_axis, root } => {
                write!(f, " scatter_axis = {scatter_axis} root = ")?;
                fmt_index(f, root)?;
            }
            CollectiveKind::Send { destination } => {
                write!(f, " destination = ")?;
                fmt_index(f, destination)?;
            }
            CollectiveKind::Recv { source } => {
                write!(f, " source = ")?;
                fmt_index(f, source)?;
            }
            CollectiveKind::Shift {
                shift_axis,
                offset,
                rotate,
            } => {
                write!(f, " shift_axis = {shift_axis} offset = {offset}")?;
                if *rotate {
                    write!(f, " rotate")?;
                }
            }
        }
        write!(f, " : {} -> {}", self.input_type, self.result_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::ValueId;
    use crate::tensor::ElementType;
    use alloc::string::ToString;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    fn op(kind: CollectiveKind, mesh_axes: MeshAxisSet, result_shape: [usize; 2]) -> CollectiveOp {
        CollectiveOp {
            mesh: "mesh0".into(),
            mesh_axes,
            input: ValueId(0),
            input_type: TensorType::known([2, 2], ElementType::I8),
            result: ValueId(1),
            result_type: TensorType::known(result_shape, ElementType::I8),
            kind,
        }
    }

    #[test]
    fn test_all_gather_display() {
        let op = op(
            CollectiveKind::AllGather { gather_axis: 1 },
            MeshAxisSet::from([1]),
            [2, 4],
        );
        assert_eq!(
            op.to_string(),
            "mesh.all_gather %0 on @mesh0 mesh_axes = [1] gather_axis = 1 : tensor<2x2xi8> -> tensor<2x4xi8>"
        );
    }

    #[test]
    fn test_default_axes_are_not_printed() {
        let op = op(
            CollectiveKind::AllReduce {
                reduction: ReductionKind::Max,
            },
            MeshAxisSet::all(),
            [2, 2],
        );
        assert_eq!(
            op.to_string(),
            "mesh.all_reduce %0 on @mesh0 reduction = max : tensor<2x2xi8> -> tensor<2x2xi8>"
        );
    }

    #[test]
    fn test_rooted_and_shift_display() {
        let broadcast = op(
            CollectiveKind::Broadcast { root: vec![0, 1] },
            MeshAxisSet::from([0, 1]),
            [2, 2],
        );
        assert_eq!(
            broadcast.to_string(),
            "mesh.broadcast %0 on @mesh0 mesh_axes = [0, 1] root = [0, 1] : tensor<2x2xi8> -> tensor<2x2xi8>"
        );

        let shift = op(
            CollectiveKind::Shift {
                shift_axis: 1,
                offset: -2,
                rotate: true,
            },
            MeshAxisSet::from([1]),
            [2, 2],
        );
        assert_eq!(
            shift.to_string(),
            "mesh.shift %0 on @mesh0 mesh_axes = [1] shift_axis = 1 offset = -2 rotate : tensor<2x2xi8> -> tensor<2x2xi8>"
        );
    }

    #[test]
    fn test_mnemonics() {
        let kinds = [
            (CollectiveKind::AllToAll { split_axis: 0, concat_axis: 0 }, "all_to_all"),
            (CollectiveKind::ReduceScatter { reduction: ReductionKind::Sum, scatter_axis: 0 }, "reduce_scatter"),
            (CollectiveKind::Send { destination: vec![0] }, "send"),
            (CollectiveKind::Recv { source: vec![0] }, "recv"),
        ];
        for (kind, expected) in kinds {
            assert_eq!(kind.mnemonic(), expected);
        }
    }
}
