//! A reference evaluator for collective ops.
//!
//! The evaluator runs one collective over concrete per-device tensors and
//! returns the per-device results, pinning down what each kind's transform
//! means. It needs a fully known mesh: every extent must be
//! [`DimSize::Known`] so the device groups can be enumerated.
//!
//! [`DimSize::Known`]: crate::mesh::DimSize::Known

mod tensor;

pub use tensor::*;

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Add, Mul};
use log::trace;
use thiserror::Error;

use crate::collective::{CollectiveKind, CollectiveOp};
use crate::mesh::{DimSize, MeshAxis, MeshRegistry};
use crate::tensor::TensorType;
use crate::verify::{VerificationError, verify_collective};

/// Element types the evaluator can reduce over.
///
/// Blanket-implemented for any copyable, ordered type with addition and
/// multiplication, which covers the primitive numeric types.
pub trait Element: Copy + PartialOrd + Add<Output = Self> + Mul<Output = Self> {}

impl<T: Copy + PartialOrd + Add<Output = T> + Mul<Output = T>> Element for T {}

/// A device's position in the mesh grid, one coordinate per mesh axis.
pub type DeviceIndex = Vec<usize>;

/// Per-device tensors, keyed by device position.
///
/// Used both for the evaluator's inputs and its results. Devices a
/// collective assigns no result to (non-root members of `gather` and
/// `reduce`, out-of-range `shift` positions) are simply absent.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTensors<T> {
    tensors: BTreeMap<DeviceIndex, DenseTensor<T>>,
}

impl<T> DeviceTensors<T> {
    /// An empty assignment.
    pub fn new() -> Self {
        Self {
            tensors: BTreeMap::new(),
        }
    }

    /// Places a tensor on a device, returning the displaced tensor if any.
    pub fn insert<D: Into<DeviceIndex>>(
        &mut self,
        device: D,
        tensor: DenseTensor<T>,
    ) -> Option<DenseTensor<T>> {
        self.tensors.insert(device.into(), tensor)
    }

    /// The tensor held by a device, if it holds one.
    pub fn get(&self, device: &[usize]) -> Option<&DenseTensor<T>> {
        self.tensors.get(device)
    }

    /// Number of devices holding a tensor.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether no device holds a tensor.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Devices and their tensors, in device order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceIndex, &DenseTensor<T>)> {
        self.tensors.iter()
    }
}

impl<T> Default for DeviceTensors<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the evaluator refused to run or finish a collective.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterpError {
    /// The op failed structural verification.
    #[error("invalid op: {0}")]
    Invalid(#[from] VerificationError),
    /// A mesh extent is unknown; the evaluator cannot enumerate devices.
    #[error("mesh axis {axis} has an unknown extent")]
    UnknownExtent {
        /// The unresolved axis.
        axis: MeshAxis,
    },
    /// A participating device holds no input tensor.
    #[error("no input tensor for device {device:?}")]
    MissingDevice {
        /// The empty-handed device.
        device: DeviceIndex,
    },
    /// A device's input tensor does not fit the op's input type.
    #[error("device {device:?} holds a tensor of shape {found:?} where the op expects {expected}")]
    WrongDeviceShape {
        /// The offending device.
        device: DeviceIndex,
        /// Input type the op declares.
        expected: TensorType,
        /// Shape actually held.
        found: Vec<usize>,
    },
    /// A tensor's data length does not match its shape.
    #[error("tensor data holds {found} elements where its shape needs {expected}")]
    DataLength {
        /// Element count the shape implies.
        expected: usize,
        /// Element count given.
        found: usize,
    },
    /// A tensor shape implies more elements than can be indexed.
    #[error("tensor shape exceeds the addressable element count")]
    ShapeOverflow,
    /// A tensor axis does not exist.
    #[error("axis {axis} is out of bounds for a tensor of rank {rank}")]
    AxisOutOfBounds {
        /// The offending axis.
        axis: usize,
        /// Rank of the tensor.
        rank: usize,
    },
    /// An axis cannot be split into equally sized pieces.
    #[error("cannot split axis {axis} of size {size} into {parts} equal parts")]
    NonDivisibleSplit {
        /// Axis being split.
        axis: usize,
        /// Size of that axis.
        size: usize,
        /// Requested number of pieces.
        parts: usize,
    },
    /// Group members hold tensors whose shapes cannot be combined.
    #[error("group member shapes disagree: expected {expected:?}, found {found:?}")]
    PartShapeMismatch {
        /// Shape set by the first member.
        expected: Vec<usize>,
        /// Disagreeing shape.
        found: Vec<usize>,
    },
    /// A combining step was handed no tensors at all.
    #[error("no tensors to combine")]
    EmptyGroup,
    /// `send` cannot pick a sender in a group of more than two devices.
    #[error("send within a device group of {group} members is ambiguous")]
    AmbiguousTransfer {
        /// Size of the device group.
        group: usize,
    },
}

/// Runs one collective over concrete per-device tensors.
///
/// The op is verified first. Devices are then partitioned into groups by
/// their coordinates on the non-participating axes, and the kind's transform
/// is applied to each group independently. Group members are ordered
/// row-major over the participating axes, in the order the axes are listed;
/// root and endpoint multi-indices address members in that same order.
pub fn execute<T: Element>(
    op: &CollectiveOp,
    meshes: &MeshRegistry,
    inputs: &DeviceTensors<T>,
) -> Result<DeviceTensors<T>, InterpError> {
    verify_collective(op, meshes)?;
    let mesh = meshes
        .resolve(&op.mesh)
        .ok_or_else(|| VerificationError::UnresolvedSymbol {
            symbol: op.mesh.clone(),
        })?;

    let mut mesh_shape = Vec::with_capacity(mesh.rank());
    for (axis, size) in mesh.canonical_dim_sizes().iter().enumerate() {
        match size.known() {
            Some(extent) => mesh_shape.push(extent),
            None => return Err(InterpError::UnknownExtent { axis }),
        }
    }

    let axes = op.mesh_axes.effective(mesh.rank());
    let group_extents: Vec<usize> = axes.iter().map(|&axis| mesh_shape[axis]).collect();
    let fixed_axes: Vec<MeshAxis> = (0..mesh.rank())
        .filter(|axis| !axes.contains(axis))
        .collect();
    let fixed_extents: Vec<usize> = fixed_axes.iter().map(|&axis| mesh_shape[axis]).collect();

    trace!(
        "evaluating {} on {} over {} device group(s)",
        op.kind.mnemonic(),
        op.mesh,
        fixed_extents.iter().product::<usize>(),
    );

    let mut outputs = DeviceTensors::new();
    for fixed in cartesian(&fixed_extents) {
        let members: Vec<DeviceIndex> = cartesian(&group_extents)
            .into_iter()
            .map(|varying| {
                let mut device = vec![0; mesh.rank()];
                for (&axis, &coord) in fixed_axes.iter().zip(&fixed) {
                    device[axis] = coord;
                }
                for (&axis, &coord) in axes.iter().zip(&varying) {
                    device[axis] = coord;
                }
                device
            })
            .collect();
        apply(op, &mesh_shape, &group_extents, &members, inputs, &mut outputs)?;
    }
    Ok(outputs)
}

/// All multi-indices over the given extents, in row-major order.
fn cartesian(extents: &[usize]) -> Vec<Vec<usize>> {
    let mut combos = vec![Vec::new()];
    for &extent in extents {
        let mut grown = Vec::with_capacity(combos.len() * extent);
        for combo in &combos {
            for coord in 0..extent {
                let mut next = combo.clone();
                next.push(coord);
                grown.push(next);
            }
        }
        combos = grown;
    }
    combos
}

fn linear_index(index: &[usize], extents: &[usize]) -> usize {
    index
        .iter()
        .zip(extents)
        .fold(0, |linear, (&coord, &extent)| linear * extent + coord)
}

/// Fetches every member's input tensor, checking it fits the op's input
/// type.
fn group_tensors<T: Element>(
    op: &CollectiveOp,
    members: &[DeviceIndex],
    inputs: &DeviceTensors<T>,
) -> Result<Vec<DenseTensor<T>>, InterpError> {
    members
        .iter()
        .map(|device| {
            let tensor = inputs
                .get(device)
                .ok_or_else(|| InterpError::MissingDevice {
                    device: device.clone(),
                })?;
            let fits = tensor.rank() == op.input_type.rank()
                && tensor
                    .shape()
                    .iter()
                    .zip(op.input_type.shape())
                    .all(|(&size, dim)| dim.compatible_with(&DimSize::Known(size)));
            if !fits {
                return Err(InterpError::WrongDeviceShape {
                    device: device.clone(),
                    expected: op.input_type.clone(),
                    found: tensor.shape().to_vec(),
                });
            }
            Ok(tensor.clone())
        })
        .collect()
}

fn apply<T: Element>(
    op: &CollectiveOp,
    mesh_shape: &[usize],
    group_extents: &[usize],
    members: &[DeviceIndex],
    inputs: &DeviceTensors<T>,
    outputs: &mut DeviceTensors<T>,
) -> Result<(), InterpError> {
    let tensors = group_tensors(op, members, inputs)?;

    match &op.kind {
        CollectiveKind::AllGather { gather_axis } => {
            let gathered = DenseTensor::concat(*gather_axis, &tensors)?;
            for member in members {
                outputs.insert(member.clone(), gathered.clone());
            }
        }
        CollectiveKind::AllReduce { reduction } => {
            let reduced = DenseTensor::reduce(*reduction, &tensors)?;
            for member in members {
                outputs.insert(member.clone(), reduced.clone());
            }
        }
        CollectiveKind::AllToAll {
            split_axis,
            concat_axis,
        } => {
            let pieces: Vec<Vec<DenseTensor<T>>> = tensors
                .iter()
                .map(|tensor| tensor.split(*split_axis, members.len()))
                .collect::<Result<_, _>>()?;
            for (position, member) in members.iter().enumerate() {
                let received: Vec<DenseTensor<T>> =
                    pieces.iter().map(|sent| sent[position].clone()).collect();
                outputs.insert(member.clone(), DenseTensor::concat(*concat_axis, &received)?);
            }
        }
        CollectiveKind::Broadcast { root } => {
            let origin = &tensors[linear_index(root, group_extents)];
            for member in members {
                outputs.insert(member.clone(), origin.clone());
            }
        }
        CollectiveKind::Gather { gather_axis, root } => {
            let gathered = DenseTensor::concat(*gather_axis, &tensors)?;
            outputs.insert(members[linear_index(root, group_extents)].clone(), gathered);
        }
        CollectiveKind::Reduce { reduction, root } => {
            let reduced = DenseTensor::reduce(*reduction, &tensors)?;
            outputs.insert(members[linear_index(root, group_extents)].clone(), reduced);
        }
        CollectiveKind::ReduceScatter {
            reduction,
            scatter_axis,
        } => {
            let reduced = DenseTensor::reduce(*reduction, &tensors)?;
            let pieces = reduced.split(*scatter_axis, members.len())?;
            for (member, piece) in members.iter().zip(pieces) {
                outputs.insert(member.clone(), piece);
            }
        }
        CollectiveKind::Scatter { scatter_axis, root } => {
            let origin = &tensors[linear_index(root, group_extents)];
            let pieces = origin.split(*scatter_axis, members.len())?;
            for (member, piece) in members.iter().zip(pieces) {
                outputs.insert(member.clone(), piece);
            }
        }
        CollectiveKind::Send { destination } => {
            if members.len() > 2 {
                return Err(InterpError::AmbiguousTransfer {
                    group: members.len(),
                });
            }
            // in a pair the non-destination member is the sender; the
            // sender's own result is its input passing through
            let to = linear_index(destination, group_extents);
            let from = members.len() - 1 - to;
            outputs.insert(members[to].clone(), tensors[from].clone());
            if from != to {
                outputs.insert(members[from].clone(), tensors[from].clone());
            }
        }
        CollectiveKind::Recv { source } => {
            let origin = &tensors[linear_index(source, group_extents)];
            for member in members {
                outputs.insert(member.clone(), origin.clone());
            }
        }
        CollectiveKind::Shift {
            shift_axis,
            offset,
            rotate,
        } => {
            // i128 holds any usize coordinate minus any i64 offset exactly
            let extent = mesh_shape[*shift_axis] as i128;
            for member in members {
                let source = member[*shift_axis] as i128 - i128::from(*offset);
                let source = if *rotate {
                    source.rem_euclid(extent)
                } else if (0..extent).contains(&source) {
                    source
                } else {
                    continue;
                };
                let mut origin = member.clone();
                origin[*shift_axis] = source as usize;
                let tensor = members
                    .iter()
                    .position(|candidate| candidate == &origin)
                    .map(|position| tensors[position].clone())
                    .ok_or(InterpError::MissingDevice { device: origin })?;
                outputs.insert(member.clone(), tensor);
            }
        }
    }
    Ok(())
}
