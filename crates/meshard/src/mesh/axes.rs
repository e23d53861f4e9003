use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Index of one axis of a device mesh.
pub type MeshAxis = usize;

/// An ordered selection of mesh axes.
///
/// The order is significant: device groups linearize their members along the
/// axes as listed, and root multi-indices of rooted collectives align with
/// that order. An empty set selects every axis of the mesh it is applied to.
///
/// Construction performs no validation; out-of-range and duplicate axes are
/// rejected by verification, where the referenced mesh is resolved.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshAxisSet {
    /// Selected axes, in participation order.
    axes: Vec<MeshAxis>,
}

impl MeshAxisSet {
    /// Selects the given axes, in order.
    pub fn new<I: IntoIterator<Item = MeshAxis>>(axes: I) -> Self {
        Self {
            axes: axes.into_iter().collect(),
        }
    }

    /// Selects every axis (the empty set).
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether the set is the select-everything default.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of axes listed.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// The listed axes.
    pub fn as_slice(&self) -> &[MeshAxis] {
        &self.axes
    }

    /// Iterates the listed axes in order.
    pub fn iter(&self) -> impl Iterator<Item = MeshAxis> + '_ {
        self.axes.iter().copied()
    }

    /// Whether `axis` is listed.
    pub fn contains(&self, axis: MeshAxis) -> bool {
        self.axes.contains(&axis)
    }

    /// The axes this set stands for on a mesh of the given rank.
    ///
    /// The empty set resolves to all axes in ascending order; a non-empty
    /// set resolves to itself, preserving order.
    pub fn effective(&self, rank: usize) -> Vec<MeshAxis> {
        if self.axes.is_empty() {
            (0..rank).collect()
        } else {
            self.axes.clone()
        }
    }
}

impl From<Vec<MeshAxis>> for MeshAxisSet {
    fn from(axes: Vec<MeshAxis>) -> Self {
        Self::new(axes)
    }
}

impl From<&[MeshAxis]> for MeshAxisSet {
    fn from(axes: &[MeshAxis]) -> Self {
        Self::new(axes.iter().copied())
    }
}

impl<const N: usize> From<[MeshAxis; N]> for MeshAxisSet {
    fn from(axes: [MeshAxis; N]) -> Self {
        Self::new(axes)
    }
}

impl FromIterator<MeshAxis> for MeshAxisSet {
    fn from_iter<I: IntoIterator<Item = MeshAxis>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for MeshAxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{axis}")?;
        }
        write!(f, "]")
    }
}
