use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::axes::MeshAxis;
use super::registry::SymbolName;

/// The extent of a single mesh axis or tensor dimension.
///
/// Extents are either statically known positive integers or unknown until a
/// later resolution stage. Structural checks treat `Unknown` as compatible
/// with everything: a check that depends on an unknown extent is admitted and
/// deferred, never rejected.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimSize {
    /// A statically known extent.
    Known(usize),
    /// An extent left open until a later resolution stage.
    Unknown,
}

impl DimSize {
    /// Returns `true` when the extent is statically known.
    pub fn is_known(&self) -> bool {
        matches!(self, DimSize::Known(_))
    }

    /// Returns the extent when statically known.
    pub fn known(&self) -> Option<usize> {
        match self {
            DimSize::Known(size) => Some(*size),
            DimSize::Unknown => None,
        }
    }

    /// Whether two extents can describe the same dimension.
    ///
    /// Two known extents must be equal; an unknown extent unifies with
    /// anything.
    pub fn compatible_with(&self, other: &DimSize) -> bool {
        match (self, other) {
            (DimSize::Known(a), DimSize::Known(b)) => a == b,
            _ => true,
        }
    }
}

impl From<usize> for DimSize {
    fn from(size: usize) -> Self {
        DimSize::Known(size)
    }
}

impl fmt::Display for DimSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimSize::Known(size) => write!(f, "{size}"),
            DimSize::Unknown => write!(f, "?"),
        }
    }
}

/// A named logical arrangement of devices used for parallel computation.
///
/// A `MeshTopology` defines a structured, N-dimensional grid over a set of
/// devices, identified by a symbol and referenced by name from sharding
/// specs and collective ops. The topology itself is symbolic: it records the
/// rank and per-axis extents, not the devices, and extents may be left
/// unknown for later resolution.
///
/// For example, a 2D mesh with extents `[2, 4]` represents a logical grid
/// for 2-way parallelism along axis 0 and 4-way parallelism along axis 1.
/// Its declaration prints as `mesh.cluster @mesh0(rank = 2, dim_sizes = 2x4)`.
///
/// The declared `dim_sizes` may be shorter than the rank; trailing axes are
/// implicitly unknown. Reads must go through [`MeshTopology::dim_size`] or
/// [`MeshTopology::canonical_dim_sizes`], which resolve that ambiguity in
/// one place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTopology {
    /// Symbol the mesh is declared under.
    name: SymbolName,
    /// Number of mesh axes.
    rank: usize,
    /// Declared extents; axes past the end are unknown.
    dim_sizes: Vec<DimSize>,
}

/// Errors that can occur when declaring a [`MeshTopology`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// More extents were given than the mesh has axes.
    #[error("mesh {name} declares {given} dimension sizes but only {rank} axes")]
    TooManyDimSizes {
        /// Mesh being declared.
        name: SymbolName,
        /// Number of extents given.
        given: usize,
        /// Declared rank.
        rank: usize,
    },
    /// A known extent of zero was given.
    #[error("mesh {name} axis {axis} has zero size")]
    ZeroDimSize {
        /// Mesh being declared.
        name: SymbolName,
        /// Axis with the zero extent.
        axis: MeshAxis,
    },
}

impl MeshTopology {
    /// Declares a mesh with the given rank and extent prefix.
    ///
    /// The extents may cover only a prefix of the axes; the rest are
    /// unknown. Fails when more extents than axes are given or when a known
    /// extent is zero.
    pub fn new<S, I>(name: S, rank: usize, dim_sizes: I) -> Result<Self, TopologyError>
    where
        S: Into<SymbolName>,
        I: IntoIterator<Item = DimSize>,
    {
        let name = name.into();
        let dim_sizes: Vec<DimSize> = dim_sizes.into_iter().collect();

        if dim_sizes.len() > rank {
            return Err(TopologyError::TooManyDimSizes {
                given: dim_sizes.len(),
                rank,
                name,
            });
        }
        for (axis, size) in dim_sizes.iter().enumerate() {
            if size.known() == Some(0) {
                return Err(TopologyError::ZeroDimSize { name, axis });
            }
        }

        Ok(Self {
            name,
            rank,
            dim_sizes,
        })
    }

    /// Declares a mesh whose extents are all statically known.
    ///
    /// The rank is the number of extents.
    pub fn with_shape<S, I>(name: S, shape: I) -> Result<Self, TopologyError>
    where
        S: Into<SymbolName>,
        I: IntoIterator<Item = usize>,
    {
        let dim_sizes: Vec<DimSize> = shape.into_iter().map(DimSize::Known).collect();
        Self::new(name, dim_sizes.len(), dim_sizes)
    }

    /// Symbol the mesh is declared under.
    pub fn name(&self) -> &SymbolName {
        &self.name
    }

    /// Number of mesh axes.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Extent of one axis, or `None` when the axis is out of range.
    ///
    /// Axes past the declared extent prefix report [`DimSize::Unknown`].
    pub fn dim_size(&self, axis: MeshAxis) -> Option<DimSize> {
        if axis >= self.rank {
            return None;
        }
        Some(self.dim_sizes.get(axis).copied().unwrap_or(DimSize::Unknown))
    }

    /// Extents padded with [`DimSize::Unknown`] up to the rank.
    ///
    /// This is the single place the ambiguity between "unspecified" and
    /// "explicitly unknown" trailing extents is resolved; callers must not
    /// read the declared prefix directly for shape math.
    pub fn canonical_dim_sizes(&self) -> Vec<DimSize> {
        let mut sizes = self.dim_sizes.clone();
        sizes.resize(self.rank, DimSize::Unknown);
        sizes
    }

    /// The extent prefix exactly as declared.
    pub fn declared_dim_sizes(&self) -> &[DimSize] {
        &self.dim_sizes
    }
}

impl fmt::Display for MeshTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh.cluster {}(rank = {}", self.name, self.rank)?;
        if !self.dim_sizes.is_empty() {
            write!(f, ", dim_sizes = ")?;
            for (i, size) in self.dim_sizes.iter().enumerate() {
                if i > 0 {
                    write!(f, "x")?;
                }
                write!(f, "{size}")?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mesh_topology_2x2() {
        let mesh = MeshTopology::with_shape("mesh0", [2, 2]);

        assert!(mesh.is_ok());
        let mesh = mesh.unwrap();
        assert_eq!(mesh.rank(), 2);
        assert_eq!(mesh.dim_size(0), Some(DimSize::Known(2)));
        assert_eq!(mesh.dim_size(1), Some(DimSize::Known(2)));
        assert_eq!(mesh.dim_size(2), None);
    }

    #[test]
    #[should_panic = "TooManyDimSizes"]
    fn test_mesh_topology_sizes_should_fit_rank() {
        let _mesh = MeshTopology::new(
            "mesh0",
            1,
            vec![DimSize::Known(2), DimSize::Known(2)], // one axis too many
        )
        .unwrap();
    }

    #[test]
    #[should_panic = "ZeroDimSize"]
    fn test_mesh_topology_sizes_should_be_positive() {
        let _mesh = MeshTopology::with_shape("mesh0", [2, 0]).unwrap();
    }

    #[test]
    fn test_canonical_dim_sizes_pads_unknown() {
        let mesh = MeshTopology::new("mesh1", 4, vec![DimSize::Known(4), DimSize::Known(8)])
            .unwrap();

        assert_eq!(
            mesh.canonical_dim_sizes(),
            vec![
                DimSize::Known(4),
                DimSize::Known(8),
                DimSize::Unknown,
                DimSize::Unknown,
            ]
        );
        assert_eq!(mesh.dim_size(3), Some(DimSize::Unknown));
        assert_eq!(mesh.declared_dim_sizes().len(), 2);
    }

    #[test]
    fn test_dim_size_compatibility() {
        assert!(DimSize::Known(4).compatible_with(&DimSize::Known(4)));
        assert!(!DimSize::Known(4).compatible_with(&DimSize::Known(8)));
        assert!(DimSize::Unknown.compatible_with(&DimSize::Known(8)));
        assert!(DimSize::Known(8).compatible_with(&DimSize::Unknown));
        assert!(DimSize::Unknown.compatible_with(&DimSize::Unknown));
    }

    #[test]
    fn test_display_declaration() {
        let full = MeshTopology::with_shape("mesh0", [2, 4]).unwrap();
        assert_eq!(full.to_string(), "mesh.cluster @mesh0(rank = 2, dim_sizes = 2x4)");

        let partial = MeshTopology::new("mesh1", 3, vec![DimSize::Known(4), DimSize::Unknown])
            .unwrap();
        assert_eq!(
            partial.to_string(),
            "mesh.cluster @mesh1(rank = 3, dim_sizes = 4x?)"
        );

        let bare = MeshTopology::new("mesh2", 4, vec![]).unwrap();
        assert_eq!(bare.to_string(), "mesh.cluster @mesh2(rank = 4)");
    }
}
