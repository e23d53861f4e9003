use alloc::vec::Vec;
use core::fmt;
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::collective::ReductionKind;
use crate::mesh::{MeshAxisSet, SymbolName};

/// A pending reduction carried by a sharded value.
///
/// Values produced by reducing collectives can be left "partial" along some
/// mesh axes: each device holds a partial accumulation that still owes a
/// reduction across those axes before the value is complete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct PartialSharding {
    /// Reduction still owed across `axes`.
    pub kind: ReductionKind,
    /// Mesh axes the value is partial along.
    pub axes: MeshAxisSet,
}

/// How a tensor value is laid out over a device mesh.
///
/// For each tensor dimension, an ordered list of mesh axes splits that
/// dimension; an empty list leaves it replicated. Dimensions past the listed
/// prefix are replicated. Axes not used for splitting replicate the value,
/// unless they appear in the optional partial-reduction block.
///
/// The spec references its mesh by symbol and is validated only when the
/// verifier resolves that symbol: every mentioned axis must be in range and
/// no axis may be mentioned twice (an axis splits at most one dimension and
/// cannot both split and accumulate).
///
/// Prints in the `<@mesh0, [[0], []]>` form, with the partial block appended
/// as `partial = sum[2]` when present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingSpec {
    /// Mesh the layout is over.
    mesh: SymbolName,
    /// Splitting axes for each tensor dimension.
    split_axes: Vec<MeshAxisSet>,
    /// Axes along which the value is a pending partial reduction.
    partial: Option<PartialSharding>,
}

impl ShardingSpec {
    /// Constructs a spec splitting each tensor dimension along the given
    /// axes.
    pub fn new<S, I, A>(mesh: S, split_axes: I) -> Self
    where
        S: Into<SymbolName>,
        I: IntoIterator<Item = A>,
        A: Into<MeshAxisSet>,
    {
        Self {
            mesh: mesh.into(),
            split_axes: split_axes.into_iter().map(Into::into).collect(),
            partial: None,
        }
    }

    /// Marks the value as a pending partial reduction along `axes`.
    pub fn with_partial<A: Into<MeshAxisSet>>(mut self, kind: ReductionKind, axes: A) -> Self {
        self.partial = Some(PartialSharding::new(kind, axes.into()));
        self
    }

    /// Mesh the layout is over.
    pub fn mesh(&self) -> &SymbolName {
        &self.mesh
    }

    /// Splitting axes, one entry per covered tensor dimension.
    pub fn split_axes(&self) -> &[MeshAxisSet] {
        &self.split_axes
    }

    /// The pending partial reduction, when present.
    pub fn partial(&self) -> Option<&PartialSharding> {
        self.partial.as_ref()
    }
}

impl fmt::Display for ShardingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, [", self.mesh)?;
        for (i, axes) in self.split_axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{axes}")?;
        }
        write!(f, "]")?;
        if let Some(partial) = &self.partial {
            write!(f, ", partial = {}{}", partial.kind, partial.axes)?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_display() {
        let spec = ShardingSpec::new("mesh0", [vec![0], vec![]]);
        assert_eq!(spec.to_string(), "<@mesh0, [[0], []]>");

        let partial = ShardingSpec::new("mesh0", [vec![0]])
            .with_partial(ReductionKind::Sum, [2]);
        assert_eq!(partial.to_string(), "<@mesh0, [[0]], partial = sum[2]>");
    }

    #[test]
    fn test_spec_accessors() {
        let spec = ShardingSpec::new("mesh0", [vec![0, 1]]);

        assert_eq!(spec.mesh(), &SymbolName::from("mesh0"));
        assert_eq!(spec.split_axes().len(), 1);
        assert_eq!(spec.split_axes()[0].as_slice(), &[0, 1]);
        assert!(spec.partial().is_none());
    }
}
