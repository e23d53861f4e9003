use core::fmt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::spec::ShardingSpec;
use crate::tensor::TensorType;
use crate::verify::VerificationError;

/// Identifies a tensor value in the embedding IR.
///
/// Ids are opaque to this crate; the embedder assigns them. Prints as `%3`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub usize);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identifies an operation in the embedding IR.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub usize);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a shard annotation binds on its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationTarget {
    /// Binds at the value's defining point: how the producer lays it out.
    Result,
    /// Binds at one consuming use: how that consumer expects it laid out.
    Operand {
        /// The consuming operation.
        consumer: OpId,
    },
}

/// The sharding-annotation op.
///
/// Attaches a [`ShardingSpec`] to a tensor value, either at its producer or
/// scoped to one consuming use. Pure metadata: no tensor data moves.
///
/// Prints as
/// `mesh.shard %4 to <@mesh0, [[0], []]> annotate_for_users : tensor<4x8xf32>`,
/// the `annotate_for_users` keyword marking the operand-position form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardOp {
    /// Annotated value.
    pub value: ValueId,
    /// Type of the annotated value.
    pub ty: TensorType,
    /// Layout being attached.
    pub spec: ShardingSpec,
    /// Result- or operand-position binding.
    pub target: AnnotationTarget,
}

impl fmt::Display for ShardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh.shard {} to {}", self.value, self.spec)?;
        if let AnnotationTarget::Operand { .. } = self.target {
            write!(f, " annotate_for_users")?;
        }
        write!(f, " : {}", self.ty)
    }
}

/// Annotation placement state for a set of values.
///
/// Enforces the placement invariants as annotations arrive:
///
/// - a value carries at most one result-position spec; re-annotating with an
///   identical spec is benign, a different spec is a
///   [`VerificationError::DuplicateResultAnnotation`];
/// - each `(value, consumer)` pair carries at most one operand-position
///   spec, with the same idempotence rule
///   ([`VerificationError::ConflictingOperandAnnotation`] otherwise);
/// - a result-position spec must precede every operand-position spec on the
///   same value ([`VerificationError::OrderingViolation`]).
#[derive(Clone, Debug, Default)]
pub struct ShardAnnotations {
    results: HashMap<ValueId, ShardingSpec>,
    operands: HashMap<ValueId, HashMap<OpId, ShardingSpec>>,
}

impl ShardAnnotations {
    /// Creates an empty placement state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a result-position spec to `value`'s defining point.
    pub fn annotate_result(
        &mut self,
        value: ValueId,
        spec: ShardingSpec,
    ) -> Result<(), VerificationError> {
        if self.operands.contains_key(&value) {
            return Err(VerificationError::OrderingViolation { value });
        }
        match self.results.get(&value) {
            Some(existing) if *existing != spec => {
                Err(VerificationError::DuplicateResultAnnotation { value })
            }
            Some(_) => Ok(()),
            None => {
                self.results.insert(value, spec);
                Ok(())
            }
        }
    }

    /// Attaches an operand-position spec scoped to `(value, consumer)`.
    pub fn annotate_operand(
        &mut self,
        value: ValueId,
        consumer: OpId,
        spec: ShardingSpec,
    ) -> Result<(), VerificationError> {
        let uses = self.operands.entry(value).or_default();
        match uses.get(&consumer) {
            Some(existing) if *existing != spec => {
                Err(VerificationError::ConflictingOperandAnnotation { value, consumer })
            }
            Some(_) => Ok(()),
            None => {
                uses.insert(consumer, spec);
                Ok(())
            }
        }
    }

    /// Applies one shard op, dispatching on its target.
    pub fn apply(&mut self, op: &ShardOp) -> Result<(), VerificationError> {
        match op.target {
            AnnotationTarget::Result => self.annotate_result(op.value, op.spec.clone()),
            AnnotationTarget::Operand { consumer } => {
                self.annotate_operand(op.value, consumer, op.spec.clone())
            }
        }
    }

    /// The result-position spec on `value`, when present.
    pub fn result_spec(&self, value: ValueId) -> Option<&ShardingSpec> {
        self.results.get(&value)
    }

    /// The operand-position spec on `(value, consumer)`, when present.
    pub fn operand_spec(&self, value: ValueId, consumer: OpId) -> Option<&ShardingSpec> {
        self.operands.get(&value)?.get(&consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::ElementType;
    use alloc::string::ToString;
    use alloc::vec;
    use pretty_assertions::assert_eq;

    fn spec_on_axis(axis: usize) -> ShardingSpec {
        ShardingSpec::new("mesh0", [vec![axis]])
    }

    #[test]
    fn test_result_annotation_is_idempotent() {
        let mut annotations = ShardAnnotations::new();
        let value = ValueId(0);

        annotations.annotate_result(value, spec_on_axis(0)).unwrap();
        annotations.annotate_result(value, spec_on_axis(0)).unwrap();

        assert_eq!(annotations.result_spec(value), Some(&spec_on_axis(0)));
    }

    #[test]
    #[should_panic = "DuplicateResultAnnotation"]
    fn test_result_annotation_should_not_change() {
        let mut annotations = ShardAnnotations::new();
        let value = ValueId(0);

        annotations.annotate_result(value, spec_on_axis(0)).unwrap();
        annotations.annotate_result(value, spec_on_axis(1)).unwrap(); // different layout
    }

    #[test]
    fn test_operand_annotation_after_result_is_allowed() {
        let mut annotations = ShardAnnotations::new();
        let value = ValueId(3);

        annotations.annotate_result(value, spec_on_axis(0)).unwrap();
        annotations
            .annotate_operand(value, OpId(7), spec_on_axis(1))
            .unwrap();

        assert_eq!(
            annotations.operand_spec(value, OpId(7)),
            Some(&spec_on_axis(1))
        );
        assert_eq!(annotations.operand_spec(value, OpId(8)), None);
    }

    #[test]
    #[should_panic = "OrderingViolation"]
    fn test_result_annotation_should_precede_operand_annotations() {
        let mut annotations = ShardAnnotations::new();
        let value = ValueId(3);

        annotations
            .annotate_operand(value, OpId(7), spec_on_axis(0))
            .unwrap();
        annotations.annotate_result(value, spec_on_axis(0)).unwrap(); // too late
    }

    #[test]
    #[should_panic = "ConflictingOperandAnnotation"]
    fn test_operand_annotations_should_agree_per_use() {
        let mut annotations = ShardAnnotations::new();
        let value = ValueId(3);

        annotations
            .annotate_operand(value, OpId(7), spec_on_axis(0))
            .unwrap();
        annotations
            .annotate_operand(value, OpId(7), spec_on_axis(1)) // same use, new layout
            .unwrap();
    }

    #[test]
    fn test_operand_annotations_may_differ_across_uses() {
        let mut annotations = ShardAnnotations::new();
        let value = ValueId(3);

        annotations
            .annotate_operand(value, OpId(7), spec_on_axis(0))
            .unwrap();
        annotations
            .annotate_operand(value, OpId(8), spec_on_axis(1))
            .unwrap();
        annotations
            .annotate_operand(value, OpId(7), spec_on_axis(0)) // idempotent
            .unwrap();
    }

    #[test]
    fn test_shard_op_display() {
        let op = ShardOp {
            value: ValueId(4),
            ty: TensorType::known([4, 8], ElementType::F32),
            spec: ShardingSpec::new("mesh0", [vec![0], vec![]]),
            target: AnnotationTarget::Operand { consumer: OpId(9) },
        };
        assert_eq!(
            op.to_string(),
            "mesh.shard %4 to <@mesh0, [[0], []]> annotate_for_users : tensor<4x8xf32>"
        );

        let result_op = ShardOp {
            target: AnnotationTarget::Result,
            ..op
        };
        assert_eq!(
            result_op.to_string(),
            "mesh.shard %4 to <@mesh0, [[0], []]> : tensor<4x8xf32>"
        );
    }
}
