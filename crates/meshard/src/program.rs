use alloc::vec::Vec;
use core::fmt;
use core::mem;
use hashbrown::HashMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::canonicalize::canonicalize_collective;
use crate::collective::CollectiveOp;
use crate::mesh::{MeshRegistry, MeshTopology, RegistryError};
use crate::sharding::{AnnotationTarget, OpId, ShardAnnotations, ShardOp, ValueId};
use crate::verify::{Diagnostic, verify_collective, verify_shard_op};

/// One op of a mesh program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MeshOp {
    /// A sharding annotation.
    Shard(ShardOp),
    /// A collective data movement.
    Collective(CollectiveOp),
}

impl From<ShardOp> for MeshOp {
    fn from(op: ShardOp) -> Self {
        MeshOp::Shard(op)
    }
}

impl From<CollectiveOp> for MeshOp {
    fn from(op: CollectiveOp) -> Self {
        MeshOp::Collective(op)
    }
}

impl fmt::Display for MeshOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshOp::Shard(op) => op.fmt(f),
            MeshOp::Collective(op) => op.fmt(f),
        }
    }
}

/// An ordered list of mesh ops together with the meshes they reference.
///
/// Op ids are positions in the list. Verification walks every op and
/// collects all diagnostics instead of stopping at the first;
/// canonicalization folds provably trivial collectives and redirects uses
/// of their results to their inputs.
#[derive(Clone, Debug, Default)]
pub struct MeshProgram {
    meshes: MeshRegistry,
    ops: Vec<MeshOp>,
}

impl MeshProgram {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a mesh for the program's ops to reference.
    pub fn declare_mesh(&mut self, mesh: MeshTopology) -> Result<(), RegistryError> {
        self.meshes.declare(mesh)
    }

    /// The declared meshes.
    pub fn meshes(&self) -> &MeshRegistry {
        &self.meshes
    }

    /// Appends an op and returns its id.
    pub fn push<O: Into<MeshOp>>(&mut self, op: O) -> OpId {
        let id = OpId(self.ops.len());
        self.ops.push(op.into());
        id
    }

    /// The op behind an id, when it is in range.
    pub fn op(&self, id: OpId) -> Option<&MeshOp> {
        self.ops.get(id.0)
    }

    /// Iterates the ops with their ids, in program order.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &MeshOp)> {
        self.ops.iter().enumerate().map(|(i, op)| (OpId(i), op))
    }

    /// Number of ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the program has no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Verifies every op, replaying shard annotations in program order.
    ///
    /// Each op short-circuits on its own first violation, but failures do
    /// not stop the pass: one [`Diagnostic`] per failing op is collected.
    pub fn verify(&self) -> Vec<Diagnostic> {
        debug!("verifying program with {} ops", self.ops.len());
        let mut annotations = ShardAnnotations::new();
        let mut diagnostics = Vec::new();

        for (index, op) in self.ops.iter().enumerate() {
            let outcome = match op {
                MeshOp::Shard(shard) => verify_shard_op(shard, &self.meshes)
                    .and_then(|()| annotations.apply(shard)),
                MeshOp::Collective(collective) => verify_collective(collective, &self.meshes),
            };
            if let Err(error) = outcome {
                trace!("op {index} rejected: {error}");
                diagnostics.push(Diagnostic::new(OpId(index), error));
            }
        }

        debug!("verification found {} errors", diagnostics.len());
        diagnostics
    }

    /// Folds provably trivial collectives out of the program.
    ///
    /// Uses of a folded result are redirected to the folded op's input, op
    /// ids are renumbered, and operand annotations scoped to a folded
    /// consumer are dropped with it (their use disappears). A fold whose
    /// redirect would merge annotations that break the placement rules is
    /// skipped, so a program that verifies keeps verifying. Consumer ids
    /// that do not name an op of this program are left untouched. Returns
    /// the number of collectives folded.
    pub fn canonicalize(&mut self) -> usize {
        let mut removed = Vec::new();
        removed.resize(self.ops.len(), false);
        let mut substitution: HashMap<ValueId, ValueId> = HashMap::new();
        let mut folds = 0;

        for (index, op) in self.ops.iter().enumerate() {
            if let MeshOp::Collective(collective) = op {
                if canonicalize_collective(collective, &self.meshes).is_some() {
                    let input = resolved(&substitution, collective.input);
                    if !merge_preserves_annotations(
                        &self.ops,
                        &substitution,
                        &removed,
                        index,
                        collective.result,
                        input,
                    ) {
                        trace!("keeping op {index}: fold would break annotation placement");
                        continue;
                    }
                    substitution.insert(collective.result, input);
                    removed[index] = true;
                    folds += 1;
                    debug!("folding op {index}: {collective}");
                }
            }
        }
        if folds == 0 {
            return 0;
        }

        // Annotations scoped to a removed consumer lose their use; walking
        // backwards lets the drop cascade through annotation chains.
        for index in (0..self.ops.len()).rev() {
            if let MeshOp::Shard(shard) = &self.ops[index] {
                if let AnnotationTarget::Operand { consumer } = shard.target {
                    if removed.get(consumer.0).copied().unwrap_or(false) {
                        removed[index] = true;
                        debug!("dropping annotation op {index} with its consumer");
                    }
                }
            }
        }

        let mut remap: Vec<Option<OpId>> = Vec::with_capacity(self.ops.len());
        let mut kept: Vec<MeshOp> = Vec::with_capacity(self.ops.len() - folds);
        for (index, op) in mem::take(&mut self.ops).into_iter().enumerate() {
            if removed[index] {
                remap.push(None);
            } else {
                remap.push(Some(OpId(kept.len())));
                kept.push(op);
            }
        }

        for op in &mut kept {
            match op {
                MeshOp::Shard(shard) => {
                    shard.value = resolved(&substitution, shard.value);
                    if let AnnotationTarget::Operand { consumer } = &mut shard.target {
                        if let Some(Some(new_id)) = remap.get(consumer.0) {
                            *consumer = *new_id;
                        }
                    }
                }
                MeshOp::Collective(collective) => {
                    collective.input = resolved(&substitution, collective.input);
                }
            }
        }

        self.ops = kept;
        folds
    }
}

/// The value a use should read after substitution.
///
/// Substitution targets are inserted pre-resolved, so a single lookup
/// suffices for programs whose ops are in def-before-use order.
fn resolved(substitution: &HashMap<ValueId, ValueId>, value: ValueId) -> ValueId {
    substitution.get(&value).copied().unwrap_or(value)
}

/// Whether redirecting `result` onto `input` keeps the annotation replay
/// of the merged value valid.
///
/// Folding moves every annotation of the folded result onto the input's
/// value. Replaying the annotations that would land there catches merges
/// the placement rules forbid: a second result-position spec, an
/// operand-position conflict, or a result-position spec arriving after an
/// operand-position one. Annotations scoped to the op being folded or to an
/// already-removed consumer are dropped with it and do not participate.
fn merge_preserves_annotations(
    ops: &[MeshOp],
    substitution: &HashMap<ValueId, ValueId>,
    removed: &[bool],
    folding: usize,
    result: ValueId,
    input: ValueId,
) -> bool {
    let mut replay = ShardAnnotations::new();
    for (index, op) in ops.iter().enumerate() {
        let shard = match op {
            MeshOp::Shard(shard) if !removed[index] => shard,
            _ => continue,
        };
        let value = if shard.value == result {
            input
        } else {
            resolved(substitution, shard.value)
        };
        if value != input {
            continue;
        }
        let outcome = match shard.target {
            AnnotationTarget::Result => replay.annotate_result(value, shard.spec.clone()),
            AnnotationTarget::Operand { consumer } => {
                if consumer.0 == folding || removed.get(consumer.0).copied().unwrap_or(false) {
                    continue;
                }
                replay.annotate_operand(value, consumer, shard.spec.clone())
            }
        };
        if outcome.is_err() {
            return false;
        }
    }
    true
}
