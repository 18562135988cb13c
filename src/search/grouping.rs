//! Groups simulated trial plans by structural identity.
//!
//! A `Signature` is an explicit, prefix-free byte encoding of an operation
//! sequence: a big-endian length, then one tag byte per operation followed by
//! fixed-width fields. Two sequences share a signature exactly when they are
//! element-wise identical. Groups are keyed on the encoding itself; the
//! `blake3` digest is only for display.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::operation::{Operation, OperationSequence, TrainingUnit};

const TAG_TRAIN: u8 = 0x01;
const TAG_VALIDATE: u8 = 0x02;
const TAG_CHECKPOINT: u8 = 0x03;

const UNIT_RECORDS: u8 = 0x01;
const UNIT_BATCHES: u8 = 0x02;
const UNIT_EPOCHS: u8 = 0x03;

/// Canonical content key of an operation sequence.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Encodes `sequence`.
    #[must_use]
    pub fn of(sequence: &OperationSequence) -> Self {
        let ops = sequence.operations();
        let mut buf = Vec::with_capacity(8 + ops.len() * 6);
        buf.extend_from_slice(&(ops.len() as u64).to_be_bytes());
        for op in ops {
            match *op {
                Operation::Train { unit, count } => {
                    buf.push(TAG_TRAIN);
                    buf.push(match unit {
                        TrainingUnit::Records => UNIT_RECORDS,
                        TrainingUnit::Batches => UNIT_BATCHES,
                        TrainingUnit::Epochs => UNIT_EPOCHS,
                    });
                    buf.extend_from_slice(&count.to_be_bytes());
                }
                Operation::Validate => buf.push(TAG_VALIDATE),
                Operation::Checkpoint => buf.push(TAG_CHECKPOINT),
            }
        }
        Self(buf)
    }

    /// Short stable digest of the encoding.
    #[must_use]
    pub fn digest(&self) -> blake3::Hash {
        blake3::hash(&self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.digest())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.digest(), f)
    }
}

/// Trials sharing one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationGroup {
    /// Key shared by every member.
    #[serde(skip)]
    pub signature: Signature,
    /// The first sequence seen with this signature.
    pub representative: OperationSequence,
    /// Number of trials with this plan.
    pub occurrences: usize,
}

/// Folds sequences into groups, preserving first-seen order.
#[derive(Debug, Default)]
pub struct SignatureGrouper {
    index: HashMap<Signature, usize>,
    groups: Vec<SimulationGroup>,
}

impl SignatureGrouper {
    /// An empty grouper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one sequence, creating a group on first sight.
    pub fn add(&mut self, sequence: OperationSequence) {
        let signature = Signature::of(&sequence);
        if let Some(&i) = self.index.get(&signature) {
            self.groups[i].occurrences += 1;
            return;
        }
        self.index.insert(signature.clone(), self.groups.len());
        self.groups.push(SimulationGroup {
            signature,
            representative: sequence,
            occurrences: 1,
        });
    }

    /// Number of sequences added so far.
    #[must_use]
    pub fn total(&self) -> usize {
        self.groups.iter().map(|g| g.occurrences).sum()
    }

    /// Groups in first-seen order.
    #[must_use]
    pub fn groups(&self) -> &[SimulationGroup] {
        &self.groups
    }

    /// Consumes the grouper, returning groups in first-seen order.
    #[must_use]
    pub fn into_groups(self) -> Vec<SimulationGroup> {
        self.groups
    }
}

impl Extend<OperationSequence> for SignatureGrouper {
    fn extend<I: IntoIterator<Item = OperationSequence>>(&mut self, iter: I) {
        for sequence in iter {
            self.add(sequence);
        }
    }
}

impl FromIterator<OperationSequence> for SignatureGrouper {
    fn from_iter<I: IntoIterator<Item = OperationSequence>>(iter: I) -> Self {
        let mut grouper = Self::new();
        grouper.extend(iter);
        grouper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn seq(ops: &[Operation]) -> OperationSequence {
        ops.iter().copied().collect()
    }

    #[test]
    fn identical_sequences_share_a_group() {
        let a = seq(&[Operation::train(TrainingUnit::Batches, 100), Operation::Validate]);
        let b = seq(&[Operation::train(TrainingUnit::Batches, 50), Operation::Checkpoint]);

        let grouper: SignatureGrouper = vec![a.clone(), b.clone(), a.clone(), a.clone()]
            .into_iter()
            .collect();
        let groups = grouper.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].representative, a);
        assert_eq!(groups[0].occurrences, 3);
        assert_eq!(groups[1].representative, b);
        assert_eq!(groups[1].occurrences, 1);
        assert_eq!(grouper.total(), 4);
    }

    #[test]
    fn unit_and_count_both_distinguish() {
        let records = seq(&[Operation::train(TrainingUnit::Records, 1)]);
        let batches = seq(&[Operation::train(TrainingUnit::Batches, 1)]);
        let more = seq(&[Operation::train(TrainingUnit::Batches, 2)]);
        assert_ne!(Signature::of(&records), Signature::of(&batches));
        assert_ne!(Signature::of(&batches), Signature::of(&more));
    }

    #[test]
    fn prefix_is_not_confused_with_whole() {
        let short = seq(&[Operation::Validate]);
        let long = seq(&[Operation::Validate, Operation::Validate]);
        let empty = OperationSequence::new();
        assert_ne!(Signature::of(&short), Signature::of(&long));
        assert_ne!(Signature::of(&empty), Signature::of(&short));
    }

    #[test]
    fn digest_is_stable_and_displayed() {
        let s = Signature::of(&seq(&[Operation::Checkpoint]));
        assert_eq!(s.digest(), Signature::of(&seq(&[Operation::Checkpoint])).digest());
        assert_eq!(s.to_string().len(), 64);
        assert!(format!("{s:?}").starts_with("Signature("));
    }

    fn arb_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            (0u8..3, -2i32..3).prop_map(|(u, count)| {
                let unit = match u {
                    0 => TrainingUnit::Records,
                    1 => TrainingUnit::Batches,
                    _ => TrainingUnit::Epochs,
                };
                Operation::train(unit, count)
            }),
            Just(Operation::Validate),
            Just(Operation::Checkpoint),
        ]
    }

    fn arb_sequence() -> impl Strategy<Value = OperationSequence> {
        prop::collection::vec(arb_operation(), 0..4).prop_map(OperationSequence::from)
    }

    proptest! {
        #[test]
        fn signature_equal_iff_sequences_equal(a in arb_sequence(), b in arb_sequence()) {
            prop_assert_eq!(Signature::of(&a) == Signature::of(&b), a == b);
        }

        #[test]
        fn occurrences_sum_to_input(seqs in prop::collection::vec(arb_sequence(), 0..40)) {
            let grouper: SignatureGrouper = seqs.iter().cloned().collect();
            prop_assert_eq!(grouper.total(), seqs.len());

            let groups = grouper.groups();
            for (i, g) in groups.iter().enumerate() {
                let members = seqs.iter().filter(|s| **s == g.representative).count();
                prop_assert_eq!(members, g.occurrences);
                for other in &groups[i + 1..] {
                    prop_assert_ne!(&g.representative, &other.representative);
                }
            }

            // First-seen order.
            let firsts: Vec<usize> = groups
                .iter()
                .map(|g| seqs.iter().position(|s| *s == g.representative).unwrap())
                .collect();
            prop_assert!(firsts.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
