//! Property tests for the Pareto archive invariants.

use chromafit::compute::estimation::{FrontEntry, ParetoFront, dominates, similar};
use proptest::prelude::*;

fn objective_vectors(dims: usize, count: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(
        prop::collection::vec(0.0f64..1.0, dims),
        1..count,
    )
}

proptest! {
    /// After any insertion sequence the archive never retains a dominated
    /// entry.
    #[test]
    fn no_dominated_pair_retained(vectors in objective_vectors(3, 40)) {
        let mut front = ParetoFront::new();
        for objectives in vectors {
            front.insert(FrontEntry::new(objectives.clone(), objectives));
        }

        let entries = front.entries();
        for (i, a) in entries.iter().enumerate() {
            for (j, b) in entries.iter().enumerate() {
                if i != j {
                    prop_assert!(
                        !dominates(&a.objectives, &b.objectives),
                        "{:?} dominates {:?}",
                        a.objectives,
                        b.objectives
                    );
                }
            }
        }
    }

    /// No two retained entries are mutually similar.
    #[test]
    fn no_similar_pair_retained(vectors in objective_vectors(2, 30)) {
        let mut front = ParetoFront::new();
        for objectives in vectors {
            front.insert(FrontEntry::new(objectives.clone(), objectives));
        }

        let entries = front.entries();
        for (i, a) in entries.iter().enumerate() {
            for b in entries.iter().skip(i + 1) {
                prop_assert!(!similar(&a.objectives, &b.objectives));
            }
        }
    }

    /// Inserting the same candidate twice never grows the archive.
    #[test]
    fn insertion_idempotent(vectors in objective_vectors(3, 20)) {
        let mut front = ParetoFront::new();
        for objectives in &vectors {
            front.insert(FrontEntry::new(objectives.clone(), objectives.clone()));
        }
        let size = front.len();

        for objectives in &vectors {
            let admitted = front.insert(FrontEntry::new(objectives.clone(), objectives.clone()));
            prop_assert!(!admitted);
        }
        prop_assert_eq!(front.len(), size);
    }

    /// The similarity predicate is symmetric and reflexive.
    #[test]
    fn similarity_symmetric_reflexive(
        a in prop::collection::vec(-1.0f64..1.0, 4),
        b in prop::collection::vec(-1.0f64..1.0, 4),
    ) {
        prop_assert!(similar(&a, &a));
        prop_assert_eq!(similar(&a, &b), similar(&b, &a));
    }
}
