//! Non-dominated archive with similarity deduplication.
//!
//! Two archives of this type run in parallel during a search: one over the
//! raw per-feature objectives and one over the five meta scores. Both
//! maximize every coordinate.

use std::hash::{Hash, Hasher};

/// Relative tolerance below which two objective vectors count as the same
/// point on the front.
pub const SIMILARITY_TOLERANCE: f64 = 1e-6;

/// One archived candidate.
#[derive(Debug, Clone)]
pub struct FrontEntry {
    /// Transformed-space coordinates.
    pub individual: Vec<f64>,
    /// Objective vector the archive orders by.
    pub objectives: Vec<f64>,
    /// Content-hash save name for result files.
    pub save_name: String,
}

impl FrontEntry {
    pub fn new(individual: Vec<f64>, objectives: Vec<f64>) -> Self {
        let save_name = save_name(&individual);
        Self {
            individual,
            objectives,
            save_name,
        }
    }
}

/// Stable content hash of a candidate, used to name its result files.
pub fn save_name(individual: &[f64]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for value in individual {
        value.to_bits().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

/// `a` dominates `b`: at least as good everywhere, strictly better somewhere.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly = false;
    for (x, y) in a.iter().zip(b.iter()) {
        if x < y {
            return false;
        }
        if x > y {
            strictly = true;
        }
    }
    strictly
}

/// Component-wise relative closeness. Symmetric and reflexive.
pub fn similar(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| {
            let scale = x.abs().max(y.abs());
            if scale == 0.0 {
                return true;
            }
            (x - y).abs() / scale < SIMILARITY_TOLERANCE
        })
}

/// Non-dominated, deduplicated archive.
#[derive(Debug, Clone, Default)]
pub struct ParetoFront {
    entries: Vec<FrontEntry>,
}

impl ParetoFront {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to admit a candidate.
    ///
    /// Dominated or near-duplicate candidates are rejected; an admitted
    /// candidate evicts every entry it dominates. Returns whether the
    /// candidate is now on the front. Insertion is idempotent.
    pub fn insert(&mut self, entry: FrontEntry) -> bool {
        for existing in &self.entries {
            if dominates(&existing.objectives, &entry.objectives) {
                return false;
            }
            // Near-duplicates along flat stretches of the front would
            // otherwise accumulate without bound.
            if similar(&existing.objectives, &entry.objectives) {
                return false;
            }
        }

        self.entries
            .retain(|existing| !dominates(&entry.objectives, &existing.objectives));
        self.entries.push(entry);
        true
    }

    pub fn entries(&self) -> &[FrontEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best entry by a scalar reduction of the objectives.
    pub fn best_by<F: Fn(&[f64]) -> f64>(&self, key: F) -> Option<&FrontEntry> {
        self.entries.iter().max_by(|a, b| {
            key(&a.objectives)
                .partial_cmp(&key(&b.objectives))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(objectives: &[f64]) -> FrontEntry {
        FrontEntry::new(objectives.to_vec(), objectives.to_vec())
    }

    #[test]
    fn test_dominates() {
        assert!(dominates(&[1.0, 1.0], &[0.5, 1.0]));
        assert!(!dominates(&[1.0, 0.4], &[0.5, 0.5]));
        assert!(!dominates(&[1.0, 1.0], &[1.0, 1.0]));
    }

    #[test]
    fn test_similar_symmetric_reflexive() {
        let a = vec![0.5, 0.25];
        let b = vec![0.5 * (1.0 + 1e-8), 0.25];
        assert!(similar(&a, &a));
        assert!(similar(&a, &b));
        assert!(similar(&b, &a));
        assert!(!similar(&a, &[0.6, 0.25]));
    }

    #[test]
    fn test_insert_evicts_dominated() {
        let mut front = ParetoFront::new();
        assert!(front.insert(entry(&[0.5, 0.5])));
        assert!(front.insert(entry(&[1.0, 1.0])));
        assert_eq!(front.len(), 1);
        assert_eq!(front.entries()[0].objectives, vec![1.0, 1.0]);
    }

    #[test]
    fn test_insert_rejects_dominated() {
        let mut front = ParetoFront::new();
        assert!(front.insert(entry(&[1.0, 1.0])));
        assert!(!front.insert(entry(&[0.5, 0.5])));
        assert_eq!(front.len(), 1);
    }

    #[test]
    fn test_insert_idempotent() {
        let mut front = ParetoFront::new();
        assert!(front.insert(entry(&[0.7, 0.3])));
        assert!(!front.insert(entry(&[0.7, 0.3])));
        assert_eq!(front.len(), 1);
    }

    #[test]
    fn test_keeps_mutually_nondominated() {
        let mut front = ParetoFront::new();
        assert!(front.insert(entry(&[1.0, 0.0])));
        assert!(front.insert(entry(&[0.0, 1.0])));
        assert!(front.insert(entry(&[0.5, 0.5])));
        assert_eq!(front.len(), 3);
    }

    #[test]
    fn test_rejects_similar_nondominated() {
        let mut front = ParetoFront::new();
        assert!(front.insert(entry(&[1.0, 0.5])));
        // Tiny relative wiggle in opposite directions: mutually
        // non-dominated but similar.
        assert!(!front.insert(entry(&[1.0 + 1e-9, 0.5 - 1e-10])));
        assert_eq!(front.len(), 1);
    }

    #[test]
    fn test_save_name_stable() {
        let a = vec![1.0, 2.0, 3.0];
        assert_eq!(save_name(&a), save_name(&a));
        assert_ne!(save_name(&a), save_name(&[1.0, 2.0, 3.1]));
    }
}
