use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Table;

/// Builds markers that are unique within a run and distinguishable across runs.
///
/// Single rows get `{prefix}{salt}_{code}_{seq}`, batch rows `{prefix}{salt}_{code}_b{batch}_{i}`.
/// The salt is drawn once per factory, sequences are per table and never reused.
#[derive(Debug)]
pub struct MarkerFactory {
    run_prefix: String,
    sequences: [AtomicU64; Table::INSERT_ORDER.len()],
    batches: AtomicU64,
}

impl MarkerFactory {
    /// Creates a factory with a fresh random salt after `prefix`.
    pub fn new(prefix: &str) -> Self {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        Self::with_salt(prefix, &salt[..8])
    }

    /// Creates a factory with a fixed salt.
    pub fn with_salt(prefix: &str, salt: &str) -> Self {
        Self {
            run_prefix: format!("{prefix}{salt}_"),
            sequences: Default::default(),
            batches: AtomicU64::new(0),
        }
    }

    /// Returns the prefix shared by every marker of this run.
    pub fn run_prefix(&self) -> &str {
        &self.run_prefix
    }

    /// Returns the next single-row marker for `table`.
    pub fn next(&self, table: Table) -> String {
        let seq = self.sequences[table.index()].fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}_{seq}", self.run_prefix, table.code())
    }

    /// Reserves a batch and returns its marker prefix and the markers of its `count` rows.
    pub fn next_batch(&self, table: Table, count: usize) -> (String, Vec<String>) {
        let batch = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        let prefix = format!("{}{}_b{batch}_", self.run_prefix, table.code());
        let markers = (1..=count).map(|i| format!("{prefix}{i}")).collect();

        (prefix, markers)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn markers_follow_the_documented_layout() {
        let factory = MarkerFactory::with_salt("cdcb_", "0a1b2c3d");
        assert_eq!(factory.run_prefix(), "cdcb_0a1b2c3d_");
        assert_eq!(factory.next(Table::Orders), "cdcb_0a1b2c3d_or_1");
        assert_eq!(factory.next(Table::Orders), "cdcb_0a1b2c3d_or_2");
        assert_eq!(factory.next(Table::Customers), "cdcb_0a1b2c3d_cu_1");

        let (prefix, markers) = factory.next_batch(Table::Products, 2);
        assert_eq!(prefix, "cdcb_0a1b2c3d_pr_b1_");
        assert_eq!(markers, vec!["cdcb_0a1b2c3d_pr_b1_1", "cdcb_0a1b2c3d_pr_b1_2"]);
    }

    #[test]
    fn salts_differ_between_factories() {
        let first = MarkerFactory::new("cdcb_");
        let second = MarkerFactory::new("cdcb_");
        assert_ne!(first.run_prefix(), second.run_prefix());
        assert_eq!(first.run_prefix().len(), "cdcb_".len() + 9);
    }

    #[test]
    fn concurrent_markers_are_unique() {
        let factory = Arc::new(MarkerFactory::new("cdcb_"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| factory.next(Table::Orders))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for marker in handle.join().unwrap() {
                assert!(seen.insert(marker));
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
