use std::collections::HashMap;
use std::sync::RwLock;

use rand::Rng;

use crate::types::Table;

/// Keys of parent rows whose insertion has been confirmed on the source.
///
/// Append-only and bounded per table: once a table holds `capacity` keys, further keys are
/// not recorded. Keys are never invalidated within a run, so readers may see a slightly
/// stale but always valid view.
#[derive(Debug)]
pub struct ParentKeyCache {
    capacity: usize,
    keys: RwLock<HashMap<Table, Vec<u64>>>,
}

impl ParentKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Records a confirmed key, returns `false` when the table is already full.
    pub fn record(&self, table: Table, key: u64) -> bool {
        let mut keys = match self.keys.write() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = keys.entry(table).or_default();
        if entry.len() >= self.capacity {
            return false;
        }

        entry.push(key);
        true
    }

    /// Picks a random confirmed key of `table`.
    pub fn choose<R: Rng + ?Sized>(&self, table: Table, rng: &mut R) -> Option<u64> {
        let keys = match self.keys.read() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = keys.get(&table)?;
        if entry.is_empty() {
            return None;
        }

        Some(entry[rng.random_range(0..entry.len())])
    }

    pub fn len(&self, table: Table) -> usize {
        match self.keys.read() {
            Ok(keys) => keys.get(&table).map_or(0, Vec::len),
            Err(poisoned) => poisoned.into_inner().get(&table).map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}
