/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A volatile, in-memory [`KVStore`] for unit tests. Clones share one map.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::pluggables::{KVGet, KVStore, KVWriteError, WriteBatch};

#[derive(Clone, Default)]
pub(crate) struct MemStore(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

impl MemStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.0.lock().unwrap().contains_key(key)
    }
}

impl KVStore for MemStore {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError> {
        wb.apply(&mut self.0.lock().unwrap());
        Ok(())
    }

    fn atomic_update<R, F>(&mut self, update: F) -> Result<R, KVWriteError>
    where
        F: FnOnce(&dyn KVGet) -> (Self::WriteBatch, R),
    {
        let mut map = self.0.lock().unwrap();
        let (wb, result) = update(&Snapshot(&map));
        wb.apply(&mut map);
        Ok(result)
    }
}

impl KVGet for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }
}

/// Operations in the order they were added. `None` deletes.
pub(crate) struct MemWriteBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

impl MemWriteBatch {
    fn apply(self, map: &mut HashMap<Vec<u8>, Vec<u8>>) {
        for (key, value) in self.0 {
            match value {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }
    }
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch(Vec::new())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.0.push((key.to_vec(), None));
    }
}

struct Snapshot<'a>(&'a HashMap<Vec<u8>, Vec<u8>>);

impl KVGet for Snapshot<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }
}
