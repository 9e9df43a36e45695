//! A simple, volatile, in-memory implementation of [`KVStore`].

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use arbitrator_rs::storage::pluggables::{KVGet, KVStore, KVWriteError, WriteBatch};

/// An in-memory implementation of [`KVStore`]. Clones share the same map, so arbitrators given clones
/// of one `MemDB` share one record store.
#[derive(Clone)]
pub(crate) struct MemDB {
    map: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB {
            map: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every following write fail (or succeed again), for every clone of this `MemDB`.
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), KVWriteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(KVWriteError::WriteFailed {
                reason: String::from("writes disabled"),
            })
        } else {
            Ok(())
        }
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError> {
        self.check_writable()?;
        wb.apply(&mut self.map.lock().unwrap());
        Ok(())
    }

    fn atomic_update<R, F>(&mut self, update: F) -> Result<R, KVWriteError>
    where
        F: FnOnce(&dyn KVGet) -> (Self::WriteBatch, R),
    {
        self.check_writable()?;
        let mut map = self.map.lock().unwrap();
        let (wb, result) = update(&MemDBSnapshot(&map));
        wb.apply(&mut map);
        Ok(result)
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

// A simple implementation of [`WriteBatch`].
pub(crate) struct MemWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl MemWriteBatch {
    fn apply(self, map: &mut HashMap<Vec<u8>, Vec<u8>>) {
        for (key, value) in self.insertions {
            map.insert(key, value);
        }
        for key in self.deletions {
            map.remove(&key);
        }
    }
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}

/// A view of the locked map, handed to the closure of [`KVStore::atomic_update`].
struct MemDBSnapshot<'a, 'b>(&'a MutexGuard<'b, HashMap<Vec<u8>, Vec<u8>>>);

impl KVGet for MemDBSnapshot<'_, '_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }
}
