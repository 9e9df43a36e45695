/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed read-and-write handle over the shared record store.
//!
//! Every arbitrator process, and every thread within one that touches durable state (the tick loop and
//! the persister), holds its own [`RecordStore`] over a clone of the same [`KVStore`]. Reads go
//! straight to the store. Writes to the cluster tables go through
//! [`atomic_update`](KVStore::atomic_update), so that two arbitrators registering or heartbeating at
//! the same moment never lose each other's records.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
    time::Duration,
};

use crate::{
    account_store::types::StoreAccountRequest,
    clock::Timestamp,
    membership::types::ArbitratorRecord,
    service::types::ClientRecord,
    types::data_types::{AccountSnapshot, ArbitratorId, ClientId},
    zone_grid::types::ZoneGridSnapshot,
};

use super::{
    pluggables::{serialize_value, KVGet, KVGetError, KVSetError, KVStore, KVWriteError, Key, WriteBatch},
    variables::{self, concat},
};

/// Read and write handle into the shared record store.
#[derive(Clone)]
pub struct RecordStore<K: KVStore>(K);

impl<K: KVStore> RecordStore<K> {
    pub fn new(kv_store: K) -> Self {
        Self(kv_store)
    }

    /// Atomically write the changes in `write_batch`.
    pub fn write(&mut self, write_batch: RecordStoreWriteBatch<K::WriteBatch>) -> Result<(), StoreError> {
        Ok(self.0.write(write_batch.0)?)
    }

    /// Run `update` against the current store contents and atomically apply the write batch it fills
    /// in. If `update` returns an error, nothing is written.
    fn update<R>(
        &mut self,
        update: impl FnOnce(&dyn KVGet, &mut RecordStoreWriteBatch<K::WriteBatch>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.0.atomic_update(|kv| {
            let mut wb = RecordStoreWriteBatch::new();
            match update(kv, &mut wb) {
                Ok(result) => (wb.0, Ok(result)),
                Err(err) => (K::WriteBatch::new(), Err(err)),
            }
        })?
    }
}

/// Accounts.
impl<K: KVStore> RecordStore<K> {
    pub fn persist_account(&mut self, client: ClientId, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        let mut wb = RecordStoreWriteBatch::new();
        wb.set_account(client, snapshot)?;
        self.write(wb)
    }

    pub fn account(&self, client: ClientId) -> Result<Option<AccountSnapshot>, StoreError> {
        Ok(self.0.account(&client)?)
    }

    /// Create the account of `client` with `initial` state. Returns `false` without writing anything if
    /// the account already exists.
    pub fn create_account(&mut self, client: ClientId, initial: &AccountSnapshot) -> Result<bool, StoreError> {
        self.update(|kv, wb| {
            if kv.account(&client)?.is_some() {
                return Ok(false);
            }
            wb.set_account(client, initial)?;
            Ok(true)
        })
    }
}

/// Replicated settings and zone snapshot.
impl<K: KVStore> RecordStore<K> {
    pub fn load_replicated_settings(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.0.replicated_settings()?)
    }

    pub fn save_replicated_settings(&mut self, settings: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut wb = RecordStoreWriteBatch::new();
        wb.set_replicated_settings(settings)?;
        self.write(wb)
    }

    pub fn load_zone_snapshot(&self) -> Result<Option<ZoneGridSnapshot>, StoreError> {
        Ok(self.0.zone_snapshot()?)
    }

    pub fn zone_info_last_modified(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.0.zone_info_last_modified()?)
    }

    /// Save `snapshot` together with its modification counter in one batch, so a slave never observes a
    /// counter that does not match the stored grid.
    pub fn save_zone_snapshot(&mut self, snapshot: &ZoneGridSnapshot) -> Result<(), StoreError> {
        let mut wb = RecordStoreWriteBatch::new();
        wb.set_zone_snapshot(snapshot)?;
        self.write(wb)
    }
}

/// Arbitrators.
impl<K: KVStore> RecordStore<K> {
    pub fn arbitrator_records(&self) -> Result<BTreeMap<ArbitratorId, ArbitratorRecord>, StoreError> {
        Ok(self.0.arbitrators()?)
    }

    /// Insert `record` unless `capacity` live records already exist or a live record already holds the
    /// same id. A dead record with the same id is replaced. Returns whether the record was inserted.
    pub fn register_arbitrator(
        &mut self,
        record: ArbitratorRecord,
        capacity: u32,
        heartbeat_timeout: Duration,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        self.update(|kv, wb| {
            let mut arbitrators = kv.arbitrators()?;
            let live = arbitrators
                .values()
                .filter(|existing| existing.is_live(now, heartbeat_timeout))
                .count();
            let id_taken = arbitrators
                .get(&record.id)
                .is_some_and(|existing| existing.is_live(now, heartbeat_timeout));
            if id_taken || live >= capacity as usize {
                return Ok(false);
            }
            arbitrators.insert(record.id, record);
            wb.set_arbitrators(&arbitrators)?;
            Ok(true)
        })
    }

    /// Refresh the heartbeat of `arbitrator`. Returns `false` if its record no longer exists.
    pub fn heartbeat(&mut self, arbitrator: ArbitratorId, now: Timestamp) -> Result<bool, StoreError> {
        self.update(|kv, wb| {
            let mut arbitrators = kv.arbitrators()?;
            match arbitrators.get_mut(&arbitrator) {
                Some(record) => record.last_heartbeat = now,
                None => return Ok(false),
            }
            wb.set_arbitrators(&arbitrators)?;
            Ok(true)
        })
    }

    /// Flag `arbitrator` as the master, clearing the flag on every other record. Returns `false` if its
    /// record no longer exists.
    pub fn set_master(&mut self, arbitrator: ArbitratorId, now: Timestamp) -> Result<bool, StoreError> {
        self.update(|kv, wb| {
            let mut arbitrators = kv.arbitrators()?;
            if !arbitrators.contains_key(&arbitrator) {
                return Ok(false);
            }
            for record in arbitrators.values_mut() {
                record.is_master = record.id == arbitrator;
                if record.id == arbitrator {
                    record.last_heartbeat = now;
                }
            }
            wb.set_arbitrators(&arbitrators)?;
            Ok(true)
        })
    }

    pub fn set_arbitrator_settings(
        &mut self,
        arbitrator: ArbitratorId,
        settings: BTreeMap<String, String>,
    ) -> Result<bool, StoreError> {
        self.update(|kv, wb| {
            let mut arbitrators = kv.arbitrators()?;
            match arbitrators.get_mut(&arbitrator) {
                Some(record) => record.settings = settings,
                None => return Ok(false),
            }
            wb.set_arbitrators(&arbitrators)?;
            Ok(true)
        })
    }

    pub fn remove_arbitrator(&mut self, arbitrator: ArbitratorId) -> Result<Option<ArbitratorRecord>, StoreError> {
        self.update(|kv, wb| {
            let mut arbitrators = kv.arbitrators()?;
            let removed = arbitrators.remove(&arbitrator);
            if removed.is_some() {
                wb.set_arbitrators(&arbitrators)?;
            }
            Ok(removed)
        })
    }

    /// Remove every record whose heartbeat is older than `heartbeat_timeout`, together with the active
    /// client entries those arbitrators held. Returns the ids of the removed records.
    pub fn reap_arbitrators(
        &mut self,
        now: Timestamp,
        heartbeat_timeout: Duration,
    ) -> Result<Vec<ArbitratorId>, StoreError> {
        self.update(|kv, wb| {
            let mut arbitrators = kv.arbitrators()?;
            let dead: BTreeSet<ArbitratorId> = arbitrators
                .values()
                .filter(|record| !record.is_live(now, heartbeat_timeout))
                .map(|record| record.id)
                .collect();
            if dead.is_empty() {
                return Ok(Vec::new());
            }
            arbitrators.retain(|id, _| !dead.contains(id));
            wb.set_arbitrators(&arbitrators)?;

            let mut clients = kv.active_clients()?;
            let before = clients.len();
            clients.retain(|_, client| !dead.contains(&client.arbitrator));
            if clients.len() != before {
                wb.set_active_clients(&clients)?;
            }

            Ok(dead.into_iter().collect())
        })
    }
}

/// Active clients.
impl<K: KVStore> RecordStore<K> {
    /// Apply `update` to the record of `client`, creating a record held by `arbitrator` first if there is
    /// none. Returns the updated record.
    pub fn update_active_client(
        &mut self,
        client: ClientId,
        arbitrator: ArbitratorId,
        update: impl FnOnce(&mut ClientRecord),
    ) -> Result<ClientRecord, StoreError> {
        self.update(|kv, wb| {
            let mut clients = kv.active_clients()?;
            let record = clients
                .entry(client)
                .or_insert_with(|| ClientRecord::new(client, arbitrator));
            record.arbitrator = arbitrator;
            update(record);
            let updated = record.clone();
            wb.set_active_clients(&clients)?;
            Ok(updated)
        })
    }

    pub fn remove_active_client(&mut self, client: ClientId) -> Result<Option<ClientRecord>, StoreError> {
        self.update(|kv, wb| {
            let mut clients = kv.active_clients()?;
            let removed = clients.remove(&client);
            if removed.is_some() {
                wb.set_active_clients(&clients)?;
            }
            Ok(removed)
        })
    }

    pub fn active_clients(&self) -> Result<BTreeMap<ClientId, ClientRecord>, StoreError> {
        Ok(self.0.active_clients()?)
    }
}

/// Pending store requests.
impl<K: KVStore> RecordStore<K> {
    pub fn save_pending_requests(&mut self, requests: &[StoreAccountRequest]) -> Result<(), StoreError> {
        let mut wb = RecordStoreWriteBatch::new();
        wb.set_pending_store_requests(requests)?;
        self.write(wb)
    }

    pub fn load_pending_requests(&self) -> Result<Vec<StoreAccountRequest>, StoreError> {
        Ok(self.0.pending_store_requests()?)
    }
}

/// Errors that may be encountered when reading or writing to the [`RecordStore`].
#[derive(Debug)]
pub enum StoreError {
    /// Error when trying to get a value from the underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// Error when trying to serialize a value into a write batch.
    KVSetError(KVSetError),

    /// The underlying key value store refused to apply a write batch.
    KVWriteError(KVWriteError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::KVGetError(err) => write!(f, "store read error: {}", err),
            StoreError::KVSetError(err) => write!(f, "store serialization error: {}", err),
            StoreError::KVWriteError(err) => write!(f, "store write error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<KVGetError> for StoreError {
    fn from(value: KVGetError) -> Self {
        StoreError::KVGetError(value)
    }
}

impl From<KVSetError> for StoreError {
    fn from(value: KVSetError) -> Self {
        StoreError::KVSetError(value)
    }
}

impl From<KVWriteError> for StoreError {
    fn from(value: KVWriteError) -> Self {
        StoreError::KVWriteError(value)
    }
}

/// A write batch that knows where each record lives.
pub struct RecordStoreWriteBatch<W: WriteBatch>(W);

impl<W: WriteBatch> RecordStoreWriteBatch<W> {
    pub fn new() -> RecordStoreWriteBatch<W> {
        RecordStoreWriteBatch(W::new())
    }

    /// Write the arbitrators table. An empty table deletes its key.
    pub fn set_arbitrators(
        &mut self,
        arbitrators: &BTreeMap<ArbitratorId, ArbitratorRecord>,
    ) -> Result<(), KVSetError> {
        if arbitrators.is_empty() {
            self.0.delete(&variables::ARBITRATORS);
        } else {
            self.0
                .set(&variables::ARBITRATORS, &serialize_value(arbitrators, Key::Arbitrators)?);
        }
        Ok(())
    }

    /// Write the active clients table. An empty table deletes its key.
    pub fn set_active_clients(&mut self, clients: &BTreeMap<ClientId, ClientRecord>) -> Result<(), KVSetError> {
        if clients.is_empty() {
            self.0.delete(&variables::ACTIVE_CLIENTS);
        } else {
            self.0
                .set(&variables::ACTIVE_CLIENTS, &serialize_value(clients, Key::ActiveClients)?);
        }
        Ok(())
    }

    pub fn set_replicated_settings(&mut self, settings: &BTreeMap<String, String>) -> Result<(), KVSetError> {
        self.0.set(
            &variables::REPLICATED_SETTINGS,
            &serialize_value(settings, Key::ReplicatedSettings)?,
        );
        Ok(())
    }

    pub fn set_zone_snapshot(&mut self, snapshot: &ZoneGridSnapshot) -> Result<(), KVSetError> {
        self.0
            .set(&variables::ZONE_SNAPSHOT, &serialize_value(snapshot, Key::ZoneSnapshot)?);
        self.0.set(
            &variables::ZONE_INFO_LAST_MODIFIED,
            &serialize_value(&snapshot.zone_info_last_modified, Key::ZoneInfoLastModified)?,
        );
        Ok(())
    }

    pub fn set_account(&mut self, client: ClientId, snapshot: &AccountSnapshot) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::ACCOUNTS, &client.int().to_le_bytes()),
            &serialize_value(snapshot, Key::Account { client })?,
        );
        Ok(())
    }

    pub fn set_pending_store_requests(&mut self, requests: &[StoreAccountRequest]) -> Result<(), KVSetError> {
        if requests.is_empty() {
            self.0.delete(&variables::PENDING_STORE_REQUESTS);
        } else {
            self.0.set(
                &variables::PENDING_STORE_REQUESTS,
                &serialize_value(&requests.to_vec(), Key::PendingStoreRequests)?,
            );
        }
        Ok(())
    }
}
