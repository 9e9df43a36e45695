/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of the shared record store.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    account_store::types::StoreAccountRequest,
    membership::types::ArbitratorRecord,
    service::types::ClientRecord,
    types::data_types::{AccountSnapshot, ArbitratorId, ClientId},
    zone_grid::types::ZoneGridSnapshot,
};

use super::variables::{self, concat};

/// A key-value store shared by every arbitrator in the cluster.
///
/// Besides plain batched writes, implementations must provide [`atomic_update`](Self::atomic_update):
/// a read-modify-write that no other writer, in this process or another, can interleave with. The
/// cluster tables (arbitrators and active clients) are only ever changed through it.
pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError>;

    /// Run `update` against a consistent view of the store and atomically write the batch it returns.
    fn atomic_update<R, F>(&mut self, update: F) -> Result<R, KVWriteError>
    where
        F: FnOnce(&dyn KVGet) -> (Self::WriteBatch, R);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Arbitrators ↓↓↓ */

    fn arbitrators(&self) -> Result<BTreeMap<ArbitratorId, ArbitratorRecord>, KVGetError> {
        match self.get(&variables::ARBITRATORS) {
            Some(bytes) => deserialize_value(&bytes, Key::Arbitrators),
            None => Ok(BTreeMap::new()),
        }
    }

    /* ↓↓↓ Active Clients ↓↓↓ */

    fn active_clients(&self) -> Result<BTreeMap<ClientId, ClientRecord>, KVGetError> {
        match self.get(&variables::ACTIVE_CLIENTS) {
            Some(bytes) => deserialize_value(&bytes, Key::ActiveClients),
            None => Ok(BTreeMap::new()),
        }
    }

    /* ↓↓↓ Replicated Settings ↓↓↓ */

    fn replicated_settings(&self) -> Result<BTreeMap<String, String>, KVGetError> {
        match self.get(&variables::REPLICATED_SETTINGS) {
            Some(bytes) => deserialize_value(&bytes, Key::ReplicatedSettings),
            None => Ok(BTreeMap::new()),
        }
    }

    /* ↓↓↓ Zone Snapshot ↓↓↓ */

    fn zone_snapshot(&self) -> Result<Option<ZoneGridSnapshot>, KVGetError> {
        self.get(&variables::ZONE_SNAPSHOT)
            .map(|bytes| deserialize_value(&bytes, Key::ZoneSnapshot))
            .transpose()
    }

    fn zone_info_last_modified(&self) -> Result<Option<u64>, KVGetError> {
        self.get(&variables::ZONE_INFO_LAST_MODIFIED)
            .map(|bytes| deserialize_value(&bytes, Key::ZoneInfoLastModified))
            .transpose()
    }

    /* ↓↓↓ Accounts ↓↓↓ */

    fn account(&self, client: &ClientId) -> Result<Option<AccountSnapshot>, KVGetError> {
        self.get(&concat(&variables::ACCOUNTS, &client.int().to_le_bytes()))
            .map(|bytes| deserialize_value(&bytes, Key::Account { client: *client }))
            .transpose()
    }

    /* ↓↓↓ Pending Store Requests ↓↓↓ */

    fn pending_store_requests(&self) -> Result<Vec<StoreAccountRequest>, KVGetError> {
        match self.get(&variables::PENDING_STORE_REQUESTS) {
            Some(bytes) => deserialize_value(&bytes, Key::PendingStoreRequests),
            None => Ok(Vec::new()),
        }
    }
}

fn deserialize_value<T: BorshDeserialize>(bytes: &[u8], key: Key) -> Result<T, KVGetError> {
    T::deserialize(&mut &*bytes).map_err(|err| KVGetError::DeserializeValueError { key, source: err })
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "could not deserialize {}: {}", key, source)
            }
        }
    }
}

/// Error when writing a key-value pair into a write batch.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

impl Display for KVSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "could not serialize {}: {}", key, source)
            }
        }
    }
}

/// Error returned by the [key value store][KVStore] when a write batch could not be applied. A failed
/// write must leave the store unchanged.
#[derive(Debug)]
pub enum KVWriteError {
    WriteFailed { reason: String },
}

impl Display for KVWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KVWriteError::WriteFailed { reason } => write!(f, "write failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Arbitrators,
    ActiveClients,
    ReplicatedSettings,
    ZoneSnapshot,
    ZoneInfoLastModified,
    Account { client: ClientId },
    PendingStoreRequests,
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::Arbitrators => write!(f, "Arbitrators"),
            Key::ActiveClients => write!(f, "Active Clients"),
            Key::ReplicatedSettings => write!(f, "Replicated Settings"),
            Key::ZoneSnapshot => write!(f, "Zone Snapshot"),
            Key::ZoneInfoLastModified => write!(f, "Zone Info Last Modified"),
            Key::Account { client } => write!(f, "Account of client {}", client),
            Key::PendingStoreRequests => write!(f, "Pending Store Requests"),
        }
    }
}

pub(crate) fn serialize_value<T: BorshSerialize>(value: &T, key: Key) -> Result<Vec<u8>, KVSetError> {
    value
        .try_to_vec()
        .map_err(|err| KVSetError::SerializeValueError { key, source: err })
}
