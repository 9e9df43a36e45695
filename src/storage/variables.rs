/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each shared record is stored in the user-provided key-value store.
//!
//! # List of Records
//!
//! Every arbitrator in a cluster points at the same key-value store. The store holds seven conceptual
//! "variables", grouped into three categories:
//!
//! ## Cluster
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Arbitrators|[`BTreeMap`](std::collections::BTreeMap)<[`ArbitratorId`](crate::types::data_types::ArbitratorId), [`ArbitratorRecord`](crate::membership::types::ArbitratorRecord)>|Every registered arbitrator and its last heartbeat. Dead records are reaped by the master.|
//! |Active Clients|[`BTreeMap`](std::collections::BTreeMap)<[`ClientId`](crate::types::data_types::ClientId), [`ClientRecord`](crate::service::types::ClientRecord)>|Every logged-in client, the arbitrator holding its session, and its last reported position.|
//! |Replicated Settings|[`BTreeMap`](std::collections::BTreeMap)<[`String`], [`String`]>|The settings the master tags for replication.|
//!
//! ## Zones
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Zone Snapshot|[`ZoneGridSnapshot`](crate::zone_grid::types::ZoneGridSnapshot)|The master's zone grid as of its last replication.|
//! |Zone Info Last Modified|[`u64`]|The modification counter of the replicated zone snapshot. Slaves compare it against their local grid's counter to decide whether to reload.|
//!
//! ## Accounts
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Accounts|[`ClientId`](crate::types::data_types::ClientId) -> [`AccountSnapshot`](crate::types::data_types::AccountSnapshot)|Committed account state of every client.|
//! |Pending Store Requests|[`Vec`]<[`StoreAccountRequest`](crate::account_store::types::StoreAccountRequest)>|Crash-recovery mirror of the master's pending set.|
//!
//! # Persistence of records
//!
//! Single values are stored under one-byte constant keys sharing the variable's name. Mappings of the
//! form "`A` -> `B`" are stored under the concatenation of the variable's one-byte prefix and the
//! Borsh serialization of `A`. All values are Borsh-serialized.
//!
//! The cluster tables are single values rather than mappings because the master must enumerate them,
//! and the pluggable [`KVGet`](super::pluggables::KVGet) offers point lookups only.

pub const ARBITRATORS: [u8; 1] = [0];
pub const ACTIVE_CLIENTS: [u8; 1] = [1];
pub const REPLICATED_SETTINGS: [u8; 1] = [2];
pub const ZONE_SNAPSHOT: [u8; 1] = [3];
pub const ZONE_INFO_LAST_MODIFIED: [u8; 1] = [4];
pub const ACCOUNTS: [u8; 1] = [5];
pub const PENDING_STORE_REQUESTS: [u8; 1] = [6];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
