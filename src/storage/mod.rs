/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The durable state shared by every arbitrator in a cluster.
//!
//! # Pluggable persistence
//!
//! - The record store is kept in persistent storage that every arbitrator process can reach, for
//!   example a relational database or a replicated key-value service.
//! - Library users get to choose how exactly this is done.
//! - The arbitrator merely requires that whatever the user provides implements the abstract
//!   functionality of a key-value store with atomic, batched writes and an atomic read-modify-write.
//! - This abstract functionality is made concrete by the traits defined in the [`pluggables`] module.
//!
//! # Accessing the record store
//!
//! Implementations of the pluggable traits get wrapped inside a
//! [`RecordStore`](accessors::RecordStore), which puts every record at the right key (listed in
//! [`variables`]) and exposes typed operations such as
//! [`persist_account`](accessors::RecordStore::persist_account) and
//! [`register_arbitrator`](accessors::RecordStore::register_arbitrator).

pub mod accessors;

#[cfg(test)]
pub(crate) mod mem_store;

pub mod pluggables;

pub mod variables;
