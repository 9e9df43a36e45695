/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deciding which superpeer-reported account mutations are trustworthy enough to persist.
//!
//! Superpeers simulate the clients in their zone and periodically report each client's persistent
//! account state as a [`StoreAccountRequest`](types::StoreAccountRequest). Any single superpeer may be
//! buggy, malicious, or simply behind, so no single report is written to durable storage. Instead, the
//! master arbitrator collects reports and only commits a version once enough independent superpeers
//! agree on it.
//!
//! # The quorum sweep
//!
//! Reports about one client form a group. Reports are compared by a content
//! [fingerprint](types::StoreAccountRequest::fingerprint), so byte-identical state arriving via
//! different paths lands in the same bucket. Once per `store_request_check_interval` the master calls
//! [`sweep`](implementation::AccountStoreArbitrator::sweep), which decides every group atomically:
//! 1. Reports older than the store timeout no longer count.
//! 2. The remaining reports are bucketed by fingerprint. The first bucket, in arrival order, to be
//!    backed by `quorum` distinct superpeers wins, and the group is marked as committing.
//! 3. If no bucket wins and any report in the group has timed out, the whole group is discarded with a
//!    [`StoreTimeout`](types::StoreFailure::StoreTimeout) (reports agreed but were too few) or
//!    [`StoreQuorumFailed`](types::StoreFailure::StoreQuorumFailed) (reports disagreed) notification.
//!
//! # Two-phase commit
//!
//! Durable writes are slow and may fail, so they never run inside a tick. The service hands the winning
//! version to the [persister](persister) thread and later reports the result through
//! [`complete_persist`](implementation::AccountStoreArbitrator::complete_persist). Only a successful
//! write removes the client's reports; a failed one leaves them in place for the next sweep.

pub mod implementation;

pub(crate) mod persister;

pub mod types;
