/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types specific to account store arbitration.

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::{
    clock::Timestamp,
    types::data_types::{AccountSnapshot, ArbitratorId, ClientId, Fingerprint, SuperpeerId, ZoneId},
};

/// A superpeer's claim about the account state of one client.
///
/// Requests are never edited after creation. A later request from the same superpeer with the same
/// content replaces the earlier one.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoreAccountRequest {
    pub superpeer: SuperpeerId,
    /// The client whose account the claim is about.
    pub client: ClientId,
    pub zone: ZoneId,
    /// The arbitrator whose connection the request arrived on.
    pub arrived_on: ArbitratorId,
    /// The client hosting the submitting superpeer.
    pub submitted_by: ClientId,
    pub snapshot: AccountSnapshot,
    pub received_at: Timestamp,
    /// Free-text diagnostic. Never part of the fingerprint.
    pub reason: String,
}

impl StoreAccountRequest {
    /// SHA-256 over the Borsh encoding of the client id and the snapshot bytes.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self.client, &self.snapshot)
    }
}

pub fn fingerprint(client: ClientId, snapshot: &AccountSnapshot) -> Fingerprint {
    let mut hasher = Sha256::new();
    // Safety: Borsh serialization of an integer and a byte vector into memory never fails.
    hasher.update((client, snapshot.bytes().to_vec()).try_to_vec().unwrap());
    Fingerprint::new(hasher.finalize().into())
}

/// Why a client's pending requests were discarded without a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum StoreFailure {
    /// All reports agreed, but too few superpeers reported before the oldest timed out.
    StoreTimeout,
    /// Superpeers disagreed and no version reached quorum before the oldest timed out.
    StoreQuorumFailed,
    /// The arbitrator that received the request knew of no live master to forward it to.
    NoLiveMaster,
}

impl Display for StoreFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreFailure::StoreTimeout => write!(f, "StoreTimeout"),
            StoreFailure::StoreQuorumFailed => write!(f, "StoreQuorumFailed"),
            StoreFailure::NoLiveMaster => write!(f, "NoLiveMaster"),
        }
    }
}

/// A decision taken by [`AccountStoreArbitrator::sweep`](super::implementation::AccountStoreArbitrator::sweep).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// A version reached quorum. It must be persisted and the result reported through
    /// [`complete_persist`](super::implementation::AccountStoreArbitrator::complete_persist).
    Commit(PendingCommit),
    /// The client's group was discarded.
    Failed {
        client: ClientId,
        failure: StoreFailure,
        /// Every client that submitted one of the discarded requests.
        submitters: Vec<ClientId>,
        discarded: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommit {
    pub client: ClientId,
    pub fingerprint: Fingerprint,
    pub snapshot: AccountSnapshot,
    /// The distinct superpeers that agreed, in the order their reports arrived.
    pub superpeers: Vec<SuperpeerId>,
}

/// The "state updated" notification produced once a commit has been persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateUpdated {
    pub client: ClientId,
    pub fingerprint: Fingerprint,
    pub snapshot: AccountSnapshot,
    pub superpeers: Vec<SuperpeerId>,
    /// Every client that submitted a request for this account, agreeing or not.
    pub submitters: Vec<ClientId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountStoreConfiguration {
    /// The number of distinct agreeing superpeers needed to commit.
    pub quorum: u32,
    pub store_request_timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStoreError {
    /// There are no pending requests for the client.
    UnknownClient { client: ClientId },
}

impl Display for AccountStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AccountStoreError::UnknownClient { client } => {
                write!(f, "no pending store requests for client {}", client)
            }
        }
    }
}

impl std::error::Error for AccountStoreError {}
