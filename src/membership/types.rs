/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types specific to membership and election.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{clock::Timestamp, storage::accessors::StoreError, types::data_types::ArbitratorId};

/// One arbitrator's entry in the shared arbitrators table.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ArbitratorRecord {
    pub id: ArbitratorId,
    pub last_heartbeat: Timestamp,
    pub is_master: bool,
    /// The replicated settings, as last published by this arbitrator while it was master.
    pub settings: BTreeMap<String, String>,
}

impl ArbitratorRecord {
    pub fn new(id: ArbitratorId, now: Timestamp) -> Self {
        Self {
            id,
            last_heartbeat: now,
            is_master: false,
            settings: BTreeMap::new(),
        }
    }

    /// Whether the record's heartbeat is at most `heartbeat_timeout` old.
    pub fn is_live(&self, now: Timestamp, heartbeat_timeout: Duration) -> bool {
        !now.exceeds(self.last_heartbeat, heartbeat_timeout)
    }
}

/// An arbitrator's role, from its own point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Unregistered,
    Registering,
    Slave,
    Master,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unregistered => write!(f, "Unregistered"),
            Role::Registering => write!(f, "Registering"),
            Role::Slave => write!(f, "Slave"),
            Role::Master => write!(f, "Master"),
        }
    }
}

/// A change reported by [`Membership::tick`](super::implementation::Membership::tick).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipTransition {
    /// The own record was accepted into the arbitrators table.
    Registered,
    /// No live master was found and this arbitrator has the lowest live id.
    BecameMaster,
    /// The own record was removed voluntarily.
    Deregistered,
    /// The own record went missing or stale. The arbitrator must stop acting on shared state.
    Lapsed,
    /// As master, removed the records of arbitrators whose heartbeats timed out.
    Reaped(Vec<ArbitratorId>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MembershipConfiguration {
    pub me: ArbitratorId,
    pub arbitrator_count: u32,
    pub register_interval: Duration,
    pub register_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub master_recheck_interval: Duration,
    pub master_absence_timeout: Duration,
}

#[derive(Debug)]
pub enum MembershipError {
    /// Registration was not accepted within the registration timeout.
    RegistrationTimeout,
    /// As a slave, found no live master, and was not eligible to take over, for longer than the master
    /// absence timeout.
    NoLiveMaster,
    Store(StoreError),
}

impl Display for MembershipError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MembershipError::RegistrationTimeout => write!(f, "registration timed out"),
            MembershipError::NoLiveMaster => write!(f, "no live master"),
            MembershipError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for MembershipError {}

impl From<StoreError> for MembershipError {
    fn from(value: StoreError) -> Self {
        MembershipError::Store(value)
    }
}
