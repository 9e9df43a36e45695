/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types specific to the arbitrator service.

use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    membership::types::MembershipError,
    types::data_types::{Address, ArbitratorId, ClientId, Point, Velocity, ZoneId},
};

/// A client's entry in the active clients table.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct ClientRecord {
    pub client: ClientId,
    /// The arbitrator the client is connected to.
    pub arbitrator: ArbitratorId,
    /// Set once the client registers as listening. Only listening clients can host superpeers.
    pub address: Option<Address>,
    pub position: Option<Point>,
    pub velocity: Velocity,
    /// The zone the client last asked to be placed in.
    pub zone: Option<ZoneId>,
}

impl ClientRecord {
    pub fn new(client: ClientId, arbitrator: ArbitratorId) -> Self {
        Self {
            client,
            arbitrator,
            address: None,
            position: None,
            velocity: Velocity::default(),
            zone: None,
        }
    }
}

/// The parameters only the service itself reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceConfiguration {
    pub me: ArbitratorId,
    pub arbitrator_lifetime: Option<(Duration, Duration)>,
    pub store_request_check_interval: Duration,
    pub replication_interval: Duration,
    pub tick_interval: Duration,
}

/// Whether the service loop should keep ticking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickStatus {
    Running,
    Stopped(StopReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The arbitrator removed its own record, on shutdown or at the end of its lifetime.
    Deregistered,
    /// The arbitrator's record went missing or stale.
    Lapsed,
    /// Registration timed out, or the cluster stayed masterless for too long.
    Failed,
}

#[derive(Debug)]
pub enum ArbitratorError {
    InvalidConfiguration(ConfigurationError),
    /// Only the fatal membership errors are ever returned.
    Membership(MembershipError),
}

impl Display for ArbitratorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ArbitratorError::InvalidConfiguration(err) => write!(f, "invalid configuration: {}", err),
            ArbitratorError::Membership(err) => write!(f, "membership failed: {}", err),
        }
    }
}

impl std::error::Error for ArbitratorError {}

impl From<ConfigurationError> for ArbitratorError {
    fn from(value: ConfigurationError) -> Self {
        ArbitratorError::InvalidConfiguration(value)
    }
}

impl From<MembershipError> for ArbitratorError {
    fn from(value: MembershipError) -> Self {
        ArbitratorError::Membership(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    ZeroArbitratorCount,
    ZeroSuperpeerCount,
    /// Merging a pair at the underpopulation threshold must not immediately call for a split, so twice
    /// the underpopulation threshold has to stay below the overpopulation threshold.
    ThresholdsOverlap { underpopulation: u32, overpopulation: u32 },
    MinimumZoneLargerThanWorld,
    EmptyLifetimeRange,
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ZeroArbitratorCount => write!(f, "arbitrator count must be positive"),
            ConfigurationError::ZeroSuperpeerCount => write!(f, "zone superpeer count must be positive"),
            ConfigurationError::ThresholdsOverlap {
                underpopulation,
                overpopulation,
            } => write!(
                f,
                "twice the underpopulation threshold {} must be below the overpopulation threshold {}",
                underpopulation, overpopulation
            ),
            ConfigurationError::MinimumZoneLargerThanWorld => {
                write!(f, "minimum zone dimensions exceed the world dimensions")
            }
            ConfigurationError::EmptyLifetimeRange => write!(f, "arbitrator lifetime range is empty"),
        }
    }
}
