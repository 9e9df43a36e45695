/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events an arbitrator emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published on
//! the tick-loop thread and delivered to handlers on the event bus thread, so handlers never block the
//! tick.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    account_store::types::StoreFailure,
    types::data_types::{ArbitratorId, ClientId, Fingerprint, SuperpeerId, ZoneId},
};

pub enum Event {
    // Membership events.
    RegisterArbitrator(RegisterArbitratorEvent),
    BecomeMaster(BecomeMasterEvent),
    DeregisterArbitrator(DeregisterArbitratorEvent),
    ReapArbitrator(ReapArbitratorEvent),
    // Zone grid events.
    SplitZone(SplitZoneEvent),
    MergeZone(MergeZoneEvent),
    AssignSuperpeer(AssignSuperpeerEvent),
    RemoveSuperpeer(RemoveSuperpeerEvent),
    // Account store events.
    SubmitStoreRequest(SubmitStoreRequestEvent),
    CommitAccountState(CommitAccountStateEvent),
    StoreFailed(StoreFailedEvent),
    PersistFailed(PersistFailedEvent),
    // Replication events.
    ReplicateState(ReplicateStateEvent),
    ApplyReplicatedState(ApplyReplicatedStateEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only stops after the tick loop, so a failed send can be ignored.
            let _ = event_publisher.send(event);
        }
    }
}

/// This arbitrator's record was accepted into the arbitrators table.
pub struct RegisterArbitratorEvent {
    pub timestamp: SystemTime,
    pub arbitrator: ArbitratorId,
}

pub struct BecomeMasterEvent {
    pub timestamp: SystemTime,
    pub arbitrator: ArbitratorId,
}

/// This arbitrator left the cluster, either voluntarily or because its record lapsed.
pub struct DeregisterArbitratorEvent {
    pub timestamp: SystemTime,
    pub arbitrator: ArbitratorId,
    pub lapsed: bool,
}

/// The master removed the records of arbitrators whose heartbeats timed out.
pub struct ReapArbitratorEvent {
    pub timestamp: SystemTime,
    pub arbitrators: Vec<ArbitratorId>,
}

pub struct SplitZoneEvent {
    pub timestamp: SystemTime,
    pub parent: ZoneId,
    pub children: (ZoneId, ZoneId),
}

pub struct MergeZoneEvent {
    pub timestamp: SystemTime,
    pub parent: ZoneId,
    pub retired: (ZoneId, ZoneId),
}

pub struct AssignSuperpeerEvent {
    pub timestamp: SystemTime,
    pub zone: ZoneId,
    pub superpeer: SuperpeerId,
    pub client: ClientId,
}

pub struct RemoveSuperpeerEvent {
    pub timestamp: SystemTime,
    pub zone: ZoneId,
    pub superpeer: SuperpeerId,
    pub client: ClientId,
}

/// The master accepted a store request into the pending set.
pub struct SubmitStoreRequestEvent {
    pub timestamp: SystemTime,
    pub client: ClientId,
    pub superpeer: SuperpeerId,
    pub fingerprint: Fingerprint,
    pub reason: String,
}

/// A version of a client's account reached quorum and was durably written.
pub struct CommitAccountStateEvent {
    pub timestamp: SystemTime,
    pub client: ClientId,
    pub fingerprint: Fingerprint,
    pub superpeers: Vec<SuperpeerId>,
}

/// A client's pending requests were discarded without a commit.
pub struct StoreFailedEvent {
    pub timestamp: SystemTime,
    pub client: ClientId,
    pub failure: StoreFailure,
    pub discarded: usize,
}

/// Writing a version that reached quorum failed. Its requests stay pending.
pub struct PersistFailedEvent {
    pub timestamp: SystemTime,
    pub client: ClientId,
    pub fingerprint: Fingerprint,
}

/// The master wrote the replicated settings and the zone grid snapshot to the record store.
pub struct ReplicateStateEvent {
    pub timestamp: SystemTime,
    pub zone_info_last_modified: u64,
}

/// A slave loaded the replicated settings and the zone grid snapshot from the record store.
pub struct ApplyReplicatedStateEvent {
    pub timestamp: SystemTime,
    pub zone_info_last_modified: u64,
}
