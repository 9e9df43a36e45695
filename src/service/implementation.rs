/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The arbitrator's main loop body.
//!
//! [`ArbitratorService::tick`] runs the following steps, in order:
//! 1. Drain the inbox: answer client requests, accept or forward store requests, and absorb the
//!    results of durable writes.
//! 2. Deregister if the arbitrator's lifetime is over.
//! 3. Tick [membership](crate::membership), reacting to registration, promotion, and lapses.
//! 4. Perform the duties of the current role. The master recounts populations, evaluates the zone
//!    grid, maintains superpeer slots, sweeps store requests, and replicates its state. A slave loads
//!    the master's replicated state whenever it changed.
//! 5. Push the zone grid to every locally connected client if it changed.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::mpsc::{self, Receiver, Sender},
    time::SystemTime,
};

use rand::Rng;

use crate::{
    account_store::{
        implementation::AccountStoreArbitrator,
        persister::{execute, PersistCompletion, PersistJob},
        types::{AccountStoreConfiguration, StoreAccountRequest, StoreFailure, SweepOutcome},
    },
    clock::{Clock, Timestamp},
    events::*,
    membership::{
        implementation::Membership,
        types::{MembershipError, MembershipTransition, Role},
    },
    networking::{
        messages::{ArbitratorMessage, ClientMessage, Message, ServerMessage, StoreOutcome},
        network::{Network, PeerId},
        receiving::InboxEntry,
        sending::SenderHandle,
    },
    settings::Settings,
    storage::{
        accessors::{RecordStore, StoreError},
        pluggables::KVStore,
    },
    types::data_types::{AccountSnapshot, ArbitratorId, ClientId, SuperpeerId, ZoneId},
    zone_grid::{
        implementation::ZoneGrid,
        types::{GridChange, ZoneGridConfiguration},
    },
};

use super::{
    types::{ArbitratorError, ClientRecord, ServiceConfiguration, StopReason, TickStatus},
    Configuration,
};

/// Where durable account writes are performed.
pub(crate) enum Persister<K: KVStore> {
    /// On the persister thread.
    Background(Sender<PersistJob>),
    /// On the calling thread. The completion is still delivered through the inbox.
    Inline(RecordStore<K>),
}

pub struct ArbitratorService<K: KVStore, N: Network, C: Clock> {
    config: ServiceConfiguration,
    base_zone_grid_config: ZoneGridConfiguration,
    base_account_store_config: AccountStoreConfiguration,
    clock: C,
    records: RecordStore<K>,
    membership: Membership<K>,
    zone_grid: ZoneGrid,
    account_store: AccountStoreArbitrator,
    settings: Settings,
    sender: SenderHandle<N>,
    inbox: Receiver<InboxEntry>,
    inbox_sender: Sender<InboxEntry>,
    persister: Persister<K>,
    poll_network: bool,
    event_publisher: Option<Sender<Event>>,
    sessions: BTreeSet<ClientId>,
    started: bool,
    stopped: Option<StopReason>,
    lifetime_deadline: Option<Timestamp>,
    next_sweep: Timestamp,
    next_replication: Timestamp,
    replicated_zone_info: Option<u64>,
    pushed_zone_info: u64,
}

impl<K: KVStore, N: Network, C: Clock> ArbitratorService<K, N, C> {
    /// Create a service that is driven entirely by the caller: each [`tick`](Self::tick) reads the
    /// network directly and durable writes are made inline. No threads are started and no events are
    /// published.
    pub fn new(configuration: Configuration, kv_store: K, network: N, clock: C) -> Result<Self, ArbitratorError> {
        configuration.validate()?;
        let (inbox_sender, inbox) = mpsc::channel();
        let records = RecordStore::new(kv_store);
        Ok(Self::assemble(
            configuration,
            records.clone(),
            network,
            clock,
            inbox_sender,
            inbox,
            Persister::Inline(records),
            true,
            None,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        configuration: Configuration,
        records: RecordStore<K>,
        network: N,
        clock: C,
        inbox_sender: Sender<InboxEntry>,
        inbox: Receiver<InboxEntry>,
        persister: Persister<K>,
        poll_network: bool,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let (membership_config, zone_grid_config, account_store_config, service_config) = configuration.into();
        Self {
            config: service_config,
            base_zone_grid_config: zone_grid_config,
            base_account_store_config: account_store_config,
            clock,
            membership: Membership::new(membership_config, records.clone()),
            records,
            zone_grid: ZoneGrid::new(zone_grid_config),
            account_store: AccountStoreArbitrator::new(account_store_config),
            settings: Settings::from_configuration(&zone_grid_config, &account_store_config),
            sender: SenderHandle::new(network),
            inbox,
            inbox_sender,
            persister,
            poll_network,
            event_publisher,
            sessions: BTreeSet::new(),
            started: false,
            stopped: None,
            lifetime_deadline: None,
            next_sweep: Timestamp::default(),
            next_replication: Timestamp::default(),
            replicated_zone_info: None,
            pushed_zone_info: 0,
        }
    }

    pub fn me(&self) -> ArbitratorId {
        self.config.me
    }

    pub fn role(&self) -> Role {
        self.membership.role()
    }

    pub fn master(&self) -> Option<ArbitratorId> {
        self.membership.master()
    }

    pub fn zone_grid(&self) -> &ZoneGrid {
        &self.zone_grid
    }

    pub fn account_store(&self) -> &AccountStoreArbitrator {
        &self.account_store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Change a setting and apply it to the local zone grid and account store. A replicated setting
    /// changed on the master reaches slaves at the next replication.
    pub fn set_setting(&mut self, key: &str, value: impl ToString, replicated: bool) {
        self.settings.set(key, value, replicated);
        self.apply_settings();
    }

    /// Run one iteration of the main loop.
    ///
    /// # Errors
    /// Returns an error only for failures that end this arbitrator's participation in the cluster:
    /// registration timing out, or the cluster staying masterless. Every later call returns
    /// [`Stopped`](TickStatus::Stopped).
    pub fn tick(&mut self) -> Result<TickStatus, ArbitratorError> {
        if let Some(reason) = self.stopped {
            return Ok(TickStatus::Stopped(reason));
        }
        let now = self.clock.now();
        if !self.started {
            self.start(now);
        }

        self.drain_inbox(now);

        if self.lifetime_deadline.is_some_and(|deadline| now >= deadline) {
            log::info!("Arbitrator {} reached the end of its lifetime", self.config.me);
            return Ok(self.stop(StopReason::Deregistered));
        }

        let transitions = match self.membership.tick(now) {
            Ok(transitions) => transitions,
            Err(MembershipError::Store(err)) => {
                log::warn!("Arbitrator {} membership tick: {}", self.config.me, err);
                Vec::new()
            }
            Err(err) => {
                self.stopped = Some(StopReason::Failed);
                if let Err(err) = self.membership.deregister() {
                    log::warn!("Arbitrator {} could not remove its record: {}", self.config.me, err);
                }
                return Err(err.into());
            }
        };
        for transition in transitions {
            if let Some(reason) = self.on_transition(transition, now) {
                self.stopped = Some(reason);
                return Ok(TickStatus::Stopped(reason));
            }
        }

        match self.membership.role() {
            Role::Master => self.master_duties(now),
            Role::Slave => self.slave_duties(now),
            Role::Unregistered | Role::Registering => (),
        }

        self.push_zone_grid();
        Ok(TickStatus::Running)
    }

    /// Deregister, if still registered. Called when the arbitrator is shut down.
    pub fn shutdown(&mut self) {
        if self.stopped.is_none() {
            self.stop(StopReason::Deregistered);
        }
    }

    fn start(&mut self, now: Timestamp) {
        self.started = true;
        self.membership.start(now);
        if let Some((min, max)) = self.config.arbitrator_lifetime {
            let min_millis = min.as_millis() as u64;
            let max_millis = max.as_millis() as u64;
            let lifetime = rand::thread_rng().gen_range(min_millis, max_millis + 1);
            self.lifetime_deadline = Some(Timestamp::new(now.millis().saturating_add(lifetime)));
            log::debug!("Arbitrator {} will live for {}ms", self.config.me, lifetime);
        }
    }

    fn stop(&mut self, reason: StopReason) -> TickStatus {
        match self.membership.deregister() {
            Ok(transitions) => {
                if transitions.contains(&MembershipTransition::Deregistered) {
                    self.publish_deregistration(false);
                }
            }
            Err(err) => log::warn!("Arbitrator {} could not remove its record: {}", self.config.me, err),
        }
        self.stopped = Some(reason);
        TickStatus::Stopped(reason)
    }

    fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    fn publish_deregistration(&self, lapsed: bool) {
        self.publish(Event::DeregisterArbitrator(DeregisterArbitratorEvent {
            timestamp: SystemTime::now(),
            arbitrator: self.config.me,
            lapsed,
        }));
    }

    /// React to a membership transition. Returns a stop reason if the arbitrator left the cluster.
    fn on_transition(&mut self, transition: MembershipTransition, now: Timestamp) -> Option<StopReason> {
        match transition {
            MembershipTransition::Registered => {
                log::info!("Arbitrator {} registered", self.config.me);
                self.publish(Event::RegisterArbitrator(RegisterArbitratorEvent {
                    timestamp: SystemTime::now(),
                    arbitrator: self.config.me,
                }));
                None
            }
            MembershipTransition::BecameMaster => {
                log::info!("Arbitrator {} became master", self.config.me);
                self.publish(Event::BecomeMaster(BecomeMasterEvent {
                    timestamp: SystemTime::now(),
                    arbitrator: self.config.me,
                }));
                self.take_over(now);
                None
            }
            MembershipTransition::Reaped(arbitrators) => {
                self.publish(Event::ReapArbitrator(ReapArbitratorEvent {
                    timestamp: SystemTime::now(),
                    arbitrators,
                }));
                None
            }
            MembershipTransition::Deregistered => {
                self.publish_deregistration(false);
                Some(StopReason::Deregistered)
            }
            MembershipTransition::Lapsed => {
                log::warn!("Arbitrator {} lapsed out of the cluster", self.config.me);
                self.publish_deregistration(true);
                Some(StopReason::Lapsed)
            }
        }
    }

    /// Pick up where the previous master left off: its zone grid, its settings, and its pending store
    /// requests.
    fn take_over(&mut self, now: Timestamp) {
        if let Err(err) = self.load_replicated_state() {
            log::warn!("Arbitrator {} could not load replicated state: {}", self.config.me, err);
        }
        self.account_store = AccountStoreArbitrator::new(*self.account_store.configuration());
        match self.records.load_pending_requests() {
            Ok(requests) => self.account_store.restore(requests),
            Err(err) => log::warn!("Arbitrator {} could not load pending requests: {}", self.config.me, err),
        }
        self.next_sweep = now;
        self.next_replication = now;
    }
}

/// Inbox.
impl<K: KVStore, N: Network, C: Clock> ArbitratorService<K, N, C> {
    fn drain_inbox(&mut self, now: Timestamp) {
        if self.poll_network {
            while let Some((origin, message)) = self.sender.recv() {
                let _ = self.inbox_sender.send(InboxEntry::Message(origin, message));
            }
        }
        while let Ok(entry) = self.inbox.try_recv() {
            match entry {
                InboxEntry::Message(PeerId::Client(origin), Message::Client(message)) => {
                    if let Err(err) = self.on_client_message(origin, message, now) {
                        log::warn!("Arbitrator {} handling client {}: {}", self.config.me, origin, err);
                    }
                }
                InboxEntry::Message(PeerId::Arbitrator(origin), Message::Arbitrator(message)) => {
                    if origin != self.config.me {
                        self.on_arbitrator_message(message);
                    }
                }
                InboxEntry::Message(origin, _) => {
                    log::debug!("Arbitrator {} ignored a misdirected message from {}", self.config.me, origin);
                }
                InboxEntry::Persisted(completion) => self.on_persisted(completion),
            }
        }
    }

    fn on_client_message(&mut self, origin: ClientId, message: ClientMessage, now: Timestamp) -> Result<(), StoreError> {
        let me = self.config.me;
        self.sessions.insert(origin);
        match message {
            ClientMessage::RegisterListening { address } => {
                self.records
                    .update_active_client(origin, me, |record| record.address = Some(address))?;
            }
            ClientMessage::Login => match self.records.account(origin)? {
                Some(account) => {
                    self.records.update_active_client(origin, me, |_| ())?;
                    self.sender.send(PeerId::Client(origin), ServerMessage::LoginAccepted { account });
                }
                None => self.sender.send(PeerId::Client(origin), ServerMessage::LoginRejected),
            },
            ClientMessage::CreateAccount { initial } => {
                self.persist(PersistJob::CreateAccount { client: origin, initial });
            }
            ClientMessage::ChangeZone { zone } => {
                let leaf = self.zone_grid.zone(zone).filter(|leaf| leaf.is_current_leaf());
                match leaf {
                    Some(leaf) => {
                        let reply = ServerMessage::ZoneAssignment {
                            zone,
                            rect: leaf.rect,
                            superpeers: leaf.superpeers.clone(),
                        };
                        self.records
                            .update_active_client(origin, me, |record| record.zone = Some(zone))?;
                        self.sender.send(PeerId::Client(origin), reply);
                    }
                    None => self.sender.send(PeerId::Client(origin), ServerMessage::ZoneRejected { zone }),
                }
            }
            ClientMessage::ReportMovementVector { position, velocity } => {
                if !position.is_finite() || !velocity.is_finite() {
                    log::warn!("Dropping non-finite movement vector from client {}", origin);
                    return Ok(());
                }
                self.records.update_active_client(origin, me, |record| {
                    record.position = Some(position);
                    record.velocity = velocity;
                })?;
            }
            ClientMessage::SubmitAccountState {
                superpeer,
                zone,
                client,
                snapshot,
                reason,
            } => self.on_submit(origin, superpeer, zone, client, snapshot, reason, now),
            ClientMessage::QueryZoneGrid => {
                self.sender
                    .send(PeerId::Client(origin), ServerMessage::ZoneGrid(self.zone_grid.view()));
            }
            ClientMessage::Logout => {
                self.sessions.remove(&origin);
                self.records.remove_active_client(origin)?;
                if self.membership.is_master() {
                    for (zone, slot) in self.zone_grid.remove_client_superpeers(origin) {
                        self.publish(Event::RemoveSuperpeer(RemoveSuperpeerEvent {
                            timestamp: SystemTime::now(),
                            zone,
                            superpeer: slot.id,
                            client: origin,
                        }));
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_submit(
        &mut self,
        origin: ClientId,
        superpeer: SuperpeerId,
        zone: ZoneId,
        client: ClientId,
        snapshot: AccountSnapshot,
        reason: String,
        now: Timestamp,
    ) {
        let owns_slot = self
            .zone_grid
            .superpeer_slot(zone, superpeer)
            .is_some_and(|slot| slot.client == origin);
        if !owns_slot {
            log::debug!(
                "Arbitrator {} rejected a submission by client {} for superpeer {} in zone {}",
                self.config.me,
                origin,
                superpeer,
                zone
            );
            self.sender
                .send(PeerId::Client(origin), ServerMessage::SubmitRejected { client, superpeer });
            return;
        }

        let request = StoreAccountRequest {
            superpeer,
            client,
            zone,
            arrived_on: self.config.me,
            submitted_by: origin,
            snapshot,
            received_at: now,
            reason,
        };
        match (self.membership.role(), self.membership.master()) {
            (Role::Master, _) => self.accept_store_request(request),
            (Role::Slave, Some(master)) => self.sender.send(
                PeerId::Arbitrator(master),
                ArbitratorMessage::ForwardStoreRequest(request),
            ),
            _ => self.sender.send(
                PeerId::Client(origin),
                ServerMessage::StoreFailed {
                    client,
                    reason: StoreFailure::NoLiveMaster,
                },
            ),
        }
    }

    fn accept_store_request(&mut self, request: StoreAccountRequest) {
        let client = request.client;
        let superpeer = request.superpeer;
        let reason = request.reason.clone();
        let fingerprint = self.account_store.submit(request);
        self.publish(Event::SubmitStoreRequest(SubmitStoreRequestEvent {
            timestamp: SystemTime::now(),
            client,
            superpeer,
            fingerprint,
            reason,
        }));
    }

    fn on_arbitrator_message(&mut self, message: ArbitratorMessage) {
        match message {
            ArbitratorMessage::ForwardStoreRequest(request) => {
                if self.membership.is_master() {
                    self.accept_store_request(request);
                } else {
                    log::debug!(
                        "Arbitrator {} dropped a forwarded store request: not the master",
                        self.config.me
                    );
                }
            }
            ArbitratorMessage::StoreOutcome(outcome) => self.relay(&outcome),
        }
    }

    fn on_persisted(&mut self, completion: PersistCompletion) {
        match completion {
            PersistCompletion::Account {
                client,
                fingerprint,
                result,
            } => {
                if let Err(err) = &result {
                    log::warn!("Arbitrator {} persisting account of {}: {}", self.config.me, client, err);
                    self.publish(Event::PersistFailed(PersistFailedEvent {
                        timestamp: SystemTime::now(),
                        client,
                        fingerprint,
                    }));
                }
                match self.account_store.complete_persist(client, fingerprint, result) {
                    Ok(Some(updated)) => {
                        self.publish(Event::CommitAccountState(CommitAccountStateEvent {
                            timestamp: SystemTime::now(),
                            client,
                            fingerprint,
                            superpeers: updated.superpeers,
                        }));
                        let outcome = StoreOutcome::Updated {
                            client,
                            snapshot: updated.snapshot,
                            notify: notify_list(client, updated.submitters),
                        };
                        self.announce(outcome);
                    }
                    Ok(None) => (),
                    Err(err) => log::debug!("Arbitrator {} stale persist completion: {}", self.config.me, err),
                }
            }
            PersistCompletion::CreateAccount { client, result } => match result {
                Ok(true) => self.sender.send(PeerId::Client(client), ServerMessage::AccountCreated),
                Ok(false) => self.sender.send(PeerId::Client(client), ServerMessage::AccountExists),
                Err(err) => log::warn!("Arbitrator {} creating account of {}: {}", self.config.me, client, err),
            },
        }
    }

    fn persist(&mut self, job: PersistJob) {
        match &mut self.persister {
            Persister::Background(jobs) => {
                if jobs.send(job).is_err() {
                    log::warn!("Arbitrator {} persister has stopped", self.config.me);
                }
            }
            Persister::Inline(records) => {
                let completion = execute(records, job);
                let _ = self.inbox_sender.send(InboxEntry::Persisted(completion));
            }
        }
    }

    /// Tell the other arbitrators about `outcome`, and relay it to the clients connected here.
    fn announce(&mut self, outcome: StoreOutcome) {
        self.sender.broadcast(outcome.clone());
        self.relay(&outcome);
    }

    fn relay(&mut self, outcome: &StoreOutcome) {
        let message = outcome.server_message();
        for client in outcome.notify() {
            if self.sessions.contains(client) {
                self.sender.send(PeerId::Client(*client), message.clone());
            }
        }
    }
}

/// Role duties.
impl<K: KVStore, N: Network, C: Clock> ArbitratorService<K, N, C> {
    fn master_duties(&mut self, now: Timestamp) {
        if let Err(err) = self.maintain_zone_grid(now) {
            log::warn!("Arbitrator {} maintaining the zone grid: {}", self.config.me, err);
        }

        if now >= self.next_sweep {
            self.next_sweep = now + self.config.store_request_check_interval;
            self.sweep(now);
        }

        let grid_changed = self.replicated_zone_info != Some(self.zone_grid.zone_info_last_modified());
        if grid_changed || now >= self.next_replication {
            self.next_replication = now + self.config.replication_interval;
            if let Err(err) = self.replicate() {
                log::warn!("Arbitrator {} replicating state: {}", self.config.me, err);
            }
        }
    }

    /// Recount populations from the active clients table, evaluate the grid, and bring every leaf's
    /// superpeer slots up to date.
    fn maintain_zone_grid(&mut self, now: Timestamp) -> Result<(), StoreError> {
        let live: BTreeSet<ArbitratorId> = match self.membership.live_arbitrators(now) {
            Ok(live) => live.into_iter().collect(),
            Err(MembershipError::Store(err)) => return Err(err),
            Err(_) => return Ok(()),
        };
        let clients: BTreeMap<ClientId, ClientRecord> = self
            .records
            .active_clients()?
            .into_iter()
            .filter(|(_, record)| live.contains(&record.arbitrator))
            .collect();

        self.recount_populations(&clients);

        for change in self.zone_grid.evaluate() {
            match change {
                GridChange::Split { parent, children } => {
                    log::debug!("Arbitrator {} split zone {}", self.config.me, parent);
                    self.publish(Event::SplitZone(SplitZoneEvent {
                        timestamp: SystemTime::now(),
                        parent,
                        children,
                    }));
                }
                GridChange::Merge { parent, retired } => {
                    log::debug!("Arbitrator {} merged into zone {}", self.config.me, parent);
                    self.publish(Event::MergeZone(MergeZoneEvent {
                        timestamp: SystemTime::now(),
                        parent,
                        retired,
                    }));
                }
            }
        }

        self.drop_departed_superpeers(&clients);
        self.backfill_superpeers(&clients);
        Ok(())
    }

    fn recount_populations(&mut self, clients: &BTreeMap<ClientId, ClientRecord>) {
        let mut populations: BTreeMap<ZoneId, u32> = self.zone_grid.leaves().map(|leaf| (leaf.id, 0)).collect();
        for position in clients.values().filter_map(|record| record.position) {
            if let Ok(zone) = self.zone_grid.lookup(position) {
                *populations.entry(zone).or_default() += 1;
            }
        }
        for (zone, population) in populations {
            // Every zone in the map is a current leaf.
            let _ = self.zone_grid.record_population(zone, population);
        }
    }

    fn drop_departed_superpeers(&mut self, clients: &BTreeMap<ClientId, ClientRecord>) {
        let mut departed: Vec<(ZoneId, SuperpeerId)> = Vec::new();
        for leaf in self.zone_grid.leaves() {
            for slot in &leaf.superpeers {
                let listening = clients
                    .get(&slot.client)
                    .is_some_and(|record| record.address.is_some());
                if !listening {
                    departed.push((leaf.id, slot.id));
                }
            }
        }
        for (zone, superpeer) in departed {
            if let Ok(slot) = self.zone_grid.remove_superpeer(zone, superpeer) {
                self.publish(Event::RemoveSuperpeer(RemoveSuperpeerEvent {
                    timestamp: SystemTime::now(),
                    zone,
                    superpeer,
                    client: slot.client,
                }));
            }
        }
    }

    /// Fill empty superpeer slots with listening clients located in the zone, lowest client id first.
    fn backfill_superpeers(&mut self, clients: &BTreeMap<ClientId, ClientRecord>) {
        let capacity = self.zone_grid.configuration().zone_superpeer_count as usize;
        let mut openings: BTreeMap<ZoneId, usize> = self
            .zone_grid
            .leaves()
            .filter(|leaf| leaf.superpeers.len() < capacity)
            .map(|leaf| (leaf.id, capacity - leaf.superpeers.len()))
            .collect();
        if openings.is_empty() {
            return;
        }

        for record in clients.values() {
            let (Some(address), Some(position)) = (&record.address, record.position) else {
                continue;
            };
            let Ok(zone) = self.zone_grid.lookup(position) else {
                continue;
            };
            let Some(open) = openings.get_mut(&zone).filter(|open| **open > 0) else {
                continue;
            };
            let holds_slot = self
                .zone_grid
                .zone(zone)
                .is_some_and(|leaf| leaf.superpeers.iter().any(|slot| slot.client == record.client));
            if holds_slot {
                continue;
            }
            let superpeer = self.zone_grid.next_superpeer_id();
            match self
                .zone_grid
                .assign_superpeer(zone, superpeer, record.client, address.clone())
            {
                Ok(()) => {
                    *open -= 1;
                    self.publish(Event::AssignSuperpeer(AssignSuperpeerEvent {
                        timestamp: SystemTime::now(),
                        zone,
                        superpeer,
                        client: record.client,
                    }));
                }
                Err(err) => log::debug!("Arbitrator {} could not assign a superpeer: {}", self.config.me, err),
            }
        }
    }

    fn sweep(&mut self, now: Timestamp) {
        for outcome in self.account_store.sweep(now) {
            match outcome {
                SweepOutcome::Commit(commit) => self.persist(PersistJob::Account {
                    client: commit.client,
                    fingerprint: commit.fingerprint,
                    snapshot: commit.snapshot,
                }),
                SweepOutcome::Failed {
                    client,
                    failure,
                    submitters,
                    discarded,
                } => {
                    self.publish(Event::StoreFailed(StoreFailedEvent {
                        timestamp: SystemTime::now(),
                        client,
                        failure,
                        discarded,
                    }));
                    self.announce(StoreOutcome::Failed {
                        client,
                        reason: failure,
                        notify: notify_list(client, submitters),
                    });
                }
            }
        }

        if let Err(err) = self
            .records
            .save_pending_requests(&self.account_store.pending_requests())
        {
            log::warn!("Arbitrator {} mirroring pending requests: {}", self.config.me, err);
        }
    }

    fn replicate(&mut self) -> Result<(), StoreError> {
        let replicated = self.settings.replicated();
        self.records.save_zone_snapshot(&self.zone_grid.snapshot())?;
        self.records.save_replicated_settings(&replicated)?;
        if let Err(err) = self.membership.publish_settings(replicated) {
            log::warn!("Arbitrator {} publishing settings: {}", self.config.me, err);
        }
        let zone_info_last_modified = self.zone_grid.zone_info_last_modified();
        self.replicated_zone_info = Some(zone_info_last_modified);
        self.publish(Event::ReplicateState(ReplicateStateEvent {
            timestamp: SystemTime::now(),
            zone_info_last_modified,
        }));
        Ok(())
    }

    fn slave_duties(&mut self, now: Timestamp) {
        let stored = match self.records.zone_info_last_modified() {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!("Arbitrator {} reading zone info: {}", self.config.me, err);
                return;
            }
        };
        let grid_changed = stored.is_some_and(|stored| stored != self.zone_grid.zone_info_last_modified());
        if grid_changed || now >= self.next_replication {
            self.next_replication = now + self.config.replication_interval;
            match self.load_replicated_state() {
                Ok(true) => self.publish(Event::ApplyReplicatedState(ApplyReplicatedStateEvent {
                    timestamp: SystemTime::now(),
                    zone_info_last_modified: self.zone_grid.zone_info_last_modified(),
                })),
                Ok(false) => (),
                Err(err) => log::warn!("Arbitrator {} loading replicated state: {}", self.config.me, err),
            }
        }
    }

    /// Load the replicated settings and zone grid snapshot. Returns whether anything changed.
    fn load_replicated_state(&mut self) -> Result<bool, StoreError> {
        let settings_changed = self.settings.apply_replicated(self.records.load_replicated_settings()?);
        if settings_changed {
            self.apply_settings();
        }

        let mut grid_changed = false;
        if let Some(snapshot) = self.records.load_zone_snapshot()? {
            if snapshot.zone_info_last_modified != self.zone_grid.zone_info_last_modified()
                || snapshot.zones.len() != self.zone_grid.zones().len()
            {
                self.zone_grid = ZoneGrid::from_snapshot(*self.zone_grid.configuration(), snapshot);
                grid_changed = true;
            }
        }
        Ok(settings_changed || grid_changed)
    }

    fn apply_settings(&mut self) {
        self.zone_grid
            .reconfigure(self.settings.zone_grid_configuration(self.base_zone_grid_config));
        self.account_store
            .reconfigure(self.settings.account_store_configuration(self.base_account_store_config));
    }

    fn push_zone_grid(&mut self) {
        let zone_info_last_modified = self.zone_grid.zone_info_last_modified();
        if zone_info_last_modified == self.pushed_zone_info {
            return;
        }
        self.pushed_zone_info = zone_info_last_modified;
        let view = self.zone_grid.view();
        for client in &self.sessions {
            self.sender
                .send(PeerId::Client(*client), ServerMessage::ZoneGrid(view.clone()));
        }
    }
}

/// The owner of the account followed by every distinct submitter.
fn notify_list(client: ClientId, submitters: Vec<ClientId>) -> Vec<ClientId> {
    let mut notify = vec![client];
    for submitter in submitters {
        if !notify.contains(&submitter) {
            notify.push(submitter);
        }
    }
    notify
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_list_starts_with_the_owner_and_has_no_duplicates() {
        let owner = ClientId::new(7);
        let submitters = vec![ClientId::new(2), owner, ClientId::new(2), ClientId::new(3)];
        assert_eq!(
            notify_list(owner, submitters),
            vec![owner, ClientId::new(2), ClientId::new(3)]
        );
    }
}
