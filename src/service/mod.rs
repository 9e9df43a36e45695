/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run an arbitrator.
//!
//! An arbitrator is one process in the coordination cluster of the world simulation. Every arbitrator
//! accepts client connections and answers their requests, but only the arbitrator currently holding
//! the master role mutates the shared [zone grid](crate::zone_grid) and decides
//! [account store](crate::account_store) quorums. Which arbitrator that is, is decided by
//! [membership](crate::membership).
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the arbitrator](ArbitratorSpec) with:
//!   1. `ArbitratorSpec::builder` to construct an `ArbitratorSpecBuilder`,
//!   2. The setters of the `ArbitratorSpecBuilder`, and
//!   3. The `ArbitratorSpecBuilder::build` method to construct an [ArbitratorSpec],
//! - The function to [start](ArbitratorSpec::start) an [Arbitrator] given its specification,
//! - [The type](Arbitrator) which keeps the arbitrator alive,
//! - [The service](implementation::ArbitratorService) whose [tick](implementation::ArbitratorService::tick)
//!   is the body of the arbitrator's main loop.
//!
//! ## Starting an arbitrator
//!
//! ```ignore
//! let arbitrator =
//!     ArbitratorSpec::builder()
//!     .network(network)
//!     .kv_store(kv_store)
//!     .clock(SystemClock)
//!     .configuration(configuration)
//!     .on_become_master(become_master_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.clock(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_register_arbitrator(...)`
//! - `.on_become_master(...)`
//! - `.on_deregister_arbitrator(...)`
//! - `.on_reap_arbitrator(...)`
//! - `.on_split_zone(...)`
//! - `.on_merge_zone(...)`
//! - `.on_assign_superpeer(...)`
//! - `.on_remove_superpeer(...)`
//! - `.on_submit_store_request(...)`
//! - `.on_commit_account_state(...)`
//! - `.on_store_failed(...)`
//! - `.on_persist_failed(...)`
//! - `.on_replicate_state(...)`
//! - `.on_apply_replicated_state(...)`
//!
//! The arbitrator's [configuration](Configuration) is also defined using the builder pattern. Only `me`
//! is required:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(ArbitratorId::new(1))
//!     .overpopulation_threshold(8)
//!     .log_events(true)
//!     .build()
//! ```
//!
//! ## Threads
//!
//! A started arbitrator runs four threads:
//! 1. The poller, which moves messages from the [network](crate::networking) into the inbox.
//! 2. The persister, which performs account writes and posts their results into the inbox.
//! 3. The tick loop, which drains the inbox and drives every subsystem once per `tick_interval`.
//! 4. The event bus, which runs event handlers. Only started if any handler is registered, or
//!    `log_events` is set.

use std::{
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    account_store::{persister::start_persister, types::AccountStoreConfiguration},
    clock::Clock,
    event_bus::*,
    events::*,
    membership::types::MembershipConfiguration,
    networking::{network::Network, receiving::start_polling},
    storage::{accessors::RecordStore, pluggables::KVStore},
    types::data_types::ArbitratorId,
    zone_grid::types::ZoneGridConfiguration,
};

use self::{
    implementation::{ArbitratorService, Persister},
    types::{ArbitratorError, ConfigurationError, ServiceConfiguration, TickStatus},
};

pub mod implementation;

pub mod types;

/// Stores the user-defined parameters required to start the arbitrator.
///
/// ## Timers
///
/// Every interval and timeout is checked once per tick, so none of them is enforced more precisely than
/// `tick_interval`. `heartbeat_timeout` should comfortably exceed `heartbeat_interval` plus a tick, or
/// arbitrators will see each other flicker between live and dead.
///
/// ## Log Events
///
/// The arbitrator logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`

    Every other setter is optional and falls back to the default in its documentation.
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set this arbitrator's id. Lower ids win elections. Required."))]
    pub me: ArbitratorId,
    #[builder(default = 4, setter(doc = "Set the maximum number of live arbitrators. Defaults to 4."))]
    pub arbitrator_count: u32,
    #[builder(default, setter(strip_option, doc = "Set the range from which this arbitrator draws a random lifetime, after which it deregisters. Defaults to unlimited."))]
    pub arbitrator_lifetime: Option<(Duration, Duration)>,
    #[builder(default = 400, setter(doc = "Set the width of the world. Defaults to 400."))]
    pub world_width: u32,
    #[builder(default = 400, setter(doc = "Set the height of the world. Defaults to 400."))]
    pub world_height: u32,
    #[builder(default = 64, setter(doc = "Set the minimum width of a zone. Defaults to 64."))]
    pub minimum_zone_width: u32,
    #[builder(default = 64, setter(doc = "Set the minimum height of a zone. Defaults to 64."))]
    pub minimum_zone_height: u32,
    #[builder(default = 5, setter(doc = "Set the population at which a zone splits. Defaults to 5."))]
    pub overpopulation_threshold: u32,
    #[builder(default = 2, setter(doc = "Set the population at or below which sibling zones merge. Twice this must stay below the overpopulation threshold. Defaults to 2."))]
    pub underpopulation_threshold: u32,
    #[builder(default = 3, setter(doc = "Set the number of superpeers per zone, which is also the store quorum. Defaults to 3."))]
    pub zone_superpeer_count: u32,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the time between registration attempts. Defaults to 1s."))]
    pub register_interval: Duration,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set the time after which an unsuccessful registration aborts. Defaults to 10s."))]
    pub register_timeout: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the time between heartbeats. Defaults to 1s."))]
    pub heartbeat_interval: Duration,
    #[builder(default = Duration::from_secs(5), setter(doc = "Set the heartbeat age after which an arbitrator is considered dead. Defaults to 5s."))]
    pub heartbeat_timeout: Duration,
    #[builder(default = Duration::from_secs(2), setter(doc = "Set the time between checks for a live master. Defaults to 2s."))]
    pub master_recheck_interval: Duration,
    #[builder(default = Duration::from_secs(30), setter(doc = "Set how long a slave tolerates having no live master before failing. Defaults to 30s."))]
    pub master_absence_timeout: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set the time between quorum sweeps. Defaults to 500ms."))]
    pub store_request_check_interval: Duration,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set the age after which a store request no longer counts. Defaults to 10s."))]
    pub store_request_timeout: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set the time between writes of the replicated state. Defaults to 1s."))]
    pub replication_interval: Duration,
    #[builder(default = Duration::from_millis(50), setter(doc = "Set the time between ticks of the main loop. Defaults to 50ms."))]
    pub tick_interval: Duration,
    #[builder(default = false, setter(doc = "Enable logging of events? Defaults to false."))]
    pub log_events: bool,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.arbitrator_count == 0 {
            return Err(ConfigurationError::ZeroArbitratorCount);
        }
        if self.zone_superpeer_count == 0 {
            return Err(ConfigurationError::ZeroSuperpeerCount);
        }
        if self.underpopulation_threshold.saturating_mul(2) >= self.overpopulation_threshold {
            return Err(ConfigurationError::ThresholdsOverlap {
                underpopulation: self.underpopulation_threshold,
                overpopulation: self.overpopulation_threshold,
            });
        }
        if self.minimum_zone_width > self.world_width || self.minimum_zone_height > self.world_height {
            return Err(ConfigurationError::MinimumZoneLargerThanWorld);
        }
        if let Some((min, max)) = self.arbitrator_lifetime {
            if min > max {
                return Err(ConfigurationError::EmptyLifetimeRange);
            }
        }
        Ok(())
    }
}

impl From<Configuration>
    for (
        MembershipConfiguration,
        ZoneGridConfiguration,
        AccountStoreConfiguration,
        ServiceConfiguration,
    )
{
    fn from(config: Configuration) -> Self {
        let membership_config = MembershipConfiguration {
            me: config.me,
            arbitrator_count: config.arbitrator_count,
            register_interval: config.register_interval,
            register_timeout: config.register_timeout,
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_timeout: config.heartbeat_timeout,
            master_recheck_interval: config.master_recheck_interval,
            master_absence_timeout: config.master_absence_timeout,
        };
        let zone_grid_config = ZoneGridConfiguration {
            world_width: config.world_width,
            world_height: config.world_height,
            minimum_zone_width: config.minimum_zone_width,
            minimum_zone_height: config.minimum_zone_height,
            overpopulation_threshold: config.overpopulation_threshold,
            underpopulation_threshold: config.underpopulation_threshold,
            zone_superpeer_count: config.zone_superpeer_count,
        };
        let account_store_config = AccountStoreConfiguration {
            quorum: config.zone_superpeer_count,
            store_request_timeout: config.store_request_timeout,
        };
        let service_config = ServiceConfiguration {
            me: config.me,
            arbitrator_lifetime: config.arbitrator_lifetime,
            store_request_check_interval: config.store_request_check_interval,
            replication_interval: config.replication_interval,
            tick_interval: config.tick_interval,
        };
        (
            membership_config,
            zone_grid_config,
            account_store_config,
            service_config,
        )
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Arbitrator].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [ArbitratorSpec]. On the builder call the following methods to construct a valid [ArbitratorSpec].

    Required:
    - `.network(...)`
    - `.kv_store(...)`
    - `.clock(...)`
    - `.configuration(...)`

    Optional:
    - `.on_register_arbitrator(...)`
    - `.on_become_master(...)`
    - `.on_deregister_arbitrator(...)`
    - `.on_reap_arbitrator(...)`
    - `.on_split_zone(...)`
    - `.on_merge_zone(...)`
    - `.on_assign_superpeer(...)`
    - `.on_remove_superpeer(...)`
    - `.on_submit_store_request(...)`
    - `.on_commit_account_state(...)`
    - `.on_store_failed(...)`
    - `.on_persist_failed(...)`
    - `.on_replicate_state(...)`
    - `.on_apply_replicated_state(...)`
"))]
pub struct ArbitratorSpec<K: KVStore, N: Network + 'static, C: Clock> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of the transport to clients, superpeers, and other arbitrators. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the shared record store. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the source of time for every timer. Required."))]
    clock: C,
    #[builder(setter(doc = "Set the configuration, which contains the necessary parameters to run an arbitrator. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&RegisterArbitratorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RegisterArbitratorEvent>),
    doc = "Register a handler closure to be invoked after the arbitrator's registration is accepted. Optional."))]
    on_register_arbitrator: Option<HandlerPtr<RegisterArbitratorEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BecomeMasterEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BecomeMasterEvent>),
    doc = "Register a handler closure to be invoked after the arbitrator becomes the master. Optional."))]
    on_become_master: Option<HandlerPtr<BecomeMasterEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DeregisterArbitratorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DeregisterArbitratorEvent>),
    doc = "Register a handler closure to be invoked after the arbitrator leaves the cluster. Optional."))]
    on_deregister_arbitrator: Option<HandlerPtr<DeregisterArbitratorEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReapArbitratorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReapArbitratorEvent>),
    doc = "Register a handler closure to be invoked after the master removes dead arbitrators. Optional."))]
    on_reap_arbitrator: Option<HandlerPtr<ReapArbitratorEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SplitZoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SplitZoneEvent>),
    doc = "Register a handler closure to be invoked after the master splits a zone. Optional."))]
    on_split_zone: Option<HandlerPtr<SplitZoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&MergeZoneEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<MergeZoneEvent>),
    doc = "Register a handler closure to be invoked after the master merges two zones. Optional."))]
    on_merge_zone: Option<HandlerPtr<MergeZoneEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AssignSuperpeerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AssignSuperpeerEvent>),
    doc = "Register a handler closure to be invoked after the master assigns a superpeer. Optional."))]
    on_assign_superpeer: Option<HandlerPtr<AssignSuperpeerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RemoveSuperpeerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RemoveSuperpeerEvent>),
    doc = "Register a handler closure to be invoked after the master removes a superpeer. Optional."))]
    on_remove_superpeer: Option<HandlerPtr<RemoveSuperpeerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SubmitStoreRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SubmitStoreRequestEvent>),
    doc = "Register a handler closure to be invoked after the master accepts a store request. Optional."))]
    on_submit_store_request: Option<HandlerPtr<SubmitStoreRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitAccountStateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitAccountStateEvent>),
    doc = "Register a handler closure to be invoked after an account state is committed. Optional."))]
    on_commit_account_state: Option<HandlerPtr<CommitAccountStateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StoreFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StoreFailedEvent>),
    doc = "Register a handler closure to be invoked after a client's store requests are discarded. Optional."))]
    on_store_failed: Option<HandlerPtr<StoreFailedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PersistFailedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PersistFailedEvent>),
    doc = "Register a handler closure to be invoked after writing a committed account state fails. Optional."))]
    on_persist_failed: Option<HandlerPtr<PersistFailedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReplicateStateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReplicateStateEvent>),
    doc = "Register a handler closure to be invoked after the master replicates its state. Optional."))]
    on_replicate_state: Option<HandlerPtr<ReplicateStateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyReplicatedStateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyReplicatedStateEvent>),
    doc = "Register a handler closure to be invoked after a slave applies replicated state. Optional."))]
    on_apply_replicated_state: Option<HandlerPtr<ApplyReplicatedStateEvent>>,
}

impl<K: KVStore, N: Network + 'static, C: Clock> ArbitratorSpec<K, N, C> {
    /// Starts all threads and channels associated with running an arbitrator, and returns the handles to
    /// them in an [Arbitrator] struct.
    pub fn start(self) -> Result<Arbitrator<K>, ArbitratorError> {
        self.configuration.validate()?;
        let log_events = self.configuration.log_events;
        let tick_interval = self.configuration.tick_interval;

        let (inbox_sender, inbox) = mpsc::channel();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network.clone(), inbox_sender.clone(), poller_shutdown_receiver);

        let (persister_shutdown, persister_shutdown_receiver) = mpsc::channel();
        let (persist_jobs, persist_job_receiver) = mpsc::channel();
        let persister = start_persister(
            RecordStore::new(self.kv_store.clone()),
            persist_job_receiver,
            inbox_sender.clone(),
            persister_shutdown_receiver,
        );

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_register_arbitrator,
            self.on_become_master,
            self.on_deregister_arbitrator,
            self.on_reap_arbitrator,
            self.on_split_zone,
            self.on_merge_zone,
            self.on_assign_superpeer,
            self.on_remove_superpeer,
            self.on_submit_store_request,
            self.on_commit_account_state,
            self.on_store_failed,
            self.on_persist_failed,
            self.on_replicate_state,
            self.on_apply_replicated_state,
        );

        let (event_publisher, event_bus, event_bus_shutdown) = if !event_handlers.is_empty() {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
            (Some(event_publisher), Some(event_bus), Some(event_bus_shutdown))
        } else {
            (None, None, None)
        };

        let service = ArbitratorService::assemble(
            self.configuration,
            RecordStore::new(self.kv_store.clone()),
            self.network,
            self.clock,
            inbox_sender,
            inbox,
            Persister::Background(persist_jobs),
            false,
            event_publisher,
        );

        let (tick_loop_shutdown, tick_loop_shutdown_receiver) = mpsc::channel();
        let tick_loop = start_tick_loop(service, tick_interval, tick_loop_shutdown_receiver);

        Ok(Arbitrator {
            record_store: RecordStore::new(self.kv_store),
            poller: Some(poller),
            poller_shutdown,
            persister: Some(persister),
            persister_shutdown,
            tick_loop: Some(tick_loop),
            tick_loop_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

fn start_tick_loop<K: KVStore, N: Network + 'static, C: Clock>(
    mut service: ArbitratorService<K, N, C>,
    tick_interval: Duration,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut running = true;
        loop {
            match shutdown_signal.try_recv() {
                Ok(()) => {
                    service.shutdown();
                    return;
                }
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Tick loop thread disconnected from main thread")
                }
            }

            if running {
                match service.tick() {
                    Ok(TickStatus::Running) => (),
                    Ok(TickStatus::Stopped(reason)) => {
                        log::info!("Arbitrator {} stopped: {:?}", service.me(), reason);
                        running = false;
                    }
                    Err(err) => {
                        log::error!("Arbitrator {} failed: {}", service.me(), err);
                        running = false;
                    }
                }
            }
            thread::sleep(tick_interval);
        }
    })
}

/// A handle to the background threads of an arbitrator. When this value is dropped, all background
/// threads are gracefully shut down, and the arbitrator deregisters.
pub struct Arbitrator<K: KVStore> {
    record_store: RecordStore<K>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    persister: Option<JoinHandle<()>>,
    persister_shutdown: Sender<()>,
    tick_loop: Option<JoinHandle<()>>,
    tick_loop_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Arbitrator<K> {
    /// Returns a handle into the shared record store, for example to look at the arbitrators table.
    pub fn record_store(&self) -> &RecordStore<K> {
        &self.record_store
    }
}

impl<K: KVStore> Drop for Arbitrator<K> {
    fn drop(&mut self) {
        // The tick loop is stopped first so that it can deregister and publish its final events while the
        // event bus is still running.
        let _ = self.tick_loop_shutdown.send(());
        if let Some(tick_loop) = self.tick_loop.take() {
            let _ = tick_loop.join();
        }

        let _ = self.persister_shutdown.send(());
        if let Some(persister) = self.persister.take() {
            let _ = persister.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }

        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_must_leave_room_for_a_merged_pair() {
        let configuration = |under, over| {
            Configuration::builder()
                .me(ArbitratorId::new(1))
                .underpopulation_threshold(under)
                .overpopulation_threshold(over)
                .build()
        };

        assert!(configuration(2, 5).validate().is_ok());
        assert!(matches!(
            configuration(3, 5).validate(),
            Err(ConfigurationError::ThresholdsOverlap {
                underpopulation: 3,
                overpopulation: 5,
            })
        ));
        assert!(configuration(3, 6).validate().is_err());
        assert!(configuration(3, 7).validate().is_ok());
    }
}
