/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the tick loop and fires the
//! handlers registered for them.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) register_arbitrator_handlers: Vec<HandlerPtr<RegisterArbitratorEvent>>,
    pub(crate) become_master_handlers: Vec<HandlerPtr<BecomeMasterEvent>>,
    pub(crate) deregister_arbitrator_handlers: Vec<HandlerPtr<DeregisterArbitratorEvent>>,
    pub(crate) reap_arbitrator_handlers: Vec<HandlerPtr<ReapArbitratorEvent>>,
    pub(crate) split_zone_handlers: Vec<HandlerPtr<SplitZoneEvent>>,
    pub(crate) merge_zone_handlers: Vec<HandlerPtr<MergeZoneEvent>>,
    pub(crate) assign_superpeer_handlers: Vec<HandlerPtr<AssignSuperpeerEvent>>,
    pub(crate) remove_superpeer_handlers: Vec<HandlerPtr<RemoveSuperpeerEvent>>,
    pub(crate) submit_store_request_handlers: Vec<HandlerPtr<SubmitStoreRequestEvent>>,
    pub(crate) commit_account_state_handlers: Vec<HandlerPtr<CommitAccountStateEvent>>,
    pub(crate) store_failed_handlers: Vec<HandlerPtr<StoreFailedEvent>>,
    pub(crate) persist_failed_handlers: Vec<HandlerPtr<PersistFailedEvent>>,
    pub(crate) replicate_state_handlers: Vec<HandlerPtr<ReplicateStateEvent>>,
    pub(crate) apply_replicated_state_handlers: Vec<HandlerPtr<ApplyReplicatedStateEvent>>,
}

/// Collect the user-defined handler (if any) and, if `log_events` is set, the default logger of one event
/// type.
fn handlers<T: Logger>(log_events: bool, user_defined: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = user_defined {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        register_arbitrator_handler: Option<HandlerPtr<RegisterArbitratorEvent>>,
        become_master_handler: Option<HandlerPtr<BecomeMasterEvent>>,
        deregister_arbitrator_handler: Option<HandlerPtr<DeregisterArbitratorEvent>>,
        reap_arbitrator_handler: Option<HandlerPtr<ReapArbitratorEvent>>,
        split_zone_handler: Option<HandlerPtr<SplitZoneEvent>>,
        merge_zone_handler: Option<HandlerPtr<MergeZoneEvent>>,
        assign_superpeer_handler: Option<HandlerPtr<AssignSuperpeerEvent>>,
        remove_superpeer_handler: Option<HandlerPtr<RemoveSuperpeerEvent>>,
        submit_store_request_handler: Option<HandlerPtr<SubmitStoreRequestEvent>>,
        commit_account_state_handler: Option<HandlerPtr<CommitAccountStateEvent>>,
        store_failed_handler: Option<HandlerPtr<StoreFailedEvent>>,
        persist_failed_handler: Option<HandlerPtr<PersistFailedEvent>>,
        replicate_state_handler: Option<HandlerPtr<ReplicateStateEvent>>,
        apply_replicated_state_handler: Option<HandlerPtr<ApplyReplicatedStateEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            register_arbitrator_handlers: handlers(log_events, register_arbitrator_handler),
            become_master_handlers: handlers(log_events, become_master_handler),
            deregister_arbitrator_handlers: handlers(log_events, deregister_arbitrator_handler),
            reap_arbitrator_handlers: handlers(log_events, reap_arbitrator_handler),
            split_zone_handlers: handlers(log_events, split_zone_handler),
            merge_zone_handlers: handlers(log_events, merge_zone_handler),
            assign_superpeer_handlers: handlers(log_events, assign_superpeer_handler),
            remove_superpeer_handlers: handlers(log_events, remove_superpeer_handler),
            submit_store_request_handlers: handlers(log_events, submit_store_request_handler),
            commit_account_state_handlers: handlers(log_events, commit_account_state_handler),
            store_failed_handlers: handlers(log_events, store_failed_handler),
            persist_failed_handlers: handlers(log_events, persist_failed_handler),
            replicate_state_handlers: handlers(log_events, replicate_state_handler),
            apply_replicated_state_handlers: handlers(log_events, apply_replicated_state_handler),
        }
    }

    /// Whether no handler at all is registered, in which case the event bus thread is not started.
    pub(crate) fn is_empty(&self) -> bool {
        self.register_arbitrator_handlers.is_empty()
            && self.become_master_handlers.is_empty()
            && self.deregister_arbitrator_handlers.is_empty()
            && self.reap_arbitrator_handlers.is_empty()
            && self.split_zone_handlers.is_empty()
            && self.merge_zone_handlers.is_empty()
            && self.assign_superpeer_handlers.is_empty()
            && self.remove_superpeer_handlers.is_empty()
            && self.submit_store_request_handlers.is_empty()
            && self.commit_account_state_handlers.is_empty()
            && self.store_failed_handlers.is_empty()
            && self.persist_failed_handlers.is_empty()
            && self.replicate_state_handlers.is_empty()
            && self.apply_replicated_state_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::RegisterArbitrator(register_arbitrator_event) => self
                .register_arbitrator_handlers
                .iter()
                .for_each(|handler| handler(&register_arbitrator_event)),

            Event::BecomeMaster(become_master_event) => self
                .become_master_handlers
                .iter()
                .for_each(|handler| handler(&become_master_event)),

            Event::DeregisterArbitrator(deregister_arbitrator_event) => self
                .deregister_arbitrator_handlers
                .iter()
                .for_each(|handler| handler(&deregister_arbitrator_event)),

            Event::ReapArbitrator(reap_arbitrator_event) => self
                .reap_arbitrator_handlers
                .iter()
                .for_each(|handler| handler(&reap_arbitrator_event)),

            Event::SplitZone(split_zone_event) => self
                .split_zone_handlers
                .iter()
                .for_each(|handler| handler(&split_zone_event)),

            Event::MergeZone(merge_zone_event) => self
                .merge_zone_handlers
                .iter()
                .for_each(|handler| handler(&merge_zone_event)),

            Event::AssignSuperpeer(assign_superpeer_event) => self
                .assign_superpeer_handlers
                .iter()
                .for_each(|handler| handler(&assign_superpeer_event)),

            Event::RemoveSuperpeer(remove_superpeer_event) => self
                .remove_superpeer_handlers
                .iter()
                .for_each(|handler| handler(&remove_superpeer_event)),

            Event::SubmitStoreRequest(submit_store_request_event) => self
                .submit_store_request_handlers
                .iter()
                .for_each(|handler| handler(&submit_store_request_event)),

            Event::CommitAccountState(commit_account_state_event) => self
                .commit_account_state_handlers
                .iter()
                .for_each(|handler| handler(&commit_account_state_event)),

            Event::StoreFailed(store_failed_event) => self
                .store_failed_handlers
                .iter()
                .for_each(|handler| handler(&store_failed_event)),

            Event::PersistFailed(persist_failed_event) => self
                .persist_failed_handlers
                .iter()
                .for_each(|handler| handler(&persist_failed_event)),

            Event::ReplicateState(replicate_state_event) => self
                .replicate_state_handlers
                .iter()
                .for_each(|handler| handler(&replicate_state_event)),

            Event::ApplyReplicatedState(apply_replicated_state_event) => self
                .apply_replicated_state_handlers
                .iter()
                .for_each(|handler| handler(&apply_replicated_state_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Event bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // The tick loop has stopped. Wait for the shutdown signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
