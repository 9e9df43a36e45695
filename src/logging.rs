/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the arbitrator's
//! [configuration](crate::service::Configuration).
//!
//! The arbitrator logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitAccountState](crate::events::CommitAccountStateEvent) is printed:
//!
//! ```text
//! CommitAccountState, 1701329264, 42, fNGCJyk, 3
//! ```
//!
//! In the snippet:
//! - The third value is the id of the client whose account was committed.
//! - The fourth value is the first seven characters of the Base64 encoding of the fingerprint of the
//!   committed account state.
//! - The fifth value is the number of superpeers that agreed on it.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{events::*, types::data_types::ArbitratorId};

// Names of each event in PascalCase for printing:
pub const REGISTER_ARBITRATOR: &str = "RegisterArbitrator";
pub const BECOME_MASTER: &str = "BecomeMaster";
pub const DEREGISTER_ARBITRATOR: &str = "DeregisterArbitrator";
pub const REAP_ARBITRATOR: &str = "ReapArbitrator";

pub const SPLIT_ZONE: &str = "SplitZone";
pub const MERGE_ZONE: &str = "MergeZone";
pub const ASSIGN_SUPERPEER: &str = "AssignSuperpeer";
pub const REMOVE_SUPERPEER: &str = "RemoveSuperpeer";

pub const SUBMIT_STORE_REQUEST: &str = "SubmitStoreRequest";
pub const COMMIT_ACCOUNT_STATE: &str = "CommitAccountState";
pub const STORE_FAILED: &str = "StoreFailed";
pub const PERSIST_FAILED: &str = "PersistFailed";

pub const REPLICATE_STATE: &str = "ReplicateState";
pub const APPLY_REPLICATED_STATE: &str = "ApplyReplicatedState";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for RegisterArbitratorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |register_arbitrator_event: &RegisterArbitratorEvent| {
            log::info!(
                "{}, {}, {}",
                REGISTER_ARBITRATOR,
                secs_since_unix_epoch(register_arbitrator_event.timestamp),
                register_arbitrator_event.arbitrator
            )
        };
        Box::new(logger)
    }
}

impl Logger for BecomeMasterEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |become_master_event: &BecomeMasterEvent| {
            log::info!(
                "{}, {}, {}",
                BECOME_MASTER,
                secs_since_unix_epoch(become_master_event.timestamp),
                become_master_event.arbitrator
            )
        };
        Box::new(logger)
    }
}

impl Logger for DeregisterArbitratorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |deregister_arbitrator_event: &DeregisterArbitratorEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DEREGISTER_ARBITRATOR,
                secs_since_unix_epoch(deregister_arbitrator_event.timestamp),
                deregister_arbitrator_event.arbitrator,
                if deregister_arbitrator_event.lapsed { "lapsed" } else { "voluntary" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReapArbitratorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reap_arbitrator_event: &ReapArbitratorEvent| {
            log::info!(
                "{}, {}, {}",
                REAP_ARBITRATOR,
                secs_since_unix_epoch(reap_arbitrator_event.timestamp),
                arbitrator_list(&reap_arbitrator_event.arbitrators)
            )
        };
        Box::new(logger)
    }
}

impl Logger for SplitZoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |split_zone_event: &SplitZoneEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SPLIT_ZONE,
                secs_since_unix_epoch(split_zone_event.timestamp),
                split_zone_event.parent,
                split_zone_event.children.0,
                split_zone_event.children.1
            )
        };
        Box::new(logger)
    }
}

impl Logger for MergeZoneEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |merge_zone_event: &MergeZoneEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                MERGE_ZONE,
                secs_since_unix_epoch(merge_zone_event.timestamp),
                merge_zone_event.parent,
                merge_zone_event.retired.0,
                merge_zone_event.retired.1
            )
        };
        Box::new(logger)
    }
}

impl Logger for AssignSuperpeerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |assign_superpeer_event: &AssignSuperpeerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ASSIGN_SUPERPEER,
                secs_since_unix_epoch(assign_superpeer_event.timestamp),
                assign_superpeer_event.zone,
                assign_superpeer_event.superpeer,
                assign_superpeer_event.client
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemoveSuperpeerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |remove_superpeer_event: &RemoveSuperpeerEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REMOVE_SUPERPEER,
                secs_since_unix_epoch(remove_superpeer_event.timestamp),
                remove_superpeer_event.zone,
                remove_superpeer_event.superpeer,
                remove_superpeer_event.client
            )
        };
        Box::new(logger)
    }
}

impl Logger for SubmitStoreRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |submit_store_request_event: &SubmitStoreRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                SUBMIT_STORE_REQUEST,
                secs_since_unix_epoch(submit_store_request_event.timestamp),
                submit_store_request_event.client,
                submit_store_request_event.superpeer,
                first_seven_base64_chars(&submit_store_request_event.fingerprint.bytes()),
                submit_store_request_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitAccountStateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_account_state_event: &CommitAccountStateEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_ACCOUNT_STATE,
                secs_since_unix_epoch(commit_account_state_event.timestamp),
                commit_account_state_event.client,
                first_seven_base64_chars(&commit_account_state_event.fingerprint.bytes()),
                commit_account_state_event.superpeers.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for StoreFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |store_failed_event: &StoreFailedEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                STORE_FAILED,
                secs_since_unix_epoch(store_failed_event.timestamp),
                store_failed_event.client,
                store_failed_event.failure,
                store_failed_event.discarded
            )
        };
        Box::new(logger)
    }
}

impl Logger for PersistFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |persist_failed_event: &PersistFailedEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                PERSIST_FAILED,
                secs_since_unix_epoch(persist_failed_event.timestamp),
                persist_failed_event.client,
                first_seven_base64_chars(&persist_failed_event.fingerprint.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReplicateStateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |replicate_state_event: &ReplicateStateEvent| {
            log::info!(
                "{}, {}, {}",
                REPLICATE_STATE,
                secs_since_unix_epoch(replicate_state_event.timestamp),
                replicate_state_event.zone_info_last_modified
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyReplicatedStateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_replicated_state_event: &ApplyReplicatedStateEvent| {
            log::info!(
                "{}, {}, {}",
                APPLY_REPLICATED_STATE,
                secs_since_unix_epoch(apply_replicated_state_event.timestamp),
                apply_replicated_state_event.zone_info_last_modified
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn arbitrator_list(arbitrators: &[ArbitratorId]) -> String {
    arbitrators
        .iter()
        .map(|arbitrator| arbitrator.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}
