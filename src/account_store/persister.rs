/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persister thread: performs account writes off the tick loop and reports their results back
//! into the inbox.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    networking::receiving::InboxEntry,
    storage::{accessors::RecordStore, accessors::StoreError, pluggables::KVStore},
    types::data_types::{AccountSnapshot, ClientId, Fingerprint},
};

/// A durable write requested by the tick loop.
#[derive(Debug)]
pub(crate) enum PersistJob {
    /// Commit a snapshot that reached quorum.
    Account {
        client: ClientId,
        fingerprint: Fingerprint,
        snapshot: AccountSnapshot,
    },
    /// Create a new account, unless one exists already.
    CreateAccount {
        client: ClientId,
        initial: AccountSnapshot,
    },
}

/// The result of a [`PersistJob`], delivered through the inbox.
#[derive(Debug)]
pub(crate) enum PersistCompletion {
    Account {
        client: ClientId,
        fingerprint: Fingerprint,
        result: Result<(), StoreError>,
    },
    CreateAccount {
        client: ClientId,
        result: Result<bool, StoreError>,
    },
}

pub(crate) fn execute<K: KVStore>(records: &mut RecordStore<K>, job: PersistJob) -> PersistCompletion {
    match job {
        PersistJob::Account {
            client,
            fingerprint,
            snapshot,
        } => PersistCompletion::Account {
            client,
            fingerprint,
            result: records.persist_account(client, &snapshot),
        },
        PersistJob::CreateAccount { client, initial } => PersistCompletion::CreateAccount {
            client,
            result: records.create_account(client, &initial),
        },
    }
}

pub(crate) fn start_persister<K: KVStore>(
    mut records: RecordStore<K>,
    jobs: Receiver<PersistJob>,
    completions: Sender<InboxEntry>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Persister thread disconnected from main thread")
            }
        }

        match jobs.recv_timeout(Duration::from_millis(10)) {
            Ok(job) => {
                let completion = execute(&mut records, job);
                if completions.send(InboxEntry::Persisted(completion)).is_err() {
                    log::warn!("Persister dropped a completion: the tick loop has stopped");
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => thread::yield_now(),
        }
    })
}
