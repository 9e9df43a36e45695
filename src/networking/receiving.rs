//! Functions and types for receiving messages from the network.
//!
//! Everything that happens to an arbitrator from the outside, whether a message from a peer or the
//! completion of a durable write, is appended to a single per-process inbox and drained once at the
//! start of each tick.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::account_store::persister::PersistCompletion;

use super::{
    messages::Message,
    network::{Network, PeerId},
};

/// An entry in the per-process inbox.
#[derive(Debug)]
pub(crate) enum InboxEntry {
    Message(PeerId, Message),
    Persisted(PersistCompletion),
}

/// Spawn the poller thread, which polls the [`Network`] for messages and appends them to the inbox.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    inbox: Sender<InboxEntry>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            let _ = inbox.send(InboxEntry::Message(origin, msg));
        } else {
            thread::yield_now()
        }
    })
}
