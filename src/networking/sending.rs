//! Functions and types for sending messages to the network.

use super::{
    messages::Message,
    network::{Network, PeerId},
};

/// Handle for sending and broadcasting messages to the [`Network`].
///
/// It can be used to send or broadcast instances of any type that implement the [`Into<Message>`]
/// trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: PeerId, msg: S) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) {
        self.network.broadcast(msg.into())
    }

    /// Receive directly from the network. Only used when no poller thread is running.
    pub(crate) fn recv(&mut self) -> Option<(PeerId, Message)> {
        self.network.recv()
    }
}
