use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{ArbitratorId, ClientId};

use super::messages::Message;

/// The two kinds of peers an arbitrator exchanges messages with.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum PeerId {
    /// A game client connected to this arbitrator. Superpeers are clients too.
    Client(ClientId),
    /// Another arbitrator in the cluster.
    Arbitrator(ArbitratorId),
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Client(client) => write!(f, "client {}", client),
            PeerId::Arbitrator(arbitrator) => write!(f, "arbitrator {}", arbitrator),
        }
    }
}

pub trait Network: Clone + Send {
    /// Send a message to every other arbitrator without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: PeerId, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerId, Message)>;
}
