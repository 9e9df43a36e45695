use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use arbitrator_rs::{
    networking::{
        messages::{ClientMessage, Message, ServerMessage},
        network::{Network, PeerId},
    },
    types::data_types::{ArbitratorId, ClientId},
};

/// Senders to the inboxes of every client connected anywhere in the mock network.
type ClientDirectory = Arc<Mutex<HashMap<ClientId, Sender<Message>>>>;

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: ArbitratorId,
    all_arbitrators: HashMap<ArbitratorId, Sender<(PeerId, Message)>>,
    clients: ClientDirectory,
    inbox: Arc<Mutex<Receiver<(PeerId, Message)>>>,
}

impl NetworkStub {
    /// Connect a new client to this arbitrator.
    pub(crate) fn connect(&self, client: ClientId) -> ClientStub {
        let (sender, inbox) = mpsc::channel();
        self.clients.lock().unwrap().insert(client, sender);
        ClientStub {
            id: client,
            arbitrator: self.all_arbitrators[&self.me].clone(),
            inbox,
        }
    }
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) {
        for (arbitrator, peer) in &self.all_arbitrators {
            if *arbitrator != self.me {
                let _ = peer.send((PeerId::Arbitrator(self.me), message.clone()));
            }
        }
    }

    fn send(&mut self, peer: PeerId, message: Message) {
        match peer {
            PeerId::Arbitrator(arbitrator) => {
                if let Some(peer) = self.all_arbitrators.get(&arbitrator) {
                    let _ = peer.send((PeerId::Arbitrator(self.me), message));
                }
            }
            PeerId::Client(client) => {
                if let Some(peer) = self.clients.lock().unwrap().get(&client) {
                    let _ = peer.send(message);
                }
            }
        }
    }

    fn recv(&mut self) -> Option<(PeerId, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(arbitrators: impl Iterator<Item = ArbitratorId>) -> Vec<NetworkStub> {
    let mut all_arbitrators = HashMap::new();
    let clients: ClientDirectory = Arc::new(Mutex::new(HashMap::new()));
    let arbitrator_and_inboxes: Vec<(ArbitratorId, Receiver<(PeerId, Message)>)> = arbitrators
        .map(|arbitrator| {
            let (sender, receiver) = mpsc::channel();
            all_arbitrators.insert(arbitrator, sender);

            (arbitrator, receiver)
        })
        .collect();

    arbitrator_and_inboxes
        .into_iter()
        .map(|(me, inbox)| NetworkStub {
            me,
            all_arbitrators: all_arbitrators.clone(),
            clients: clients.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}

/// The client end of a connection to one arbitrator.
pub(crate) struct ClientStub {
    id: ClientId,
    arbitrator: Sender<(PeerId, Message)>,
    inbox: Receiver<Message>,
}

impl ClientStub {
    pub(crate) fn id(&self) -> ClientId {
        self.id
    }

    pub(crate) fn send(&self, message: ClientMessage) {
        let _ = self
            .arbitrator
            .send((PeerId::Client(self.id), Message::Client(message)));
    }

    /// Every server message received since the last call, oldest first.
    pub(crate) fn received(&self) -> Vec<ServerMessage> {
        let mut received = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                Message::Server(message) => received.push(message),
                other => panic!("Client {} received a non-server message: {:?}", self.id, other),
            }
        }
        received
    }
}
