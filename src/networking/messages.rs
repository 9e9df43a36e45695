//! Exhaustive enumerations around every message variant exchanged by arbitrators, clients, and
//! superpeers.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    account_store::types::{StoreAccountRequest, StoreFailure},
    types::data_types::{AccountSnapshot, Address, ClientId, Point, SuperpeerId, Velocity, ZoneId},
    zone_grid::types::{Rect, SuperpeerSlot, ZoneGridView},
};

/// All message variants.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`ClientMessage`].
    Client(ClientMessage),

    /// See: [`ServerMessage`].
    Server(ServerMessage),

    /// See: [`ArbitratorMessage`].
    Arbitrator(ArbitratorMessage),
}

impl From<ClientMessage> for Message {
    fn from(value: ClientMessage) -> Self {
        Message::Client(value)
    }
}

impl From<ServerMessage> for Message {
    fn from(value: ServerMessage) -> Self {
        Message::Server(value)
    }
}

impl From<ArbitratorMessage> for Message {
    fn from(value: ArbitratorMessage) -> Self {
        Message::Arbitrator(value)
    }
}

impl From<StoreOutcome> for Message {
    fn from(value: StoreOutcome) -> Self {
        Message::Arbitrator(ArbitratorMessage::StoreOutcome(value))
    }
}

/// Requests sent by a client (or by a client acting as a superpeer) to the arbitrator it is connected to.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum ClientMessage {
    /// The client accepts superpeer connections on `address`. Only listening clients are eligible to host
    /// superpeers.
    RegisterListening { address: Address },

    /// Start a session. Answered with [`ServerMessage::LoginAccepted`] carrying the stored account, or
    /// [`ServerMessage::LoginRejected`] if the client has no account.
    Login,

    CreateAccount { initial: AccountSnapshot },

    /// Ask to be placed in `zone`. Answered with [`ServerMessage::ZoneAssignment`] or
    /// [`ServerMessage::ZoneRejected`].
    ChangeZone { zone: ZoneId },

    /// The client's current position and movement. Feeds the population counts of the zone grid.
    ReportMovementVector { position: Point, velocity: Velocity },

    /// A superpeer's claim about a client's account state. Feeds the quorum protocol.
    SubmitAccountState {
        superpeer: SuperpeerId,
        zone: ZoneId,
        client: ClientId,
        snapshot: AccountSnapshot,
        reason: String,
    },

    QueryZoneGrid,

    Logout,
}

/// Replies and pushes sent by an arbitrator to a client.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum ServerMessage {
    LoginAccepted { account: AccountSnapshot },
    LoginRejected,
    AccountCreated,
    AccountExists,
    ZoneAssignment {
        zone: ZoneId,
        rect: Rect,
        superpeers: Vec<SuperpeerSlot>,
    },
    ZoneRejected { zone: ZoneId },

    /// The current leaves of the zone grid. Pushed whenever the grid changes.
    ZoneGrid(ZoneGridView),

    /// A committed account state. Sent to the account's owner and to every superpeer that submitted a
    /// report about it.
    WorldState { client: ClientId, account: AccountSnapshot },

    StoreFailed { client: ClientId, reason: StoreFailure },

    /// The submitting client does not own `superpeer` in the named zone.
    SubmitRejected { client: ClientId, superpeer: SuperpeerId },
}

/// Messages exchanged between arbitrators.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum ArbitratorMessage {
    /// A slave passing a store request it received on to the master.
    ForwardStoreRequest(StoreAccountRequest),

    /// The master announcing the end of a quorum decision.
    StoreOutcome(StoreOutcome),
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum StoreOutcome {
    Updated {
        client: ClientId,
        snapshot: AccountSnapshot,
        /// The clients to send [`ServerMessage::WorldState`] to.
        notify: Vec<ClientId>,
    },
    Failed {
        client: ClientId,
        reason: StoreFailure,
        /// The clients to send [`ServerMessage::StoreFailed`] to.
        notify: Vec<ClientId>,
    },
}

impl StoreOutcome {
    pub fn notify(&self) -> &[ClientId] {
        match self {
            StoreOutcome::Updated { notify, .. } => notify,
            StoreOutcome::Failed { notify, .. } => notify,
        }
    }

    /// The message to relay to each of the clients in [`notify`](Self::notify).
    pub fn server_message(&self) -> ServerMessage {
        match self {
            StoreOutcome::Updated { client, snapshot, .. } => ServerMessage::WorldState {
                client: *client,
                account: snapshot.clone(),
            },
            StoreOutcome::Failed { client, reason, .. } => ServerMessage::StoreFailed {
                client: *client,
                reason: *reason,
            },
        }
    }
}
