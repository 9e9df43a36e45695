//! Pluggable transport between arbitrators, clients, and superpeers.
//!
//! Framing, compression, and encryption are the business of the [`Network`](network::Network)
//! implementation. The arbitrator only sees whole [`Message`](messages::Message)s addressed by
//! [`PeerId`](network::PeerId).

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
