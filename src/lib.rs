/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Arbitrator-rs is the coordination layer of a clustered world simulation. It offers:
//! 1. A [zone grid](zone_grid) that splits the world into zones as they fill up and merges them as
//!    they empty, each zone simulated by a small set of client-hosted superpeers,
//! 2. An [account store](account_store) that only commits a client's account state once a quorum of
//!    superpeers reports the same state,
//! 3. Heartbeat-based [membership] with lowest-id master election over a shared record store,
//! 4. Pluggable [networking] and [storage], and
//! 5. [Events](events) for every significant state change, with an optional [logging] of them.
//!
//! Start an arbitrator with an [`ArbitratorSpec`](service::ArbitratorSpec), or drive one tick at a time
//! with an [`ArbitratorService`](service::implementation::ArbitratorService).

pub mod account_store;

pub mod clock;

pub mod events;

pub(crate) mod event_bus;

pub mod logging;

pub mod membership;

pub mod networking;

pub mod service;

pub mod settings;

pub mod storage;

pub mod types;

pub mod zone_grid;
