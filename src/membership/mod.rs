/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cluster membership and master election among a fixed-size pool of arbitrators.
//!
//! Arbitrators do not talk to each other to agree on membership. Instead every arbitrator keeps an
//! [`ArbitratorRecord`](types::ArbitratorRecord) in the arbitrators table of the shared
//! [record store](crate::storage), and judges the liveness of the others from the age of their
//! records' heartbeats.
//!
//! # Roles
//!
//! From its own point of view an arbitrator moves through the following [roles](types::Role):
//!
//! ```text
//! Unregistered ──▶ Registering ──▶ Slave ──▶ Master
//!       ▲               │            │          │
//!       └───────────────┴────────────┴──────────┘
//! ```
//!
//! - **Registering**: the arbitrator tries to insert its record every `register_interval`. The insert
//!   is refused while `arbitrator_count` live records exist, or while a live record holds the same id.
//!   If no attempt succeeds within `register_timeout`, [`tick`](implementation::Membership::tick)
//!   fails with [`RegistrationTimeout`](types::MembershipError::RegistrationTimeout).
//! - **Slave**: every `master_recheck_interval` the slave looks for a live record flagged as master.
//!   If there is none and the slave holds the lowest live id, it flags itself and becomes master.
//!   Because the lowest-id rule gives every slave the same answer, no voting round is needed. A slave
//!   that stays masterless (and ineligible) for longer than `master_absence_timeout` fails with
//!   [`NoLiveMaster`](types::MembershipError::NoLiveMaster).
//! - **Master**: the master reaps dead records at every recheck. It never steps down on its own, only
//!   by deregistering.
//!
//! A registered arbitrator checks its own record before anything else on every tick. If the record is
//! gone, or older than `heartbeat_timeout`, the process must have stalled long enough for others to
//! consider it dead, so it reports [`Lapsed`](types::MembershipTransition::Lapsed) and becomes
//! unregistered instead of continuing to act on shared state.

pub mod implementation;

pub mod types;
