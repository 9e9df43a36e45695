/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Monotonic tick source used by every timeout in the arbitrator.
//!
//! None of the subsystems read an ambient clock. The [service](crate::service) samples a [`Clock`]
//! once per tick and passes the resulting [`Timestamp`] into every call that needs to reason about
//! deadlines. This makes election, heartbeat, and store-request timeouts deterministic under test:
//! a test drives a [`ManualClock`] forward instead of sleeping.
//!
//! Timestamps are compared *across* arbitrator processes (an arbitrator judges another's liveness by
//! the age of its last heartbeat), so the production [`SystemClock`] reports milliseconds since the
//! Unix Epoch rather than a process-local [`Instant`](std::time::Instant).

use std::{
    fmt::{self, Display, Formatter},
    ops::Add,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// A point in time, in milliseconds.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }

    /// How much time has passed between `earlier` and `self`. Zero if `earlier` is in the future.
    pub fn elapsed_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Whether strictly more than `timeout` has passed between `earlier` and `self`.
    pub fn exceeds(&self, earlier: Timestamp, timeout: Duration) -> bool {
        self.elapsed_since(earlier) > timeout
    }

    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration_millis(duration)))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A source of [`Timestamp`]s.
pub trait Clock: Clone + Send + 'static {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time in milliseconds since the Unix Epoch.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(duration_millis)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// A clock that only moves when told to. Clones share the same time, so several arbitrators in one
/// test process observe a single timeline.
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self(Arc::new(AtomicU64::new(start.millis())))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(duration_millis(by), Ordering::SeqCst);
    }

    pub fn set(&self, to: Timestamp) {
        self.0.store(to.millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.0.load(Ordering::SeqCst))
    }
}
