/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The membership and election state machine.

use std::collections::BTreeMap;

use crate::{
    clock::Timestamp,
    storage::{accessors::RecordStore, pluggables::KVStore},
    types::data_types::ArbitratorId,
};

use super::types::{ArbitratorRecord, MembershipConfiguration, MembershipError, MembershipTransition, Role};

/// One arbitrator's view of, and participation in, the arbitrators table.
pub struct Membership<K: KVStore> {
    config: MembershipConfiguration,
    records: RecordStore<K>,
    state: State,
    master: Option<ArbitratorId>,
    masterless_since: Option<Timestamp>,
    next_heartbeat: Timestamp,
    next_recheck: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Unregistered,
    Registering { started: Timestamp, next_attempt: Timestamp },
    Slave,
    Master,
}

impl<K: KVStore> Membership<K> {
    pub fn new(config: MembershipConfiguration, records: RecordStore<K>) -> Self {
        Self {
            config,
            records,
            state: State::Unregistered,
            master: None,
            masterless_since: None,
            next_heartbeat: Timestamp::default(),
            next_recheck: Timestamp::default(),
        }
    }

    pub fn configuration(&self) -> &MembershipConfiguration {
        &self.config
    }

    /// Begin registering. The first attempt is made on the next [`tick`](Self::tick). Has no effect
    /// unless the arbitrator is unregistered.
    pub fn start(&mut self, now: Timestamp) {
        if self.state == State::Unregistered {
            self.state = State::Registering {
                started: now,
                next_attempt: now,
            };
        }
    }

    /// Advance every membership timer that is due at `now`.
    ///
    /// # Errors
    /// [`RegistrationTimeout`](MembershipError::RegistrationTimeout) and
    /// [`NoLiveMaster`](MembershipError::NoLiveMaster) are fatal for this instance. Storage errors are
    /// not: the caller may simply tick again.
    pub fn tick(&mut self, now: Timestamp) -> Result<Vec<MembershipTransition>, MembershipError> {
        match self.state {
            State::Unregistered => Ok(Vec::new()),
            State::Registering { started, next_attempt } => self.try_register(now, started, next_attempt),
            State::Slave | State::Master => self.tick_registered(now),
        }
    }

    /// Delete the own record and stop participating.
    pub fn deregister(&mut self) -> Result<Vec<MembershipTransition>, MembershipError> {
        let was_registered = matches!(self.state, State::Slave | State::Master);
        self.records.remove_arbitrator(self.config.me)?;
        self.become_unregistered();
        if was_registered {
            Ok(vec![MembershipTransition::Deregistered])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn role(&self) -> Role {
        match self.state {
            State::Unregistered => Role::Unregistered,
            State::Registering { .. } => Role::Registering,
            State::Slave => Role::Slave,
            State::Master => Role::Master,
        }
    }

    pub fn is_master(&self) -> bool {
        self.state == State::Master
    }

    /// The master as of the last recheck.
    pub fn master(&self) -> Option<ArbitratorId> {
        self.master
    }

    /// The ids of every arbitrator whose heartbeat is no older than the heartbeat timeout.
    pub fn live_arbitrators(&self, now: Timestamp) -> Result<Vec<ArbitratorId>, MembershipError> {
        Ok(self
            .records
            .arbitrator_records()?
            .values()
            .filter(|record| record.is_live(now, self.config.heartbeat_timeout))
            .map(|record| record.id)
            .collect())
    }

    /// Copy `settings` into the own record.
    pub fn publish_settings(&mut self, settings: BTreeMap<String, String>) -> Result<bool, MembershipError> {
        Ok(self.records.set_arbitrator_settings(self.config.me, settings)?)
    }

    fn try_register(
        &mut self,
        now: Timestamp,
        started: Timestamp,
        next_attempt: Timestamp,
    ) -> Result<Vec<MembershipTransition>, MembershipError> {
        if now >= next_attempt {
            let record = ArbitratorRecord::new(self.config.me, now);
            let accepted = self.records.register_arbitrator(
                record,
                self.config.arbitrator_count,
                self.config.heartbeat_timeout,
                now,
            )?;
            if accepted {
                self.state = State::Slave;
                self.master = None;
                self.masterless_since = None;
                self.next_heartbeat = now + self.config.heartbeat_interval;
                self.next_recheck = now + self.config.master_recheck_interval;

                // Look for a master straight away so that the first arbitrator of a fresh cluster
                // does not sit masterless for a whole recheck interval.
                let mut transitions = vec![MembershipTransition::Registered];
                transitions.extend(self.recheck(now)?);
                return Ok(transitions);
            }
            log::debug!("Arbitrator {} registration refused, retrying", self.config.me);
            self.state = State::Registering {
                started,
                next_attempt: now + self.config.register_interval,
            };
        }

        if now.exceeds(started, self.config.register_timeout) {
            self.become_unregistered();
            return Err(MembershipError::RegistrationTimeout);
        }
        Ok(Vec::new())
    }

    fn tick_registered(&mut self, now: Timestamp) -> Result<Vec<MembershipTransition>, MembershipError> {
        let own_record_live = self
            .records
            .arbitrator_records()?
            .get(&self.config.me)
            .is_some_and(|record| record.is_live(now, self.config.heartbeat_timeout));
        if !own_record_live {
            self.become_unregistered();
            return Ok(vec![MembershipTransition::Lapsed]);
        }

        if now >= self.next_heartbeat {
            if !self.records.heartbeat(self.config.me, now)? {
                self.become_unregistered();
                return Ok(vec![MembershipTransition::Lapsed]);
            }
            self.next_heartbeat = now + self.config.heartbeat_interval;
        }

        if now >= self.next_recheck {
            self.next_recheck = now + self.config.master_recheck_interval;
            return self.recheck(now);
        }
        Ok(Vec::new())
    }

    fn recheck(&mut self, now: Timestamp) -> Result<Vec<MembershipTransition>, MembershipError> {
        if self.state == State::Master {
            return self.reap(now);
        }

        let heartbeat_timeout = self.config.heartbeat_timeout;
        let records = self.records.arbitrator_records()?;
        let mut live = records
            .values()
            .filter(|record| record.is_live(now, heartbeat_timeout));

        if let Some(master) = live.clone().find(|record| record.is_master) {
            self.master = Some(master.id);
            self.masterless_since = None;
            return Ok(Vec::new());
        }
        self.master = None;

        // Records are keyed by id, so the first live record has the lowest live id.
        let lowest_live = live.next().map(|record| record.id);
        if lowest_live == Some(self.config.me) {
            if !self.records.set_master(self.config.me, now)? {
                self.become_unregistered();
                return Ok(vec![MembershipTransition::Lapsed]);
            }
            self.state = State::Master;
            self.master = Some(self.config.me);
            self.masterless_since = None;
            self.next_heartbeat = now + self.config.heartbeat_interval;

            let mut transitions = vec![MembershipTransition::BecameMaster];
            transitions.extend(self.reap(now)?);
            return Ok(transitions);
        }

        let since = *self.masterless_since.get_or_insert(now);
        if now.exceeds(since, self.config.master_absence_timeout) {
            return Err(MembershipError::NoLiveMaster);
        }
        Ok(Vec::new())
    }

    fn reap(&mut self, now: Timestamp) -> Result<Vec<MembershipTransition>, MembershipError> {
        let reaped = self.records.reap_arbitrators(now, self.config.heartbeat_timeout)?;
        if reaped.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![MembershipTransition::Reaped(reaped)])
        }
    }

    fn become_unregistered(&mut self) {
        self.state = State::Unregistered;
        self.master = None;
        self.masterless_since = None;
    }
}
