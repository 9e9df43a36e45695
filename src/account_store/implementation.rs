/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pending set of store requests and the quorum decision over it.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    clock::Timestamp,
    types::data_types::{ClientId, Fingerprint, SuperpeerId},
};

use super::types::{
    AccountStoreConfiguration, AccountStoreError, PendingCommit, StateUpdated, StoreAccountRequest,
    StoreFailure, SweepOutcome,
};

/// Owner of every pending [`StoreAccountRequest`], grouped by the client the requests are about.
pub struct AccountStoreArbitrator {
    config: AccountStoreConfiguration,
    pending: BTreeMap<ClientId, PendingGroup>,
}

#[derive(Default)]
struct PendingGroup {
    /// In submission order.
    requests: Vec<(Fingerprint, StoreAccountRequest)>,
    committing: Option<Committing>,
}

struct Committing {
    commit: PendingCommit,
    since: Timestamp,
}

impl PendingGroup {
    fn submitters(&self) -> Vec<ClientId> {
        let mut submitters: Vec<ClientId> = Vec::new();
        for (_, request) in &self.requests {
            if !submitters.contains(&request.submitted_by) {
                submitters.push(request.submitted_by);
            }
        }
        submitters
    }
}

impl AccountStoreArbitrator {
    pub fn new(config: AccountStoreConfiguration) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
        }
    }

    pub fn configuration(&self) -> &AccountStoreConfiguration {
        &self.config
    }

    pub fn reconfigure(&mut self, config: AccountStoreConfiguration) {
        self.config = config
    }

    /// Add `request` to its client's group and return its fingerprint. An earlier request from the same
    /// superpeer with the same fingerprint is replaced.
    pub fn submit(&mut self, request: StoreAccountRequest) -> Fingerprint {
        let fingerprint = request.fingerprint();
        let group = self.pending.entry(request.client).or_default();
        group
            .requests
            .retain(|(existing, earlier)| !(*existing == fingerprint && earlier.superpeer == request.superpeer));
        group.requests.push((fingerprint, request));
        fingerprint
    }

    /// Decide, for every client with pending requests, whether to commit, discard, or keep waiting.
    ///
    /// Each client's group is decided as a whole. A group whose commit is in flight is skipped until the
    /// commit completes, or until the store timeout passes without completion, after which it is
    /// decided afresh.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<SweepOutcome> {
        let timeout = self.config.store_request_timeout;
        let quorum = self.config.quorum.max(1) as usize;
        let mut outcomes = Vec::new();
        let mut discarded = Vec::new();

        for (client, group) in self.pending.iter_mut() {
            if let Some(since) = group.committing.as_ref().map(|committing| committing.since) {
                if !now.exceeds(since, timeout) {
                    continue;
                }
                group.committing = None;
            }

            if let Some(commit) = quorum_winner(*client, &group.requests, now, timeout, quorum) {
                group.committing = Some(Committing {
                    commit: commit.clone(),
                    since: now,
                });
                outcomes.push(SweepOutcome::Commit(commit));
                continue;
            }

            let any_expired = group
                .requests
                .iter()
                .any(|(_, request)| now.exceeds(request.received_at, timeout));
            if any_expired {
                let versions: BTreeSet<Fingerprint> =
                    group.requests.iter().map(|(fingerprint, _)| *fingerprint).collect();
                let failure = if versions.len() > 1 {
                    StoreFailure::StoreQuorumFailed
                } else {
                    StoreFailure::StoreTimeout
                };
                outcomes.push(SweepOutcome::Failed {
                    client: *client,
                    failure,
                    submitters: group.submitters(),
                    discarded: group.requests.len(),
                });
                discarded.push(*client);
            }
        }

        for client in discarded {
            self.pending.remove(&client);
        }
        outcomes
    }

    /// Finish the commit started by [`sweep`](Self::sweep) for `client`.
    ///
    /// On success every pending request for the client is removed and the "state updated" notification
    /// is returned. On failure the commit mark is cleared and the requests stay for the next sweep. A
    /// completion for a fingerprint that is no longer being committed is ignored.
    pub fn complete_persist<E>(
        &mut self,
        client: ClientId,
        fingerprint: Fingerprint,
        result: Result<(), E>,
    ) -> Result<Option<StateUpdated>, AccountStoreError> {
        let group = self
            .pending
            .get_mut(&client)
            .ok_or(AccountStoreError::UnknownClient { client })?;
        if !group
            .committing
            .as_ref()
            .is_some_and(|committing| committing.commit.fingerprint == fingerprint)
        {
            return Ok(None);
        }

        if result.is_err() {
            group.committing = None;
            return Ok(None);
        }

        let submitters = group.submitters();
        // Safety: the group was found above.
        let group = self.pending.remove(&client).unwrap();
        // Safety: checked to be Some above.
        let commit = group.committing.unwrap().commit;
        Ok(Some(StateUpdated {
            client,
            fingerprint,
            snapshot: commit.snapshot,
            superpeers: commit.superpeers,
            submitters,
        }))
    }

    /// Every pending request, grouped by client and in submission order within a group.
    pub fn pending_requests(&self) -> Vec<StoreAccountRequest> {
        self.pending
            .values()
            .flat_map(|group| group.requests.iter().map(|(_, request)| request.clone()))
            .collect()
    }

    /// Re-submit requests recovered from the record store, for example after a new master takes over.
    pub fn restore(&mut self, requests: Vec<StoreAccountRequest>) {
        for request in requests {
            self.submit(request);
        }
    }

    pub fn pending_count(&self, client: ClientId) -> usize {
        self.pending
            .get(&client)
            .map(|group| group.requests.len())
            .unwrap_or(0)
    }

    pub fn is_committing(&self, client: ClientId) -> bool {
        self.pending
            .get(&client)
            .is_some_and(|group| group.committing.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Bucket the unexpired requests by fingerprint, replaying them in arrival order, and return the first
/// bucket whose count of distinct superpeers reaches `quorum`.
fn quorum_winner(
    client: ClientId,
    requests: &[(Fingerprint, StoreAccountRequest)],
    now: Timestamp,
    timeout: std::time::Duration,
    quorum: usize,
) -> Option<PendingCommit> {
    let mut live: Vec<&(Fingerprint, StoreAccountRequest)> = requests
        .iter()
        .filter(|(_, request)| !now.exceeds(request.received_at, timeout))
        .collect();
    live.sort_by_key(|(_, request)| request.received_at);

    let mut buckets: Vec<(Fingerprint, &StoreAccountRequest, Vec<SuperpeerId>)> = Vec::new();
    for (fingerprint, request) in live {
        let index = match buckets.iter().position(|(f, _, _)| f == fingerprint) {
            Some(index) => index,
            None => {
                buckets.push((*fingerprint, request, Vec::new()));
                buckets.len() - 1
            }
        };
        let (_, earliest, superpeers) = &mut buckets[index];
        if !superpeers.contains(&request.superpeer) {
            superpeers.push(request.superpeer);
        }
        if superpeers.len() >= quorum {
            return Some(PendingCommit {
                client,
                fingerprint: *fingerprint,
                snapshot: earliest.snapshot.clone(),
                superpeers: superpeers.clone(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::data_types::{AccountSnapshot, ArbitratorId, ZoneId};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn arbitrator(quorum: u32) -> AccountStoreArbitrator {
        AccountStoreArbitrator::new(AccountStoreConfiguration {
            quorum,
            store_request_timeout: TIMEOUT,
        })
    }

    fn request(superpeer: u64, client: u64, state: &[u8], at: u64) -> StoreAccountRequest {
        StoreAccountRequest {
            superpeer: SuperpeerId::new(superpeer),
            client: ClientId::new(client),
            zone: ZoneId::root(),
            arrived_on: ArbitratorId::new(1),
            submitted_by: ClientId::new(100 + superpeer),
            snapshot: AccountSnapshot::new(state.to_vec()),
            received_at: Timestamp::new(at),
            reason: String::from("periodic"),
        }
    }

    fn commits(outcomes: &[SweepOutcome]) -> Vec<&PendingCommit> {
        outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                SweepOutcome::Commit(commit) => Some(commit),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn quorum_of_matching_reports_commits_once_and_clears_the_client() {
        let mut store = arbitrator(3);
        let client = ClientId::new(7);
        store.submit(request(1, 7, b"gold=10", 0));
        store.submit(request(2, 7, b"gold=10", 10));
        store.submit(request(9, 7, b"gold=99", 15));
        assert!(store.sweep(Timestamp::new(20)).is_empty());

        let fingerprint = store.submit(request(3, 7, b"gold=10", 30));
        let outcomes = store.sweep(Timestamp::new(40));
        let commit = commits(&outcomes);
        assert_eq!(commit.len(), 1);
        assert_eq!(commit[0].fingerprint, fingerprint);
        assert_eq!(commit[0].snapshot, AccountSnapshot::new(b"gold=10".to_vec()));
        assert_eq!(
            commit[0].superpeers,
            vec![SuperpeerId::new(1), SuperpeerId::new(2), SuperpeerId::new(3)]
        );

        // The commit is in flight: further sweeps leave the client alone.
        assert!(store.sweep(Timestamp::new(50)).is_empty());
        assert!(store.is_committing(client));

        let updated = store
            .complete_persist(client, fingerprint, Ok::<(), ()>(()))
            .unwrap()
            .unwrap();
        assert_eq!(updated.client, client);
        assert_eq!(updated.submitters.len(), 4);
        assert_eq!(store.pending_count(client), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn too_few_reports_time_out_without_a_commit() {
        let mut store = arbitrator(3);
        store.submit(request(1, 7, b"gold=10", 0));
        store.submit(request(2, 7, b"gold=10", 1_000));

        assert!(store.sweep(Timestamp::new(10_000)).is_empty());
        let outcomes = store.sweep(Timestamp::new(10_001));
        assert_eq!(
            outcomes,
            vec![SweepOutcome::Failed {
                client: ClientId::new(7),
                failure: StoreFailure::StoreTimeout,
                submitters: vec![ClientId::new(101), ClientId::new(102)],
                discarded: 2,
            }]
        );
        assert!(store.is_empty());
    }

    #[test]
    fn conflicting_reports_fail_with_quorum_failed() {
        let mut store = arbitrator(2);
        store.submit(request(1, 7, b"gold=10", 0));
        store.submit(request(2, 7, b"gold=11", 0));
        let outcomes = store.sweep(Timestamp::new(20_000));
        assert!(matches!(
            outcomes.as_slice(),
            [SweepOutcome::Failed {
                failure: StoreFailure::StoreQuorumFailed,
                discarded: 2,
                ..
            }]
        ));
    }

    #[test]
    fn failed_persist_leaves_requests_for_the_next_sweep() {
        let mut store = arbitrator(2);
        let client = ClientId::new(7);
        store.submit(request(1, 7, b"gold=10", 0));
        let fingerprint = store.submit(request(2, 7, b"gold=10", 0));
        assert_eq!(commits(&store.sweep(Timestamp::new(1))).len(), 1);

        assert_eq!(store.complete_persist(client, fingerprint, Err("disk full")), Ok(None));
        assert!(!store.is_committing(client));
        assert_eq!(store.pending_count(client), 2);

        assert_eq!(commits(&store.sweep(Timestamp::new(2))).len(), 1);
        assert!(store
            .complete_persist(client, fingerprint, Ok::<(), ()>(()))
            .unwrap()
            .is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn stalled_commit_is_retried_after_the_timeout() {
        let mut store = arbitrator(1);
        let client = ClientId::new(7);
        store.submit(request(1, 7, b"gold=10", 5_000));
        assert_eq!(commits(&store.sweep(Timestamp::new(5_000))).len(), 1);
        assert!(store.sweep(Timestamp::new(15_000)).is_empty());

        // Once the commit mark expires the request has aged out too, so the group is discarded.
        let outcomes = store.sweep(Timestamp::new(15_001));
        assert_eq!(commits(&outcomes).len(), 0);
        assert!(matches!(outcomes.as_slice(), [SweepOutcome::Failed { .. }]));
        assert_eq!(store.pending_count(client), 0);
    }

    #[test]
    fn resubmission_by_one_superpeer_counts_once() {
        let mut store = arbitrator(2);
        store.submit(request(1, 7, b"gold=10", 0));
        store.submit(request(1, 7, b"gold=10", 5));
        assert_eq!(store.pending_count(ClientId::new(7)), 1);
        assert!(store.sweep(Timestamp::new(6)).is_empty());

        // A different version from the same superpeer coexists with the first.
        store.submit(request(1, 7, b"gold=11", 7));
        assert_eq!(store.pending_count(ClientId::new(7)), 2);
        assert!(store.sweep(Timestamp::new(8)).is_empty());
    }

    #[test]
    fn reason_is_not_part_of_the_fingerprint() {
        let mut first = request(1, 7, b"gold=10", 0);
        let mut second = request(2, 7, b"gold=10", 0);
        first.reason = String::from("logout");
        second.reason = String::from("zone change");
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_ne!(first.fingerprint(), request(1, 8, b"gold=10", 0).fingerprint());
    }

    #[test]
    fn first_bucket_to_reach_quorum_wins() {
        let mut store = arbitrator(2);
        store.submit(request(1, 7, b"a", 0));
        store.submit(request(2, 7, b"b", 1));
        store.submit(request(3, 7, b"b", 2));
        store.submit(request(4, 7, b"a", 3));
        let outcomes = store.sweep(Timestamp::new(4));
        let commit = commits(&outcomes);
        assert_eq!(commit.len(), 1);
        assert_eq!(commit[0].snapshot, AccountSnapshot::new(b"b".to_vec()));
    }

    #[test]
    fn completion_for_an_unknown_client_is_an_error() {
        let mut store = arbitrator(2);
        let fingerprint = request(1, 7, b"a", 0).fingerprint();
        assert_eq!(
            store.complete_persist(ClientId::new(7), fingerprint, Ok::<(), ()>(())),
            Err(AccountStoreError::UnknownClient {
                client: ClientId::new(7)
            })
        );
    }

    #[test]
    fn restore_rebuilds_the_pending_set() {
        let mut store = arbitrator(3);
        store.submit(request(1, 7, b"a", 0));
        store.submit(request(2, 8, b"b", 0));
        let mut recovered = arbitrator(3);
        recovered.restore(store.pending_requests());
        assert_eq!(recovered.pending_requests(), store.pending_requests());
    }
}
