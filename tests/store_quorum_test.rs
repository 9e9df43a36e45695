use std::time::Duration;

use arbitrator_rs::{
    account_store::types::StoreFailure,
    membership::types::Role,
    networking::messages::{ClientMessage, ServerMessage},
    types::data_types::{AccountSnapshot, Address, ClientId, Point, SuperpeerId, Velocity, ZoneId},
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    network::ClientStub,
    node::{test_configuration, Cluster},
};

const STEP: Duration = Duration::from_millis(250);

/// The client whose account the superpeers report on.
const OWNER: u64 = 10;

/// Connect clients `ids` to arbitrator `arbitrator` as listening clients standing in the root zone.
fn connect_superpeers(cluster: &Cluster, arbitrator: u32, ids: &[u64]) -> Vec<ClientStub> {
    ids.iter()
        .map(|id| {
            let client = cluster.node(arbitrator).connect(*id);
            client.send(ClientMessage::RegisterListening {
                address: Address::new("10.0.0.1", 7000 + *id as u16),
            });
            client.send(ClientMessage::ReportMovementVector {
                position: Point::new(100.0 + *id as f64, 100.0),
                velocity: Velocity::default(),
            });
            client
        })
        .collect()
}

/// The superpeer slot `client` holds in the root zone, as seen by arbitrator `arbitrator`.
fn slot_of(cluster: &Cluster, arbitrator: u32, client: &ClientStub) -> SuperpeerId {
    cluster
        .node(arbitrator)
        .service()
        .zone_grid()
        .root()
        .superpeers
        .iter()
        .find(|slot| slot.client == client.id())
        .map(|slot| slot.id)
        .expect("Client holds no superpeer slot!")
}

fn submit(cluster: &Cluster, arbitrator: u32, superpeer: &ClientStub, snapshot: &AccountSnapshot) {
    superpeer.send(ClientMessage::SubmitAccountState {
        superpeer: slot_of(cluster, arbitrator, superpeer),
        zone: ZoneId::root(),
        client: ClientId::new(OWNER),
        snapshot: snapshot.clone(),
        reason: String::from("autosave"),
    });
}

fn root_slot_count(cluster: &Cluster, arbitrator: u32) -> usize {
    cluster.node(arbitrator).service().zone_grid().root().superpeers.len()
}

#[test]
fn agreeing_superpeers_commit_test() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(vec![test_configuration(1)]);
    cluster.tick();

    // 1. The owner creates its account. Creating it twice is refused.
    let owner = cluster.node(1).connect(OWNER);
    owner.send(ClientMessage::CreateAccount {
        initial: AccountSnapshot::new(vec![0]),
    });
    cluster.step(STEP);
    assert!(owner.received().contains(&ServerMessage::AccountCreated));
    owner.send(ClientMessage::CreateAccount {
        initial: AccountSnapshot::new(vec![1]),
    });
    cluster.step(STEP);
    assert!(owner.received().contains(&ServerMessage::AccountExists));

    // 2. Three listening clients in the root zone become its superpeers.
    let superpeers = connect_superpeers(&cluster, 1, &[1, 2, 3]);
    cluster.step(STEP);
    assert_eq!(root_slot_count(&cluster, 1), 3);

    // 3. A client that holds no slot cannot submit on behalf of one.
    let impostor = cluster.node(1).connect(4);
    let stolen = slot_of(&cluster, 1, &superpeers[0]);
    impostor.send(ClientMessage::SubmitAccountState {
        superpeer: stolen,
        zone: ZoneId::root(),
        client: ClientId::new(OWNER),
        snapshot: AccountSnapshot::new(vec![6, 6, 6]),
        reason: String::from("forged"),
    });
    cluster.step(STEP);
    assert!(impostor.received().contains(&ServerMessage::SubmitRejected {
        client: ClientId::new(OWNER),
        superpeer: stolen,
    }));
    assert!(cluster.node(1).service().account_store().is_empty());

    // 4. All three superpeers report the same state, which is committed and announced.
    let snapshot = AccountSnapshot::new(vec![1, 2, 3]);
    for superpeer in &superpeers {
        submit(&cluster, 1, superpeer, &snapshot);
    }
    cluster.run_for(Duration::from_secs(1), STEP);

    assert_eq!(
        cluster.records().account(ClientId::new(OWNER)).unwrap(),
        Some(snapshot.clone())
    );
    let update = ServerMessage::WorldState {
        client: ClientId::new(OWNER),
        account: snapshot.clone(),
    };
    assert!(owner.received().contains(&update));
    for superpeer in &superpeers {
        assert!(superpeer.received().contains(&update));
    }
    assert!(cluster.node(1).service().account_store().is_empty());

    // 5. Logging in returns the committed state.
    owner.send(ClientMessage::Login);
    cluster.step(STEP);
    assert!(owner
        .received()
        .contains(&ServerMessage::LoginAccepted { account: snapshot }));
}

#[test]
fn disagreeing_superpeers_fail_test() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(vec![test_configuration(1)]);
    cluster.tick();

    let owner = cluster.node(1).connect(OWNER);
    owner.send(ClientMessage::QueryZoneGrid);
    let superpeers = connect_superpeers(&cluster, 1, &[1, 2, 3]);
    cluster.step(STEP);
    assert_eq!(root_slot_count(&cluster, 1), 3);

    // 1. Two superpeers agree, the third disagrees, so no version reaches a quorum of three.
    submit(&cluster, 1, &superpeers[0], &AccountSnapshot::new(vec![1]));
    submit(&cluster, 1, &superpeers[1], &AccountSnapshot::new(vec![1]));
    submit(&cluster, 1, &superpeers[2], &AccountSnapshot::new(vec![2]));
    cluster.step(STEP);
    assert_eq!(
        cluster.node(1).service().account_store().pending_count(ClientId::new(OWNER)),
        3
    );

    // 2. When the oldest request times out, the whole group is discarded and everyone involved is told.
    cluster.run_for(Duration::from_secs(4), STEP);
    let failure = ServerMessage::StoreFailed {
        client: ClientId::new(OWNER),
        reason: StoreFailure::StoreQuorumFailed,
    };
    assert!(owner.received().contains(&failure));
    for superpeer in &superpeers {
        assert!(superpeer.received().contains(&failure));
    }
    assert!(cluster.node(1).service().account_store().is_empty());
    assert_eq!(cluster.records().account(ClientId::new(OWNER)).unwrap(), None);
}

#[test]
fn too_few_reports_time_out_test() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(vec![test_configuration(1)]);
    cluster.tick();

    let superpeers = connect_superpeers(&cluster, 1, &[1, 2, 3]);
    cluster.step(STEP);

    // Only two of three superpeers report, and they agree.
    let snapshot = AccountSnapshot::new(vec![4, 2]);
    submit(&cluster, 1, &superpeers[0], &snapshot);
    submit(&cluster, 1, &superpeers[1], &snapshot);
    cluster.run_for(Duration::from_secs(4), STEP);

    let failure = ServerMessage::StoreFailed {
        client: ClientId::new(OWNER),
        reason: StoreFailure::StoreTimeout,
    };
    assert!(superpeers[0].received().contains(&failure));
    assert!(superpeers[1].received().contains(&failure));
    // The silent superpeer submitted nothing, so it is not told.
    assert!(!superpeers[2].received().contains(&failure));
    assert_eq!(cluster.records().account(ClientId::new(OWNER)).unwrap(), None);
}

#[test]
fn failed_persist_is_retried_test() {
    setup_logger(LevelFilter::Debug);

    let mut cluster = Cluster::new(vec![test_configuration(1)]);
    cluster.tick();

    let superpeers = connect_superpeers(&cluster, 1, &[1, 2, 3]);
    cluster.step(STEP);

    // 1. The quorum is reached while the record store refuses writes.
    let snapshot = AccountSnapshot::new(vec![9, 9]);
    for superpeer in &superpeers {
        submit(&cluster, 1, superpeer, &snapshot);
    }
    cluster.kv_store.set_fail_writes(true);
    cluster.step(STEP);
    cluster.kv_store.set_fail_writes(false);
    assert_eq!(cluster.records().account(ClientId::new(OWNER)).unwrap(), None);
    assert_eq!(
        cluster.node(1).service().account_store().pending_count(ClientId::new(OWNER)),
        3
    );

    // 2. The requests were kept, so the next sweep commits them.
    cluster.run_for(Duration::from_secs(1), STEP);
    assert_eq!(
        cluster.records().account(ClientId::new(OWNER)).unwrap(),
        Some(snapshot)
    );
    assert!(cluster.node(1).service().account_store().is_empty());
}

#[test]
fn slave_forwards_and_pending_requests_survive_failover_test() {
    setup_logger(LevelFilter::Debug);

    // Long enough for the requests to outlive a failover.
    let mut configurations: Vec<_> = (1..=2).map(test_configuration).collect();
    for configuration in configurations.iter_mut() {
        configuration.store_request_timeout = Duration::from_secs(20);
    }
    let mut cluster = Cluster::new(configurations);
    cluster.tick();
    assert_eq!(cluster.node(2).service().role(), Role::Slave);

    // 1. The superpeers are connected to the slave. The master assigns them, and the slave learns of
    //    the assignment through replication.
    let superpeers = connect_superpeers(&cluster, 2, &[1, 2, 3]);
    cluster.run_until(Duration::from_secs(2), STEP, |cluster| {
        root_slot_count(cluster, 1) == 3 && root_slot_count(cluster, 2) == 3
    });

    // 2. Two reports arrive at the slave, which forwards them to the master.
    let snapshot = AccountSnapshot::new(vec![7, 7, 7]);
    submit(&cluster, 2, &superpeers[0], &snapshot);
    submit(&cluster, 2, &superpeers[1], &snapshot);
    cluster.run_for(Duration::from_secs(1), STEP);
    assert_eq!(
        cluster.node(1).service().account_store().pending_count(ClientId::new(OWNER)),
        2
    );
    assert!(cluster.node(2).service().account_store().is_empty());

    // 3. The master freezes. The slave takes over, along with the master's pending requests.
    cluster.node_mut(1).crash();
    cluster.run_until(Duration::from_secs(5), STEP, |cluster| {
        cluster.node(2).service().role() == Role::Master
    });
    assert_eq!(
        cluster.node(2).service().account_store().pending_count(ClientId::new(OWNER)),
        2
    );
    assert_eq!(root_slot_count(&cluster, 2), 3);

    // 4. The third report completes the quorum on the new master.
    submit(&cluster, 2, &superpeers[2], &snapshot);
    cluster.run_for(Duration::from_secs(1), STEP);
    assert_eq!(
        cluster.records().account(ClientId::new(OWNER)).unwrap(),
        Some(snapshot.clone())
    );
    let update = ServerMessage::WorldState {
        client: ClientId::new(OWNER),
        account: snapshot,
    };
    for superpeer in &superpeers {
        assert!(superpeer.received().contains(&update));
    }
}
