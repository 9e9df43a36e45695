use std::time::Duration;

use arbitrator_rs::{
    membership::types::{MembershipError, Role},
    service::types::{ArbitratorError, StopReason, TickStatus},
    types::data_types::ArbitratorId,
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    node::{test_configuration, Cluster},
};

const STEP: Duration = Duration::from_millis(250);

#[test]
fn master_failover_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start arbitrators 1, 2, and 3 at the same moment.
    let mut cluster = Cluster::new((1..=3).map(test_configuration).collect());
    cluster.tick();

    // 1.1. The lowest id becomes master, and both others see it.
    assert_eq!(cluster.node(1).service().role(), Role::Master);
    assert_eq!(cluster.node(2).service().role(), Role::Slave);
    assert_eq!(cluster.node(3).service().role(), Role::Slave);
    assert_eq!(cluster.node(2).service().master(), Some(ArbitratorId::new(1)));
    assert_eq!(cluster.node(3).service().master(), Some(ArbitratorId::new(1)));

    // 1.2. Heartbeats keep the cluster stable.
    cluster.run_for(Duration::from_secs(5), STEP);
    assert_eq!(cluster.node(1).service().role(), Role::Master);
    assert_eq!(cluster.node(3).service().master(), Some(ArbitratorId::new(1)));

    // 2. Freeze the master.
    log::debug!("Freezing arbitrator 1.");
    cluster.node_mut(1).crash();

    // 2.1. Arbitrator 2, now the lowest live id, takes over and the last slave follows it.
    cluster.run_until(Duration::from_secs(5), STEP, |cluster| {
        cluster.node(2).service().role() == Role::Master
    });
    cluster.run_until(Duration::from_secs(2), STEP, |cluster| {
        cluster.node(3).service().master() == Some(ArbitratorId::new(2))
    });
    assert_eq!(cluster.node(3).service().role(), Role::Slave);

    // 2.2. The new master reaped the frozen arbitrator's record.
    let live: Vec<ArbitratorId> = cluster
        .records()
        .arbitrator_records()
        .unwrap()
        .into_keys()
        .collect();
    assert_eq!(live, vec![ArbitratorId::new(2), ArbitratorId::new(3)]);
    let masters: Vec<ArbitratorId> = cluster
        .records()
        .arbitrator_records()
        .unwrap()
        .into_values()
        .filter(|record| record.is_master)
        .map(|record| record.id)
        .collect();
    assert_eq!(masters, vec![ArbitratorId::new(2)]);

    // 3. The frozen arbitrator wakes up to find its record gone, and stops instead of acting as master.
    log::debug!("Waking arbitrator 1 up.");
    cluster.node_mut(1).revive();
    cluster.tick();
    assert_eq!(cluster.node(1).status(), TickStatus::Stopped(StopReason::Lapsed));
    assert_eq!(cluster.node(1).service().role(), Role::Unregistered);
    assert_eq!(cluster.node(2).service().role(), Role::Master);
}

#[test]
fn registration_refused_at_capacity_test() {
    setup_logger(LevelFilter::Debug);

    let mut configurations: Vec<_> = (1..=2).map(test_configuration).collect();
    for configuration in configurations.iter_mut() {
        configuration.arbitrator_count = 1;
    }
    let mut cluster = Cluster::new(configurations);

    // 1. Arbitrator 1 fills the only place in the cluster.
    cluster.node_mut(1).tick().unwrap();
    assert_eq!(cluster.node(1).service().role(), Role::Master);

    // 2. Arbitrator 2 keeps retrying until its registration timeout passes.
    let mut result = Ok(TickStatus::Running);
    for _ in 0..20 {
        cluster.clock.advance(STEP);
        cluster.node_mut(1).tick().unwrap();
        result = cluster.node_mut(2).tick();
        if result.is_err() {
            break;
        }
        assert_eq!(cluster.node(2).service().role(), Role::Registering);
    }
    assert!(matches!(
        result,
        Err(ArbitratorError::Membership(MembershipError::RegistrationTimeout))
    ));

    // 3. The failed arbitrator stays stopped, and the cluster is unaffected.
    assert_eq!(
        cluster.node_mut(2).tick().unwrap(),
        TickStatus::Stopped(StopReason::Failed)
    );
    let ids: Vec<ArbitratorId> = cluster
        .records()
        .arbitrator_records()
        .unwrap()
        .into_keys()
        .collect();
    assert_eq!(ids, vec![ArbitratorId::new(1)]);
}

#[test]
fn duplicate_id_waits_for_the_holder_to_leave_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Two processes are started with the same id.
    let mut cluster = Cluster::isolated(vec![test_configuration(1), test_configuration(1)]);
    cluster.tick();
    assert_eq!(cluster.nodes[0].service().role(), Role::Master);

    // 2. The second is refused while the first one's record is live.
    cluster.run_for(Duration::from_secs(1), STEP);
    assert_eq!(cluster.nodes[1].service().role(), Role::Registering);
    assert_eq!(cluster.records().arbitrator_records().unwrap().len(), 1);

    // 3. Once the first one deregisters, the second takes its place and, being alone, becomes master.
    cluster.nodes[0].service_mut().shutdown();
    assert!(cluster.records().arbitrator_records().unwrap().is_empty());
    cluster.run_until(Duration::from_secs(1), STEP, |cluster| {
        cluster.nodes[1].service().role() == Role::Master
    });
    assert_eq!(
        cluster.nodes[0].status(),
        TickStatus::Stopped(StopReason::Deregistered)
    );
}

#[test]
fn arbitrator_deregisters_at_end_of_lifetime_test() {
    setup_logger(LevelFilter::Debug);

    let mut configuration = test_configuration(1);
    configuration.arbitrator_lifetime = Some((Duration::from_secs(1), Duration::from_secs(1)));
    let mut cluster = Cluster::new(vec![configuration]);

    cluster.tick();
    assert_eq!(cluster.node(1).service().role(), Role::Master);

    cluster.run_until(Duration::from_secs(2), STEP, |cluster| {
        cluster.node(1).status() != TickStatus::Running
    });
    assert_eq!(
        cluster.node(1).status(),
        TickStatus::Stopped(StopReason::Deregistered)
    );
    assert!(cluster.records().arbitrator_records().unwrap().is_empty());
}
