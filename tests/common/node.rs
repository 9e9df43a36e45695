use std::time::Duration;

use arbitrator_rs::{
    clock::{ManualClock, Timestamp},
    service::{
        implementation::ArbitratorService,
        types::{ArbitratorError, TickStatus},
        Configuration,
    },
    storage::accessors::RecordStore,
    types::data_types::{ArbitratorId, ClientId},
};

use super::{
    mem_db::MemDB,
    network::{mock_network, ClientStub, NetworkStub},
};

/// Short timers, so that failover and store timeouts happen within a few simulated seconds.
pub(crate) fn test_configuration(me: u32) -> Configuration {
    Configuration::builder()
        .me(ArbitratorId::new(me))
        .arbitrator_count(3)
        .register_interval(Duration::from_millis(500))
        .register_timeout(Duration::from_secs(3))
        .heartbeat_interval(Duration::from_millis(500))
        .heartbeat_timeout(Duration::from_secs(2))
        .master_recheck_interval(Duration::from_secs(1))
        .master_absence_timeout(Duration::from_secs(10))
        .store_request_check_interval(Duration::from_millis(250))
        .store_request_timeout(Duration::from_secs(3))
        .replication_interval(Duration::from_secs(1))
        .build()
}

/// An arbitrator driven tick by tick on a shared manual clock.
///
/// Things the Nodes of a [Cluster] have in common:
/// - The record store.
/// - The clock.
///
/// Things that they differ in:
/// - Configuration, most importantly the arbitrator id.
/// - Network instance.
pub(crate) struct Node {
    service: ArbitratorService<MemDB, NetworkStub, ManualClock>,
    network: NetworkStub,
    crashed: bool,
    status: TickStatus,
}

impl Node {
    pub(crate) fn new(
        configuration: Configuration,
        kv_store: MemDB,
        network: NetworkStub,
        clock: ManualClock,
    ) -> Node {
        let service = ArbitratorService::new(configuration, kv_store, network.clone(), clock)
            .expect("Test configuration is invalid!");
        Node {
            service,
            network,
            crashed: false,
            status: TickStatus::Running,
        }
    }

    pub(crate) fn tick(&mut self) -> Result<TickStatus, ArbitratorError> {
        let result = self.service.tick();
        if let Ok(status) = result {
            self.status = status;
        }
        result
    }

    /// Stop ticking this node without letting it deregister, as if its process had frozen.
    pub(crate) fn crash(&mut self) {
        self.crashed = true;
    }

    /// Resume ticking a crashed node.
    pub(crate) fn revive(&mut self) {
        self.crashed = false;
    }

    pub(crate) fn status(&self) -> TickStatus {
        self.status
    }

    pub(crate) fn connect(&self, client: u64) -> ClientStub {
        self.network.connect(ClientId::new(client))
    }

    pub(crate) fn service(&self) -> &ArbitratorService<MemDB, NetworkStub, ManualClock> {
        &self.service
    }

    pub(crate) fn service_mut(&mut self) -> &mut ArbitratorService<MemDB, NetworkStub, ManualClock> {
        &mut self.service
    }
}

/// A set of [Node]s sharing one record store, one mock network, and one manual clock.
pub(crate) struct Cluster {
    pub(crate) clock: ManualClock,
    pub(crate) kv_store: MemDB,
    pub(crate) nodes: Vec<Node>,
}

impl Cluster {
    pub(crate) fn new(configurations: Vec<Configuration>) -> Cluster {
        let clock = ManualClock::new(Timestamp::new(1_000_000));
        let kv_store = MemDB::new();
        let network_stubs = mock_network(configurations.iter().map(|configuration| configuration.me));
        let nodes = configurations
            .into_iter()
            .zip(network_stubs)
            .map(|(configuration, network)| Node::new(configuration, kv_store.clone(), network, clock.clone()))
            .collect();
        Cluster {
            clock,
            kv_store,
            nodes,
        }
    }

    /// Like [Cluster::new], but every node gets a network of its own. Needed when ids repeat.
    pub(crate) fn isolated(configurations: Vec<Configuration>) -> Cluster {
        let clock = ManualClock::new(Timestamp::new(1_000_000));
        let kv_store = MemDB::new();
        let nodes = configurations
            .into_iter()
            .map(|configuration| {
                let network = mock_network(std::iter::once(configuration.me)).remove(0);
                Node::new(configuration, kv_store.clone(), network, clock.clone())
            })
            .collect();
        Cluster {
            clock,
            kv_store,
            nodes,
        }
    }

    pub(crate) fn node(&self, id: u32) -> &Node {
        self.nodes
            .iter()
            .find(|node| node.service.me() == ArbitratorId::new(id))
            .expect("No node with this id!")
    }

    pub(crate) fn node_mut(&mut self, id: u32) -> &mut Node {
        self.nodes
            .iter_mut()
            .find(|node| node.service.me() == ArbitratorId::new(id))
            .expect("No node with this id!")
    }

    /// Tick every node that has not crashed or stopped, in order, without advancing the clock.
    pub(crate) fn tick(&mut self) {
        for node in self.nodes.iter_mut() {
            if node.crashed || node.status != TickStatus::Running {
                continue;
            }
            node.tick().expect("Arbitrator failed!");
        }
    }

    /// Advance the clock by `by`, then tick.
    pub(crate) fn step(&mut self, by: Duration) {
        self.clock.advance(by);
        self.tick();
    }

    /// Step in increments of `step` until `total` has passed.
    pub(crate) fn run_for(&mut self, total: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.step(step);
            elapsed += step;
        }
    }

    /// Step in increments of `step` until `condition` holds. Panics if it does not hold within `limit`.
    pub(crate) fn run_until(&mut self, limit: Duration, step: Duration, condition: impl Fn(&Cluster) -> bool) {
        let mut elapsed = Duration::ZERO;
        while !condition(self) {
            assert!(elapsed < limit, "Condition not reached within {:?}", limit);
            self.step(step);
            elapsed += step;
        }
    }

    pub(crate) fn records(&self) -> RecordStore<MemDB> {
        RecordStore::new(self.kv_store.clone())
    }
}
