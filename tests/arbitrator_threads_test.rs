use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use arbitrator_rs::{
    clock::SystemClock,
    events::{BecomeMasterEvent, RegisterArbitratorEvent},
    networking::messages::{ClientMessage, ServerMessage},
    service::{ArbitratorSpec, Configuration},
    storage::accessors::RecordStore,
    types::data_types::{AccountSnapshot, ArbitratorId, ClientId},
};
use log::LevelFilter;

mod common;

use crate::common::{logging::setup_logger, mem_db::MemDB, network::mock_network};

fn flag_handler<T: 'static>(flag: Arc<AtomicBool>) -> impl Fn(&T) + Send + 'static {
    move |_: &T| flag.store(true, Ordering::SeqCst)
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < limit, "Condition not reached within {:?}", limit);
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn arbitrator_threads_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Start a single arbitrator on its own threads.
    let kv_store = MemDB::new();
    let network = mock_network(std::iter::once(ArbitratorId::new(1))).remove(0);
    let owner = network.connect(ClientId::new(10));

    let registered = Arc::new(AtomicBool::new(false));
    let became_master = Arc::new(AtomicBool::new(false));

    let configuration = Configuration::builder()
        .me(ArbitratorId::new(1))
        .tick_interval(Duration::from_millis(10))
        .log_events(true)
        .build();

    let arbitrator = ArbitratorSpec::builder()
        .network(network)
        .kv_store(kv_store.clone())
        .clock(SystemClock)
        .configuration(configuration)
        .on_register_arbitrator(flag_handler::<RegisterArbitratorEvent>(registered.clone()))
        .on_become_master(flag_handler::<BecomeMasterEvent>(became_master.clone()))
        .build()
        .start()
        .unwrap();

    // 2. Being alone, it registers and becomes master, and its handlers hear about it.
    wait_until(Duration::from_secs(5), || {
        registered.load(Ordering::SeqCst) && became_master.load(Ordering::SeqCst)
    });
    let records = arbitrator.record_store().arbitrator_records().unwrap();
    assert!(records[&ArbitratorId::new(1)].is_master);

    // 3. A client request travels through the poller, the tick loop, and the persister.
    owner.send(ClientMessage::CreateAccount {
        initial: AccountSnapshot::new(vec![1]),
    });
    let mut received = Vec::new();
    wait_until(Duration::from_secs(5), || {
        received.extend(owner.received());
        received.contains(&ServerMessage::AccountCreated)
    });
    assert_eq!(
        arbitrator.record_store().account(ClientId::new(10)).unwrap(),
        Some(AccountSnapshot::new(vec![1]))
    );

    // 4. Dropping the arbitrator deregisters it.
    drop(arbitrator);
    assert!(RecordStore::new(kv_store)
        .arbitrator_records()
        .unwrap()
        .is_empty());
}
