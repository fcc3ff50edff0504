//! Exchange behavior over the in-memory transport.
//!
//! Run with: `cargo test -p warden_lockstep --test exchange_test`

use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use warden_lockstep::{
    DesyncDetector, Exchange, ExchangeConfig, ExchangeState, Message, ParticipantSlot, Record,
    RecordBody, RecordSet,
};
use warden_transport::{
    HostOptions, JoinOptions, MemoryHub, MemoryTransport, NetUserId, Transport, TransportConfig,
};

const CLIENTS: usize = 3;
const TICKS: u32 = 3;

fn endpoint(hub: &MemoryHub) -> MemoryTransport {
    MemoryTransport::init(hub.clone(), TransportConfig::default()).unwrap()
}

fn record_for(slot: ParticipantSlot, tick: u32) -> Record {
    let action = 100 * slot.index() as u16 + tick as u16 + 1;
    Record::new(tick, action, [tick as i32, -(slot.index() as i32), 0, 0], 0, tick * 31)
}

/// Clients whose records are written by hand, so the test controls the
/// exact order in which the host receives them.
struct RawClient {
    link: MemoryTransport,
    slot: ParticipantSlot,
}

fn lobby(hub: &MemoryHub) -> (Exchange, MemoryTransport, Vec<RawClient>) {
    let mut host_link = endpoint(hub);
    host_link.host("6000", HostOptions::default()).unwrap();
    let links: Vec<MemoryTransport> = (0..CLIENTS)
        .map(|_| {
            let mut link = endpoint(hub);
            link.join("h:6000", JoinOptions::default()).unwrap();
            link
        })
        .collect();

    let mut host = Exchange::host(ExchangeConfig::default(), 1);
    host.poll_lobby(&mut host_link).unwrap();

    let clients = links
        .into_iter()
        .map(|mut link| {
            let mut buffer = [0u8; Message::MAX_SIZE];
            let len = link.read_message(NetUserId::HOST, &mut buffer).unwrap();
            let Ok(Message::Welcome(welcome)) = Message::decode(&buffer[..len]) else {
                panic!("expected a welcome");
            };
            RawClient { slot: welcome.slot().unwrap(), link }
        })
        .collect();
    (host, host_link, clients)
}

fn expected_set(tick: u32) -> RecordSet {
    let mut set = RecordSet::default();
    set.set(ParticipantSlot::HOST, record_for(ParticipantSlot::HOST, tick));
    for index in 1..=CLIENTS {
        let slot = ParticipantSlot::new(index).unwrap();
        set.set(slot, record_for(slot, tick));
    }
    set.seal();
    set
}

fn sends() -> Vec<(usize, u32)> {
    (0..CLIENTS).flat_map(|c| (0..TICKS).map(move |t| (c, t))).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_arrival_order_does_not_change_sets(order in Just(sends()).prop_shuffle()) {
        let hub = MemoryHub::new();
        let (mut host, mut host_link, mut clients) = lobby(&hub);

        for (client, tick) in order {
            let client = &mut clients[client];
            let body = RecordBody::new(tick, client.slot, record_for(client.slot, tick));
            client
                .link
                .send_single(NetUserId::HOST, &Message::Record(body).encode(), true)
                .unwrap();
        }

        for tick in 0..TICKS {
            let local = record_for(ParticipantSlot::HOST, tick);
            let outcome = host.exchange(&mut host_link, tick, local).unwrap();
            prop_assert_eq!(outcome.state, ExchangeState::Complete);
            prop_assert_eq!(outcome.set, expected_set(tick));
        }
    }
}

#[test]
fn test_every_endpoint_sees_the_same_sets() {
    let hub = MemoryHub::new();
    let ticks = 5;

    let host_hub = hub.clone();
    let host = thread::spawn(move || {
        let mut link = endpoint(&host_hub);
        link.host("6100", HostOptions::default()).unwrap();
        let mut exchange = Exchange::host(ExchangeConfig::default(), 9);
        let present = exchange
            .wait_for_participants(&mut link, 3, Duration::from_secs(5))
            .unwrap();
        assert_eq!(present, 3);

        let mut detector = DesyncDetector::new();
        let mut sets = Vec::new();
        for tick in 0..ticks {
            let outcome = exchange.exchange(&mut link, tick, Record::noop(tick, tick)).unwrap();
            assert!(detector.check(tick, &outcome.set, outcome.contributors).is_clean());
            sets.push(outcome.set);
        }
        // Keep the link open until every client has its last set.
        thread::sleep(Duration::from_millis(200));
        sets
    });

    let clients: Vec<_> = (0..2)
        .map(|_| {
            let hub = hub.clone();
            thread::spawn(move || {
                let mut link = endpoint(&hub);
                link.join("h:6100", JoinOptions::default()).unwrap();
                let mut exchange = Exchange::client(ExchangeConfig::default());
                exchange.await_welcome(&mut link).unwrap();
                assert_eq!(exchange.session_level_id(), 9);

                (0..ticks)
                    .map(|tick| {
                        exchange
                            .exchange(&mut link, tick, Record::noop(tick, tick))
                            .unwrap()
                            .set
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let host_sets = host.join().unwrap();
    for client in clients {
        assert_eq!(client.join().unwrap(), host_sets);
    }
    assert_eq!(host_sets.len(), ticks as usize);
    assert!(host_sets.iter().all(RecordSet::is_sealed));
}
