// End-to-end tests of the ingestion loop using datagram socket pairs as bus endpoints
use can_ws_relay::types::{timestamp_from_timeval, CAN_MTU};
use can_ws_relay::{
    BusEndpoint, CanFrame, Channel, Dispatcher, IndexCache, InterfaceProbe, Multiplexer,
    Reception, RelayError, ShutdownSignal, Timestamp, TransportConfig, WsTransport,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::rc::Rc;
use std::time::Duration;

type Names = Rc<RefCell<HashMap<u32, String>>>;

/// Bus endpoint fed through the other half of a datagram socket pair
struct FakeEndpoint {
    sock: UnixDatagram,
    label: String,
    ifindex: u32,
    source_sequence: VecDeque<u32>,
    stamp: Option<Timestamp>,
    names: Names,
}

impl AsRawFd for FakeEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

impl InterfaceProbe for FakeEndpoint {
    fn interface_name(&self, ifindex: u32) -> io::Result<String> {
        self.names
            .borrow()
            .get(&ifindex)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))
    }
}

impl BusEndpoint for FakeEndpoint {
    fn label(&self) -> &str {
        &self.label
    }

    fn receive(&mut self) -> can_ws_relay::Result<Reception> {
        let mut buf = [0u8; CAN_MTU];
        let n = self.sock.recv(&mut buf).map_err(|e| RelayError::Receive {
            interface: self.label.clone(),
            source: e,
        })?;
        let frame = CanFrame::from_wire(&buf[..n])?;
        let ifindex = self.source_sequence.pop_front().unwrap_or(self.ifindex);
        Ok(Reception { frame, ifindex })
    }

    fn receive_timestamp(&self) -> io::Result<Timestamp> {
        self.stamp
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }
}

fn endpoint(label: &str, ifindex: u32, names: &Names) -> (FakeEndpoint, UnixDatagram) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (ours, theirs) = UnixDatagram::pair().unwrap();
    names.borrow_mut().insert(ifindex, label.to_string());
    let ep = FakeEndpoint {
        sock: ours,
        label: label.to_string(),
        ifindex,
        source_sequence: VecDeque::new(),
        stamp: Some(timestamp_from_timeval(1000, 500)),
        names: Rc::clone(names),
    };
    (ep, theirs)
}

fn send(peer: &UnixDatagram, frame: &CanFrame) {
    peer.send(&frame.to_wire()).unwrap();
}

/// Records dispatches and requests shutdown after `limit` of them
struct Recorder {
    lines: RefCell<Vec<(Channel, String)>>,
    limit: usize,
    shutdown: ShutdownSignal,
}

impl Recorder {
    fn new(limit: usize, shutdown: &ShutdownSignal) -> Self {
        Self {
            lines: RefCell::new(Vec::new()),
            limit,
            shutdown: shutdown.clone(),
        }
    }

    fn texts(&self, channel: Channel) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

impl Dispatcher for Recorder {
    fn dispatch(&self, channel: Channel, text: &str) -> can_ws_relay::Result<()> {
        let mut lines = self.lines.borrow_mut();
        lines.push((channel, text.to_string()));
        if lines.len() >= self.limit {
            self.shutdown.trigger();
        }
        Ok(())
    }
}

fn seeded_cache(capacity: usize, names: &[&str]) -> IndexCache {
    let mut cache = IndexCache::new(capacity);
    for name in names {
        cache.note_name_len(name.len());
    }
    cache
}

#[test]
fn reference_line_reaches_both_channels() {
    let names = Names::default();
    let (can0, can0_peer) = endpoint("can0", 3, &names);
    let (can1, _can1_peer) = endpoint("can1", 4, &names);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(2, &shutdown);
    let cache = seeded_cache(4, &["can0", "can1"]);

    send(&can0_peer, &CanFrame::standard(0x123, &[0xDE, 0xAD]));

    let mut mux = Multiplexer::new(vec![can0, can1], cache, &recorder, shutdown);
    let stats = mux.run().unwrap();
    mux.close();

    assert_eq!(stats.frames, 1);
    assert_eq!(stats.dispatches, 2);
    assert_eq!(
        *recorder.lines.borrow(),
        vec![
            (Channel::RawRelay, "(1000.000500) can0  123#DEAD".to_string()),
            (Channel::Delta, "(1000.000500) can0  123#DEAD".to_string()),
        ]
    );
}

#[test]
fn extended_frame_with_empty_payload() {
    let names = Names::default();
    let (can0, peer) = endpoint("can0", 3, &names);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(2, &shutdown);

    send(&peer, &CanFrame::extended(0x1ABC_DE01, &[]));

    let mut mux = Multiplexer::new(vec![can0], seeded_cache(2, &["can0"]), &recorder, shutdown);
    mux.run().unwrap();

    let raw = recorder.texts(Channel::RawRelay);
    assert_eq!(raw, vec!["(1000.000500) can0  1ABCDE01#".to_string()]);
}

#[test]
fn frames_from_one_endpoint_keep_arrival_order() {
    let names = Names::default();
    let (can0, peer) = endpoint("can0", 3, &names);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(10, &shutdown);

    for id in 0x100..0x105u16 {
        send(&peer, &CanFrame::standard(id, &[id as u8]));
    }

    let mut mux = Multiplexer::new(vec![can0], seeded_cache(2, &["can0"]), &recorder, shutdown);
    let stats = mux.run().unwrap();
    assert_eq!(stats.frames, 5);

    for channel in Channel::ALL {
        let ids: Vec<String> = recorder
            .texts(channel)
            .iter()
            .map(|line| line.rsplit(' ').next().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["100#00", "101#01", "102#02", "103#03", "104#04"]);
    }
}

#[test]
fn endpoints_drained_in_configuration_order() {
    let names = Names::default();
    let (can0, can0_peer) = endpoint("can0", 3, &names);
    let (can1, can1_peer) = endpoint("can1", 4, &names);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(4, &shutdown);

    // can1 is written first but configured second
    send(&can1_peer, &CanFrame::standard(0x222, &[]));
    send(&can0_peer, &CanFrame::standard(0x111, &[]));

    let mut mux = Multiplexer::new(
        vec![can0, can1],
        seeded_cache(2, &["can0", "can1"]),
        &recorder,
        shutdown,
    );
    mux.run().unwrap();

    assert_eq!(
        recorder.texts(Channel::RawRelay),
        vec![
            "(1000.000500) can0  111#".to_string(),
            "(1000.000500) can1  222#".to_string(),
        ]
    );
}

#[test]
fn short_read_terminates_without_dispatch() {
    let names = Names::default();
    let (can0, peer) = endpoint("can0", 3, &names);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(2, &shutdown);

    peer.send(&[0u8; 10]).unwrap();

    let mut mux = Multiplexer::new(vec![can0], seeded_cache(2, &["can0"]), &recorder, shutdown);
    let result = mux.run();

    assert!(matches!(
        result,
        Err(RelayError::IncompleteFrame { received: 10, expected: 16 })
    ));
    assert!(recorder.lines.borrow().is_empty());
    assert_eq!(mux.close().frames, 0);
}

#[test]
fn missing_timestamp_falls_back_to_epoch() {
    let names = Names::default();
    let (mut can0, peer) = endpoint("can0", 3, &names);
    can0.stamp = None;

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(2, &shutdown);
    send(&peer, &CanFrame::standard(0x7FF, &[0x01]));

    let mut mux = Multiplexer::new(vec![can0], seeded_cache(2, &["can0"]), &recorder, shutdown);
    let stats = mux.run().unwrap();

    assert_eq!(stats.degraded_timestamps, 1);
    assert_eq!(
        recorder.texts(Channel::Delta),
        vec!["(0.000000) can0  7FF#01".to_string()]
    );
}

#[test]
fn name_column_widens_as_interfaces_appear() {
    let names = Names::default();
    let (mut any, peer) = endpoint("any", 3, &names);
    names.borrow_mut().insert(3, "can0".to_string());
    names.borrow_mut().insert(9, "vcan_long".to_string());
    any.source_sequence = VecDeque::from(vec![3, 9, 3]);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(6, &shutdown);
    for _ in 0..3 {
        send(&peer, &CanFrame::standard(0x1, &[]));
    }

    let mut mux = Multiplexer::new(vec![any], seeded_cache(4, &["any"]), &recorder, shutdown);
    mux.run().unwrap();

    assert_eq!(
        recorder.texts(Channel::RawRelay),
        vec![
            "(1000.000500) can0  001#".to_string(),
            "(1000.000500) vcan_long  001#".to_string(),
            "(1000.000500) can0       001#".to_string(),
        ]
    );
    assert_eq!(mux.cache().name_width(), 9);
}

#[test]
fn cache_exhaustion_stops_the_loop() {
    let names = Names::default();
    let (mut any, peer) = endpoint("any", 3, &names);
    names.borrow_mut().insert(4, "can1".to_string());
    any.source_sequence = VecDeque::from(vec![3, 4]);

    let shutdown = ShutdownSignal::new().unwrap();
    let recorder = Recorder::new(100, &shutdown);
    send(&peer, &CanFrame::standard(0x1, &[]));
    send(&peer, &CanFrame::standard(0x2, &[]));

    let mut mux = Multiplexer::new(vec![any], seeded_cache(1, &["any"]), &recorder, shutdown);
    let result = mux.run();

    assert!(matches!(result, Err(RelayError::CacheExhausted { capacity: 1 })));
    // first frame went out, second was never dispatched
    assert_eq!(recorder.lines.borrow().len(), 2);
    assert_eq!(mux.cache().ifindex(0), Some(3));
}

#[test]
fn shutdown_while_idle_closes_endpoints_and_transport() {
    let names = Names::default();
    let (can0, can0_peer) = endpoint("can0", 3, &names);
    let (can1, can1_peer) = endpoint("can1", 4, &names);

    let mut transport = WsTransport::create(TransportConfig::new("127.0.0.1", 0)).unwrap();
    transport.start().unwrap();
    let dispatcher = transport.dispatcher();

    let shutdown = ShutdownSignal::new().unwrap();
    let trigger = shutdown.clone();
    let waker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        trigger.trigger();
    });

    let mut mux = Multiplexer::new(
        vec![can0, can1],
        seeded_cache(2, &["can0", "can1"]),
        dispatcher.clone(),
        shutdown,
    );
    let stats = mux.run().unwrap();
    waker.join().unwrap();
    assert_eq!(stats.frames, 0);

    mux.close();
    transport.destroy();

    // both bus sockets are gone
    assert!(can0_peer.send(&[0u8; CAN_MTU]).is_err());
    assert!(can1_peer.send(&[0u8; CAN_MTU]).is_err());
    // and the transport no longer accepts lines
    assert!(matches!(
        dispatcher.dispatch(Channel::RawRelay, "late"),
        Err(RelayError::TransportClosed)
    ));
}
