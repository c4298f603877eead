//! End-to-end scenarios exercising a real `Tx`/`Rx` pair over loopback UDP.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use transport::{Config, DataKind, Error, FrameType, Header, Rx, Tx};

fn spawn_poll_loop<F>(poll: F)
where
    F: Fn() -> transport::Result<()> + Send + 'static,
{
    std::thread::spawn(move || loop {
        let _ = poll();
    });
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn connected_pair() -> (Arc<Tx>, Arc<Rx>) {
    let tx = Arc::new(Tx::new("127.0.0.1:0".parse().unwrap(), Config::default()).unwrap());
    let tx_addr = tx.local_addr().unwrap();
    let rx = Arc::new(Rx::new("127.0.0.1:0".parse().unwrap(), tx_addr, Config::default()).unwrap());

    let poll_tx = tx.clone();
    spawn_poll_loop(move || poll_tx.poll(Duration::from_millis(5)));
    let poll_rx = rx.clone();
    spawn_poll_loop(move || poll_rx.poll(Duration::from_millis(5)));

    rx.connect().unwrap();

    let tx_for_wait = tx.clone();
    let rx_for_wait = rx.clone();
    assert!(
        wait_until(
            || tx_for_wait.is_connected() && rx_for_wait.is_connected(),
            Duration::from_secs(2)
        ),
        "handshake did not complete under no loss"
    );

    (tx, rx)
}

/// A two-socket relay sitting between a `Tx` bound at `tx_addr` and whatever
/// `Rx` is pointed at the returned address. `Rx`'s address is learned from
/// its first outbound datagram, mirroring how `Tx` learns its peer from the
/// `CONNECT` it receives. `drop_tx_to_rx` is consulted only for datagrams
/// flowing from `Tx` to `Rx`, letting a test simulate loss of specific
/// fragments/frame types without touching handshake or ACK traffic.
fn spawn_lossy_relay<F>(tx_addr: SocketAddr, drop_tx_to_rx: F) -> SocketAddr
where
    F: Fn(&Header) -> bool + Send + Sync + 'static,
{
    let sock_to_rx = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sock_to_tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    let rx_facing_addr = sock_to_rx.local_addr().unwrap();
    let rx_addr: Arc<Mutex<Option<SocketAddr>>> = Arc::new(Mutex::new(None));

    {
        let sock_to_rx = sock_to_rx.try_clone().unwrap();
        let sock_to_tx = sock_to_tx.try_clone().unwrap();
        let rx_addr = rx_addr.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            loop {
                let (n, from) = match sock_to_rx.recv_from(&mut buf) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                *rx_addr.lock().unwrap() = Some(from);
                let _ = sock_to_tx.send_to(&buf[..n], tx_addr);
            }
        });
    }
    {
        std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            loop {
                let (n, _from) = match sock_to_tx.recv_from(&mut buf) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if n >= transport::wire::HEADER_SIZE {
                    if let Ok(header) = Header::deserialize(&buf[..n]) {
                        if drop_tx_to_rx(&header) {
                            continue;
                        }
                    }
                }
                if let Some(addr) = *rx_addr.lock().unwrap() {
                    let _ = sock_to_rx.send_to(&buf[..n], addr);
                }
            }
        });
    }

    rx_facing_addr
}

#[test]
fn handshake_completes_under_no_loss() {
    let (tx, rx) = connected_pair();
    assert!(tx.is_connected());
    assert!(rx.is_connected());
}

#[test]
fn single_fragment_reliable_datagram_is_delivered() {
    let (tx, rx) = connected_pair();

    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    tx.set_on_data(Box::new(move |kind, payload| {
        if kind == DataKind::User {
            *received_clone.lock().unwrap() = Some(payload.to_vec());
        }
    }));

    rx.send_user_data(b"hello sender").unwrap();

    assert!(
        wait_until(|| received.lock().unwrap().is_some(), Duration::from_secs(2)),
        "reliable datagram was not delivered"
    );
    assert_eq!(received.lock().unwrap().as_deref(), Some(&b"hello sender"[..]));
}

#[test]
fn multi_fragment_iframe_is_reassembled_lossless() {
    let (tx, rx) = connected_pair();

    let received: Arc<Mutex<Option<(Vec<u8>, FrameType)>>> = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    rx.set_on_frame(Box::new(move |payload, frame_type| {
        *received_clone.lock().unwrap() = Some((payload.to_vec(), frame_type));
    }));

    let payload = vec![0xABu8; 4200];
    tx.send_media(FrameType::I, &payload).unwrap();

    assert!(
        wait_until(|| received.lock().unwrap().is_some(), Duration::from_secs(2)),
        "I-frame was not reassembled"
    );
    let (data, frame_type) = received.lock().unwrap().take().unwrap();
    assert_eq!(data, payload);
    assert_eq!(frame_type, FrameType::I);
}

#[test]
fn iframe_single_fragment_loss_triggers_one_retransmission() {
    let mut cfg = Config::default();
    cfg.iframe_retrans_timeout_ms = 20;
    cfg.iframe_max_retrans = 5;

    let tx = Arc::new(Tx::new("127.0.0.1:0".parse().unwrap(), cfg).unwrap());
    let tx_addr = tx.local_addr().unwrap();

    let dropped_once = Arc::new(AtomicBool::new(false));
    let dropped_once_for_relay = dropped_once.clone();
    let relay_addr = spawn_lossy_relay(tx_addr, move |header| {
        if header.frame_type == FrameType::I && header.frag_index == 1 {
            // Drop only the first delivery attempt; let the retransmission through.
            !dropped_once_for_relay.swap(true, Ordering::SeqCst)
        } else {
            false
        }
    });

    let rx = Arc::new(Rx::new("127.0.0.1:0".parse().unwrap(), relay_addr, cfg).unwrap());

    let poll_tx = tx.clone();
    spawn_poll_loop(move || poll_tx.poll(Duration::from_millis(5)));
    let poll_rx = rx.clone();
    spawn_poll_loop(move || poll_rx.poll(Duration::from_millis(5)));

    rx.connect().unwrap();
    assert!(
        wait_until(|| tx.is_connected() && rx.is_connected(), Duration::from_secs(2)),
        "handshake did not complete"
    );

    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    rx.set_on_frame(Box::new(move |payload, frame_type| {
        if frame_type == FrameType::I {
            *received_clone.lock().unwrap() = Some(payload.to_vec());
        }
    }));

    let payload = vec![0x42u8; 4200];
    tx.send_media(FrameType::I, &payload).unwrap();

    assert!(
        wait_until(|| received.lock().unwrap().is_some(), Duration::from_secs(2)),
        "I-frame was not eventually delivered despite retransmission"
    );
    assert_eq!(received.lock().unwrap().as_deref(), Some(&payload[..]));
    assert!(dropped_once.load(Ordering::SeqCst));
    assert_eq!(tx.stats().retransmitted_packets, 1);
}

#[test]
fn pframe_full_loss_increments_incomplete_frames_without_invoking_callback() {
    let mut cfg = Config::default();
    cfg.frame_timeout_ms = 50;

    let tx = Arc::new(Tx::new("127.0.0.1:0".parse().unwrap(), cfg).unwrap());
    let tx_addr = tx.local_addr().unwrap();

    let relay_addr = spawn_lossy_relay(tx_addr, |header| header.frame_type == FrameType::P);

    let rx = Arc::new(Rx::new("127.0.0.1:0".parse().unwrap(), relay_addr, cfg).unwrap());

    let poll_tx = tx.clone();
    spawn_poll_loop(move || poll_tx.poll(Duration::from_millis(5)));
    let poll_rx = rx.clone();
    spawn_poll_loop(move || poll_rx.poll(Duration::from_millis(5)));

    rx.connect().unwrap();
    assert!(
        wait_until(|| tx.is_connected() && rx.is_connected(), Duration::from_secs(2)),
        "handshake did not complete"
    );

    let invoked = Arc::new(AtomicBool::new(false));
    let invoked_clone = invoked.clone();
    rx.set_on_frame(Box::new(move |_payload, _frame_type| {
        invoked_clone.store(true, Ordering::SeqCst);
    }));

    tx.send_media(FrameType::P, b"lost p-frame payload").unwrap();

    assert!(
        wait_until(|| rx.stats().incomplete_frames >= 1, Duration::from_secs(2)),
        "incomplete_frames was never incremented after the P-frame was fully lost"
    );
    assert!(!invoked.load(Ordering::SeqCst));
}

#[test]
fn heartbeat_timeout_drops_tx_to_idle() {
    let mut cfg = Config::default();
    cfg.heartbeat_interval_ms = 30;
    cfg.heartbeat_max_miss = 2;

    let tx = Arc::new(Tx::new("127.0.0.1:0".parse().unwrap(), cfg).unwrap());
    let tx_addr = tx.local_addr().unwrap();
    let rx = Arc::new(Rx::new("127.0.0.1:0".parse().unwrap(), tx_addr, cfg).unwrap());

    let poll_tx = tx.clone();
    spawn_poll_loop(move || poll_tx.poll(Duration::from_millis(5)));

    let rx_running = Arc::new(AtomicBool::new(true));
    let rx_running_clone = rx_running.clone();
    let poll_rx = rx.clone();
    std::thread::spawn(move || {
        while rx_running_clone.load(Ordering::Relaxed) {
            let _ = poll_rx.poll(Duration::from_millis(5));
        }
    });

    rx.connect().unwrap();
    assert!(
        wait_until(|| tx.is_connected() && rx.is_connected(), Duration::from_secs(2)),
        "handshake did not complete"
    );

    // Stop RX's poll loop so it stops sending heartbeats; TX should notice
    // the peer has gone quiet and drop back to Idle on its own.
    rx_running.store(false, Ordering::Relaxed);

    assert!(
        wait_until(|| !tx.is_connected(), Duration::from_secs(2)),
        "TX did not drop the connection after missed heartbeats"
    );
    assert_eq!(tx.send_media(FrameType::I, b"x"), Err(Error::NotReady));
}

#[test]
fn send_media_before_connect_is_not_ready() {
    let tx = Tx::new("127.0.0.1:0".parse().unwrap(), Config::default()).unwrap();
    assert_eq!(tx.send_media(FrameType::I, b"x"), Err(Error::NotReady));
}
