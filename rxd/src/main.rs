use std::sync::Arc;
use std::time::Duration;

use log::info;
use transport::{Config, Rx};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = "127.0.0.1:0".parse().unwrap();
    let peer_addr = "127.0.0.1:5000".parse().unwrap();
    let rx = Arc::new(Rx::new(bind_addr, peer_addr, Config::default()).expect("bind receiver socket"));
    info!("receiver listening on {}", rx.local_addr().unwrap());

    rx.set_on_frame(Box::new(|payload, frame_type| {
        info!("received {frame_type:?} frame, {} bytes", payload.len());
    }));
    rx.set_on_connect(Box::new(|connected| {
        info!("connection state changed: connected={connected}");
    }));

    let poll_rx = rx.clone();
    std::thread::spawn(move || loop {
        let _ = poll_rx.poll(Duration::from_millis(20));
    });

    info!("starting handshake with sender at {peer_addr}");
    rx.connect().expect("send initial CONNECT");
    rx.start(None).expect("send START");

    loop {
        std::thread::sleep(Duration::from_secs(5));
        let stats = rx.stats();
        info!("stats: {stats:?}");
    }
}
