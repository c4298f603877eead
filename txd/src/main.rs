use std::sync::Arc;
use std::time::Duration;

use log::info;
use transport::{Config, DataKind, FrameType, Tx};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bind_addr = "127.0.0.1:5000".parse().unwrap();
    let tx = Arc::new(Tx::new(bind_addr, Config::default()).expect("bind sender socket"));
    info!("sender listening on {}", tx.local_addr().unwrap());

    tx.set_on_data(Box::new(|kind, payload| match kind {
        DataKind::User => info!("received {} bytes of user data", payload.len()),
        DataKind::Disconnected => info!("peer disconnected"),
    }));
    tx.set_on_media_control(Box::new(|frame_type, url| {
        info!("media control {frame_type:?}, url={url:?}");
    }));

    let poll_tx = tx.clone();
    std::thread::spawn(move || loop {
        let _ = poll_tx.poll(Duration::from_millis(20));
    });

    info!("waiting for receiver to connect...");
    while !tx.is_connected() {
        std::thread::sleep(Duration::from_millis(50));
    }
    info!("connected, sending a synthetic I-frame every second");

    let mut frame_no: u64 = 0;
    loop {
        let payload = vec![(frame_no % 256) as u8; 64 * 1024];
        match tx.send_media(FrameType::I, &payload) {
            Ok(()) => frame_no += 1,
            Err(e) => info!("send_media failed: {e}"),
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}
