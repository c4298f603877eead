//! Receiver endpoint: initiates the handshake, drives the heartbeat,
//! validates and reassembles incoming media frames, and acknowledges
//! reliable user data.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::Config;
use crate::conn::{Connection, State};
use crate::engine::{bind_udp_socket, now_ms, ConnectCallback, DataCallback, DataKind, FrameCallback};
use crate::error::{Error, Result};
use crate::pool::{Frame, FramePool, SizeClass, TrackerPool};
use crate::queue::FrameQueue;
use crate::stats::{Stats, StatsSnapshot};
use crate::wire::{self, FrameType, Flags, Header, WireHeader};

/// Receives media frames from a single peer, performing validation,
/// reassembly, deduplication, and acknowledgement; drives the handshake
/// and heartbeat that keep the connection alive.
pub struct Rx {
    socket: UdpSocket,
    peer: SocketAddr,
    cfg: Config,
    conn: Mutex<Connection>,
    media_pool: FramePool,
    control_pool: FramePool,
    tracker_pool: TrackerPool,
    receive_queue: FrameQueue,
    reliable_queue: FrameQueue,
    last_iframe: Mutex<Option<Frame>>,
    next_seq_num: AtomicU32,
    next_frame_id: AtomicU16,
    last_received_seq_num: AtomicU32,
    last_heartbeat_sent_ms: AtomicU64,
    send_buf: Mutex<Vec<u8>>,
    stats: Stats,
    on_frame: Mutex<Option<FrameCallback>>,
    on_data: Mutex<Option<DataCallback>>,
    on_connect: Mutex<Option<ConnectCallback>>,
}

impl Rx {
    /// `peer` is the known address of the sender this receiver will
    /// handshake with.
    pub fn new(bind_addr: SocketAddr, peer: SocketAddr, cfg: Config) -> Result<Self> {
        let socket = bind_udp_socket(bind_addr, &cfg)?;
        Ok(Rx {
            socket,
            peer,
            cfg,
            conn: Mutex::new(Connection::new()),
            media_pool: FramePool::new(),
            control_pool: FramePool::new(),
            tracker_pool: TrackerPool::new(),
            receive_queue: FrameQueue::new(),
            reliable_queue: FrameQueue::new(),
            last_iframe: Mutex::new(None),
            next_seq_num: AtomicU32::new(0),
            next_frame_id: AtomicU16::new(0),
            last_received_seq_num: AtomicU32::new(0),
            last_heartbeat_sent_ms: AtomicU64::new(0),
            send_buf: Mutex::new(Vec::new()),
            stats: Stats::new(),
            on_frame: Mutex::new(None),
            on_data: Mutex::new(None),
            on_connect: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|_| Error::SocketBind)
    }

    pub fn set_on_frame(&self, cb: FrameCallback) {
        *self.on_frame.lock().unwrap() = Some(cb);
    }

    pub fn set_on_data(&self, cb: DataCallback) {
        *self.on_data.lock().unwrap() = Some(cb);
    }

    pub fn set_on_connect(&self, cb: ConnectCallback) {
        *self.on_connect.lock().unwrap() = Some(cb);
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_connected()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Starts the three-way handshake by sending `CONNECT`.
    pub fn connect(&self) -> Result<()> {
        let now = now_ms();
        self.conn.lock().unwrap().rx_begin_handshake(now);
        self.send_control(FrameType::Connect, 0)
    }

    /// Sends `DISCONNECT`. The peer's `ACK` completes the teardown; this
    /// side does not retransmit `DISCONNECT`.
    pub fn disconnect(&self) -> Result<()> {
        self.send_control(FrameType::Disconnect, 0)?;
        self.conn.lock().unwrap().teardown();
        Ok(())
    }

    /// Requests media playback start from the peer, optionally naming a
    /// source URL (sent as UTF-8, null-terminated, capped by
    /// `cfg.url_max_len`).
    pub fn start(&self, url: Option<&str>) -> Result<()> {
        let payload = encode_url(url, self.cfg.url_max_len)?;
        self.send_control_with_payload(FrameType::Start, 0, &payload)
    }

    pub fn stop(&self) -> Result<()> {
        self.send_control(FrameType::Stop, 0)
    }

    /// Sends a small, reliably-delivered user datagram (`USER`).
    pub fn send_user_data(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > SizeClass::Control.capacity() {
            return Err(Error::PacketTooLarge);
        }
        if !self.is_connected() {
            return Err(Error::NotReady);
        }
        let frame = self.control_pool.acquire(SizeClass::Control);
        frame.write_at(0, payload)?;
        let frame_id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
        frame.set_frame_id(frame_id);
        frame.set_frame_type(FrameType::User);
        let send_time = now_ms();
        frame.set_send_time_ms(send_time);

        let header = self.next_header(frame_id, FrameType::User, Flags::LAST_FRAG, 0, 1, payload.len() as u16);
        self.send_fragment(&header, payload)?;
        self.stats.packets_sent();
        self.reliable_queue.push(frame);
        Ok(())
    }

    fn next_header(
        &self,
        frame_id: u16,
        frame_type: FrameType,
        flags: Flags,
        frag_index: u16,
        total_frags: u16,
        payload_size: u16,
    ) -> Header {
        Header {
            seq_num: self.next_seq_num.fetch_add(1, Ordering::Relaxed),
            frame_id,
            frame_type,
            flags,
            frag_index,
            total_frags,
            payload_size,
        }
    }

    fn send_control(&self, frame_type: FrameType, frame_id: u16) -> Result<()> {
        self.send_control_with_payload(frame_type, frame_id, &[])
    }

    fn send_control_with_payload(
        &self,
        frame_type: FrameType,
        frame_id: u16,
        payload: &[u8],
    ) -> Result<()> {
        let header = self.next_header(
            frame_id,
            frame_type,
            Flags::LAST_FRAG,
            0,
            1,
            payload.len() as u16,
        );
        self.send_fragment(&header, payload)?;
        self.stats.packets_sent();
        Ok(())
    }

    fn send_fragment(&self, header: &Header, payload: &[u8]) -> Result<()> {
        let mut buf = self.send_buf.lock().unwrap();
        buf.clear();
        buf.resize(wire::HEADER_SIZE + 2 + payload.len(), 0);
        WireHeader::compute_and_set_crc(header, payload, &mut buf[..wire::HEADER_SIZE + 2])?;
        buf[wire::HEADER_SIZE + 2..].copy_from_slice(payload);
        match self.socket.send_to(&buf, self.peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::Busy),
            Err(_) => Err(Error::SocketSend),
        }
    }

    /// Runs one receive attempt (waiting up to `timeout`) followed by one
    /// retransmission-sweep / liveness pass.
    pub fn poll(&self, timeout: Duration) -> Result<()> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|_| Error::SocketRecv)?;
        let recv_result = self.receive_one();
        self.sweep();
        recv_result
    }

    fn receive_one(&self) -> Result<()> {
        let mut buf = vec![0u8; self.cfg.mtu];
        let (n, _from) = match self.socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(Error::Busy)
            }
            Err(_) => return Err(Error::SocketRecv),
        };
        if n < wire::HEADER_SIZE + 2 {
            self.stats.dropped_invalid();
            return Err(Error::PacketInvalid);
        }
        let header = match Header::deserialize(&buf[..n]) {
            Ok(h) => h,
            Err(_) => {
                self.stats.dropped_invalid();
                return Err(Error::PacketInvalid);
            }
        };
        let payload_start = wire::HEADER_SIZE + 2;
        let payload_end = payload_start + header.payload_size as usize;
        if payload_end > n {
            self.stats.dropped_invalid();
            return Err(Error::PacketInvalid);
        }
        let payload = &buf[payload_start..payload_end];
        if WireHeader::verify(&buf[..payload_start], payload).is_err() {
            self.stats.dropped_checksum();
            return Err(Error::Checksum);
        }
        if !wire::validate(&header, self.cfg.mtu) {
            self.stats.dropped_invalid();
            return Err(Error::PacketInvalid);
        }
        self.stats.packets_received();
        self.track_sequence_gap(header.seq_num);
        self.dispatch(&header, payload);
        Ok(())
    }

    fn track_sequence_gap(&self, seq_num: u32) {
        let last = self.last_received_seq_num.load(Ordering::Relaxed);
        if last > 0 && seq_num > last + 1 {
            self.stats.add_lost_packets((seq_num - last - 1) as u64);
        }
        if seq_num > last {
            self.last_received_seq_num.store(seq_num, Ordering::Relaxed);
        }
    }

    fn dispatch(&self, header: &Header, payload: &[u8]) {
        let now = now_ms();
        match header.frame_type {
            FrameType::Connected => {
                self.conn.lock().unwrap().rx_complete_handshake(self.peer, now);
                let _ = self.send_control(FrameType::Ack, 0);
                if let Some(cb) = self.on_connect.lock().unwrap().as_mut() {
                    cb(true);
                }
            }
            FrameType::Ack => {
                if header.frame_id == 0 {
                    self.conn.lock().unwrap().note_heartbeat(now);
                } else {
                    self.reliable_queue.remove(header.frame_id);
                }
            }
            FrameType::Disconnect => {
                self.conn.lock().unwrap().teardown();
                let _ = self.send_control(FrameType::Ack, 0);
                if let Some(cb) = self.on_connect.lock().unwrap().as_mut() {
                    cb(false);
                }
            }
            _ if header.frame_type.is_media() => self.reassemble(header, payload),
            _ => {
                self.stats.dropped_invalid();
            }
        }
    }

    fn reassemble(&self, header: &Header, payload: &[u8]) {
        let now = now_ms();
        let frame = match self.receive_queue.find(header.frame_id) {
            Some(f) => f,
            None => {
                let f = self.media_pool.acquire(SizeClass::Media);
                f.set_frame_id(header.frame_id);
                f.set_frame_type(header.frame_type);
                f.set_total_frags(header.total_frags);
                let tracker = match self.tracker_pool.acquire(header.total_frags as usize) {
                    Ok(t) => t,
                    Err(_) => {
                        self.stats.dropped_no_memory();
                        return;
                    }
                };
                f.install_tracker(tracker);
                f.set_first_receive_time_ms(now);
                self.receive_queue.push(f.clone());
                f
            }
        };

        let already_received = frame.with_tracker(|t| {
            t.and_then(|tracker| tracker.slot(header.frag_index as usize))
                .map(|s| s.acknowledged)
                .unwrap_or(true)
        });
        if already_received {
            self.stats.dup_packets();
            return;
        }

        let offset = wire::fragment_offset(header.frag_index as usize, self.cfg.mtu);
        if offset + payload.len() > frame.capacity() {
            self.stats.dropped_invalid();
            return;
        }
        if frame.write_at(offset, payload).is_err() {
            self.stats.dropped_invalid();
            return;
        }
        frame.with_tracker(|t| {
            if let Some(tracker) = t {
                if let Some(slot) = tracker.slot_mut(header.frag_index as usize) {
                    slot.acknowledged = true;
                }
            }
        });
        frame.set_last_receive_time_ms(now);
        let recv_frags = frame.increment_recv_frags();

        let _ = self.send_control(FrameType::Ack, header.frame_id);

        if recv_frags == frame.total_frags() {
            frame.set_state(crate::pool::FrameState::Complete);
            self.receive_queue.remove(header.frame_id);
            if header.frame_type == FrameType::I {
                let mut last = self.last_iframe.lock().unwrap();
                *last = Some(frame.clone());
            }
            if let Some(cb) = self.on_frame.lock().unwrap().as_mut() {
                frame.with_payload(|p| cb(p, header.frame_type));
            }
        }
    }

    fn sweep(&self) {
        let now = now_ms();
        let swept = self
            .receive_queue
            .sweep(now, self.cfg.frame_timeout_ms, |f| f.first_receive_time_ms());
        if swept > 0 {
            self.stats.add_incomplete_frames(swept as u64);
        }

        self.reliable_queue.retain(|frame| {
            if frame.retransmission_count() >= self.cfg.data_max_retrans {
                false
            } else if now.saturating_sub(frame.send_time_ms()) >= self.cfg.data_retrans_timeout_ms
            {
                frame.increment_retransmission_count();
                frame.set_send_time_ms(now);
                let header = self.next_header(
                    frame.frame_id(),
                    FrameType::User,
                    Flags::LAST_FRAG.union(Flags::RETRANS),
                    0,
                    1,
                    frame.len() as u16,
                );
                let payload = frame.to_vec();
                if self.send_fragment(&header, &payload).is_ok() {
                    self.stats.retransmitted_packets();
                }
                true
            } else {
                true
            }
        });

        let mut conn = self.conn.lock().unwrap();
        match conn.state() {
            State::HandshakeSent => {
                if now.saturating_sub(conn.handshake_send_time_ms()) >= self.cfg.connect_timeout_ms
                {
                    let still_trying = conn.rx_retry_handshake(now, self.cfg.connect_max_retrans);
                    drop(conn);
                    if still_trying {
                        let _ = self.send_control(FrameType::Connect, 0);
                    } else {
                        log::warn!("handshake retry budget exhausted, giving up");
                        if let Some(cb) = self.on_connect.lock().unwrap().as_mut() {
                            cb(false);
                        }
                    }
                }
            }
            State::Connected => {
                if now.saturating_sub(self.last_heartbeat_sent_ms.load(Ordering::Relaxed))
                    >= self.cfg.heartbeat_interval_ms
                {
                    self.last_heartbeat_sent_ms.store(now, Ordering::Relaxed);
                    drop(conn);
                    let _ = self.send_control(FrameType::Heartbeat, 0);
                } else {
                    let dead = conn.check_heartbeat_timeout(
                        now,
                        self.cfg.heartbeat_interval_ms,
                        self.cfg.heartbeat_max_miss,
                    );
                    drop(conn);
                    if dead {
                        if let Some(cb) = self.on_connect.lock().unwrap().as_mut() {
                            cb(false);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Drains and releases every retained/in-progress frame.
    pub fn shutdown(&self) {
        for _ in self.receive_queue.drain() {}
        for _ in self.reliable_queue.drain() {}
        self.last_iframe.lock().unwrap().take();
    }
}

fn encode_url(url: Option<&str>, max_len: usize) -> Result<Vec<u8>> {
    match url {
        None => Ok(Vec::new()),
        Some(s) => {
            let mut buf = s.as_bytes().to_vec();
            buf.push(0);
            if buf.len() > max_len {
                return Err(Error::InvalidParam);
            }
            Ok(buf)
        }
    }
}
