//! Sender endpoint: submits media frames and reliable user data, replies to
//! the handshake and heartbeat, and retransmits whatever the peer hasn't
//! acknowledged yet.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::Config;
use crate::conn::{Connection, State};
use crate::engine::{bind_udp_socket, now_ms, DataCallback, DataKind, MediaControlCallback};
use crate::error::{Error, Result};
use crate::pool::{Frame, FramePool, SizeClass, TrackerPool};
use crate::queue::FrameQueue;
use crate::stats::{Stats, StatsSnapshot};
use crate::wire::{self, FrameType, Flags, Header, WireHeader};

/// Sends media frames and reliable user data to a single peer, handling
/// fragmentation, the TX half of the handshake/heartbeat, and
/// retransmission of unacknowledged I-fragments and reliable datagrams.
pub struct Tx {
    socket: UdpSocket,
    cfg: Config,
    conn: Mutex<Connection>,
    media_pool: FramePool,
    control_pool: FramePool,
    tracker_pool: TrackerPool,
    reliable_queue: FrameQueue,
    last_iframe: Mutex<Option<Frame>>,
    next_seq_num: AtomicU32,
    next_frame_id: AtomicU16,
    last_received_seq_num: AtomicU32,
    send_buf: Mutex<Vec<u8>>,
    stats: Stats,
    on_data: Mutex<Option<DataCallback>>,
    on_media_control: Mutex<Option<MediaControlCallback>>,
}

impl Tx {
    pub fn new(bind_addr: SocketAddr, cfg: Config) -> Result<Self> {
        let socket = bind_udp_socket(bind_addr, &cfg)?;
        Ok(Tx {
            socket,
            cfg,
            conn: Mutex::new(Connection::new()),
            media_pool: FramePool::new(),
            control_pool: FramePool::new(),
            tracker_pool: TrackerPool::new(),
            reliable_queue: FrameQueue::new(),
            last_iframe: Mutex::new(None),
            next_seq_num: AtomicU32::new(0),
            next_frame_id: AtomicU16::new(0),
            last_received_seq_num: AtomicU32::new(0),
            send_buf: Mutex::new(Vec::new()),
            stats: Stats::new(),
            on_data: Mutex::new(None),
            on_media_control: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|_| Error::SocketBind)
    }

    pub fn set_on_data(&self, cb: DataCallback) {
        *self.on_data.lock().unwrap() = Some(cb);
    }

    pub fn set_on_media_control(&self, cb: MediaControlCallback) {
        *self.on_media_control.lock().unwrap() = Some(cb);
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().unwrap().is_connected()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Sends a media frame (`I`, `P`, `Sps`, `Pps`, `Audio`), fragmenting it
    /// to the configured MTU. I-frames are retained so their unacknowledged
    /// fragments can be retransmitted; other frame types are sent once and
    /// forgotten.
    pub fn send_media(&self, frame_type: FrameType, payload: &[u8]) -> Result<()> {
        if payload.len() > self.cfg.max_frame_payload {
            return Err(Error::PacketTooLarge);
        }
        let peer = {
            let conn = self.conn.lock().unwrap();
            if !conn.is_connected() {
                return Err(Error::NotReady);
            }
            conn.peer().ok_or(Error::NotReady)?
        };

        let frame_id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
        let send_time = now_ms();
        let total_frags = wire::fragment_count(payload.len(), self.cfg.mtu);

        let retained = if frame_type == FrameType::I {
            let frame = self.media_pool.acquire(SizeClass::Media);
            frame.write_at(0, payload)?;
            frame.set_frame_id(frame_id);
            frame.set_frame_type(frame_type);
            frame.set_send_time_ms(send_time);
            let tracker = self.tracker_pool.acquire(total_frags)?;
            frame.install_tracker(tracker);
            Some(frame)
        } else {
            None
        };

        for i in 0..total_frags {
            let offset = wire::fragment_offset(i, self.cfg.mtu);
            let size = wire::fragment_size(i, total_frags, payload.len(), self.cfg.mtu);
            let fragment: Vec<u8> = if let Some(ref frame) = retained {
                frame.with_payload(|p| p[offset..offset + size].to_vec())
            } else {
                payload[offset..offset + size].to_vec()
            };

            let seq = self.next_seq_num.fetch_add(1, Ordering::Relaxed);
            let mut flags = Flags::empty();
            if i + 1 == total_frags {
                flags.insert(Flags::LAST_FRAG);
            }
            let header = Header {
                seq_num: seq,
                frame_id,
                frame_type,
                flags,
                frag_index: i as u16,
                total_frags: total_frags as u16,
                payload_size: size as u16,
            };
            self.send_fragment(&header, &fragment, peer)?;

            if let Some(ref frame) = retained {
                frame.with_tracker(|t| {
                    if let Some(tracker) = t {
                        if let Some(slot) = tracker.slot_mut(i) {
                            slot.last_send_seq = seq;
                            slot.last_send_time_ms = send_time;
                            slot.retransmission_count = 0;
                            slot.acknowledged = false;
                        }
                    }
                });
            }
            self.stats.packets_sent();
        }

        if let Some(frame) = retained {
            let mut last = self.last_iframe.lock().unwrap();
            *last = Some(frame);
        }
        Ok(())
    }

    /// Sends a small, reliably-delivered user datagram (`USER`). Queued for
    /// retransmission until acknowledged or the retry budget is exhausted.
    pub fn send_user_data(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > SizeClass::Control.capacity() {
            return Err(Error::PacketTooLarge);
        }
        let peer = {
            let conn = self.conn.lock().unwrap();
            if !conn.is_connected() {
                return Err(Error::NotReady);
            }
            conn.peer().ok_or(Error::NotReady)?
        };

        let frame = self.control_pool.acquire(SizeClass::Control);
        frame.write_at(0, payload)?;
        let frame_id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
        frame.set_frame_id(frame_id);
        frame.set_frame_type(FrameType::User);
        let send_time = now_ms();
        frame.set_send_time_ms(send_time);

        let seq = self.next_seq_num.fetch_add(1, Ordering::Relaxed);
        let header = Header {
            seq_num: seq,
            frame_id,
            frame_type: FrameType::User,
            flags: Flags::LAST_FRAG,
            frag_index: 0,
            total_frags: 1,
            payload_size: payload.len() as u16,
        };
        self.send_fragment(&header, payload, peer)?;
        self.stats.packets_sent();
        self.reliable_queue.push(frame);
        Ok(())
    }

    fn send_fragment(&self, header: &Header, payload: &[u8], peer: SocketAddr) -> Result<()> {
        let mut buf = self.send_buf.lock().unwrap();
        buf.clear();
        buf.resize(wire::HEADER_SIZE + 2 + payload.len(), 0);
        WireHeader::compute_and_set_crc(header, payload, &mut buf[..wire::HEADER_SIZE + 2])?;
        buf[wire::HEADER_SIZE + 2..].copy_from_slice(payload);
        match self.socket.send_to(&buf, peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::Busy),
            Err(_) => Err(Error::SocketSend),
        }
    }

    fn send_control(&self, frame_type: FrameType, frame_id: u16, peer: SocketAddr) -> Result<()> {
        let seq = self.next_seq_num.fetch_add(1, Ordering::Relaxed);
        let header = Header {
            seq_num: seq,
            frame_id,
            frame_type,
            flags: Flags::LAST_FRAG,
            frag_index: 0,
            total_frags: 1,
            payload_size: 0,
        };
        self.send_fragment(&header, &[], peer)?;
        self.stats.packets_sent();
        Ok(())
    }

    /// Runs one receive attempt (waiting up to `timeout`) followed by one
    /// retransmission-sweep pass. Call this from a dedicated poll thread.
    pub fn poll(&self, timeout: Duration) -> Result<()> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|_| Error::SocketRecv)?;
        let recv_result = self.receive_one();
        self.retransmission_sweep();
        recv_result
    }

    fn receive_one(&self) -> Result<()> {
        let mut buf = vec![0u8; self.cfg.mtu];
        let (n, from) = match self.socket.recv_from(&mut buf) {
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
        self.dispatch(&header, payload, from);
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

    fn dispatch(&self, header: &Header, payload: &[u8], from: SocketAddr) {
        let now = now_ms();
        match header.frame_type {
            FrameType::Connect => {
                let mut conn = self.conn.lock().unwrap();
                conn.tx_on_connect(from, now);
                drop(conn);
                let _ = self.send_control(FrameType::Connected, 0, from);
            }
            FrameType::Ack => self.handle_ack(header, from),
            FrameType::Disconnect => {
                self.conn.lock().unwrap().teardown();
                let _ = self.send_control(FrameType::Ack, 0, from);
                if let Some(cb) = self.on_data.lock().unwrap().as_mut() {
                    cb(DataKind::Disconnected, &[]);
                }
            }
            FrameType::Heartbeat => {
                self.conn.lock().unwrap().note_heartbeat(now);
                let _ = self.send_control(FrameType::Ack, 0, from);
            }
            FrameType::User => {
                let _ = self.send_control(FrameType::Ack, header.frame_id, from);
                if let Some(cb) = self.on_data.lock().unwrap().as_mut() {
                    cb(DataKind::User, payload);
                }
            }
            FrameType::Start | FrameType::Stop => {
                let url = parse_start_url(payload);
                if let Some(cb) = self.on_media_control.lock().unwrap().as_mut() {
                    cb(header.frame_type, url.as_deref());
                }
            }
            _ => {
                // Media frame types never arrive at Tx.
                self.stats.dropped_invalid();
            }
        }
    }

    fn handle_ack(&self, header: &Header, _from: SocketAddr) {
        if header.frame_id == 0 {
            let mut conn = self.conn.lock().unwrap();
            if conn.state() == State::HandshakeReplyPending {
                conn.tx_complete_handshake(now_ms());
            }
            return;
        }
        if self.reliable_queue.find(header.frame_id).is_some() {
            self.reliable_queue.remove(header.frame_id);
            return;
        }
        let last = self.last_iframe.lock().unwrap();
        if let Some(ref frame) = *last {
            if frame.frame_id() == header.frame_id {
                frame.with_tracker(|t| {
                    if let Some(tracker) = t {
                        if let Some(slot) = tracker.slot_mut(header.frag_index as usize) {
                            slot.acknowledged = true;
                        }
                    }
                });
            }
        }
    }

    fn retransmission_sweep(&self) {
        let peer = match self.conn.lock().unwrap().peer() {
            Some(p) => p,
            None => return,
        };
        let now = now_ms();

        self.reliable_queue.retain(|frame| {
            if frame.retransmission_count() >= self.cfg.data_max_retrans {
                log::debug!("dropping reliable datagram {} after retry budget exhausted", frame.frame_id());
                false
            } else if now.saturating_sub(frame.send_time_ms()) >= self.cfg.data_retrans_timeout_ms
            {
                frame.increment_retransmission_count();
                frame.set_send_time_ms(now);
                let seq = self.next_seq_num.fetch_add(1, Ordering::Relaxed);
                let header = Header {
                    seq_num: seq,
                    frame_id: frame.frame_id(),
                    frame_type: FrameType::User,
                    flags: Flags::LAST_FRAG.union(Flags::RETRANS),
                    frag_index: 0,
                    total_frags: 1,
                    payload_size: frame.len() as u16,
                };
                let payload = frame.to_vec();
                if self.send_fragment(&header, &payload, peer).is_ok() {
                    self.stats.retransmitted_packets();
                }
                true
            } else {
                true
            }
        });

        self.retransmit_last_iframe(peer, now);

        let mut conn = self.conn.lock().unwrap();
        match conn.state() {
            State::HandshakeReplyPending => {
                if now.saturating_sub(conn.handshake_send_time_ms())
                    >= self.cfg.connect_timeout_ms
                {
                    let still_trying =
                        conn.tx_retry_handshake_reply(now, self.cfg.connect_max_retrans);
                    drop(conn);
                    if still_trying {
                        let _ = self.send_control(FrameType::Connected, 0, peer);
                    } else {
                        log::warn!("handshake reply retry budget exhausted, returning to Idle");
                    }
                }
            }
            State::Connected => {
                conn.check_heartbeat_timeout(
                    now,
                    self.cfg.heartbeat_interval_ms,
                    self.cfg.heartbeat_max_miss,
                );
            }
            _ => {}
        }
    }

    fn retransmit_last_iframe(&self, peer: SocketAddr, now: u64) {
        let last = self.last_iframe.lock().unwrap();
        let Some(frame) = last.as_ref() else {
            return;
        };
        let total = frame.total_frags();
        let frame_id = frame.frame_id();
        let max_retrans = self.cfg.iframe_max_retrans;
        let timeout_ms = self.cfg.iframe_retrans_timeout_ms;

        let mut to_resend = Vec::new();
        frame.with_tracker(|t| {
            let Some(tracker) = t else { return };
            for slot in tracker.iter_mut() {
                if slot.acknowledged {
                    continue;
                }
                if slot.retransmission_count >= max_retrans {
                    log::debug!(
                        "abandoning unacked fragment {} of frame {frame_id} after retry budget",
                        slot.frag_index
                    );
                    slot.acknowledged = true;
                    continue;
                }
                if now.saturating_sub(slot.last_send_time_ms) >= timeout_ms {
                    slot.retransmission_count += 1;
                    slot.last_send_time_ms = now;
                    to_resend.push(slot.frag_index);
                }
            }
        });

        for frag_index in to_resend {
            let offset = wire::fragment_offset(frag_index as usize, self.cfg.mtu);
            let size = wire::fragment_size(
                frag_index as usize,
                total as usize,
                frame.len(),
                self.cfg.mtu,
            );
            let fragment = frame.with_payload(|p| p[offset..offset + size].to_vec());
            let seq = self.next_seq_num.fetch_add(1, Ordering::Relaxed);
            let header = Header {
                seq_num: seq,
                frame_id,
                frame_type: frame.frame_type(),
                flags: if frag_index + 1 == total {
                    Flags::LAST_FRAG.union(Flags::RETRANS)
                } else {
                    Flags::RETRANS
                },
                frag_index,
                total_frags: total,
                payload_size: size as u16,
            };
            if self.send_fragment(&header, &fragment, peer).is_ok() {
                self.stats.retransmitted_packets();
            }
        }
    }

    /// Drains and releases every retained frame, releases the last I-frame,
    /// and warns if any pool still has outstanding handles.
    pub fn shutdown(&self) {
        for _ in self.reliable_queue.drain() {}
        self.last_iframe.lock().unwrap().take();
    }
}

fn parse_start_url(payload: &[u8]) -> Option<String> {
    if payload.is_empty() || payload[payload.len() - 1] != 0 {
        if !payload.is_empty() {
            log::warn!("START/STOP payload missing null terminator, ignoring URL");
        }
        return None;
    }
    std::str::from_utf8(&payload[..payload.len() - 1])
        .ok()
        .map(|s| s.to_string())
}
