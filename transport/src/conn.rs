//! Connection state machine: the three-way handshake, heartbeat liveness,
//! and graceful teardown shared by [`crate::engine::Tx`] and
//! [`crate::engine::Rx`].
//!
//! `Rx` initiates the handshake (it sends `CONNECT`); `Tx` replies and is
//! the side that retransmits its half until acknowledged. Once `Connected`,
//! `Rx` drives the heartbeat and `Tx` answers it — this mirrors the
//! asymmetric roles spec'd for a single-sender/single-receiver pair.

use std::net::SocketAddr;

/// Current phase of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// `Rx` only: sent `CONNECT`, waiting for `CONNECTED`.
    HandshakeSent,
    /// `Tx` only: sent `CONNECTED`, waiting for the handshake `ACK`.
    HandshakeReplyPending,
    Connected,
    Closed,
}

/// Bookkeeping for the in-progress or completed handshake and the ongoing
/// heartbeat liveness check.
pub struct Connection {
    state: State,
    peer: Option<SocketAddr>,
    handshake_attempts: u32,
    handshake_send_time_ms: u64,
    last_heartbeat_time_ms: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            state: State::Idle,
            peer: None,
            handshake_attempts: 0,
            handshake_send_time_ms: 0,
            last_heartbeat_time_ms: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// `Rx` begins a handshake attempt: records the send time so the
    /// retransmission scheduler can judge when to resend `CONNECT`.
    pub fn rx_begin_handshake(&mut self, now_ms: u64) {
        self.state = State::HandshakeSent;
        self.handshake_attempts = 0;
        self.handshake_send_time_ms = now_ms;
    }

    /// `Rx` resends `CONNECT`. Returns `false` once the retry budget is
    /// exhausted, in which case the caller should give up and stay `Idle`.
    pub fn rx_retry_handshake(&mut self, now_ms: u64, max_retrans: u32) -> bool {
        if self.handshake_attempts >= max_retrans {
            self.state = State::Idle;
            return false;
        }
        self.handshake_attempts += 1;
        self.handshake_send_time_ms = now_ms;
        true
    }

    pub fn handshake_send_time_ms(&self) -> u64 {
        self.handshake_send_time_ms
    }

    pub fn handshake_attempts(&self) -> u32 {
        self.handshake_attempts
    }

    /// `Tx` receives `CONNECT`: records the peer and replies with
    /// `CONNECTED`, entering `HandshakeReplyPending`.
    pub fn tx_on_connect(&mut self, peer: SocketAddr, now_ms: u64) {
        self.peer = Some(peer);
        self.state = State::HandshakeReplyPending;
        self.handshake_attempts = 0;
        self.handshake_send_time_ms = now_ms;
    }

    /// `Tx` resends `CONNECTED`. Returns `false` once the retry budget is
    /// exhausted; the caller transitions back to `Idle` and clears the peer.
    pub fn tx_retry_handshake_reply(&mut self, now_ms: u64, max_retrans: u32) -> bool {
        if self.handshake_attempts >= max_retrans {
            self.state = State::Idle;
            self.peer = None;
            return false;
        }
        self.handshake_attempts += 1;
        self.handshake_send_time_ms = now_ms;
        true
    }

    /// `Tx` receives the handshake `ACK`: the connection is now live.
    pub fn tx_complete_handshake(&mut self, now_ms: u64) {
        self.state = State::Connected;
        self.handshake_attempts = 0;
        self.last_heartbeat_time_ms = now_ms;
    }

    /// `Rx` receives `CONNECTED` and replies with the handshake `ACK`.
    pub fn rx_complete_handshake(&mut self, peer: SocketAddr, now_ms: u64) {
        self.peer = Some(peer);
        self.state = State::Connected;
        self.last_heartbeat_time_ms = now_ms;
    }

    pub fn last_heartbeat_time_ms(&self) -> u64 {
        self.last_heartbeat_time_ms
    }

    pub fn note_heartbeat(&mut self, now_ms: u64) {
        self.last_heartbeat_time_ms = now_ms;
    }

    /// Checks liveness: returns `true` (and transitions to `Idle`) if the
    /// peer has missed too many heartbeats.
    pub fn check_heartbeat_timeout(
        &mut self,
        now_ms: u64,
        interval_ms: u64,
        max_miss: u32,
    ) -> bool {
        if self.state != State::Connected {
            return false;
        }
        let deadline = interval_ms.saturating_mul(max_miss as u64);
        if now_ms.saturating_sub(self.last_heartbeat_time_ms) >= deadline {
            self.state = State::Idle;
            self.peer = None;
            true
        } else {
            false
        }
    }

    /// Either side tears the connection down after sending/receiving
    /// `DISCONNECT`+`ACK`. No retransmission of `DISCONNECT` is attempted.
    pub fn teardown(&mut self) {
        self.state = State::Idle;
        self.peer = None;
    }

    pub fn close(&mut self) {
        self.state = State::Closed;
        self.peer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn full_handshake_from_rx_side() {
        let mut rx = Connection::new();
        rx.rx_begin_handshake(0);
        assert_eq!(rx.state(), State::HandshakeSent);
        rx.rx_complete_handshake(addr(), 10);
        assert_eq!(rx.state(), State::Connected);
        assert_eq!(rx.peer(), Some(addr()));
    }

    #[test]
    fn full_handshake_from_tx_side() {
        let mut tx = Connection::new();
        tx.tx_on_connect(addr(), 0);
        assert_eq!(tx.state(), State::HandshakeReplyPending);
        tx.tx_complete_handshake(15);
        assert_eq!(tx.state(), State::Connected);
    }

    #[test]
    fn handshake_reply_gives_up_after_budget() {
        let mut tx = Connection::new();
        tx.tx_on_connect(addr(), 0);
        assert!(tx.tx_retry_handshake_reply(100, 3));
        assert!(tx.tx_retry_handshake_reply(200, 3));
        assert!(tx.tx_retry_handshake_reply(300, 3));
        assert!(!tx.tx_retry_handshake_reply(400, 3));
        assert_eq!(tx.state(), State::Idle);
        assert_eq!(tx.peer(), None);
    }

    #[test]
    fn heartbeat_timeout_drops_to_idle() {
        let mut tx = Connection::new();
        tx.tx_on_connect(addr(), 0);
        tx.tx_complete_handshake(0);
        assert!(!tx.check_heartbeat_timeout(100_000, 60_000, 3));
        assert!(tx.check_heartbeat_timeout(180_000, 60_000, 3));
        assert_eq!(tx.state(), State::Idle);
    }

    #[test]
    fn teardown_clears_peer_without_retransmission_state() {
        let mut conn = Connection::new();
        conn.rx_complete_handshake(addr(), 0);
        conn.teardown();
        assert_eq!(conn.state(), State::Idle);
        assert!(conn.peer().is_none());
    }
}
