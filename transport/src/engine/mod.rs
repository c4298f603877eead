//! The transport engine: the TX send path and RX receive path that turn
//! the wire codec, pools, queue and connection state machine into a
//! runnable endpoint.

pub mod rx;
pub mod tx;

pub use rx::Rx;
pub use tx::Tx;

use std::net::UdpSocket;
use std::sync::OnceLock;
use std::time::Instant;

use socket2::{Domain, Socket, Type};

use crate::config::Config;
use crate::error::{Error, Result};

static CLOCK_BASE: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since this process's transport engine first ran.
/// A monotonic stand-in for the reference implementation's wall-clock
/// `gettimeofday` deltas — what matters is that deltas between two calls
/// are accurate, not the absolute value.
pub fn now_ms() -> u64 {
    let base = CLOCK_BASE.get_or_init(Instant::now);
    base.elapsed().as_millis() as u64
}

/// Type of a `USER` datagram or a surfaced disconnect notification, passed
/// to [`DataCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    User,
    Disconnected,
}

/// Invoked on `Rx` for each reassembled frame.
pub type FrameCallback = Box<dyn FnMut(&[u8], crate::wire::FrameType) + Send>;

/// Invoked on both `Rx` and `Tx` for `USER` datagrams and surfaced
/// disconnect notifications.
pub type DataCallback = Box<dyn FnMut(DataKind, &[u8]) + Send>;

/// Invoked on `Rx` when the connection becomes live or drops.
pub type ConnectCallback = Box<dyn FnMut(bool) + Send>;

/// Invoked on `Tx` when `Rx` sends `START`/`STOP`.
pub type MediaControlCallback = Box<dyn FnMut(crate::wire::FrameType, Option<&str>) + Send>;

/// Binds a UDP socket with the configured buffer sizes. Left in blocking
/// mode: `poll` relies on `set_read_timeout` (`SO_RCVTIMEO`) to wait for a
/// readable datagram up to a caller-supplied timeout, which has no effect
/// once a socket is put in non-blocking mode.
pub fn bind_udp_socket(bind_addr: std::net::SocketAddr, cfg: &Config) -> Result<UdpSocket> {
    let domain = if bind_addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, None).map_err(|_| Error::SocketCreate)?;
    socket
        .set_recv_buffer_size(cfg.recv_buffer_size)
        .map_err(|_| Error::SocketCreate)?;
    socket
        .set_send_buffer_size(cfg.send_buffer_size)
        .map_err(|_| Error::SocketCreate)?;
    socket
        .bind(&bind_addr.into())
        .map_err(|_| Error::SocketBind)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic() {
        let a = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn bind_udp_socket_on_loopback_succeeds() {
        let cfg = Config::default();
        let socket = bind_udp_socket("127.0.0.1:0".parse().unwrap(), &cfg).unwrap();
        assert!(socket.local_addr().is_ok());
    }
}
