//! Endpoint configuration.
//!
//! Defaults mirror the external interface defaults: an embedder that builds
//! a default `Config` gets the same MTU, timeouts and retry budgets an
//! interoperable peer would assume.

/// Tunable parameters shared by `Tx` and `Rx` endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Path MTU in bytes. Fragment payloads are sized to fit within it.
    pub mtu: usize,

    /// Socket send buffer size, in bytes.
    pub send_buffer_size: usize,

    /// Socket receive buffer size, in bytes.
    pub recv_buffer_size: usize,

    /// Retransmit interval for unacked I-frame fragments, in milliseconds.
    pub iframe_retrans_timeout_ms: u64,

    /// Maximum retransmissions per I-frame fragment before it is abandoned.
    pub iframe_max_retrans: u32,

    /// Retransmit interval for unacked reliable user data, in milliseconds.
    pub data_retrans_timeout_ms: u64,

    /// Maximum retransmissions per reliable datagram before it is dropped.
    pub data_max_retrans: u32,

    /// Retransmit interval for a pending handshake reply, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Maximum retransmissions of a handshake reply before giving up.
    pub connect_max_retrans: u32,

    /// Heartbeat interval once connected, in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Consecutive missed heartbeats before the peer is declared dead.
    pub heartbeat_max_miss: u32,

    /// Age at which an incomplete received frame is dropped, in milliseconds.
    pub frame_timeout_ms: u64,

    /// Largest payload a single frame may carry, in bytes.
    pub max_frame_payload: usize,

    /// Largest START URL, including its null terminator, in bytes.
    pub url_max_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mtu: 1400,
            send_buffer_size: 2 * 1024 * 1024,
            recv_buffer_size: 2 * 1024 * 1024,
            iframe_retrans_timeout_ms: 5,
            iframe_max_retrans: 3,
            data_retrans_timeout_ms: 30,
            data_max_retrans: 3,
            connect_timeout_ms: 100,
            connect_max_retrans: 3,
            heartbeat_interval_ms: 60_000,
            heartbeat_max_miss: 3,
            frame_timeout_ms: 100,
            max_frame_payload: 512 * 1024,
            url_max_len: 100,
        }
    }
}

impl Config {
    /// Starts a builder seeded with defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Maximum payload a single fragment can carry on the wire.
    pub fn fragment_payload_size(&self) -> usize {
        self.mtu - crate::wire::HEADER_SIZE
    }
}

/// Fluent builder over [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder {
    inner: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            inner: Config::default(),
        }
    }
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.inner.$name = value;
            self
        }
    };
}

impl ConfigBuilder {
    builder_field!(mtu, usize);
    builder_field!(send_buffer_size, usize);
    builder_field!(recv_buffer_size, usize);
    builder_field!(iframe_retrans_timeout_ms, u64);
    builder_field!(iframe_max_retrans, u32);
    builder_field!(data_retrans_timeout_ms, u64);
    builder_field!(data_max_retrans, u32);
    builder_field!(connect_timeout_ms, u64);
    builder_field!(connect_max_retrans, u32);
    builder_field!(heartbeat_interval_ms, u64);
    builder_field!(heartbeat_max_miss, u32);
    builder_field!(frame_timeout_ms, u64);
    builder_field!(max_frame_payload, usize);
    builder_field!(url_max_len, usize);

    /// Consumes the builder, producing a [`Config`].
    pub fn build(self) -> Config {
        self.inner
    }
}
