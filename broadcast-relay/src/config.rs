use std::{
    net::{Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 8080;

/// Largest chunk handed to fan-out by a single read.
pub const DEFAULT_MAX_CHUNK: usize = 1024;

/// Messages a session may have queued (in-flight included) before it is
/// treated as too slow and disconnected.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 128;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime settings for a [`Relay`](crate::relay::Relay) and its sessions.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub max_chunk: NonZeroUsize,
    pub outbound_capacity: NonZeroUsize,
    /// Close sessions that send nothing for this long. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// How long shutdown waits for session tasks to unwind.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_chunk: NonZeroUsize::new(DEFAULT_MAX_CHUNK).unwrap_or(NonZeroUsize::MIN),
            outbound_capacity: NonZeroUsize::new(DEFAULT_OUTBOUND_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            idle_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}
