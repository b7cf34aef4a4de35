use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::report::ErrorSink;

/// The newest wire-protocol version this build speaks.
pub const SUPPORTED_VERSION: u32 = 1;

/// Default cap on a single message's payload.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1400;
/// Default cap on queued messages per direction.
pub const DEFAULT_MAX_MESSAGE_COUNT: usize = 50;
/// Default per-direction queue byte budget.
pub const DEFAULT_QUEUE_SIZE: usize = 4000;

/// Configuration for a [`SocketManager`](crate::SocketManager).
///
/// The zero/`None` values of `max_message_size`, `max_message_count` and
/// `queue_size` mean "use the default"; the defaults are applied during
/// `SocketManager::open`, which notes each substitution through the error
/// sink.
#[derive(Clone)]
pub struct Settings {
    /// Port to listen on. Must be non-zero for accepting managers; clients
    /// use 0 and get an ephemeral port where one is needed at all.
    pub port: u16,
    /// `true` for stream transport (TCP), `false` for datagrams (UDP).
    pub reliable: bool,
    /// Whether this manager accepts inbound peers.
    pub accepting: bool,
    /// Largest single message payload. 0 means 1400.
    pub max_message_size: usize,
    /// Most messages queued per direction. 0 means 50.
    pub max_message_count: usize,
    /// Per-direction queue byte budget. 0 means 4000.
    /// `queue_size + max_message_size` must stay within 65536.
    pub queue_size: usize,
    /// Send a zero-length keepalive after this much connection idle time.
    /// `None` disables keepalives.
    pub keepalive: Option<Duration>,
    /// Force-close a connection idle for this long. `None` disables.
    pub timeout: Option<Duration>,
    /// Enable extra diagnostics and debug-build consistency assertions.
    pub debug: bool,
    /// Error sink for this manager, overriding the process-wide default.
    pub notify: Option<Arc<dyn ErrorSink>>,
    /// Requested wire-protocol version; fails creation when newer than
    /// [`SUPPORTED_VERSION`].
    pub version: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 0,
            reliable: true,
            accepting: false,
            max_message_size: 0,
            max_message_count: 0,
            queue_size: 0,
            keepalive: None,
            timeout: None,
            debug: false,
            notify: None,
            version: SUPPORTED_VERSION,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("port", &self.port)
            .field("reliable", &self.reliable)
            .field("accepting", &self.accepting)
            .field("max_message_size", &self.max_message_size)
            .field("max_message_count", &self.max_message_count)
            .field("queue_size", &self.queue_size)
            .field("keepalive", &self.keepalive)
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("notify", &self.notify.as_ref().map(|_| "<sink>"))
            .field("version", &self.version)
            .finish()
    }
}
