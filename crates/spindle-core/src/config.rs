//! Session configuration handed in by the owning layer.

use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::transport::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::trust::FirstUsePolicy;

/// Knobs for a single [`crate::transport::FramedConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Upper bound on a single `receive_one` call. `None` waits forever and
    /// leaves staleness detection to `Session::has_timed_out`.
    pub read_timeout: Option<Duration>,
    /// Longest inbound line accepted before it is discarded.
    pub max_frame_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    /// Root configuration directory; pins live in its `certs` subdirectory.
    pub config_dir: PathBuf,
    pub first_use: FirstUsePolicy,
    pub connection: ConnectionOptions,
    /// Dump every frame at `info` level.
    pub verbose: bool,
}

impl SessionConfig {
    pub fn new(endpoint: Endpoint, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint,
            config_dir: config_dir.into(),
            first_use: FirstUsePolicy::default(),
            connection: ConnectionOptions::default(),
            verbose: false,
        }
    }
}
