//! Runner configuration, built once at startup and handed to the runner.

use thiserror::Error;
use tokio::time::Duration;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("lock timeout {lock:?} must exceed the protocol timeout {protocol:?}")]
    LockTimeoutTooShort { lock: Duration, protocol: Duration },
    #[error("replay cache capacity must be positive")]
    EmptyReplayCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// How long an initiator waits for the counterparty's reply.
    pub protocol_timeout: Duration,
    /// Lease of the channel lock held by a run.
    pub lock_timeout: Duration,
    /// Number of finished runs remembered to answer duplicate messages.
    pub replay_cache_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            protocol_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(10),
            replay_cache_capacity: 1024,
        }
    }
}

impl RunnerConfig {
    /// A run must give up before its lock can be taken away from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout <= self.protocol_timeout {
            return Err(ConfigError::LockTimeoutTooShort {
                lock: self.lock_timeout,
                protocol: self.protocol_timeout,
            });
        }
        if self.replay_cache_capacity == 0 {
            return Err(ConfigError::EmptyReplayCache);
        }
        Ok(())
    }
}
