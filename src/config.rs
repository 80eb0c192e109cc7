//! Bridge configuration.
//!
//! Provides the tunables the router, framing layer and supervisor read:
//! call timeout, payload limits, pending-call bound and reconnect backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use browser_bridge::{BridgeConfig, ReconnectPolicy};
//!
//! let config = BridgeConfig::new()
//!     .with_call_timeout(Duration::from_secs(10))
//!     .with_max_payload_size(4 * 1024 * 1024)
//!     .with_reconnect(ReconnectPolicy::new().with_max_attempts(5));
//!
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum frame payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Default maximum length of one client request record (2 MiB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 2 * 1024 * 1024;

/// Default maximum number of calls awaiting results.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 100;

/// Default first reconnect delay.
pub const DEFAULT_RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Default reconnect delay ceiling.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Width of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Exponential backoff policy for browser reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub multiplier: u32,

    /// Consecutive failed attempts before giving up (`None` = retry forever).
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Creates a policy with default settings and unlimited attempts.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial_delay: DEFAULT_RECONNECT_INITIAL_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            multiplier: 2,
            max_attempts: None,
        }
    }

    /// Sets the first retry delay.
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[inline]
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Caps the number of consecutive failed attempts.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retries forever.
    #[inline]
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Returns the delay to wait before retry number `attempt` (1-based).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns `true` once `failures` consecutive attempts have failed.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Runtime configuration shared by the router, framing and supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Timeout applied when a call does not specify one.
    pub call_timeout: Duration,

    /// Maximum encoded envelope size in either direction.
    pub max_payload_size: usize,

    /// Cap on buffered-but-unframed inbound bytes.
    pub max_buffer_size: usize,

    /// Maximum number of calls awaiting results.
    pub max_pending_calls: usize,

    /// Longest client request record, newline excluded.
    pub max_record_size: usize,

    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_buffer_size: 2 * (DEFAULT_MAX_PAYLOAD_SIZE + LENGTH_PREFIX_SIZE),
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            reconnect: ReconnectPolicy::new(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Sets the default per-call timeout.
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the payload limit and grows the buffer cap to fit two frames.
    #[inline]
    #[must_use]
    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self.max_buffer_size = self
            .max_buffer_size
            .max(2 * (bytes.saturating_add(LENGTH_PREFIX_SIZE)));
        self
    }

    /// Sets the reassembly buffer cap.
    #[inline]
    #[must_use]
    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Sets the pending-call bound.
    #[inline]
    #[must_use]
    pub fn with_max_pending_calls(mut self, calls: usize) -> Self {
        self.max_pending_calls = calls;
        self
    }

    /// Sets the client record length limit.
    #[inline]
    #[must_use]
    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeConfig {
    /// Checks that the settings are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout.is_zero() {
            return Err(Error::config("call timeout must be greater than zero"));
        }

        if self.max_payload_size == 0 {
            return Err(Error::config("max payload size must be greater than zero"));
        }

        if u32::try_from(self.max_payload_size).is_err() {
            return Err(Error::config(format!(
                "max payload size {} does not fit the 4-byte length prefix",
                self.max_payload_size
            )));
        }

        if self.max_buffer_size < self.max_payload_size + LENGTH_PREFIX_SIZE {
            return Err(Error::config(format!(
                "max buffer size {} cannot hold one full frame of {} bytes",
                self.max_buffer_size,
                self.max_payload_size + LENGTH_PREFIX_SIZE
            )));
        }

        if self.max_pending_calls == 0 {
            return Err(Error::config("max pending calls must be greater than zero"));
        }

        if self.max_record_size == 0 {
            return Err(Error::config("max record size must be greater than zero"));
        }

        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(Error::config(
                "reconnect initial delay must not exceed max delay",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
