//! Connection lifecycle policy.
//!
//! Handshake (banner or first status, then a `?` round-trip), auto
//! reconnect with exponential backoff, and the knobs for the status-poll
//! watchdog.

use std::time::{Duration, Instant};

use simplesender_core::constants::{
    HANDSHAKE_TIMEOUT, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY, RT_STATUS,
    SERIAL_CONNECT_DELAY, STATUS_POLL_DEFAULT,
};
use simplesender_core::{ProtocolError, Result};

use crate::communication::ConnectionParams;
use crate::grbl::controller::GrblController;

/// Reconnect/handshake policy knobs.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// Banner/first-status deadline.
    pub handshake_timeout: Duration,
    /// Status poll interval.
    pub poll_interval: Duration,
    /// Reconnect automatically on unexpected closes.
    pub auto_reconnect: bool,
    /// First reconnect delay; doubles each attempt.
    pub backoff_initial: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            poll_interval: STATUS_POLL_DEFAULT,
            auto_reconnect: false,
            backoff_initial: RECONNECT_INITIAL_DELAY,
            backoff_max: RECONNECT_MAX_DELAY,
        }
    }
}

/// Drives connect, handshake, and reconnect for one controller.
pub struct ConnectionManager {
    controller: GrblController,
    policy: ConnectionPolicy,
    last_params: Option<ConnectionParams>,
    backoff: Duration,
}

impl ConnectionManager {
    /// Wrap a controller with a policy.
    pub fn new(controller: GrblController, policy: ConnectionPolicy) -> Self {
        let backoff = policy.backoff_initial;
        Self {
            controller,
            policy,
            last_params: None,
            backoff,
        }
    }

    /// The managed controller.
    pub fn controller(&self) -> &GrblController {
        &self.controller
    }

    /// Open the port and complete the GRBL handshake.
    ///
    /// Ready means: the banner or any well-formed status arrived, and a
    /// subsequent `?` produced a status report. Only then may the UI
    /// issue `$$` and friends.
    pub fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        self.controller.set_status_interval(self.policy.poll_interval);
        self.controller.open(params)?;
        self.last_params = Some(params.clone());
        self.backoff = self.policy.backoff_initial;

        // Many boards reset when DTR toggles; give the banner a moment.
        std::thread::sleep(SERIAL_CONNECT_DELAY);

        let deadline = Instant::now() + self.policy.handshake_timeout;
        while !self.controller.is_ready() {
            if Instant::now() >= deadline {
                self.controller.close();
                return Err(ProtocolError::UnexpectedClose {
                    reason: "handshake timeout: no banner or status report".into(),
                }
                .into());
            }
            if !self.controller.is_connected() {
                return Err(ProtocolError::NotConnected.into());
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let revision = self.controller.status_revision();
        self.controller.send_realtime(RT_STATUS)?;
        while self.controller.status_revision() == revision {
            if Instant::now() >= deadline {
                self.controller.close();
                return Err(ProtocolError::UnexpectedClose {
                    reason: "handshake timeout: no status reply to ?".into(),
                }
                .into());
            }
            if !self.controller.is_connected() {
                return Err(ProtocolError::NotConnected.into());
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        tracing::info!("Handshake complete; controller ready");
        Ok(())
    }

    /// Disconnect at the user's request (no auto-reconnect after).
    pub fn disconnect(&mut self) {
        self.controller.close();
    }

    /// Attempt one reconnect cycle after an unexpected close.
    ///
    /// Sleeps the current backoff first; doubles it (up to the cap) on
    /// failure and resets it on success. No-op when the close was user
    /// initiated or the policy disables reconnects.
    pub fn try_reconnect(&mut self) -> Result<bool> {
        if !self.policy.auto_reconnect || self.controller.user_disconnected() {
            return Ok(false);
        }
        if self.controller.is_connected() {
            return Ok(false);
        }
        let Some(params) = self.last_params.clone() else {
            return Ok(false);
        };
        let delay = self.backoff;
        tracing::info!(
            "Reconnecting to {} in {:.1}s",
            params.port,
            delay.as_secs_f64()
        );
        std::thread::sleep(delay);
        match self.connect(&params) {
            Ok(()) => {
                self.backoff = self.policy.backoff_initial;
                Ok(true)
            }
            Err(e) => {
                self.backoff = (self.backoff * 2).min(self.policy.backoff_max);
                Err(e)
            }
        }
    }

    /// Current reconnect backoff (next attempt's delay).
    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Compute the backoff sequence for a number of failed attempts.
///
/// Exposed for tests; `connect` uses the same doubling rule.
pub fn backoff_after(policy: &ConnectionPolicy, failures: u32) -> Duration {
    let mut delay = policy.backoff_initial;
    for _ in 0..failures {
        delay = (delay * 2).min(policy.backoff_max);
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplesender_core::Error;

    #[test]
    fn backoff_doubles_to_cap() {
        let policy = ConnectionPolicy::default();
        assert_eq!(backoff_after(&policy, 0), Duration::from_secs(1));
        assert_eq!(backoff_after(&policy, 1), Duration::from_secs(2));
        assert_eq!(backoff_after(&policy, 4), Duration::from_secs(16));
        assert_eq!(backoff_after(&policy, 5), Duration::from_secs(30));
        assert_eq!(backoff_after(&policy, 10), Duration::from_secs(30));
    }

    #[test]
    fn error_is_unexpected_close() {
        let err: Error = ProtocolError::UnexpectedClose {
            reason: "x".into(),
        }
        .into();
        assert!(err.is_unexpected_close());
    }
}
