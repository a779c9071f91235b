//! Reconnection policies.
//!
//! A policy is consulted once per close-without-fatal-error and decides
//! whether to arm a single automatic reattempt. The attempt itself is
//! triggered reactively by the next qualifying call on the session (not by a
//! timer loop), so transient disconnects self-heal without retry storms. A
//! reattempt that fails does not re-arm; a fatal error means the policy is
//! never consulted again for that session.

/// Trait for deciding whether a closed session should self-heal.
pub trait ReconnectPolicy: Send + Sync {
    /// Called on each transition to `Closed` without a fatal error.
    ///
    /// # Arguments
    /// * `closes` - How many non-fatal closes this session has seen (1-based)
    ///
    /// # Returns
    /// * `true` - Arm one automatic reattempt, consumed by the next trigger
    /// * `false` - Stay closed until explicitly re-established
    fn arm_on_close(&self, closes: u64) -> bool;
}

/// Arm one reattempt after every non-fatal close. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconnectOnce;

impl ReconnectPolicy for ReconnectOnce {
    fn arm_on_close(&self, _closes: u64) -> bool {
        true
    }
}

/// Arm reattempts for the first `max_closes` non-fatal closes, then give up.
#[derive(Debug, Clone, Copy)]
pub struct BoundedReconnect {
    max_closes: u64,
}

impl BoundedReconnect {
    pub fn new(max_closes: u64) -> Self {
        Self { max_closes }
    }
}

impl ReconnectPolicy for BoundedReconnect {
    fn arm_on_close(&self, closes: u64) -> bool {
        closes <= self.max_closes
    }
}

/// Never reconnect. The session stays closed after any disconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverReconnect;

impl ReconnectPolicy for NeverReconnect {
    fn arm_on_close(&self, _closes: u64) -> bool {
        false
    }
}
