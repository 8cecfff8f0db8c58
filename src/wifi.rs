//! WiFi lifecycle manager: a three-state machine with connection timeout,
//! post-disconnect cooldown, and a retry counter that eventually gives up
//! and lets the supervisor sleep.
//!
//! This module is pure state-transition logic over wall-clock seconds; the
//! non-blocking hardware operations it drives (associate, poll, deinit) are
//! behind the [`WifiDriver`] trait so this state machine is unit-testable
//! without a radio.

use crate::constants::{WIFI_CONNECT_TIMEOUT_SECS, WIFI_COOLDOWN_SECS, WIFI_MAX_RETRIES};

/// Hardware-facing capability interface the lifecycle manager drives:
/// turns an always-on async reconnect loop into explicit, supervisor-polled
/// operations.
pub trait WifiDriver {
    type Error;

    /// True when no SSID is configured (replaces the original's
    /// "no wifi_cfg.json found" check).
    fn is_config_absent(&self) -> bool;
    /// Kick off a non-blocking association attempt.
    fn start_associate(&mut self) -> Result<(), Self::Error>;
    /// Non-blocking: has the link associated and obtained an address?
    fn poll_associated(&mut self) -> bool;
    /// Hard deinit, used to break a stuck "associating" state when the
    /// underlying WiFi stack stalls there.
    fn force_deinit(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Static,
    Connecting { started_s: u32 },
    Disconnecting { started_s: u32 },
}

pub struct WifiLifecycle {
    state: WifiState,
    retry_count: u8,
    last_disconnect_s: u32,
}

impl WifiLifecycle {
    pub const fn new() -> Self {
        Self {
            state: WifiState::Static,
            retry_count: 0,
            last_disconnect_s: 0,
        }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn is_static(&self) -> bool {
        matches!(self.state, WifiState::Static)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, WifiState::Connecting { .. })
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// After more than 5 consecutive failures, stop attempting and allow
    /// sleep.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > WIFI_MAX_RETRIES
    }

    pub fn should_start_connecting(&self, now: u32, queues_nonempty: bool, config_stale: bool) -> bool {
        matches!(self.state, WifiState::Static)
            && (queues_nonempty || config_stale)
            && now.wrapping_sub(self.last_disconnect_s) >= WIFI_COOLDOWN_SECS
    }

    pub fn begin_connecting(&mut self, now: u32) {
        self.state = WifiState::Connecting { started_s: now };
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub fn observe_associated(&mut self) {
        if self.is_connecting() {
            self.state = WifiState::Static;
            self.retry_count = 0;
        }
    }

    /// If `Connecting` and the 30s connect timeout has strictly elapsed,
    /// transitions to `Disconnecting`.
    pub fn tick(&mut self, now: u32) {
        if let WifiState::Connecting { started_s } = self.state {
            if now.wrapping_sub(started_s) > WIFI_CONNECT_TIMEOUT_SECS {
                self.state = WifiState::Disconnecting { started_s: now };
            }
        }
    }

    pub fn deinit_complete(&mut self, now: u32) {
        if matches!(self.state, WifiState::Disconnecting { .. }) {
            self.state = WifiState::Static;
            self.last_disconnect_s = now;
        }
    }
}

impl Default for WifiLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_to_connecting_requires_cooldown() {
        let mut wifi = WifiLifecycle::new();
        assert!(wifi.should_start_connecting(0, true, false), "cooldown measured from last_disconnect_s=0 baseline");
        wifi.begin_connecting(0);
        assert_eq!(wifi.state(), WifiState::Connecting { started_s: 0 });
        assert_eq!(wifi.retry_count(), 1);
    }

    #[test]
    fn connecting_times_out_after_30s_strict() {
        let mut wifi = WifiLifecycle::new();
        wifi.begin_connecting(0);

        // exactly 30s elapsed: still Connecting (boundary is strict `>`)
        wifi.tick(30);
        assert_eq!(wifi.state(), WifiState::Connecting { started_s: 0 });

        // 31s elapsed: transitions to Disconnecting
        wifi.tick(31);
        assert_eq!(wifi.state(), WifiState::Disconnecting { started_s: 31 });
    }

    #[test]
    fn association_resets_retry_count() {
        let mut wifi = WifiLifecycle::new();
        wifi.begin_connecting(0);
        wifi.tick(31);
        wifi.deinit_complete(31);
        wifi.begin_connecting(33); // second attempt
        assert_eq!(wifi.retry_count(), 2);
        wifi.observe_associated();
        assert_eq!(wifi.state(), WifiState::Static);
        assert_eq!(wifi.retry_count(), 0);
    }

    #[test]
    fn disconnect_then_cooldown_gate() {
        let mut wifi = WifiLifecycle::new();
        wifi.begin_connecting(0);
        wifi.tick(31);
        wifi.deinit_complete(31);
        assert_eq!(wifi.state(), WifiState::Static);

        assert!(!wifi.should_start_connecting(32, true, false));
        assert!(wifi.should_start_connecting(33, true, false));
    }

    #[test]
    fn retries_exhausted_after_six_failures() {
        let mut wifi = WifiLifecycle::new();
        for i in 0..6u32 {
            wifi.begin_connecting(i * 100);
            wifi.tick(i * 100 + 31);
            wifi.deinit_complete(i * 100 + 31);
        }
        assert_eq!(wifi.retry_count(), 6);
        assert!(wifi.retries_exhausted());
    }
}
