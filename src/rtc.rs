//! RTC alarm scheduler.
//!
//! Decouples the hardware tick rate from the logical alarm so the
//! supervisor can retarget the next wake boundary (e.g. 60s before the
//! next TDA-MAC frame) without reprogramming hardware.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::constants::{RTC_NEXT_ALARM_MAX_SECS, RTC_NEXT_ALARM_MIN_SECS};

/// Owns the logical alarm state; `next_alarm_wall_s` is shared with the ISR
/// (via [`RtcAlarm::next_alarm_handle`]) so the ISR can advance it on fire
/// without taking a lock.
pub struct RtcAlarm {
    period_s: u32,
    next_alarm_wall_s: AtomicU32,
}

impl RtcAlarm {
    pub const fn new() -> Self {
        Self {
            period_s: 0,
            next_alarm_wall_s: AtomicU32::new(0),
        }
    }

    /// Handle the ISR reads/writes directly; see [`crate::flags::WakeFlags::on_rtc_tick`].
    pub fn next_alarm_handle(&self) -> &AtomicU32 {
        &self.next_alarm_wall_s
    }

    pub fn period_s(&self) -> u32 {
        self.period_s
    }

    /// 0 disables the periodic cadence.
    pub fn set_period(&mut self, seconds: u32) {
        self.period_s = seconds;
    }

    /// Clamped to `1..=7200` seconds.
    pub fn set_next_from_now(&mut self, now_wall_s: u32, seconds: u32) {
        let clamped = seconds.clamp(RTC_NEXT_ALARM_MIN_SECS, RTC_NEXT_ALARM_MAX_SECS);
        self.next_alarm_wall_s
            .store(now_wall_s.wrapping_add(clamped), Ordering::Release);
    }

    pub fn disable(&mut self) {
        self.next_alarm_wall_s.store(0, Ordering::Release);
    }

    pub fn next_alarm_wall_s(&self) -> u32 {
        self.next_alarm_wall_s.load(Ordering::Acquire)
    }

    /// Used once at startup so the first supervisor iteration always
    /// produces a status record. Unlike a hardware alarm re-init, this
    /// only forces the logical alarm; nothing on this HAL needs a hardware
    /// workaround here.
    pub fn force_first_alarm(&mut self, now_wall_s: u32) {
        self.next_alarm_wall_s.store(now_wall_s, Ordering::Release);
    }
}

impl Default for RtcAlarm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_next_from_now_clamps_bounds() {
        let mut rtc = RtcAlarm::new();
        rtc.set_next_from_now(1_000, 0);
        assert_eq!(rtc.next_alarm_wall_s(), 1_001);

        rtc.set_next_from_now(1_000, 100_000);
        assert_eq!(rtc.next_alarm_wall_s(), 1_000 + 7200);
    }

    #[test]
    fn force_first_alarm_fires_immediately() {
        let mut rtc = RtcAlarm::new();
        rtc.force_first_alarm(500);
        assert_eq!(rtc.next_alarm_wall_s(), 500);
    }

    #[test]
    fn disable_zeroes_alarm() {
        let mut rtc = RtcAlarm::new();
        rtc.set_next_from_now(10, 60);
        rtc.disable();
        assert_eq!(rtc.next_alarm_wall_s(), 0);
    }

    #[test]
    fn period_zero_disables_cadence() {
        let mut rtc = RtcAlarm::new();
        rtc.set_period(0);
        assert_eq!(rtc.period_s(), 0);
    }
}
