//! Interrupt flag plane.
//!
//! Two ISRs communicate with the foreground exclusively through these
//! pre-declared atomic scalars: no heap, no locks, release-ordered writes
//! from interrupt context, acquire-ordered clear-on-read from the
//! foreground. This is the process-wide sibling of the `Supervisor` value.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// ISR-writable, supervisor-clearable wake flags and their timestamp
/// snapshots.
pub struct WakeFlags {
    rtc_pending: AtomicBool,
    nm3_pending: AtomicBool,
    last_rtc_wall_s: AtomicU32,
    last_nm3_wall_s: AtomicU32,
    last_nm3_ms: AtomicU32,
    last_nm3_us: AtomicU32,
}

impl WakeFlags {
    pub const fn new() -> Self {
        Self {
            rtc_pending: AtomicBool::new(false),
            nm3_pending: AtomicBool::new(false),
            last_rtc_wall_s: AtomicU32::new(0),
            last_nm3_wall_s: AtomicU32::new(0),
            last_nm3_ms: AtomicU32::new(0),
            last_nm3_us: AtomicU32::new(0),
        }
    }

    /// RTC ISR side. `next_alarm` is a shared atomic owned by [`crate::rtc::RtcAlarm`];
    /// the ISR only asserts the flag (and advances the alarm) when the
    /// wall-time target has actually been reached, allowing a fast hardware
    /// tick without spurious wakes.
    pub fn on_rtc_tick(&self, now_wall_s: u32, next_alarm: &AtomicU32, period_s: u32) {
        let next = next_alarm.load(Ordering::Acquire);
        if next != 0 && next <= now_wall_s {
            self.last_rtc_wall_s.store(now_wall_s, Ordering::Relaxed);
            if period_s != 0 {
                next_alarm.store(next.wrapping_add(period_s), Ordering::Release);
            }
            self.rtc_pending.store(true, Ordering::Release);
        }
    }

    /// NM3 frame-sync edge ISR side.
    pub fn on_nm3_edge(&self, now_wall_s: u32, now_ms: u32, now_us: u32) {
        self.last_nm3_wall_s.store(now_wall_s, Ordering::Relaxed);
        self.last_nm3_ms.store(now_ms, Ordering::Relaxed);
        self.last_nm3_us.store(now_us, Ordering::Relaxed);
        self.nm3_pending.store(true, Ordering::Release);
    }

    /// Foreground clear-on-read: an ISR firing is observed at most once.
    pub fn take_rtc(&self) -> bool {
        self.rtc_pending.swap(false, Ordering::AcqRel)
    }

    /// Foreground clear-on-read: an ISR firing is observed at most once.
    pub fn take_nm3(&self) -> bool {
        self.nm3_pending.swap(false, Ordering::AcqRel)
    }

    pub fn peek_nm3(&self) -> bool {
        self.nm3_pending.load(Ordering::Acquire)
    }

    pub fn peek_rtc(&self) -> bool {
        self.rtc_pending.load(Ordering::Acquire)
    }

    pub fn last_rtc_wall_s(&self) -> u32 {
        self.last_rtc_wall_s.load(Ordering::Relaxed)
    }

    pub fn last_nm3_wall_s(&self) -> u32 {
        self.last_nm3_wall_s.load(Ordering::Relaxed)
    }

    pub fn last_nm3_ms(&self) -> u32 {
        self.last_nm3_ms.load(Ordering::Relaxed)
    }

    pub fn last_nm3_us(&self) -> u32 {
        self.last_nm3_us.load(Ordering::Relaxed)
    }
}

impl Default for WakeFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_tick_asserts_only_once_reached() {
        let flags = WakeFlags::new();
        let next_alarm = AtomicU32::new(100);

        flags.on_rtc_tick(50, &next_alarm, 60);
        assert!(!flags.take_rtc(), "alarm not yet reached");

        flags.on_rtc_tick(100, &next_alarm, 60);
        assert!(flags.take_rtc(), "alarm reached, flag should assert");
        assert_eq!(next_alarm.load(Ordering::Acquire), 160, "period advanced");
        assert_eq!(flags.last_rtc_wall_s(), 100);
    }

    #[test]
    fn rtc_tick_disabled_when_alarm_zero() {
        let flags = WakeFlags::new();
        let next_alarm = AtomicU32::new(0);
        flags.on_rtc_tick(1_000_000, &next_alarm, 60);
        assert!(!flags.take_rtc());
    }

    #[test]
    fn clear_on_read_is_exactly_once() {
        let flags = WakeFlags::new();
        flags.on_nm3_edge(10, 2_000, 3_000_000);
        assert!(flags.take_nm3());
        assert!(!flags.take_nm3(), "second read must observe cleared flag");
    }

    #[test]
    fn nm3_edge_captures_all_timestamps() {
        let flags = WakeFlags::new();
        flags.on_nm3_edge(42, 1234, 5678);
        assert_eq!(flags.last_nm3_wall_s(), 42);
        assert_eq!(flags.last_nm3_ms(), 1234);
        assert_eq!(flags.last_nm3_us(), 5678);
        assert!(flags.peek_nm3());
    }
}
