//! Boot sequence & reset-cause reporting.
//!
//! `reset_cause` classifies the hardware reset-reason register as a
//! stateless classifier rather than a stored lifecycle tag, since the
//! reset-reason register survives reset on its own.

use heapless::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    Pwron,
    Hard,
    Wdt,
    DeepSleep,
    Soft,
    Undefined,
}

impl ResetCause {
    /// String label reported upstream as `lastResetCause`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetCause::Pwron => "PWRON_RESET",
            ResetCause::Hard => "HARD_RESET",
            ResetCause::Wdt => "WDT_RESET",
            ResetCause::DeepSleep => "DEEPSLEEP_RESET",
            ResetCause::Soft => "SOFT_RESET",
            ResetCause::Undefined => "UNDEFINED_RESET",
        }
    }
}

/// Hardware reset/reboot/light-sleep capability, and the reset-reason
/// register read at boot. `esp_hal::system::software_reset()` backs the
/// fatal-error resets in `main.rs`/`ota.rs`; light sleep is the ESP32
/// RTC-controller idle state that leaves the RTC and the NM3 edge
/// interrupt armed as wake sources.
pub trait HwReset {
    fn reset_cause(&self) -> ResetCause;
    fn reboot(&mut self) -> !;
    /// Halts the CPU until the RTC alarm or the NM3 edge interrupt fires.
    async fn light_sleep(&mut self);
    /// Resets the watchdog timeout. Bundled here rather than a separate
    /// capability since, like reset and sleep, it's a direct
    /// RTC-controller register poke.
    fn feed_watchdog(&mut self);
}

/// `USCALDO` magnetometer calibration: out of scope for the sensor's own
/// protocol, this is the capability boundary the command interpreter
/// drives.
pub trait Magnetometer {
    type Error;

    async fn begin_calibration(&mut self) -> Result<(), Self::Error>;
    /// Returns the six min/max extents once calibration completes.
    async fn finish_calibration(&mut self) -> Result<[f32; 6], Self::Error>;
}

/// Renders the six calibration extents as the acoustic reply payload.
pub fn calibration_reply(extents: [f32; 6]) -> String<96> {
    use core::fmt::Write;
    let mut s = String::new();
    let _ = write!(
        s,
        "USCAL,{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
        extents[0], extents[1], extents[2], extents[3], extents[4], extents[5]
    );
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_reset_label_is_surfaced() {
        assert_eq!(ResetCause::Soft.as_str(), "SOFT_RESET");
    }

    #[test]
    fn watchdog_reset_label_is_surfaced() {
        assert_eq!(ResetCause::Wdt.as_str(), "WDT_RESET");
    }

    #[test]
    fn calibration_reply_formats_six_extents() {
        let s = calibration_reply([1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(s.as_str(), "USCAL,1.000,-1.000,2.000,-2.000,3.000,-3.000");
    }
}
