/// Current firmware version, broadcast in the USMOD reply and used as the
/// `REV:` field of the alive broadcast.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of the TCP socket receive buffer for the HTTP shipper.
pub const RX_BUFFER_SIZE: usize = 2048;
/// Size of the TCP socket transmit buffer for the HTTP shipper.
pub const TX_BUFFER_SIZE: usize = 2048;

/// Buffer size for UART read operations against the NM3 modem.
pub const UART_READ_BUFFER_SIZE: usize = 256;

/// Watchdog timeout budget in seconds. No branch of the supervisor
/// iteration may go this long without a feed.
pub const WATCHDOG_TIMEOUT_SECS: u64 = 30;

/// WiFi: cooldown after a disconnect before the next connect attempt.
pub const WIFI_COOLDOWN_SECS: u32 = 2;
/// WiFi: maximum time spent in the Connecting state before forcing a deinit.
pub const WIFI_CONNECT_TIMEOUT_SECS: u32 = 30;
/// WiFi: settle time after forced deinit before returning to Static.
pub const WIFI_DEINIT_SETTLE_MS: u64 = 100;
/// WiFi: consecutive failed connect attempts after which the gateway stops
/// trying and allows sleep instead.
pub const WIFI_MAX_RETRIES: u8 = 5;

/// Outbound queue capacities.
pub const MESSAGE_QUEUE_CAP: usize = 50;
pub const STATUS_QUEUE_CAP: usize = 20;
pub const TOPOLOGY_QUEUE_CAP: usize = 40;

/// HTTP: maximum send attempts per outbound item before it is dropped.
pub const MAX_HTTP_ATTEMPTS: u8 = 4;
/// HTTP: socket-level timeout for a single request/response exchange.
pub const HTTP_SOCKET_TIMEOUT_SECS: u64 = 10;

/// Acoustic relay: the NM3 frame-sync edge may precede the UART-delivered
/// payload by up to ~0.5s, and further packets may arrive in the same
/// window; the post-sync poll window stays open this long.
pub const NM3_POST_SYNC_WINDOW_SECS: u32 = 30;
/// Acoustic relay: per-poll UART read bound.
pub const NM3_POLL_TIMEOUT_MS: u64 = 500;

/// Sleep: the supervisor will not enter light sleep if the next TDA-MAC
/// frame is due sooner than this.
pub const SLEEP_MIN_FRAME_LEAD_SECS: u32 = 60;
/// Sleep: how far ahead of the next frame the RTC should be armed to wake
/// the gateway in good time for the next acoustic frame.
pub const FRAME_WAKE_LEAD_SECS: u32 = 60;

/// RTC: hardware tick period. Kept fast so the logical alarm can be
/// retargeted without reprogramming hardware.
pub const RTC_TICK_SECS: u32 = 2;
/// RTC: default nominal alarm period (status cadence) until overridden.
pub const RTC_DEFAULT_PERIOD_SECS: u32 = 3600;
/// RTC: clamp bounds for `set_next_from_now`.
pub const RTC_NEXT_ALARM_MIN_SECS: u32 = 1;
pub const RTC_NEXT_ALARM_MAX_SECS: u32 = 7200;

/// Startup: total settle time the NM3 bootloader needs after power-on
/// before it will respond on the UART.
pub const NM3_BOOT_SETTLE_SECS: u32 = 7;
/// Startup: NM3 power-cycle off/on hold times.
pub const NM3_POWER_CYCLE_OFF_SECS: u64 = 10;
pub const NM3_POWER_CYCLE_ON_SECS: u64 = 10;

/// Sensor acquisition wall-time budget.
pub const SENSOR_ACQUISITION_BUDGET_SECS: u32 = 5;

/// Command interpreter: inter-packet delay while broadcasting the module
/// list, and the magnetometer calibration duration.
pub const USMOD_INTER_PACKET_DELAY_SECS: u64 = 1;
pub const CALIBRATION_DURATION_SECS: u64 = 20;

/// SCD30 continuous-measurement interval (local sensor bring-up detail,
/// not backend-configurable).
pub const SCD30_MEASUREMENT_INTERVAL_SECS: u16 = 2;

/// SCD30 bring-up: bounded retries for `stop_continuous_measurement`, so a
/// missing or faulty sensor can't hang gateway boot forever.
pub const SCD30_INIT_RETRIES: u8 = 5;
