#![no_std]
#![no_main]

//! Firmware binary: ESP32 bring-up plus the concrete adapters that plug the
//! real hardware into `gateway_core`'s capability traits, then spawns the
//! single `Supervisor` task: heap setup, timer group/watchdog, I2C/UART
//! bring-up, `esp_radio::init`, and peripheral-specific wiring.

#[cfg(any(feature = "bme280", feature = "scd30"))]
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{Duration, Timer};

use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{
    self as hal,
    clock::CpuClock,
    gpio::{Level, Output, OutputConfig},
    ram,
    rng::Rng,
    rtc_cntl::{sleep::TimerWakeupSource, Rtc, SocResetReason},
    timer::timg::{MwdtStage, TimerGroup, Wdt},
    Cpu,
};
#[cfg(any(feature = "bme280", feature = "scd30"))]
use esp_hal::{i2c::master::{BusTimeout, I2c}, time::Rate, Async};
#[cfg(feature = "sds011")]
use esp_hal::uart::{RxConfig, Uart};
use esp_hal::uart::Uart as NmUart;
use esp_println::logger::init_logger;
use esp_radio::Controller;

use heapless::FnvIndexMap;
use static_cell::StaticCell;

extern crate alloc;

mod radio;

use gateway_core::{
    config::CONFIG,
    constants::{RTC_TICK_SECS, UART_READ_BUFFER_SIZE, VERSION, WATCHDOG_TIMEOUT_SECS},
    flags::WakeFlags,
    http::LanHttpShipper,
    modem::{SharedNm3Modem, UartNm3Modem},
    network::FrameScheduler,
    ota, power,
    rtc::RtcAlarm,
    sensor::{LocalSensorPayload, PowerMonitor, SensorPayload},
    sensors::Sensors,
    startup::{HwReset, Magnetometer, ResetCause},
    supervisor::Supervisor,
};

use radio::Radio;

static WAKE_FLAGS: WakeFlags = WakeFlags::new();

#[cfg(any(feature = "bme280", feature = "scd30"))]
static I2C_BUS: StaticCell<Mutex<NoopRawMutex, I2c<'static, Async>>> = StaticCell::new();
static NM3_UART: StaticCell<Mutex<NoopRawMutex, UartNm3Modem<NmUart<'static, hal::Async>>>> = StaticCell::new();
static HTTP_RX: StaticCell<[u8; 2048]> = StaticCell::new();

esp_bootloader_esp_idf::esp_app_desc!();

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

/// Composes the local sensor suite, a battery-ADC read, and the (currently
/// unfitted on this board revision) magnetometer into the one `S` bound
/// `Supervisor` needs.
struct GatewaySensors {
    payload: LocalSensorPayload,
}

#[derive(Debug)]
enum GatewaySensorsError {
    Acquisition,
}

impl SensorPayload for GatewaySensors {
    type Error = GatewaySensorsError;

    async fn start_acquisition(&mut self) -> Result<(), Self::Error> {
        self.payload.start_acquisition().await.map_err(|_| GatewaySensorsError::Acquisition)
    }

    async fn is_completed(&mut self) -> bool {
        self.payload.is_completed().await
    }

    async fn snapshot_json(&mut self) -> heapless::String<512> {
        self.payload.snapshot_json().await
    }
}

impl PowerMonitor for GatewaySensors {
    fn vbatt(&mut self) -> f32 {
        // No battery-voltage ADC channel is wired on this board revision;
        // the status record still reports a value so the backend schema
        // stays satisfied.
        0.0
    }
}

impl Magnetometer for GatewaySensors {
    type Error = GatewaySensorsError;

    async fn begin_calibration(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// No magnetometer is fitted on this board revision; USCALDO is
    /// acknowledged and answered with neutral extents rather than rejected.
    async fn finish_calibration(&mut self) -> Result<[f32; 6], Self::Error> {
        Timer::after(Duration::from_secs(gateway_core::constants::CALIBRATION_DURATION_SECS)).await;
        Ok([0.0; 6])
    }
}

/// Maps the RTC controller's hardware reset-reason register onto the
/// coarser [`ResetCause`] the status record reports.
fn map_reset_reason(reason: Option<SocResetReason>) -> ResetCause {
    match reason {
        Some(SocResetReason::ChipPowerOn) => ResetCause::Pwron,
        Some(SocResetReason::CoreSw) | Some(SocResetReason::Cpu0Sw) => ResetCause::Soft,
        Some(SocResetReason::CoreDeepSleep) => ResetCause::DeepSleep,
        Some(SocResetReason::CoreMwdt0)
        | Some(SocResetReason::CoreMwdt1)
        | Some(SocResetReason::CoreRtcWdt)
        | Some(SocResetReason::Cpu0Mwdt0)
        | Some(SocResetReason::Cpu0Mwdt1)
        | Some(SocResetReason::Cpu0RtcWdt)
        | Some(SocResetReason::SysRtcWdt)
        | Some(SocResetReason::SysSuperWdt) => ResetCause::Wdt,
        Some(_) => ResetCause::Hard,
        None => ResetCause::Undefined,
    }
}

struct EspHwReset {
    wdt: Wdt<esp_hal::peripherals::TIMG0<'static>>,
    rtc: Rtc<'static>,
    cause: ResetCause,
}

impl EspHwReset {
    fn new(wdt: Wdt<esp_hal::peripherals::TIMG0<'static>>, rtc: Rtc<'static>) -> Self {
        let cause = map_reset_reason(rtc.get_reset_reason(Cpu::ProCpu));
        Self { wdt, rtc, cause }
    }
}

impl HwReset for EspHwReset {
    fn reset_cause(&self) -> ResetCause {
        self.cause
    }

    fn reboot(&mut self) -> ! {
        esp_hal::system::software_reset()
    }

    async fn light_sleep(&mut self) {
        // Bounded hardware light sleep at the RTC hardware tick cadence
        // that already drives `WakeFlags::on_rtc_tick`. The NM3 link has
        // no dedicated wake-capable edge GPIO wired on this board
        // revision, so it cannot be armed as a second wake source here;
        // an NM3 event arriving during this window is still observed on
        // the following tick.
        let wakeup = TimerWakeupSource::new(hal::time::Duration::from_secs(RTC_TICK_SECS as u64));
        self.rtc.sleep_light(&[&wakeup]);
    }

    fn feed_watchdog(&mut self) {
        self.wdt.feed();
    }
}

struct GpioPowerRail<'a> {
    rail_3v3: Output<'a>,
    nm3: Output<'a>,
    rs232_tx: Output<'a>,
    i2c_pullups: Output<'a>,
}

impl<'a> power::PowerRail for GpioPowerRail<'a> {
    fn enable_3v3(&mut self) {
        self.rail_3v3.set_high();
    }
    fn disable_3v3(&mut self) {
        self.rail_3v3.set_low();
    }
    fn enable_nm3(&mut self) {
        self.nm3.set_high();
    }
    fn disable_nm3(&mut self) {
        self.nm3.set_low();
    }
    fn set_rs232_tx(&mut self, on: bool) {
        self.rs232_tx.set_level(if on { Level::High } else { Level::Low });
    }
    fn set_i2c_pullups(&mut self, on: bool) {
        self.i2c_pullups.set_level(if on { Level::High } else { Level::Low });
    }
}

/// One flash sector reserved below the OTA image partitions, holding a
/// single sentinel byte: `0xAA` once `ota::OTA_MARKER` is armed, erased
/// (`0xFF`) otherwise. `sequential-storage`'s key-value map is overkill for
/// one boolean marker; a direct `NorFlash` erase/write covers it.
const MARKER_SECTOR_OFFSET: u32 = 0x3F_E000;
const MARKER_ARMED: u8 = 0xAA;

struct FlashMarkerFs {
    flash: esp_storage::FlashStorage,
}

#[derive(Debug)]
enum FlashFsError {
    Flash,
}

impl ota::FileSystem for FlashMarkerFs {
    type Error = FlashFsError;

    async fn write_marker(&mut self, name: &str) -> Result<(), Self::Error> {
        use embedded_storage::nor_flash::NorFlash;
        log::info!("arming marker {name}");
        self.flash
            .erase(MARKER_SECTOR_OFFSET, MARKER_SECTOR_OFFSET + esp_storage::FlashStorage::SECTOR_SIZE)
            .map_err(|_| FlashFsError::Flash)?;
        self.flash
            .write(MARKER_SECTOR_OFFSET, &[MARKER_ARMED])
            .map_err(|_| FlashFsError::Flash)
    }

    async fn marker_exists(&mut self, _name: &str) -> Result<bool, Self::Error> {
        use embedded_storage::nor_flash::ReadNorFlash;
        let mut byte = [0u8; 1];
        self.flash.read(MARKER_SECTOR_OFFSET, &mut byte).map_err(|_| FlashFsError::Flash)?;
        Ok(byte[0] == MARKER_ARMED)
    }

    async fn clear_marker(&mut self, _name: &str) -> Result<(), Self::Error> {
        use embedded_storage::nor_flash::NorFlash;
        self.flash
            .erase(MARKER_SECTOR_OFFSET, MARKER_SECTOR_OFFSET + esp_storage::FlashStorage::SECTOR_SIZE)
            .map_err(|_| FlashFsError::Flash)
    }
}

#[esp_rtos::main(stack_size = 32768)]
async fn main(spawner: Spawner) {
    init_logger(log::LevelFilter::Info);
    log::info!("usmart-gateway-firmware {VERSION} starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let rtc = Rtc::new(peripherals.LPWR);
    let rng = Rng::new();

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    esp_alloc::heap_allocator!(size: 36 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let mut wdt0 = timg0.wdt;
    wdt0.enable();
    wdt0.set_timeout(MwdtStage::Stage0, hal::time::Duration::from_secs(WATCHDOG_TIMEOUT_SECS));

    esp_rtos::start(timg0.timer0);

    // possibly high transient required at init
    // https://github.com/esp-rs/esp-hal/issues/1626
    Timer::after(Duration::from_millis(1000)).await;

    #[cfg_attr(
        not(any(feature = "bme280", feature = "scd30", feature = "sds011")),
        allow(unused_mut)
    )]
    let mut sensors = Sensors::new();

    #[cfg(any(feature = "bme280", feature = "scd30"))]
    {
        let (sda, scl) = (peripherals.GPIO21, peripherals.GPIO22);

        let i2c_config = hal::i2c::master::Config::default()
            .with_frequency(Rate::from_khz(100))
            .with_timeout(BusTimeout::BusCycles(24));

        let i2c = I2c::new(peripherals.I2C0, i2c_config)
            .unwrap()
            .with_sda(sda)
            .with_scl(scl)
            .into_async();

        let i2c_bus = Mutex::new(i2c);
        let i2c_bus = I2C_BUS.init(i2c_bus);

        #[cfg(feature = "bme280")]
        if (sensors.new_bme280(I2cDevice::new(i2c_bus)).await).is_err() {
            log::error!("Failed initializing BME280. Rebooting...");
            esp_hal::system::software_reset();
        }

        #[cfg(feature = "scd30")]
        if (sensors.new_scd30(I2cDevice::new(i2c_bus)).await).is_err() {
            log::error!("Failed initializing SCD30. Rebooting...");
            esp_hal::system::software_reset();
        }
    }

    #[cfg(feature = "sds011")]
    {
        let (tx, rx) = (peripherals.GPIO17, peripherals.GPIO16);

        let uart_config = hal::uart::Config::default()
            .with_rx(RxConfig::default().with_fifo_full_threshold(UART_READ_BUFFER_SIZE as u16))
            .with_baudrate(9600)
            .with_stop_bits(hal::uart::StopBits::_1)
            .with_data_bits(hal::uart::DataBits::_8)
            .with_parity(hal::uart::Parity::None);

        let mut uart = Uart::new(peripherals.UART2, uart_config)
            .unwrap()
            .with_tx(tx)
            .with_rx(rx)
            .into_async();

        uart.set_at_cmd(hal::uart::AtCmdConfig::default().with_cmd_char(b'+'));

        if (sensors.new_sds011(uart).await).is_err() {
            log::error!("Failed initializing SDS011. Rebooting...");
            esp_hal::system::software_reset();
        }
    }

    // NM3 modem UART: 9600 8N1.
    let nm3_uart_config = hal::uart::Config::default()
        .with_baudrate(9600)
        .with_stop_bits(hal::uart::StopBits::_1)
        .with_data_bits(hal::uart::DataBits::_8)
        .with_parity(hal::uart::Parity::None);
    let nm3_uart = NmUart::new(peripherals.UART1, nm3_uart_config)
        .unwrap()
        .with_tx(peripherals.GPIO4)
        .with_rx(peripherals.GPIO5)
        .into_async();
    let nm3_modem = UartNm3Modem::new(nm3_uart, CONFIG.device_address);
    let nm3_mutex: &'static Mutex<NoopRawMutex, _> = NM3_UART.init(Mutex::new(nm3_modem));

    let flash = esp_storage::FlashStorage::new(peripherals.FLASH);

    let esp_radio_ctrl = &*mk_static!(Controller<'static>, esp_radio::init().unwrap());

    let radio = Radio::new(
        esp_radio_ctrl,
        peripherals.WIFI,
        rng,
        CONFIG.device_id,
        CONFIG.wifi_ssid,
        CONFIG.wifi_psk,
        spawner,
    )
    .await;
    let stack = radio.stack();

    let http_rx = HTTP_RX.init([0u8; 2048]);
    let http = LanHttpShipper::new(stack, CONFIG.backend_base_url, http_rx);

    let power_rail = GpioPowerRail {
        rail_3v3: Output::new(peripherals.GPIO25, Level::Low, OutputConfig::default()),
        nm3: Output::new(peripherals.GPIO26, Level::Low, OutputConfig::default()),
        rs232_tx: Output::new(peripherals.GPIO27, Level::Low, OutputConfig::default()),
        i2c_pullups: Output::new(peripherals.GPIO33, Level::Low, OutputConfig::default()),
    };

    let mut rtc_alarm = RtcAlarm::new();
    rtc_alarm.force_first_alarm(0);

    let hw = EspHwReset::new(wdt0, rtc);

    let mut installed_modules = FnvIndexMap::new();
    let _ = installed_modules.insert("gateway", VERSION);

    let supervisor = Supervisor::new(
        &WAKE_FLAGS,
        rtc_alarm,
        FrameScheduler::new(CONFIG.default_network_config.clone()),
        hw.cause,
        0,
        CONFIG.device_address,
        VERSION,
        installed_modules,
        SharedNm3Modem(nm3_mutex),
        SharedNm3Modem(nm3_mutex),
        GatewaySensors { payload: LocalSensorPayload::new(sensors) },
        power_rail,
        http,
        radio,
        FlashMarkerFs { flash },
        hw,
    );

    spawner.spawn(supervisor_task(supervisor)).ok();
}

#[embassy_executor::task]
async fn supervisor_task(
    mut supervisor: Supervisor<
        SharedNm3Modem<'static, NmUart<'static, hal::Async>>,
        SharedNm3Modem<'static, NmUart<'static, hal::Async>>,
        GatewaySensors,
        GpioPowerRail<'static>,
        LanHttpShipper<'static>,
        Radio,
        FlashMarkerFs,
        EspHwReset,
    >,
) {
    loop {
        let now = (embassy_time::Instant::now().as_secs()) as u32;
        if let Err(e) = supervisor.run_iteration(now).await {
            log::error!("supervisor iteration error: {e:?}");
        }
    }
}
