//! Event-driven supervisor & sleep discipline.
//!
//! Single foreground task, no second worker: concurrency is exclusively
//! the ISR-to-atomics boundary in [`crate::flags`]. `run_forever` is the
//! `embassy_executor` task body; `run_iteration` is the pure-ish step
//! sequence so tests can drive one pass at a time with stub collaborators.

use embassy_time::{Duration, Instant, Timer};
use heapless::{FnvIndexMap, String, Vec};
use serde::Serialize;

use crate::command::{self, Command};
use crate::constants::{
    FRAME_WAKE_LEAD_SECS, NM3_BOOT_SETTLE_SECS, NM3_POST_SYNC_WINDOW_SECS, SENSOR_ACQUISITION_BUDGET_SECS,
    SLEEP_MIN_FRAME_LEAD_SECS, USMOD_INTER_PACKET_DELAY_SECS,
};
use crate::flags::WakeFlags;
use crate::http::HttpShipper;
use crate::modem::{Nm3Modem, Nm3Packet};
use crate::network::{FrameScheduler, NetworkConfig, TdaMacProtocol};
use crate::ota::{self, FileSystem};
use crate::power::{PeripheralPower, PowerRail};
use crate::queue::{MessageQueue, OutboundMessage, OutboundStatus, OutboundTopology, StatusQueue, TopologyQueue};
use crate::rtc::RtcAlarm;
use crate::sensor::{PowerMonitor, SensorPayload};
use crate::startup::{calibration_reply, HwReset, Magnetometer, ResetCause};
use crate::wifi::{WifiDriver, WifiLifecycle, WifiState};

/// Wall-clock seconds since epoch/boot, the supervisor's only notion of
/// "now" for scheduling decisions (RTC alarms, frame cadence, cooldowns).
pub type Clock = u32;

#[derive(Debug)]
pub enum SupervisorError {
    Modem,
    Sensor,
    Network,
    Http,
    FileSystem,
    Wifi,
}

#[derive(Serialize)]
struct PacketBody<'a> {
    addr: u8,
    broadcast: bool,
    payload: &'a [u8],
}

#[derive(Serialize)]
struct ConfigBody {
    nm3_gateway_stay_awake: bool,
    nm3_sensor_stay_awake: bool,
    cycle_limit: u16,
    partials_per_full_discovery: u16,
    guard_interval_ms: u16,
    frame_interval_s: u32,
    link_quality_threshold: u8,
    node_addresses: Vec<u8, 16>,
}

fn packet_json(packet: &Nm3Packet) -> String<512> {
    let body = PacketBody {
        addr: packet.source_addr,
        broadcast: packet.is_broadcast,
        payload: packet.payload.as_slice(),
    };
    let mut buf = [0u8; 512];
    let n = serde_json_core::to_slice(&body, &mut buf).unwrap_or(0);
    let mut out = String::new();
    let _ = out.push_str(core::str::from_utf8(&buf[..n]).unwrap_or(""));
    out
}

fn config_json(cfg: &NetworkConfig) -> String<256> {
    let body = ConfigBody {
        nm3_gateway_stay_awake: cfg.nm3_gateway_stay_awake,
        nm3_sensor_stay_awake: cfg.nm3_sensor_stay_awake,
        cycle_limit: cfg.cycle_limit,
        partials_per_full_discovery: cfg.partials_per_full_discovery,
        guard_interval_ms: cfg.guard_interval_ms,
        frame_interval_s: cfg.frame_interval_s,
        link_quality_threshold: cfg.link_quality_threshold,
        node_addresses: cfg.node_addresses.clone(),
    };
    let mut buf = [0u8; 256];
    let n = serde_json_core::to_slice(&body, &mut buf).unwrap_or(0);
    let mut out = String::new();
    let _ = out.push_str(core::str::from_utf8(&buf[..n]).unwrap_or(""));
    out
}

/// Owns the whole supervisor state plus the hardware-facing collaborators.
/// `S` is bounded by all three capabilities the local sensor/battery/
/// magnetometer path needs — a single physical sensor suite implements all
/// three, bundling BME280/SCD30/SDS011 behind one value.
pub struct Supervisor<M, N, S, P, H, W, F, R>
where
    M: Nm3Modem,
    N: TdaMacProtocol,
    S: SensorPayload + PowerMonitor + Magnetometer,
    P: PowerRail,
    H: HttpShipper,
    W: WifiDriver,
    F: FileSystem,
    R: HwReset,
{
    flags: &'static WakeFlags,
    rtc: RtcAlarm,
    wifi: WifiLifecycle,
    messages: MessageQueue,
    statuses: StatusQueue,
    topologies: TopologyQueue,
    network: FrameScheduler,
    power: PeripheralPower,
    reset_cause: ResetCause,
    boot_wall_s: Clock,
    nm3_power_on_wall_s: Clock,
    device_address: u8,
    fw_revision: &'static str,
    installed_modules: FnvIndexMap<&'static str, &'static str, 16>,

    modem: M,
    protocol: N,
    sensor: S,
    power_rail: P,
    http: H,
    wifi_driver: W,
    fs: F,
    hw: R,
}

impl<M, N, S, P, H, W, F, R> Supervisor<M, N, S, P, H, W, F, R>
where
    M: Nm3Modem,
    M::Error: core::fmt::Debug,
    N: TdaMacProtocol,
    N::Error: core::fmt::Debug,
    S: SensorPayload + PowerMonitor + Magnetometer,
    <S as SensorPayload>::Error: core::fmt::Debug,
    <S as Magnetometer>::Error: core::fmt::Debug,
    P: PowerRail,
    H: HttpShipper,
    W: WifiDriver,
    W::Error: core::fmt::Debug,
    F: FileSystem,
    F::Error: core::fmt::Debug,
    R: HwReset,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flags: &'static WakeFlags,
        rtc: RtcAlarm,
        network: FrameScheduler,
        reset_cause: ResetCause,
        boot_wall_s: Clock,
        device_address: u8,
        fw_revision: &'static str,
        installed_modules: FnvIndexMap<&'static str, &'static str, 16>,
        modem: M,
        protocol: N,
        sensor: S,
        power_rail: P,
        http: H,
        wifi_driver: W,
        fs: F,
        hw: R,
    ) -> Self {
        Self {
            flags,
            rtc,
            wifi: WifiLifecycle::new(),
            messages: MessageQueue::new(),
            statuses: StatusQueue::new(),
            topologies: TopologyQueue::new(),
            network,
            power: PeripheralPower::new(),
            reset_cause,
            boot_wall_s,
            nm3_power_on_wall_s: boot_wall_s,
            device_address,
            fw_revision,
            installed_modules,
            modem,
            protocol,
            sensor,
            power_rail,
            http,
            wifi_driver,
            fs,
            hw,
        }
    }

    /// One full wake cycle, run to completion: feed the watchdog, power up
    /// peripherals, acquire sensors, run networking, ship queues, then let
    /// the caller decide whether to sleep.
    pub async fn run_iteration(&mut self, now: Clock) -> Result<(), SupervisorError> {
        // Step 1.
        self.hw.feed_watchdog();
        self.power.enable_3v3(&mut self.power_rail);
        Timer::after(Duration::from_millis(10)).await;

        // Step 2.
        if self.flags.take_rtc() {
            if !self.power.nm3_powered {
                self.power.enable_nm3(&mut self.power_rail);
                self.nm3_power_on_wall_s = now;
            }
            self.sensor.start_acquisition().await.map_err(|e| {
                log::error!("sensor acquisition failed: {e:?}");
                SupervisorError::Sensor
            })?;
            let deadline = Instant::now() + Duration::from_secs(SENSOR_ACQUISITION_BUDGET_SECS as u64);
            while !self.sensor.is_completed().await && Instant::now() < deadline {
                self.hw.feed_watchdog();
                Timer::after(Duration::from_millis(50)).await;
            }
            let sensors_json = self.sensor.snapshot_json().await;
            let vbatt = self.sensor.vbatt();
            self.statuses.push(
                OutboundStatus {
                    timestamp: now,
                    uptime_s: now.wrapping_sub(self.boot_wall_s),
                    last_reset_cause: self.reset_cause,
                    vbatt,
                    sensors_json,
                    seq_no: 0,
                    retry: 0,
                },
                |item, seq| item.seq_no = seq,
            );
            self.network.state.mark_config_stale();

            let elapsed = now.wrapping_sub(self.nm3_power_on_wall_s);
            if elapsed < NM3_BOOT_SETTLE_SECS {
                self.hw.feed_watchdog();
                Timer::after(Duration::from_secs((NM3_BOOT_SETTLE_SECS - elapsed) as u64)).await;
            }
        }

        // Step 3.
        let within_sync_window = self.flags.peek_nm3()
            || now.wrapping_sub(self.flags.last_nm3_wall_s()) < NM3_POST_SYNC_WINDOW_SECS;
        if within_sync_window {
            self.flags.take_nm3();
            let stamp = self.flags.last_nm3_wall_s();
            while let Some(packet) = self.modem.poll().await {
                self.hw.feed_watchdog();
                let command = command::interpret(&packet.payload, packet.is_broadcast);
                self.messages.push(
                    OutboundMessage {
                        packet_json: packet_json(&packet),
                        wall_timestamp: stamp,
                        seq_no: 0,
                        retry: 0,
                    },
                    |item, seq| item.seq_no = seq,
                );
                if let Some(command) = command {
                    self.enact(command).await?;
                }
            }
        }

        // Step 4.
        self.protocol_reconfigure_and_gather(now).await?;

        // Step 5.
        let queues_nonempty = !self.messages.is_empty() || !self.statuses.is_empty() || !self.topologies.is_empty();
        if queues_nonempty || self.network.state.config_stale {
            self.advance_wifi(now, queues_nonempty).await?;
        }

        // Step 6.
        if self.should_sleep(now) {
            self.enter_sleep().await;
        }

        Ok(())
    }

    async fn protocol_reconfigure_and_gather(&mut self, now: Clock) -> Result<(), SupervisorError> {
        self.network
            .reconfigure_if_due(&mut self.protocol, now)
            .await
            .map_err(|e| {
                log::error!("TDA-MAC reconfiguration failed: {e:?}");
                SupervisorError::Network
            })?;

        if let Some(result) = self
            .network
            .run_frame_if_due(&mut self.protocol, now)
            .await
            .map_err(|e| {
                log::error!("TDA-MAC frame run failed: {e:?}");
                SupervisorError::Network
            })?
        {
            for packet in result.packets {
                self.messages.push(
                    OutboundMessage {
                        packet_json: packet_json(&packet),
                        wall_timestamp: now,
                        seq_no: 0,
                        retry: 0,
                    },
                    |item, seq| item.seq_no = seq,
                );
            }
            self.topologies.push(
                OutboundTopology {
                    topology_json: self.protocol.topology_json(),
                    config_json: config_json(&self.network.config),
                    data_gathering_json: result.info_json,
                    timestamp: now,
                    seq_no: 0,
                    retry: 0,
                },
                |item, seq| item.seq_no = seq,
            );
            self.rtc
                .set_next_from_now(now, self.network.state.next_frame_wall_s.wrapping_sub(now).saturating_sub(FRAME_WAKE_LEAD_SECS));
        }
        Ok(())
    }

    async fn advance_wifi(&mut self, now: Clock, queues_nonempty: bool) -> Result<(), SupervisorError> {
        if self.wifi.should_start_connecting(now, queues_nonempty, self.network.state.config_stale) {
            self.wifi_driver.start_associate().map_err(|e| {
                log::error!("wifi associate failed: {e:?}");
                SupervisorError::Wifi
            })?;
            self.wifi.begin_connecting(now);
        } else if self.wifi.is_connecting() {
            if self.wifi_driver.poll_associated() {
                self.wifi.observe_associated();
            } else {
                self.wifi.tick(now);
                if matches!(self.wifi.state(), WifiState::Disconnecting { .. }) {
                    self.wifi_driver.force_deinit();
                    self.wifi.deinit_complete(now);
                }
            }
        }

        if self.wifi.is_static() {
            if self.network.state.config_stale {
                match self.http.get_network_config().await {
                    Ok(new_config) => {
                        self.network.apply_config(new_config);
                        self.network.state.clear_config_stale();
                    }
                    Err(e) => log::warn!("network config pull failed: {e:?}"),
                }
            }
            self.http
                .drain_queues(&self.wifi, &mut self.messages, &mut self.statuses, &mut self.topologies)
                .await;
        }
        Ok(())
    }

    async fn enact(&mut self, command: Command) -> Result<(), SupervisorError> {
        match command {
            Command::Reboot => self.hw.reboot(),
            Command::ArmOta => {
                ota::arm_update(&mut self.fs).await.map_err(|e| {
                    log::error!("arming OTA marker failed: {e:?}");
                    SupervisorError::FileSystem
                })?;
                self.hw.reboot();
            }
            Command::Ping => self.send_alive_broadcast().await,
            Command::ModuleList => {
                for (name, version) in self.installed_modules.iter() {
                    let mut line: String<64> = String::new();
                    use core::fmt::Write;
                    let _ = write!(line, "UM{:03}:{name}:{version}", self.device_address);
                    let _ = self.modem.send_broadcast(line.as_bytes()).await;
                    self.hw.feed_watchdog();
                    Timer::after(Duration::from_secs(USMOD_INTER_PACKET_DELAY_SECS as u64)).await;
                }
            }
            Command::Calibrate => {
                let _ = self.modem.send_broadcast(b"USCALACK").await;
                self.sensor.begin_calibration().await.map_err(|e| {
                    log::error!("magnetometer calibration failed: {e:?}");
                    SupervisorError::Sensor
                })?;
                if let Ok(extents) = self.sensor.finish_calibration().await {
                    let reply = calibration_reply(extents);
                    let _ = self.modem.send_broadcast(reply.as_bytes()).await;
                }
            }
        }
        Ok(())
    }

    async fn send_alive_broadcast(&mut self) {
        let volt_mv = (self.sensor.vbatt() * 1000.0) as u16;
        let msg = command::alive_broadcast(self.device_address, volt_mv, self.fw_revision);
        let _ = self.modem.send_broadcast(msg.as_bytes()).await;
    }

    /// Sleep is only safe once interrupt flags are clear, queues are empty
    /// (or WiFi retries are exhausted), the NM3 post-sync window has
    /// expired, and the next acoustic frame is not imminent.
    fn should_sleep(&self, now: Clock) -> bool {
        let flags_clear = !self.flags.peek_rtc() && !self.flags.peek_nm3();
        let no_work = (self.messages.is_empty() && self.statuses.is_empty() && self.topologies.is_empty())
            || self.wifi.retries_exhausted();
        let sync_window_expired = now.wrapping_sub(self.flags.last_nm3_wall_s()) >= NM3_POST_SYNC_WINDOW_SECS;
        let frame_far_away = self.network.config.node_addresses.is_empty()
            || self.network.state.next_frame_wall_s.wrapping_sub(now) > SLEEP_MIN_FRAME_LEAD_SECS;
        flags_clear && no_work && sync_window_expired && frame_far_away
    }

    /// Powers down 3V3/RS-232 (and NM3 unless `nm3_gateway_stay_awake`),
    /// re-checks flags, cancels on a late arrival, otherwise hands off to
    /// the hardware light-sleep adapter.
    async fn enter_sleep(&mut self) {
        log::debug!("entering light sleep");
        self.power.set_rs232_tx(&mut self.power_rail, false);
        self.power.disable_3v3(&mut self.power_rail);
        if !self.network.config.nm3_gateway_stay_awake {
            self.power.disable_nm3(&mut self.power_rail);
        }

        if self.flags.peek_rtc() || self.flags.peek_nm3() {
            log::debug!("sleep cancelled: flag arrived during power-down");
            self.power.enable_3v3(&mut self.power_rail);
            self.power.set_rs232_tx(&mut self.power_rail, true);
            if !self.network.config.nm3_gateway_stay_awake {
                self.power.enable_nm3(&mut self.power_rail);
            }
            return;
        }

        self.hw.light_sleep().await;
        log::debug!("wake up");
    }
}
