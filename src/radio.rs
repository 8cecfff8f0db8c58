//! Hardware-backed `WifiDriver` adapter (binary-only: drives the real
//! `esp-radio` stack the way `gateway_core::wifi::WifiLifecycle` expects —
//! non-blocking kick-off plus a poll, rather than an always-on auto-
//! reconnect task, since this gateway power-cycles the radio between
//! acoustic frames instead of holding a permanent link.
//!
//! Bring-up (stack/DHCP/`net_task`) follows the usual `esp-radio` station
//! setup; the background retry loop is replaced by a one-shot connect task
//! signalled from `start_associate`, since `WifiDriver`'s methods are plain
//! non-blocking `fn`s.

use core::str::FromStr;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_executor::Spawner;
use embassy_net::{Runner, Stack, StackResources};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, signal::Signal};
use embassy_time::{with_timeout, Duration};
use esp_hal::rng::Rng;
use esp_radio::{
    wifi::{ClientConfig, Config as WifiConfig, ModeConfig, WifiController, WifiDevice, WifiStaState},
    Controller,
};
use heapless::String;
use static_cell::StaticCell;

use gateway_core::wifi::WifiDriver;

static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static CONNECT_SIGNAL: Signal<NoopRawMutex, ()> = Signal::new();
static DEINIT_SIGNAL: Signal<NoopRawMutex, ()> = Signal::new();
static CONNECT_FAILED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub enum RadioError {
    Busy,
}

pub struct Radio {
    stack: Stack<'static>,
    ssid: &'static str,
    psk: &'static str,
}

impl Radio {
    pub async fn new(
        init: &'static Controller<'static>,
        wifi: esp_hal::peripherals::WIFI<'static>,
        rng: Rng,
        device_id: &'static str,
        ssid: &'static str,
        psk: &'static str,
        spawner: Spawner,
    ) -> Self {
        let (controller, interfaces) = esp_radio::wifi::new(init, wifi, WifiConfig::default()).unwrap();

        let mut dhcp_config = embassy_net::DhcpConfig::default();
        dhcp_config.hostname = String::<32>::from_str(device_id).ok();

        let seed = (rng.random() as u64) << 32 | rng.random() as u64;
        let net_config = embassy_net::Config::dhcpv4(dhcp_config);

        let resources = RESOURCES.init(StackResources::new());
        let (stack, runner) = embassy_net::new(interfaces.sta, net_config, resources, seed);

        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(connect_task(controller, ssid, psk)).ok();

        Self { stack, ssid, psk }
    }

    pub fn stack(&self) -> Stack<'static> {
        self.stack
    }
}

impl WifiDriver for Radio {
    type Error = RadioError;

    fn is_config_absent(&self) -> bool {
        self.ssid.is_empty()
    }

    fn start_associate(&mut self) -> Result<(), Self::Error> {
        CONNECT_FAILED.store(false, Ordering::Relaxed);
        CONNECT_SIGNAL.signal(());
        Ok(())
    }

    fn poll_associated(&mut self) -> bool {
        if CONNECT_FAILED.load(Ordering::Relaxed) {
            return false;
        }
        esp_radio::wifi::sta_state() == WifiStaState::Connected
            && self.stack.is_link_up()
            && self.stack.config_v4().is_some()
    }

    fn force_deinit(&mut self) {
        DEINIT_SIGNAL.signal(());
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Owns the controller exclusively; waits for `start_associate`/
/// `force_deinit` signals instead of looping on its own.
#[embassy_executor::task]
async fn connect_task(mut controller: WifiController<'static>, ssid: &'static str, psk: &'static str) {
    loop {
        CONNECT_SIGNAL.wait().await;

        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = ClientConfig::default().with_ssid(ssid.into()).with_password(psk.into());
            if controller.set_config(&ModeConfig::Client(client_config)).is_err() {
                CONNECT_FAILED.store(true, Ordering::Relaxed);
                continue;
            }
            if controller.start_async().await.is_err() {
                CONNECT_FAILED.store(true, Ordering::Relaxed);
                continue;
            }
        }

        match with_timeout(Duration::from_secs(10), controller.connect_async()).await {
            Ok(Ok(())) => log::info!("wifi associated"),
            Ok(Err(e)) => {
                log::warn!("wifi connect failed: {e:?}");
                CONNECT_FAILED.store(true, Ordering::Relaxed);
            }
            Err(_) => {
                log::warn!("wifi connect timed out");
                CONNECT_FAILED.store(true, Ordering::Relaxed);
            }
        }

        if DEINIT_SIGNAL.try_take().is_some() {
            let _ = controller.stop_async().await;
        }
    }
}
