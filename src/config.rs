use crate::network::NetworkConfig;

/// Build-time configuration, rendered from `cfg.toml` by `build.rs` into
/// `OUT_DIR/config.rs`. An empty `wifi_ssid` disables all WiFi attempts,
/// the Rust-native equivalent of the original's "absent wifi_cfg.json".
#[derive(Debug)]
pub struct Config {
    pub device_address: u8,
    pub device_id: &'static str,
    pub backend_base_url: &'static str,
    pub wifi_ssid: &'static str,
    pub wifi_psk: &'static str,
    pub modem_uart_baud: u32,
    pub default_network_config: NetworkConfig,
}

impl Config {
    pub fn wifi_configured(&self) -> bool {
        !self.wifi_ssid.is_empty()
    }
}

include!(concat!(env!("OUT_DIR"), "/config.rs"));
