use std::{env, error::Error, fs, path::Path};

use serde::Deserialize;

#[derive(Deserialize)]
struct RawConfig {
    device_address: u8,
    device_id: String,
    backend_base_url: String,
    wifi_ssid: String,
    wifi_psk: String,
    modem_uart_baud: u32,
    cycle_limit: u16,
    partials_per_full_discovery: u16,
    guard_interval_ms: u16,
    frame_interval_s: u32,
    link_quality_threshold: u8,
    nm3_gateway_stay_awake: bool,
    nm3_sensor_stay_awake: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=cfg.toml");

    let toml_str = fs::read_to_string("cfg.toml").unwrap_or_else(|_| default_cfg_toml());
    let raw: RawConfig = toml::from_str(&toml_str)?;

    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("config.rs");
    let code = format!(
        r"
        pub const CONFIG: Config = Config {{
            device_address: {addr},
            device_id: {id:?},
            backend_base_url: {url:?},
            wifi_ssid: {ssid:?},
            wifi_psk: {psk:?},
            modem_uart_baud: {baud},
            default_network_config: crate::network::NetworkConfig {{
                nm3_gateway_stay_awake: {gsa},
                nm3_sensor_stay_awake: {ssa},
                cycle_limit: {cl},
                partials_per_full_discovery: {ppfd},
                guard_interval_ms: {gim},
                frame_interval_s: {fis},
                link_quality_threshold: {lqt},
                node_addresses: heapless::Vec::new(),
            }},
        }};
    ",
        addr = raw.device_address,
        baud = raw.modem_uart_baud,
        cl = raw.cycle_limit,
        fis = raw.frame_interval_s,
        gim = raw.guard_interval_ms,
        gsa = raw.nm3_gateway_stay_awake,
        id = raw.device_id,
        lqt = raw.link_quality_threshold,
        ppfd = raw.partials_per_full_discovery,
        psk = raw.wifi_psk,
        ssa = raw.nm3_sensor_stay_awake,
        ssid = raw.wifi_ssid,
        url = raw.backend_base_url,
    );

    fs::write(dest_path, code)?;
    Ok(())
}

/// Fallback defaults used when no `cfg.toml` is checked out locally: an
/// empty `wifi_ssid` here disables WiFi attempts downstream.
fn default_cfg_toml() -> String {
    r#"
        device_address = 0
        device_id = "usmart-gateway"
        backend_base_url = "http://192.168.4.1:8080"
        wifi_ssid = ""
        wifi_psk = ""
        modem_uart_baud = 9600
        cycle_limit = 24
        partials_per_full_discovery = 4
        guard_interval_ms = 500
        frame_interval_s = 3600
        link_quality_threshold = 4
        nm3_gateway_stay_awake = false
        nm3_sensor_stay_awake = false
    "#
    .to_string()
}
