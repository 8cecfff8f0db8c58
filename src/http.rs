//! HTTP shipper: posts queued messages/status/topology records to the
//! backend and pulls down network configuration.
//!
//! Built on `reqwless`, a no_std HTTP/1.1 client, over the same
//! `embassy_net::Stack` the wifi module already manages. RX/TX buffers
//! are preallocated outside the iteration body and reused: no
//! per-iteration allocation.

use embassy_net::{dns::DnsSocket, tcp::client::{TcpClient, TcpClientState}, Stack};
use heapless::String;
use reqwless::{client::HttpClient, request::Method};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_HTTP_ATTEMPTS, MESSAGE_QUEUE_CAP, STATUS_QUEUE_CAP, TOPOLOGY_QUEUE_CAP};
use crate::network::NetworkConfig;
use crate::queue::{MessageQueue, OutboundMessage, OutboundStatus, OutboundTopology, StatusQueue, TopologyQueue};
use crate::wifi::WifiLifecycle;

#[derive(Debug, PartialEq, Eq)]
pub enum ShipResult {
    Delivered,
    Failed,
}

#[derive(Debug)]
pub enum Error {
    Request,
    Response,
    Json,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
    timestamp: u32,
    #[serde(rename = "seqNo")]
    seq_no: u16,
    retry: u8,
}

#[derive(Serialize)]
struct StatusPayload<'a> {
    timestamp: u32,
    uptime: u32,
    #[serde(rename = "lastResetCause")]
    last_reset_cause: &'a str,
    vbatt: f32,
    sensors: &'a str,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: StatusPayload<'a>,
    #[serde(rename = "seqNo")]
    seq_no: u16,
    retry: u8,
}

#[derive(Serialize)]
struct TopologyBody<'a> {
    topology: &'a str,
    config: &'a str,
    data_gathering: &'a str,
    timestamp: u32,
    #[serde(rename = "seqNo")]
    seq_no: u16,
    retry: u8,
}

#[derive(Deserialize)]
struct NetworkConfigWire {
    nm3_gateway_stay_awake: bool,
    nm3_sensor_stay_awake: bool,
    cycle_limit: u16,
    partials_per_full_discovery: u16,
    guard_interval_ms: u16,
    frame_interval_s: u32,
    link_quality_threshold: u8,
    node_addresses: heapless::Vec<u8, 16>,
}

/// Capability the supervisor drives to ship queued records and pull network
/// config, kept separate from the concrete `reqwless`-backed implementation
/// so the supervisor's retry/drain logic is hardware-independent.
pub trait HttpShipper {
    async fn post_message(&mut self, item: &OutboundMessage) -> ShipResult;
    async fn post_status(&mut self, item: &OutboundStatus) -> ShipResult;
    async fn post_topology(&mut self, item: &OutboundTopology) -> ShipResult;
    async fn get_network_config(&mut self) -> Result<NetworkConfig, Error>;

    /// Drains each FIFO in order while WiFi is connected; on failure the
    /// item is re-queued (front, to preserve order) up to
    /// `MAX_HTTP_ATTEMPTS`, then dropped. Provided in terms of the three
    /// `post_*` operations so implementors only need those.
    async fn drain_queues(
        &mut self,
        wifi: &WifiLifecycle,
        messages: &mut MessageQueue,
        statuses: &mut StatusQueue,
        topologies: &mut TopologyQueue,
    ) {
        if !wifi.is_static() {
            return;
        }

        // Each pass is bounded to the queue's length at entry: a retried
        // item is requeued only after the whole pass finishes, so it is
        // never re-attempted within the same drain call.
        let mut retry_messages: heapless::Vec<OutboundMessage, MESSAGE_QUEUE_CAP> = heapless::Vec::new();
        for _ in 0..messages.len() {
            let Some(mut item) = messages.pop_front() else { break };
            if self.post_message(&item).await == ShipResult::Failed {
                item.retry = item.retry.saturating_add(1);
                if item.retry < MAX_HTTP_ATTEMPTS {
                    let _ = retry_messages.push(item);
                }
            }
        }
        for item in retry_messages.into_iter().rev() {
            messages.push_front_back(item);
        }

        let mut retry_statuses: heapless::Vec<OutboundStatus, STATUS_QUEUE_CAP> = heapless::Vec::new();
        for _ in 0..statuses.len() {
            let Some(mut item) = statuses.pop_front() else { break };
            if self.post_status(&item).await == ShipResult::Failed {
                item.retry = item.retry.saturating_add(1);
                if item.retry < MAX_HTTP_ATTEMPTS {
                    let _ = retry_statuses.push(item);
                }
            }
        }
        for item in retry_statuses.into_iter().rev() {
            statuses.push_front_back(item);
        }

        let mut retry_topologies: heapless::Vec<OutboundTopology, TOPOLOGY_QUEUE_CAP> = heapless::Vec::new();
        for _ in 0..topologies.len() {
            let Some(mut item) = topologies.pop_front() else { break };
            if self.post_topology(&item).await == ShipResult::Failed {
                item.retry = item.retry.saturating_add(1);
                if item.retry < MAX_HTTP_ATTEMPTS {
                    let _ = retry_topologies.push(item);
                }
            }
        }
        for item in retry_topologies.into_iter().rev() {
            topologies.push_front_back(item);
        }
    }
}

/// `reqwless`-backed `HttpShipper`, talking plain HTTP to the LAN backend
/// (no TLS: the backend is a LAN endpoint). Owns the preallocated socket
/// state and RX buffer so no allocation happens per request.
pub struct LanHttpShipper<'a> {
    stack: Stack<'static>,
    base_url: &'static str,
    client_state: TcpClientState<1, 2048, 2048>,
    rx_buf: &'a mut [u8],
}

impl<'a> LanHttpShipper<'a> {
    pub fn new(stack: Stack<'static>, base_url: &'static str, rx_buf: &'a mut [u8]) -> Self {
        Self {
            stack,
            base_url,
            client_state: TcpClientState::new(),
            rx_buf,
        }
    }

    async fn post(&mut self, path: &str, body: &[u8]) -> Result<(), Error> {
        let tcp_client = TcpClient::new(self.stack, &self.client_state);
        let dns_client = DnsSocket::new(self.stack);
        let mut client = HttpClient::new(&tcp_client, &dns_client);

        let mut url: String<160> = String::new();
        let _ = core::fmt::Write::write_fmt(&mut url, format_args!("{}{}", self.base_url, path));

        let mut request = client
            .request(Method::POST, url.as_str())
            .await
            .map_err(|_| Error::Request)?
            .body(body)
            .content_type(reqwless::headers::ContentType::ApplicationJson);

        let response = request.send(self.rx_buf).await.map_err(|_| Error::Request)?;
        if response.status.is_successful() {
            Ok(())
        } else {
            Err(Error::Response)
        }
    }

    async fn post_json<T: Serialize>(&mut self, path: &str, body: &T) -> ShipResult {
        let mut buf = [0u8; 512];
        let n = match serde_json_core::to_slice(body, &mut buf) {
            Ok(n) => n,
            Err(_) => return ShipResult::Failed,
        };
        match self.post(path, &buf[..n]).await {
            Ok(()) => ShipResult::Delivered,
            Err(e) => {
                log::warn!("ship failed: {:?}", e);
                ShipResult::Failed
            }
        }
    }
}

impl<'a> HttpShipper for LanHttpShipper<'a> {
    async fn post_message(&mut self, item: &OutboundMessage) -> ShipResult {
        let body = MessageBody {
            message: item.packet_json.as_str(),
            timestamp: item.wall_timestamp,
            seq_no: item.seq_no,
            retry: item.retry,
        };
        self.post_json("/messages/", &body).await
    }

    async fn post_status(&mut self, item: &OutboundStatus) -> ShipResult {
        let body = StatusBody {
            status: StatusPayload {
                timestamp: item.timestamp,
                uptime: item.uptime_s,
                last_reset_cause: item.last_reset_cause.as_str(),
                vbatt: item.vbatt,
                sensors: item.sensors_json.as_str(),
            },
            seq_no: item.seq_no,
            retry: item.retry,
        };
        self.post_json("/statuses/", &body).await
    }

    async fn post_topology(&mut self, item: &OutboundTopology) -> ShipResult {
        let body = TopologyBody {
            topology: item.topology_json.as_str(),
            config: item.config_json.as_str(),
            data_gathering: item.data_gathering_json.as_str(),
            timestamp: item.timestamp,
            seq_no: item.seq_no,
            retry: item.retry,
        };
        self.post_json("/networklogs/", &body).await
    }

    /// GET `/networkconfig/latest/`.
    async fn get_network_config(&mut self) -> Result<NetworkConfig, Error> {
        let tcp_client = TcpClient::new(self.stack, &self.client_state);
        let dns_client = DnsSocket::new(self.stack);
        let mut client = HttpClient::new(&tcp_client, &dns_client);

        let mut url: String<160> = String::new();
        let _ = core::fmt::Write::write_fmt(&mut url, format_args!("{}/networkconfig/latest/", self.base_url));

        let mut request = client
            .request(Method::GET, url.as_str())
            .await
            .map_err(|_| Error::Request)?;
        let response = request.send(self.rx_buf).await.map_err(|_| Error::Request)?;
        let body = response.body().read_to_end().await.map_err(|_| Error::Response)?;

        let (wire, _): (NetworkConfigWire, usize) =
            serde_json_core::from_slice(body).map_err(|_| Error::Json)?;

        let mut node_addresses = heapless::Vec::new();
        for addr in wire.node_addresses {
            let _ = node_addresses.push(addr);
        }

        Ok(NetworkConfig {
            nm3_gateway_stay_awake: wire.nm3_gateway_stay_awake,
            nm3_sensor_stay_awake: wire.nm3_sensor_stay_awake,
            cycle_limit: wire.cycle_limit,
            partials_per_full_discovery: wire.partials_per_full_discovery,
            guard_interval_ms: wire.guard_interval_ms,
            frame_interval_s: wire.frame_interval_s,
            link_quality_threshold: wire.link_quality_threshold,
            node_addresses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_serializes_expected_fields() {
        let mut packet_json: String<512> = String::new();
        let _ = packet_json.push_str("{\"addr\":7}");
        let item = OutboundMessage {
            packet_json,
            wall_timestamp: 1000,
            seq_no: 3,
            retry: 1,
        };
        let body = MessageBody {
            message: item.packet_json.as_str(),
            timestamp: item.wall_timestamp,
            seq_no: item.seq_no,
            retry: item.retry,
        };
        let mut buf = [0u8; 128];
        let n = serde_json_core::to_slice(&body, &mut buf).unwrap();
        let rendered = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(rendered.contains("\"seqNo\":3"));
        assert!(rendered.contains("\"retry\":1"));
    }

    #[test]
    fn network_config_wire_deserializes_into_domain_type() {
        let json = br#"{"nm3_gateway_stay_awake":true,"nm3_sensor_stay_awake":false,
            "cycle_limit":24,"partials_per_full_discovery":4,"guard_interval_ms":500,
            "frame_interval_s":3600,"link_quality_threshold":4,"node_addresses":[1,2,3]}"#;
        let (wire, _): (NetworkConfigWire, usize) = serde_json_core::from_slice(json).unwrap();
        assert!(wire.nm3_gateway_stay_awake);
        assert_eq!(wire.node_addresses.as_slice(), &[1, 2, 3]);
    }
}
