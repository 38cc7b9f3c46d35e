use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::core::serde::serialize_hex;
use crate::core::{DiscoveryConfig, Error, FramingError, Result};
use crate::protocol::{FieldReader, PREFIX};
use crate::util::to_hex;

/// Broadcast probe soliciting replies from every device on the network
pub const PROBE: [u8; 8] = [0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x03];

/// Subtype of the probe itself, seen when our own broadcast loops back
const SUBTYPE_ECHO: u16 = 0x0003;
const SUBTYPE_REPLY: u16 = 0x0004;

/// Unknown bytes between the product key and the API server string
const RESERVED_REGION: usize = 8;

const MAX_DATAGRAM: usize = 2048;

/// A device that answered a discovery probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Address the reply came from
    pub ip: IpAddr,
    /// Unique device id, also used by the vendor cloud
    pub id: String,
    #[serde(serialize_with = "serialize_hex")]
    pub mac: Vec<u8>,
    /// Firmware id, empty on older firmware
    pub firmware_id: String,
    pub product_key: String,
    pub api_server: String,
    pub version: String,
    /// Bytes after the version string, meaning unknown
    #[serde(serialize_with = "serialize_hex")]
    pub trailing: Vec<u8>,
}

impl DiscoveredDevice {
    /// MAC address as lowercase hex
    pub fn mac_hex(&self) -> String {
        to_hex(&self.mac)
    }
}

/// Notifications published by a discovery listener
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Device(DiscoveredDevice),
    Error(Arc<Error>),
}

fn ascii(field: Bytes) -> String {
    String::from_utf8_lossy(&field).into_owned()
}

/// Decodes one discovery datagram received from `ip`
///
/// Returns `Ok(None)` for the echo of our own probe. Malformed datagrams are
/// errors; the caller decides whether they are worth reporting.
pub fn decode_reply(datagram: &[u8], ip: IpAddr) -> Result<Option<DiscoveredDevice>> {
    if datagram.len() < PREFIX.len() || datagram[..PREFIX.len()] != PREFIX {
        return Err(FramingError::BadPrefix.into());
    }

    let mut reader = FieldReader::new(Bytes::copy_from_slice(&datagram[PREFIX.len()..]));
    let declared = reader.read_varint()? as usize;
    let actual = reader.remaining();
    if declared != actual {
        return Err(FramingError::LengthMismatch { declared, actual }.into());
    }

    let flag = reader.read_u8()?;
    if flag != 0 {
        return Err(Error::protocol(format!("unexpected discovery flag {:#04x}", flag)));
    }

    match reader.read_u16()? {
        SUBTYPE_ECHO => return Ok(None),
        SUBTYPE_REPLY => {}
        subtype => {
            return Err(Error::protocol(format!(
                "unknown discovery subtype {:#06x}",
                subtype
            )))
        }
    }

    let id = ascii(reader.read_length_prefixed()?);
    let mac = reader.read_length_prefixed()?.to_vec();
    let firmware_id = ascii(reader.read_length_prefixed()?);
    let product_key = ascii(reader.read_length_prefixed()?);
    reader.skip(RESERVED_REGION)?;
    let api_server = ascii(reader.read_nul_terminated()?);
    let version = ascii(reader.read_nul_terminated()?);
    let trailing = reader.read_remainder().to_vec();

    Ok(Some(DiscoveredDevice {
        ip,
        id,
        mac,
        firmware_id,
        product_key,
        api_server,
        version,
        trailing,
    }))
}

/// Opens the UDP socket with address reuse and broadcast enabled
fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Listens for discovery replies and publishes one event per device reply
///
/// A device may answer every probe, so the same device can be reported more
/// than once.
pub struct Discovery {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    events: broadcast::Sender<DiscoveryEvent>,
    shutdown_tx: watch::Sender<bool>,
    listener: JoinHandle<()>,
}

impl Discovery {
    /// Binds the discovery socket and starts listening, without probing
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: DiscoveryConfig) -> Result<Self> {
        if config.event_capacity == 0 {
            return Err(Error::config("Event capacity must be greater than zero"));
        }
        let socket = bind_socket(config.bind_addr).map_err(|err| {
            warn!(addr = %config.bind_addr, error = %err, "can not listen for discovery replies");
            Error::DiscoverySocket(err)
        })?;
        let socket = Arc::new(socket);
        if let Ok(addr) = socket.local_addr() {
            debug!(%addr, "listening for discovery replies");
        }

        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(listen(socket.clone(), events.clone(), shutdown_rx));

        Ok(Discovery {
            socket,
            target: config.target,
            events,
            shutdown_tx,
            listener,
        })
    }

    /// Subscribes to discovered devices and diagnostics
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Sends the probe to the configured target
    pub async fn probe(&self) -> Result<()> {
        debug!(target = %self.target, probe = %to_hex(&PROBE), "sending discovery probe");
        if let Err(err) = self.socket.send_to(&PROBE, self.target).await {
            warn!(error = %err, "discovery probe failed");
            let reported = Error::DiscoverySocket(io::Error::new(err.kind(), err.to_string()));
            let _ = self.events.send(DiscoveryEvent::Error(Arc::new(reported)));
            return Err(Error::DiscoverySocket(err));
        }
        Ok(())
    }

    /// Local address of the discovery socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Error::DiscoverySocket)
    }

    /// Stops listening; idempotent
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Whether the listener task has finished
    pub fn is_stopped(&self) -> bool {
        self.listener.is_finished()
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds a listener, subscribes to it and sends one probe
pub async fn discover(
    config: DiscoveryConfig,
) -> Result<(Discovery, broadcast::Receiver<DiscoveryEvent>)> {
    let discovery = Discovery::bind(config)?;
    let events = discovery.subscribe();
    discovery.probe().await?;
    Ok((discovery, events))
}

async fn listen(
    socket: Arc<UdpSocket>,
    events: broadcast::Sender<DiscoveryEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, remote)) => {
                        let datagram = &buf[..len];
                        trace!(%remote, data = %to_hex(datagram), "discovery datagram");
                        match decode_reply(datagram, remote.ip()) {
                            Ok(Some(device)) => {
                                info!(ip = %device.ip, id = %device.id, version = %device.version, "device discovered");
                                let _ = events.send(DiscoveryEvent::Device(device));
                            }
                            Ok(None) => trace!(%remote, "ignoring probe echo"),
                            Err(err) => {
                                debug!(%remote, error = %err, "ignoring discovery datagram");
                                if matches!(err, Error::Framing(FramingError::LengthMismatch { .. })) {
                                    let _ = events.send(DiscoveryEvent::Error(Arc::new(err)));
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "error receiving discovery datagram");
                        let _ = events.send(DiscoveryEvent::Error(Arc::new(Error::DiscoverySocket(err))));
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("discovery listener shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fake_device::hex;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::time::timeout;

    const REPLY_OLD_FIRMWARE: &str = "00000003680000040016434671704a5453796d434539504c6c703144706268590006483fda87dc4700000020326433643935346439626237343162346131396261313135333130343933326200000000000000026170692e67697a776974732e636f6d3a383000342e302e3800";
    const REPLY_WITH_FIRMWARE: &str = "00000003780000040016327471526138384667615553354178674152565975670006e8db848c4b17000830343032303033410020326433643935346439626237343162346131396261313135333130343933326200000000000000026170692e67697a776974732e636f6d3a383000342e312e32003033303330303030";
    const REPLY_US_SERVER: &str = "000000037a0000040016474233746162636465666768696a6b6c6d6e5050414c0006ecfabc1234560008303430323030334100203462646535636364666634613438633038343065303535323034613731653166000000000000000075736170692e67697a776974732e636f6d3a383000342e312e32003030303030303031";

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
    }

    #[test]
    fn test_decode_old_firmware_reply() {
        let device = decode_reply(&hex(REPLY_OLD_FIRMWARE), ip(1)).unwrap().unwrap();
        assert_eq!(device.ip, ip(1));
        assert_eq!(device.id, "CFqpJTSymCE9PLlp1DpbhY");
        assert_eq!(device.mac_hex(), "483fda87dc47");
        assert_eq!(device.firmware_id, "");
        assert_eq!(device.product_key, "2d3d954d9bb741b4a19ba1153104932b");
        assert_eq!(device.api_server, "api.gizwits.com:80");
        assert_eq!(device.version, "4.0.8");
        assert!(device.trailing.is_empty());
    }

    #[test]
    fn test_decode_reply_with_firmware_id() {
        let device = decode_reply(&hex(REPLY_WITH_FIRMWARE), ip(2)).unwrap().unwrap();
        assert_eq!(device.id, "2tqRa88FgaUS5AxgARVYug");
        assert_eq!(device.mac_hex(), "e8db848c4b17");
        assert_eq!(device.firmware_id, "0402003A");
        assert_eq!(device.product_key, "2d3d954d9bb741b4a19ba1153104932b");
        assert_eq!(device.api_server, "api.gizwits.com:80");
        assert_eq!(device.version, "4.1.2");
        assert_eq!(device.trailing, b"03030000");
    }

    #[test]
    fn test_decode_reply_serializes_hex_fields() {
        let device = decode_reply(&hex(REPLY_US_SERVER), ip(3)).unwrap().unwrap();
        assert_eq!(device.id, "GB3tabcdefghijklmnPPAL");
        assert_eq!(device.product_key, "4bde5ccdff4a48c0840e055204a71e1f");
        assert_eq!(device.api_server, "usapi.gizwits.com:80");

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["ip"], "127.0.0.3");
        assert_eq!(json["mac"], "ecfabc123456");
        assert_eq!(json["firmware_id"], "0402003A");
        assert_eq!(json["version"], "4.1.2");
        assert_eq!(json["trailing"], "3030303030303031");
    }

    #[test]
    fn test_probe_echo_is_ignored() {
        assert_eq!(decode_reply(&PROBE, ip(1)).unwrap(), None);
    }

    #[test]
    fn test_malformed_datagrams() {
        let err = decode_reply(&hex("00000004030000030000"), ip(1)).unwrap_err();
        assert!(matches!(err, Error::Framing(FramingError::BadPrefix)));

        let mut truncated = hex(REPLY_OLD_FIRMWARE);
        truncated.pop();
        let err = decode_reply(&truncated, ip(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::Framing(FramingError::LengthMismatch { declared: 104, actual: 103 })
        ));

        let err = decode_reply(&hex("0000000303010004"), ip(1)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = decode_reply(&hex("0000000303000005"), ip(1)).unwrap_err();
        assert!(err.to_string().contains("0x0005"));

        // a reply too short for its fields
        let err = decode_reply(&hex("00000003050000040016"), ip(1)).unwrap_err();
        assert!(err.is_malformed_input());
    }

    async fn next_event(events: &mut broadcast::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
        timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("timed out waiting for discovery event")
            .unwrap()
    }

    #[tokio::test]
    async fn test_discovery_against_fake_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = DiscoveryConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            target: responder.local_addr().unwrap(),
            ..Default::default()
        };

        let (discovery, mut events) = discover(config).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, client) = timeout(Duration::from_secs(3), responder.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], &PROBE);
        assert_eq!(client, discovery.local_addr().unwrap());

        responder.send_to(&PROBE, client).await.unwrap();
        responder.send_to(&hex(REPLY_OLD_FIRMWARE), client).await.unwrap();
        responder.send_to(&hex("0000000303000005"), client).await.unwrap();
        responder
            .send_to(&hex(&REPLY_WITH_FIRMWARE[..REPLY_WITH_FIRMWARE.len() - 2]), client)
            .await
            .unwrap();
        responder.send_to(&hex(REPLY_US_SERVER), client).await.unwrap();

        let DiscoveryEvent::Device(first) = next_event(&mut events).await else {
            panic!("expected a device");
        };
        assert_eq!(first.id, "CFqpJTSymCE9PLlp1DpbhY");
        assert_eq!(first.ip, ip(1));

        let DiscoveryEvent::Error(err) = next_event(&mut events).await else {
            panic!("expected a length error");
        };
        assert!(matches!(
            *err,
            Error::Framing(FramingError::LengthMismatch { .. })
        ));

        let DiscoveryEvent::Device(second) = next_event(&mut events).await else {
            panic!("expected a device");
        };
        assert_eq!(second.id, "GB3tabcdefghijklmnPPAL");

        discovery.stop();
        discovery.stop();
        timeout(Duration::from_secs(3), async {
            while !discovery.is_stopped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        // TEST-NET-1 is never a local address
        let config = DiscoveryConfig {
            bind_addr: "192.0.2.1:0".parse().unwrap(),
            ..Default::default()
        };
        assert!(matches!(
            Discovery::bind(config),
            Err(Error::DiscoverySocket(_))
        ));
    }
}
