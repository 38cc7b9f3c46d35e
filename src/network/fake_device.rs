//! In-process stand-in for a PH803-W device, used by the session tests

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Interval};

use crate::core::DeviceConfig;
use crate::protocol::{decode_frame, Frame};

const PASSCODE: &[u8] = b"IPQRSTUVWX";
const PASSCODE_REPLY: &str = "000000030f000007000a49505152535455565758";
const LOGIN_OK: &str = "000000030400000900";
const LOGIN_FAILED: &str = "000000030400000901";
const PONG: &str = "0000000303000016";
const TELEMETRY: &str = "000000030d000091030302dc089d00000000";

pub(crate) fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

/// Behavior knobs of the fake device
#[derive(Debug, Clone)]
pub(crate) struct FakeDeviceOptions {
    /// Reply to pings with pongs
    pub answer_pings: bool,
    /// Push telemetry on this interval, unprompted
    pub push_interval: Option<Duration>,
    /// Delay before answering a telemetry request
    pub telemetry_delay: Duration,
}

impl Default for FakeDeviceOptions {
    fn default() -> Self {
        FakeDeviceOptions {
            answer_pings: true,
            push_interval: None,
            telemetry_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Stats {
    connections: AtomicUsize,
    pings: AtomicUsize,
    requests: Mutex<HashMap<u8, usize>>,
}

pub(crate) struct FakeDevice {
    addr: SocketAddr,
    stats: Arc<Stats>,
    kick: broadcast::Sender<()>,
    acceptor: JoinHandle<()>,
}

impl FakeDevice {
    pub(crate) async fn start() -> Self {
        Self::start_with(FakeDeviceOptions::default()).await
    }

    pub(crate) async fn start_with(options: FakeDeviceOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());
        let (kick, _) = broadcast::channel(4);

        let acceptor = tokio::spawn({
            let stats = stats.clone();
            let kick = kick.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let kicked = kick.subscribe();
                    stats.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, options.clone(), stats.clone(), kicked));
                }
            }
        });

        FakeDevice {
            addr,
            stats,
            kick,
            acceptor,
        }
    }

    /// Session config pointing at this fake device
    pub(crate) fn config(&self) -> DeviceConfig {
        DeviceConfig {
            port: self.addr.port(),
            ..DeviceConfig::new(self.addr.ip().to_string())
        }
    }

    pub(crate) fn connections(&self) -> usize {
        self.stats.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.stats.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn requests_of(&self, message_type: u8) -> usize {
        let requests = self.stats.requests.lock().unwrap();
        requests.get(&message_type).copied().unwrap_or(0)
    }

    /// Waits until `count` connections have been accepted
    pub(crate) async fn wait_connections(&self, count: usize) {
        timeout(Duration::from_secs(3), async {
            while self.connections() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fake device did not see enough connections");
    }

    /// Drops every open connection from the device side
    pub(crate) fn kick_all(&self) {
        let _ = self.kick.send(());
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.acceptor.abort();
        self.kick_all();
    }
}

async fn serve(
    mut stream: TcpStream,
    options: FakeDeviceOptions,
    stats: Arc<Stats>,
    mut kicked: broadcast::Receiver<()>,
) {
    let mut buf = BytesMut::with_capacity(1024);
    let mut push = options.push_interval.map(interval);

    loop {
        tokio::select! {
            _ = kicked.recv() => return,

            _ = tick(&mut push) => {
                if stream.write_all(&hex(TELEMETRY)).await.is_err() {
                    return;
                }
            }

            read = stream.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                while let Ok(Some(frame)) = decode_frame(&mut buf) {
                    if frame.message_type == 0x90 && !options.telemetry_delay.is_zero() {
                        sleep(options.telemetry_delay).await;
                    }
                    let Some(reply) = reply_to(&frame, &options, &stats) else {
                        continue;
                    };
                    if stream.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn reply_to(frame: &Frame, options: &FakeDeviceOptions, stats: &Stats) -> Option<Vec<u8>> {
    *stats
        .requests
        .lock()
        .unwrap()
        .entry(frame.message_type)
        .or_default() += 1;

    match frame.message_type {
        0x06 => Some(hex(PASSCODE_REPLY)),
        0x08 => {
            let passcode = frame.payload.get(2..).unwrap_or_default();
            let reply = match passcode {
                PASSCODE => hex(LOGIN_OK),
                b"BADHEADER" => hex("000000040400000900"),
                b"SHORTLENGTH" => hex("000000030f00000900"),
                b"BADDATA" => hex("00000003040000ff00"),
                b"DOTHESPLIT" => [hex(LOGIN_OK), hex(TELEMETRY)].concat(),
                b"SILENT" => return None,
                _ => hex(LOGIN_FAILED),
            };
            Some(reply)
        }
        0x15 => {
            stats.pings.fetch_add(1, Ordering::SeqCst);
            options.answer_pings.then(|| hex(PONG))
        }
        0x90 => Some(hex(TELEMETRY)),
        _ => None,
    }
}

async fn tick(push: &mut Option<Interval>) {
    match push {
        Some(push) => {
            push.tick().await;
        }
        None => future::pending().await,
    }
}
