use std::future;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::{Decoder, FramedWrite};
use tracing::{debug, trace, warn};

use super::correlator::{Correlator, ResponseHandle};
use super::device::DeviceEvent;
use crate::core::{DeviceConfig, Error, FramingError, Result};
use crate::protocol::{
    DeviceCodec, Frame, MessageType, Request, Response, SessionState, Timers, MAX_PAYLOAD,
};
use crate::util::to_hex;

/// Initial capacity of the receive buffer
const READ_BUFFER_SIZE: usize = 1024;

/// Commands sent from [`Device`](super::Device) handles to the session task
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Request {
        request: Request,
        reply: oneshot::Sender<Result<ResponseHandle>>,
    },
    KnownPasscode {
        reply: oneshot::Sender<Option<Bytes>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    Close {
        reconnect: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Session with one device, driven by a single task
///
/// Socket I/O, timers and commands are all handled by [`Session::run`], so
/// the session state needs no locking.
pub(crate) struct Session {
    config: DeviceConfig,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<DeviceEvent>,
    state: SessionState,
    auto_reconnect: bool,
    passcode: Option<Bytes>,
    connecting: Option<BoxFuture<'static, io::Result<TcpStream>>>,
    connect_waiter: Option<oneshot::Sender<Result<()>>>,
    reader: Option<OwnedReadHalf>,
    writer: Option<FramedWrite<OwnedWriteHalf, DeviceCodec>>,
    read_buf: BytesMut,
    codec: DeviceCodec,
    correlator: Correlator,
    timers: Timers,
}

impl Session {
    pub(crate) fn new(
        config: DeviceConfig,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        let passcode = config
            .passcode
            .as_ref()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()));

        Session {
            auto_reconnect: config.auto_reconnect,
            correlator: Correlator::new(config.response_timeout),
            config,
            commands,
            events,
            state: SessionState::Disconnected,
            passcode,
            connecting: None,
            connect_waiter: None,
            reader: None,
            writer: None,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            codec: DeviceCodec::new(),
            timers: Timers::new(),
        }
    }

    /// Runs the session until every device handle is dropped
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                result = connect_attempt(&mut self.connecting) => {
                    self.connect_finished(result);
                }

                read = read_chunk(&mut self.reader, &mut self.read_buf) => {
                    self.read_finished(read);
                }

                _ = sleep_until_deadline(self.timers.reconnect_deadline()) => {
                    self.timers.cancel_reconnect();
                    debug!("reconnect timer expired");
                    self.start_connect();
                }

                _ = sleep_until_deadline(self.timers.ping_deadline()) => {
                    self.send_ping().await;
                }

                _ = sleep_until_deadline(self.timers.pong_deadline()) => {
                    warn!("ping response overdue, reconnecting");
                    self.close(true);
                }

                _ = sleep_until_deadline(self.correlator.next_deadline()) => {
                    for message_type in self.correlator.expire(Instant::now()) {
                        debug!(%message_type, "request timed out");
                    }
                }
            }
        }

        debug!("all device handles dropped, closing session");
        self.close(false);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                if self.reader.is_some() || self.connecting.is_some() {
                    let _ = reply.send(Err(Error::AlreadyConnected));
                    return;
                }
                self.timers.cancel_reconnect();
                self.connect_waiter = Some(reply);
                self.start_connect();
            }
            Command::Request { request, reply } => {
                let _ = reply.send(self.issue(request).await);
            }
            Command::KnownPasscode { reply } => {
                let _ = reply.send(self.passcode.clone());
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Close { reconnect, reply } => {
                self.close(reconnect);
                let _ = reply.send(());
            }
        }
    }

    /// Writes a request unless one of the same kind is in flight
    async fn issue(&mut self, request: Request) -> Result<ResponseHandle> {
        if self.writer.is_none() {
            return Err(Error::NotConnected);
        }
        let size = request.payload().len();
        if size > MAX_PAYLOAD {
            return Err(FramingError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD,
            }
            .into());
        }
        if let Request::Login { passcode } = &request {
            self.passcode = Some(passcode.clone());
        }

        let response_type = request.response_type();
        let registration = self.correlator.register(response_type, Instant::now());
        if registration.needs_write() {
            if let Err(err) = self.write(request).await {
                self.correlator.reject(response_type, || Error::NotConnected);
                return Err(err);
            }
        }
        Ok(registration.into_handle())
    }

    async fn write(&mut self, request: Request) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::NotConnected);
        };
        trace!(message_type = %request.message_type(), "writing request");
        if let Err(err) = writer.send(request).await {
            warn!(error = %err, "socket write failed");
            self.lose_connection(Some(err));
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    fn start_connect(&mut self) {
        let (host, port) = self.config.target();
        debug!(%host, port, "connecting");
        self.state = SessionState::Connecting;
        self.connecting = Some(Box::pin(async move {
            TcpStream::connect((host.as_str(), port)).await
        }));
    }

    fn connect_finished(&mut self, result: io::Result<TcpStream>) {
        self.connecting = None;
        match result {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    trace!(error = %err, "could not disable nagle");
                }
                let (reader, writer) = stream.into_split();
                self.reader = Some(reader);
                self.writer = Some(FramedWrite::new(writer, DeviceCodec::new()));
                self.read_buf.clear();
                self.state = SessionState::Connected;
                debug!(host = %self.config.host, port = self.config.port, "connected");
                self.publish(DeviceEvent::Connected);
                if let Some(waiter) = self.connect_waiter.take() {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(err) => {
                warn!(error = %err, "connect failed");
                if let Some(waiter) = self.connect_waiter.take() {
                    let _ = waiter.send(Err(io::Error::new(err.kind(), err.to_string()).into()));
                }
                self.lose_connection(Some(err.into()));
            }
        }
    }

    fn read_finished(&mut self, read: io::Result<usize>) {
        match read {
            Ok(0) => {
                debug!("socket closed by device");
                self.lose_connection(None);
            }
            Ok(n) => {
                trace!(bytes = n, data = %to_hex(&self.read_buf), "received");
                self.drain_frames();
                self.read_buf.reserve(READ_BUFFER_SIZE);
            }
            Err(err) => {
                warn!(error = %err, "socket error");
                self.lose_connection(Some(err.into()));
            }
        }
    }

    /// Dispatches every frame of the current chunk; malformed input is reported and dropped
    fn drain_frames(&mut self) {
        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "dropping received data");
                    self.publish_error(err);
                }
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        let response = match Response::from_frame(&frame) {
            Ok(response) => response,
            Err(err) => {
                debug!(
                    message_type = frame.message_type,
                    payload = %to_hex(&frame.payload),
                    error = %err,
                    "ignoring frame"
                );
                self.publish_error(err);
                return;
            }
        };

        let now = Instant::now();
        match response {
            Response::Passcode(ref passcode) => {
                debug!("passcode received");
                self.passcode = Some(passcode.clone());
                self.correlator.resolve(MessageType::PasscodeResponse, response);
            }
            Response::Login { status: 0 } => {
                debug!("login success");
                self.correlator.resolve(MessageType::LoginResponse, response);
                if self.writer.is_some() {
                    self.state = SessionState::Ready;
                    self.timers.arm_ping(now, self.config.ping_interval);
                }
            }
            Response::Login { status } => {
                debug!(status, "login rejected");
                self.correlator
                    .reject(MessageType::LoginResponse, || Error::AuthRejected(status));
            }
            Response::Pong => {
                trace!("received pong");
                if self.correlator.is_pending(MessageType::Pong) {
                    self.correlator.resolve(MessageType::Pong, Response::Pong);
                }
                if self.writer.is_some() {
                    self.timers.arm_ping(now, self.config.ping_interval);
                }
            }
            Response::Telemetry(ref reading) | Response::ExtendedTelemetry(ref reading) => {
                debug!(ph = reading.ph, redox = reading.redox, "telemetry received");
                self.publish(DeviceEvent::Data(reading.clone()));
                // either telemetry layout answers a telemetry request
                if self.correlator.is_pending(MessageType::TelemetryResponse) {
                    self.correlator.resolve(MessageType::TelemetryResponse, response);
                }
            }
        }
    }

    async fn send_ping(&mut self) {
        if self.writer.is_none() {
            self.timers.cancel_keepalive();
            return;
        }
        trace!("sending ping");
        if self.write(Request::Ping).await.is_ok() {
            self.timers.ping_sent(Instant::now(), self.config.ping_interval);
        }
    }

    /// Drops the socket after an error or end of stream and starts the reconnect cycle
    fn lose_connection(&mut self, cause: Option<Error>) {
        self.drop_socket();
        if let Some(err) = cause {
            self.publish_error(err);
        }
        if let Some(waiter) = self.connect_waiter.take() {
            let _ = waiter.send(Err(Error::NotConnected));
        }
        if self.timers.reconnect_pending() {
            return;
        }
        self.publish(DeviceEvent::Disconnected);
        self.schedule_reconnect();
    }

    /// Cancels timers, rejects outstanding requests and destroys the socket
    fn close(&mut self, reconnect: bool) {
        self.auto_reconnect = reconnect;
        self.timers.cancel_all();

        let rejected = self.correlator.reject_all(|| Error::Closed);
        if let Some(waiter) = self.connect_waiter.take() {
            let _ = waiter.send(Err(Error::Closed));
        }

        let had_socket = self.reader.is_some() || self.writer.is_some();
        self.drop_socket();
        debug!(reconnect, rejected, had_socket, "session closed");

        if had_socket {
            self.publish(DeviceEvent::Disconnected);
        }
        // also covers a pending reconnect or an aborted connect attempt
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.auto_reconnect {
            debug!(delay = ?self.config.reconnect_delay, "scheduling reconnect");
            self.timers
                .schedule_reconnect(Instant::now(), self.config.reconnect_delay);
            self.state = SessionState::ReconnectPending;
        } else {
            self.state = SessionState::Disconnected;
        }
    }

    fn drop_socket(&mut self) {
        self.connecting = None;
        self.reader = None;
        self.writer = None;
        self.read_buf.clear();
        self.timers.cancel_keepalive();
    }

    fn publish(&self, event: DeviceEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_error(&self, err: Error) {
        self.publish(DeviceEvent::Error(Arc::new(err)));
    }
}

async fn connect_attempt(
    connecting: &mut Option<BoxFuture<'static, io::Result<TcpStream>>>,
) -> io::Result<TcpStream> {
    match connecting {
        Some(attempt) => attempt.await,
        None => future::pending().await,
    }
}

async fn read_chunk(reader: &mut Option<OwnedReadHalf>, buf: &mut BytesMut) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read_buf(buf).await,
        None => future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
