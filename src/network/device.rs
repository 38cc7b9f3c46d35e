use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::Instrument;

use super::connection::{Command, Session};
use super::correlator::ResponseHandle;
use crate::core::{DeviceConfig, Error, Result};
use crate::protocol::{Request, Response, SessionState, TelemetryReading};

/// Capacity of the command queue between handles and the session task
const COMMAND_QUEUE: usize = 32;

/// Notifications published by a device session
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The TCP connection was established
    Connected,
    /// The TCP connection was lost or closed
    Disconnected,
    /// Telemetry arrived, requested or pushed by the device
    Data(TelemetryReading),
    /// Diagnostic error; malformed input and socket errors end up here
    Error(Arc<Error>),
}

/// Handle to a session with one PH803-W device
///
/// The session runs on its own task. Handles are cheap to clone; the session
/// closes once the last handle is dropped.
#[derive(Clone)]
pub struct Device {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Device {
    /// Starts a session task for the configured device without connecting
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(config.event_capacity);
        let span = tracing::debug_span!("ph803w_device", host = %config.host, port = config.port);

        let session = Session::new(config, command_rx, events.clone());
        tokio::spawn(session.run().instrument(span));

        Ok(Device { commands, events })
    }

    /// Subscribes to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Opens the TCP connection
    ///
    /// Fails with [`Error::AlreadyConnected`] while a socket or connect attempt exists.
    pub async fn connect(&self) -> Result<()> {
        self.call(|reply| Command::Connect { reply }).await?
    }

    /// Writes a request and returns the handle completing with its response
    ///
    /// A request whose response type is already awaited is not written again;
    /// the returned handle completes together with the outstanding one.
    pub async fn send(&self, request: Request) -> Result<ResponseHandle> {
        self.call(|reply| Command::Request { request, reply }).await?
    }

    /// Writes a request and waits for its response
    pub async fn request(&self, request: Request) -> Result<Response> {
        self.send(request).await?.await
    }

    /// Queries the passcode from the device; the session remembers it for later logins
    pub async fn passcode(&self) -> Result<Bytes> {
        match self.request(Request::Passcode).await? {
            Response::Passcode(passcode) => Ok(passcode),
            other => Err(Error::protocol(format!(
                "unexpected reply to passcode request: {:?}",
                other
            ))),
        }
    }

    /// Passcode the session currently knows, if any
    pub async fn known_passcode(&self) -> Result<Option<Bytes>> {
        self.call(|reply| Command::KnownPasscode { reply }).await
    }

    /// Logs in to the device
    ///
    /// Without a passcode argument the known passcode is used, and if none is
    /// known it is first queried from the device. On success the session
    /// becomes ready and starts its keepalive.
    pub async fn authenticate(&self, passcode: Option<&[u8]>) -> Result<()> {
        let passcode = match passcode {
            Some(passcode) => Bytes::copy_from_slice(passcode),
            None => match self.known_passcode().await? {
                Some(passcode) => passcode,
                None => self.passcode().await?,
            },
        };

        match self.request(Request::Login { passcode }).await? {
            Response::Login { status: 0 } => Ok(()),
            Response::Login { status } => Err(Error::AuthRejected(status)),
            other => Err(Error::protocol(format!(
                "unexpected reply to login: {:?}",
                other
            ))),
        }
    }

    /// Fetches telemetry; the device keeps pushing updates as [`DeviceEvent::Data`] afterwards
    pub async fn retrieve_data(&self) -> Result<TelemetryReading> {
        match self.request(Request::Telemetry).await? {
            Response::Telemetry(reading) | Response::ExtendedTelemetry(reading) => Ok(reading),
            other => Err(Error::protocol(format!(
                "unexpected reply to telemetry request: {:?}",
                other
            ))),
        }
    }

    /// Current session state
    pub async fn state(&self) -> Result<SessionState> {
        self.call(|reply| Command::State { reply }).await
    }

    /// Closes the connection, rejecting outstanding requests
    ///
    /// With `reconnect` the session reconnects after the configured delay; the
    /// flag also replaces the auto-reconnect setting for later disconnects.
    pub async fn close(&self, reconnect: bool) -> Result<()> {
        self.call(|reply| Command::Close { reconnect, reply }).await
    }

    /// Closes the connection without reconnecting
    pub async fn destroy(&self) -> Result<()> {
        self.close(false).await
    }
}
