use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::{Error, Result};
use crate::protocol::{MessageType, Response};

/// Completion handle of a request waiting for its response
///
/// Resolves with the response, the rejection reason, or [`Error::Closed`] if
/// the session went away without completing it.
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<Response>>,
}

impl Future for ResponseHandle {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|completion| completion.unwrap_or(Err(Error::Closed)))
    }
}

/// Outcome of registering interest in a response type
#[derive(Debug)]
pub(crate) enum Registration {
    /// No request of this type was outstanding; the caller must write it
    Issued(ResponseHandle),
    /// Attached to the request already in flight; nothing must be written
    Joined(ResponseHandle),
}

impl Registration {
    /// Whether the request bytes still have to go on the wire
    pub fn needs_write(&self) -> bool {
        matches!(self, Registration::Issued(_))
    }

    pub fn into_handle(self) -> ResponseHandle {
        match self {
            Registration::Issued(handle) | Registration::Joined(handle) => handle,
        }
    }
}

/// An outstanding request and everyone waiting on it
#[derive(Debug)]
struct PendingRequest {
    waiters: Vec<oneshot::Sender<Result<Response>>>,
    deadline: Instant,
}

/// Matches inbound responses to outstanding requests by message type
///
/// At most one request per response type is outstanding; later requests of the
/// same type join it. Timeouts are plain deadlines owned by the entries, so
/// removing an entry cancels its timeout.
#[derive(Debug)]
pub(crate) struct Correlator {
    pending: HashMap<MessageType, PendingRequest>,
    timeout: Duration,
}

impl Correlator {
    /// Creates a correlator rejecting requests after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Correlator {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Registers a waiter for `response_type`
    pub fn register(&mut self, response_type: MessageType, now: Instant) -> Registration {
        let (tx, rx) = oneshot::channel();
        let handle = ResponseHandle { rx };

        if let Some(pending) = self.pending.get_mut(&response_type) {
            trace!(%response_type, "joining outstanding request");
            pending.waiters.push(tx);
            return Registration::Joined(handle);
        }

        self.pending.insert(
            response_type,
            PendingRequest {
                waiters: vec![tx],
                deadline: now + self.timeout,
            },
        );
        Registration::Issued(handle)
    }

    /// Completes the request waiting for `response_type`
    ///
    /// Returns `false` if nothing was waiting, i.e. the response was unsolicited or late.
    pub fn resolve(&mut self, response_type: MessageType, response: Response) -> bool {
        let Some(pending) = self.pending.remove(&response_type) else {
            debug!(%response_type, "ignoring response, no request outstanding");
            return false;
        };
        debug!(%response_type, waiters = pending.waiters.len(), "resolving request");
        for waiter in pending.waiters {
            let _ = waiter.send(Ok(response.clone()));
        }
        true
    }

    /// Rejects the request waiting for `response_type`
    ///
    /// `reason` is called once per waiter.
    pub fn reject(&mut self, response_type: MessageType, reason: impl Fn() -> Error) -> bool {
        let Some(pending) = self.pending.remove(&response_type) else {
            debug!(%response_type, "ignoring rejection, no request outstanding");
            return false;
        };
        debug!(%response_type, error = %reason(), "rejecting request");
        for waiter in pending.waiters {
            let _ = waiter.send(Err(reason()));
        }
        true
    }

    /// Rejects every outstanding request, returning how many there were
    pub fn reject_all(&mut self, reason: impl Fn() -> Error) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(reason()));
            }
        }
        count
    }

    /// Earliest deadline among outstanding requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Rejects every request whose deadline has passed with [`Error::ResponseTimeout`]
    pub fn expire(&mut self, now: Instant) -> Vec<MessageType> {
        let expired: Vec<MessageType> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(response_type, _)| *response_type)
            .collect();

        let timeout = self.timeout;
        for response_type in &expired {
            self.reject(*response_type, || Error::ResponseTimeout {
                message_type: response_type.as_u8(),
                timeout,
            });
        }
        expired
    }

    /// Whether a request for `response_type` is outstanding
    pub fn is_pending(&self, response_type: MessageType) -> bool {
        self.pending.contains_key(&response_type)
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
