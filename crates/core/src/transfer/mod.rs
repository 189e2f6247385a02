//! Asynchronous request/response transfers driven by the reactor.
//!
//! A [`TransferEngine`] owns the sockets of every in-flight exchange. It
//! never blocks: the reactor asks which descriptors it cares about
//! ([`interests`](TransferEngine::interests)) and how long it may sleep
//! ([`timeout`](TransferEngine::timeout)), polls them together with its
//! own endpoints, then calls [`perform`](TransferEngine::perform). Finished
//! exchanges are collected with
//! [`drain_completions`](TransferEngine::drain_completions) and their
//! [`Continuation`] is resumed.
//!
//! Streaming data (headers, body chunks, interleaved RTP) reaches the
//! caller through the request's [`ExchangeHandler`] while the exchange is
//! still running.

pub mod tcp;

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::RtspRequest;
use crate::reactor::Interest;
use crate::session::Continuation;

pub use tcp::TcpEngine;

/// Identifies one transfer (one persistent connection) inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferHandle(u64);

impl TransferHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether an exchange should keep going after a streaming callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

/// Streaming callbacks for one exchange.
///
/// Returning [`Flow::Abort`] fails the transfer with
/// [`WallError::Aborted`](crate::WallError::Aborted).
pub trait ExchangeHandler {
    /// One response header line, without its CRLF.
    fn on_header(&mut self, _line: &str) -> Flow {
        Flow::Continue
    }

    /// A chunk of the response body, in order.
    fn on_body(&mut self, _chunk: &[u8]) -> Flow {
        Flow::Continue
    }

    /// One whole `$`-framed interleaved packet, 4-byte header included.
    fn on_interleaved(&mut self, _frame: &[u8]) -> Flow {
        Flow::Continue
    }
}

/// Handler for exchanges whose streamed data is not needed.
#[derive(Debug, Default)]
pub struct Discard;

impl ExchangeHandler for Discard {}

/// A request plus the handler that receives its streamed response.
pub struct Request {
    pub message: RtspRequest,
    pub handler: Box<dyn ExchangeHandler>,
}

impl Request {
    pub fn new(message: RtspRequest, handler: Box<dyn ExchangeHandler>) -> Self {
        Self { message, handler }
    }

    /// A request whose response body is ignored.
    pub fn discarding(message: RtspRequest) -> Self {
        Self::new(message, Box::new(Discard))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.message.method)
            .field("uri", &self.message.uri)
            .finish_non_exhaustive()
    }
}

/// A finished exchange.
///
/// The request is handed back so a continuation can resubmit it unchanged.
#[derive(Debug)]
pub struct Completion {
    pub handle: TransferHandle,
    pub outcome: Result<()>,
    pub request: Request,
    pub continuation: Continuation,
}

/// Non-blocking transfer engine polled by the reactor.
pub trait TransferEngine {
    /// Allocate a transfer. It stays valid until [`release`](Self::release).
    fn create(&mut self) -> TransferHandle;

    /// Start an exchange on `handle`.
    ///
    /// Errors that can be detected up front (unknown handle, exchange
    /// already running, unusable URI, refused connect) are returned here
    /// and the continuation is dropped. Everything later arrives as a
    /// [`Completion`].
    fn submit(
        &mut self,
        handle: TransferHandle,
        request: Request,
        continuation: Continuation,
    ) -> Result<()>;

    /// Forget a transfer, closing its connection. A running exchange is
    /// dropped without a completion.
    fn release(&mut self, handle: TransferHandle);

    /// Descriptors the engine wants polled.
    fn interests(&self) -> Vec<Interest>;

    /// Longest the reactor may block before [`perform`](Self::perform) must
    /// run again. `None` means no deadline.
    fn timeout(&self) -> Option<Duration>;

    /// Whether any exchange is in flight or any completion is queued.
    fn is_active(&self) -> bool;

    /// Make progress on every exchange without blocking.
    fn perform(&mut self);

    fn drain_completions(&mut self) -> Vec<Completion>;
}
