//! Per-camera RTSP client session (RFC 2326 §A.1, client side).
//!
//! Each camera negotiates its stream over one persistent TCP connection and
//! then receives RTP interleaved on that same connection:
//!
//! ```text
//! Idle ─► Describing ─► AwaitingHeader ─► AwaitingBody ─► SettingUp
//!                                                            │
//!              Receiving ◄───────────── Playing ◄────────────┘
//!                  │ (RECEIVE resubmitted after every message)
//!   any failure ─► Failed ── housekeeping after retry interval ─► Describing
//! ```
//!
//! Steps are chained through [`Continuation`]s resumed by the reactor when
//! the transfer engine finishes an exchange. Header lines, body chunks and
//! interleaved frames arrive while an exchange is still running, through
//! the session's [`ExchangeHandler`].

pub mod continuation;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::{Result, WallError};
use crate::media::{DepacketizerStats, H264Depacketizer};
use crate::protocol::uri;
use crate::protocol::{RtspRequest, SessionDescription};
use crate::reactor::{EndpointHandle, Reactor};
use crate::render::{RendererRef, TargetId};
use crate::transfer::{ExchangeHandler, Flow, Request, TransferEngine, TransferHandle};

pub use continuation::Continuation;

/// Delay before a failed camera is retried.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Largest SDP body a DESCRIBE response may declare.
pub const MAX_DESCRIBE_BODY: usize = 1024 * 1024;

/// A camera session shared between the reactor callbacks, the transfer
/// handler and the continuations.
pub type CameraRef = Rc<RefCell<CameraSession>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// DESCRIBE sent.
    Describing,
    /// DESCRIBE response headers arriving.
    AwaitingHeader,
    /// `Content-Length` seen, SDP body arriving.
    AwaitingBody,
    SettingUp,
    Playing,
    /// Streaming interleaved RTP.
    Receiving,
    /// Waiting for the retry timer.
    Failed,
}

/// One camera's stream negotiation and reception.
pub struct CameraSession {
    name: String,
    url: String,
    content_base: Option<String>,
    control: Option<String>,
    body: Vec<u8>,
    declared_length: Option<usize>,
    sdp: Option<SessionDescription>,
    state: SessionState,
    target: TargetId,
    renderer: RendererRef,
    depacketizer: H264Depacketizer,
    endpoint: Option<EndpointHandle>,
    transfer: Option<TransferHandle>,
    retry_interval: Duration,
    restarts: u64,
}

impl CameraSession {
    pub fn new(name: &str, url: &str, renderer: RendererRef, target: TargetId) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            content_base: None,
            control: None,
            body: Vec::new(),
            declared_length: None,
            sdp: None,
            state: SessionState::Idle,
            target,
            renderer,
            depacketizer: H264Depacketizer::new(),
            endpoint: None,
            transfer: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            restarts: 0,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn into_shared(self) -> CameraRef {
        Rc::new(RefCell::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resolved control URI of the video track, once the SDP is in.
    pub fn control(&self) -> Option<&str> {
        self.control.as_deref()
    }

    pub fn content_base(&self) -> Option<&str> {
        self.content_base.as_deref()
    }

    pub fn description(&self) -> Option<&SessionDescription> {
        self.sdp.as_ref()
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn endpoint(&self) -> Option<EndpointHandle> {
        self.endpoint
    }

    pub fn transfer(&self) -> Option<TransferHandle> {
        self.transfer
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Number of times the DESCRIBE sequence has been started.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn stats(&self) -> DepacketizerStats {
        self.depacketizer.stats()
    }

    /// Register the camera's endpoint and schedule the first connection
    /// attempt for the next reactor iteration.
    pub fn attach(camera: &CameraRef, reactor: &mut Reactor) -> Result<EndpointHandle> {
        let name = camera.borrow().name.clone();
        let endpoint = reactor.register(&name)?;
        camera.borrow_mut().endpoint = Some(endpoint);

        let session = camera.clone();
        reactor.arm_housekeeping(endpoint, Instant::now(), move |reactor, _| {
            CameraSession::start(&session, reactor)
        });
        Ok(endpoint)
    }

    /// Begin, or restart, the DESCRIBE → SETUP → PLAY sequence on a fresh
    /// transfer.
    pub fn start(camera: &CameraRef, reactor: &mut Reactor) {
        {
            let mut session = camera.borrow_mut();
            session.reset();
            session.restarts += 1;
            tracing::info!(camera = %session.name, url = %session.url, attempt = session.restarts, "connecting camera");
        }

        let started = reactor
            .engine_mut()
            .and_then(|engine| Self::describe(camera, engine));
        if let Err(e) = started {
            continuation::fail(reactor, camera, &e);
        }
    }

    fn describe(camera: &CameraRef, engine: &mut dyn TransferEngine) -> Result<()> {
        let (previous, url) = {
            let mut session = camera.borrow_mut();
            (session.transfer.take(), session.url.clone())
        };
        if let Some(previous) = previous {
            engine.release(previous);
        }

        let handle = engine.create();
        {
            let mut session = camera.borrow_mut();
            session.transfer = Some(handle);
            session.set_state(SessionState::Describing);
        }

        let request = Request::new(
            RtspRequest::describe(&url),
            Box::new(SessionHandler::new(camera.clone())),
        );
        engine.submit(handle, request, Continuation::DescribeDone(camera.clone()))
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(camera = %self.name, from = ?self.state, to = ?state, "session state");
            self.state = state;
        }
    }

    fn reset(&mut self) {
        self.content_base = None;
        self.control = None;
        self.body.clear();
        self.declared_length = None;
        self.sdp = None;
        self.depacketizer.reset();
        self.set_state(SessionState::Idle);
    }

    fn is_describing(&self) -> bool {
        matches!(
            self.state,
            SessionState::Describing | SessionState::AwaitingHeader | SessionState::AwaitingBody
        )
    }

    /// Target of SETUP and PLAY.
    fn setup_uri(&self) -> Result<String> {
        self.control.clone().ok_or_else(|| {
            WallError::Protocol(format!(
                "DESCRIBE for {} carried no video control path",
                self.name
            ))
        })
    }

    fn on_header(&mut self, line: &str) -> Flow {
        if !self.is_describing() {
            return Flow::Continue;
        }
        if self.state == SessionState::Describing {
            self.set_state(SessionState::AwaitingHeader);
        }

        if let Some(value) = header_value(line, "Content-Length") {
            let Ok(length) = value.parse::<usize>() else {
                tracing::warn!(camera = %self.name, value, "invalid Content-Length");
                return Flow::Abort;
            };
            // The response reader frames the body by the first Content-Length.
            if let Some(declared) = self.declared_length {
                if declared != length {
                    tracing::warn!(camera = %self.name, declared, length, "conflicting Content-Length headers");
                    return Flow::Abort;
                }
                return Flow::Continue;
            }
            if length > MAX_DESCRIBE_BODY {
                tracing::warn!(camera = %self.name, length, limit = MAX_DESCRIBE_BODY, "DESCRIBE body too large");
                return Flow::Abort;
            }
            self.body.clear();
            if self.body.try_reserve(length + 1).is_err() {
                tracing::warn!(camera = %self.name, length, "cannot allocate DESCRIBE body");
                return Flow::Abort;
            }
            self.declared_length = Some(length);
            self.set_state(SessionState::AwaitingBody);
        } else if let Some(value) = header_value(line, "Content-Base") {
            self.content_base = Some(value.to_string());
        }
        Flow::Continue
    }

    fn on_body(&mut self, chunk: &[u8]) -> Flow {
        if !self.is_describing() {
            return Flow::Continue;
        }
        let Some(declared) = self.declared_length else {
            tracing::warn!(camera = %self.name, "DESCRIBE body without Content-Length");
            return Flow::Abort;
        };

        let received = self.body.len() + chunk.len();
        if received > declared {
            tracing::warn!(camera = %self.name, declared, received, "DESCRIBE body longer than Content-Length");
            return Flow::Abort;
        }

        self.body.extend_from_slice(chunk);
        if received == declared {
            self.parse_description();
        }
        Flow::Continue
    }

    fn parse_description(&mut self) {
        let sdp = SessionDescription::parse(&self.body);
        let base = self.content_base.as_deref().unwrap_or(&self.url);
        self.control = sdp
            .video_control()
            .map(|control| uri::resolve_control(base, control));
        tracing::info!(
            camera = %self.name,
            control = self.control.as_deref().unwrap_or("<none>"),
            "stream described"
        );
        self.sdp = Some(sdp);
    }

    fn on_interleaved(&mut self, frame: &[u8]) -> Flow {
        if !matches!(self.state, SessionState::Playing | SessionState::Receiving) {
            tracing::trace!(camera = %self.name, state = ?self.state, "interleaved frame before PLAY");
            return Flow::Continue;
        }
        match self.renderer.try_borrow_mut() {
            Ok(mut renderer) => self.depacketizer.push(frame, &mut *renderer, self.target),
            Err(_) => tracing::warn!(camera = %self.name, "renderer busy, frame dropped"),
        }
        Flow::Continue
    }

    /// Feed SPS/PPS from the SDP to the decoder ahead of streamed data.
    fn prime_decoder(&mut self) {
        let Some(sets) = self
            .sdp
            .as_ref()
            .and_then(|sdp| sdp.video.as_ref())
            .map(|video| video.parameter_sets.clone())
        else {
            return;
        };
        if sets.is_empty() {
            return;
        }
        if let Ok(mut renderer) = self.renderer.try_borrow_mut() {
            tracing::debug!(camera = %self.name, count = sets.len(), "submitting parameter sets");
            self.depacketizer
                .push_parameter_sets(&sets, &mut *renderer, self.target);
        }
    }
}

/// Value of `name: value` when the line carries header `name`
/// (case-insensitive).
fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then(|| value.trim())
}

/// Routes a running exchange's streamed data into its camera session.
pub struct SessionHandler {
    camera: CameraRef,
}

impl SessionHandler {
    pub fn new(camera: CameraRef) -> Self {
        Self { camera }
    }
}

impl ExchangeHandler for SessionHandler {
    fn on_header(&mut self, line: &str) -> Flow {
        self.camera.borrow_mut().on_header(line)
    }

    fn on_body(&mut self, chunk: &[u8]) -> Flow {
        self.camera.borrow_mut().on_body(chunk)
    }

    fn on_interleaved(&mut self, frame: &[u8]) -> Flow {
        self.camera.borrow_mut().on_interleaved(frame)
    }
}
