//! What to do when a transfer finishes.

use std::fmt;
use std::time::Instant;

use super::{CameraRef, SessionHandler, SessionState};
use crate::error::{Result, WallError};
use crate::protocol::RtspRequest;
use crate::reactor::Reactor;
use crate::transfer::{Completion, Request, TransferHandle};

/// The step resumed when an exchange completes.
pub enum Continuation {
    /// DESCRIBE answered; SETUP the video track next.
    DescribeDone(CameraRef),
    SetupDone(CameraRef),
    /// PLAY answered; start receiving.
    PlayDone(CameraRef),
    /// One RECEIVE finished; issue the next one.
    InterleaveLoop(CameraRef),
    /// A fire-and-forget command such as a PTZ request.
    Command { label: String },
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (step, camera) = match self {
            Continuation::DescribeDone(c) => ("DescribeDone", c),
            Continuation::SetupDone(c) => ("SetupDone", c),
            Continuation::PlayDone(c) => ("PlayDone", c),
            Continuation::InterleaveLoop(c) => ("InterleaveLoop", c),
            Continuation::Command { label } => {
                return f.debug_struct("Command").field("label", label).finish();
            }
        };
        match camera.try_borrow() {
            Ok(session) => f.debug_tuple(step).field(&session.name).finish(),
            Err(_) => f.debug_tuple(step).field(&"<busy>").finish(),
        }
    }
}

/// Resume the continuation of a finished exchange.
pub fn resume(reactor: &mut Reactor, completion: Completion) {
    let Completion {
        handle,
        outcome,
        request,
        continuation,
    } = completion;

    let camera = match continuation {
        Continuation::Command { label } => {
            match outcome {
                Ok(()) => tracing::info!(command = %label, "command sent"),
                Err(e) => tracing::warn!(command = %label, error = %e, "command failed"),
            }
            if let Ok(engine) = reactor.engine_mut() {
                engine.release(handle);
            }
            return;
        }
        Continuation::DescribeDone(ref c)
        | Continuation::SetupDone(ref c)
        | Continuation::PlayDone(ref c)
        | Continuation::InterleaveLoop(ref c) => c.clone(),
    };

    if camera.borrow().transfer != Some(handle) {
        tracing::debug!(camera = %camera.borrow().name, transfer = %handle, "stale completion ignored");
        if let Ok(engine) = reactor.engine_mut() {
            engine.release(handle);
        }
        return;
    }

    if let Err(e) = outcome.and_then(|()| advance(reactor, &camera, handle, request, continuation)) {
        fail(reactor, &camera, &e);
    }
}

/// Submit the step that follows `done`.
fn advance(
    reactor: &mut Reactor,
    camera: &CameraRef,
    handle: TransferHandle,
    finished: Request,
    done: Continuation,
) -> Result<()> {
    let (request, state, next) = match done {
        Continuation::DescribeDone(c) => {
            let control = c.borrow().setup_uri()?;
            (
                Request::new(RtspRequest::setup(&control), handler(&c)),
                SessionState::SettingUp,
                Continuation::SetupDone(c),
            )
        }
        Continuation::SetupDone(c) => {
            let control = c.borrow().setup_uri()?;
            (
                Request::new(RtspRequest::play(&control), handler(&c)),
                SessionState::Playing,
                Continuation::PlayDone(c),
            )
        }
        Continuation::PlayDone(c) => {
            let url = {
                let mut session = c.borrow_mut();
                session.set_state(SessionState::Receiving);
                session.prime_decoder();
                tracing::info!(camera = %session.name, "receiving");
                session.url.clone()
            };
            (
                Request::new(RtspRequest::receive(&url), handler(&c)),
                SessionState::Receiving,
                Continuation::InterleaveLoop(c),
            )
        }
        // Same request, same handler: keep reading frames.
        Continuation::InterleaveLoop(c) => (
            finished,
            SessionState::Receiving,
            Continuation::InterleaveLoop(c),
        ),
        Continuation::Command { .. } => return Ok(()),
    };

    camera.borrow_mut().set_state(state);
    reactor.engine_mut()?.submit(handle, request, next)
}

fn handler(camera: &CameraRef) -> Box<SessionHandler> {
    Box::new(SessionHandler::new(camera.clone()))
}

/// Drop the camera's transfer and schedule a restart after its retry
/// interval.
pub(crate) fn fail(reactor: &mut Reactor, camera: &CameraRef, error: &WallError) {
    let (transfer, endpoint, retry) = {
        let mut session = camera.borrow_mut();
        tracing::warn!(
            camera = %session.name,
            state = ?session.state,
            error = %error,
            retry_secs = session.retry_interval.as_secs_f64(),
            "camera session failed"
        );
        session.set_state(SessionState::Failed);
        session.depacketizer.reset();
        (session.transfer.take(), session.endpoint, session.retry_interval)
    };

    if let Some(transfer) = transfer
        && let Ok(engine) = reactor.engine_mut()
    {
        engine.release(transfer);
    }
    if let Some(endpoint) = endpoint {
        reactor.set_housekeeping_deadline(endpoint, Instant::now() + retry);
    }
}
