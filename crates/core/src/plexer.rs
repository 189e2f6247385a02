use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::WallConfig;
use crate::control::{Action, KeyMap, PtzArgs, PtzTemplate};
use crate::error::{Result, WallError};
use crate::reactor::Reactor;
use crate::render::RendererRef;
use crate::session::{CameraRef, CameraSession, Continuation};
use crate::transfer::{Request, TcpEngine, TransferEngine};
use crate::wall::Wall;

/// High-level video wall orchestrator.
///
/// Owns the reactor (with its transfer engine), one [`CameraSession`] per
/// configured camera, the view table and the operator's key bindings.
/// Everything runs on the calling thread inside [`run_once`](Self::run_once).
pub struct Plexer {
    reactor: Reactor,
    cameras: Vec<CameraRef>,
    renderer: RendererRef,
    wall: Wall,
    keymap: KeyMap,
    ptz: HashMap<(String, String), PtzTemplate>,
    max_wait: Duration,
    quit: bool,
}

impl Plexer {
    pub fn new(config: &WallConfig, renderer: RendererRef) -> Result<Self> {
        let engine = TcpEngine::new(
            config.reactor.connect_timeout(),
            config.reactor.request_timeout(),
        );
        Self::with_engine(config, renderer, Box::new(engine))
    }

    /// Build with a custom transfer engine.
    pub fn with_engine(
        config: &WallConfig,
        renderer: RendererRef,
        engine: Box<dyn TransferEngine>,
    ) -> Result<Self> {
        config.validate()?;

        let mut reactor = Reactor::new();
        reactor.attach_engine(engine);

        let mut cameras = Vec::with_capacity(config.cameras.len());
        let mut targets = Vec::with_capacity(config.cameras.len());
        let mut ptz = HashMap::new();
        for camera in &config.cameras {
            let target = renderer.borrow_mut().add_target(&camera.name)?;
            targets.push((camera.name.clone(), target));
            for (op, template) in &camera.ptz {
                ptz.insert((camera.name.clone(), op.clone()), template.template()?);
            }
            cameras.push(
                CameraSession::new(&camera.name, &camera.url, renderer.clone(), target)
                    .with_retry_interval(config.reactor.retry_interval())
                    .into_shared(),
            );
        }

        let mut plexer = Self {
            reactor,
            cameras,
            renderer,
            wall: Wall::new(config.views(), targets, config.background),
            keymap: config.key_map()?,
            ptz,
            max_wait: config.reactor.max_wait(),
            quit: false,
        };

        if !plexer.wall.is_empty() {
            let initial = config.initial_view.min(plexer.wall.len() - 1);
            plexer.dispatch(&Action::SetView(initial))?;
        } else {
            plexer.renderer.borrow_mut().set_background(config.background);
        }

        tracing::info!(
            cameras = plexer.cameras.len(),
            views = plexer.wall.len(),
            keys = plexer.keymap.len(),
            "video wall configured"
        );
        Ok(plexer)
    }

    /// Register every camera with the reactor; connections start on the
    /// next iteration.
    pub fn start(&mut self) -> Result<()> {
        for camera in &self.cameras {
            CameraSession::attach(camera, &mut self.reactor)?;
        }
        Ok(())
    }

    /// One reactor iteration.
    pub fn run_once(&mut self) -> usize {
        self.reactor.run_once(self.max_wait)
    }

    /// Run until `stop` is set or a [`Action::Quit`] is dispatched.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) && !self.quit {
            self.run_once();
        }
        tracing::info!("video wall stopping");
    }

    /// Dispatch the action bound to `key`. Returns whether `key` was bound.
    pub fn handle_key(&mut self, key: &str) -> bool {
        let Some(action) = self.keymap.lookup(key).cloned() else {
            tracing::debug!(key, "unbound key");
            return false;
        };
        if let Err(e) = self.dispatch(&action) {
            tracing::warn!(key, ?action, error = %e, "action failed");
        }
        true
    }

    pub fn dispatch(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::SetView(index) => self.wall.apply(*index, &mut *self.renderer.borrow_mut()),
            Action::NextView => self.wall.next(&mut *self.renderer.borrow_mut()),
            Action::PrevView => self.wall.prev(&mut *self.renderer.borrow_mut()),
            Action::Quit => {
                self.quit = true;
                Ok(())
            }
            Action::Ptz { camera, op, args } => self.send_ptz(camera, op, args),
        }
    }

    /// Submit a one-shot PTZ request; its completion is only logged.
    fn send_ptz(&mut self, camera: &str, op: &str, args: &PtzArgs) -> Result<()> {
        let Some(template) = self.ptz.get(&(camera.to_string(), op.to_string())) else {
            if self.camera(camera).is_none() {
                return Err(WallError::UnknownCamera(camera.to_string()));
            }
            return Err(WallError::Config(format!("camera '{camera}' has no PTZ operation '{op}'")));
        };

        let request = Request::discarding(template.expand(args));
        tracing::debug!(camera, op, uri = %request.message.uri, "sending PTZ command");

        let engine = self.reactor.engine_mut()?;
        let handle = engine.create();
        let label = format!("{camera}/{op}");
        if let Err(e) = engine.submit(handle, request, Continuation::Command { label }) {
            engine.release(handle);
            return Err(e);
        }
        Ok(())
    }

    pub fn cameras(&self) -> &[CameraRef] {
        &self.cameras
    }

    pub fn camera(&self, name: &str) -> Option<&CameraRef> {
        self.cameras.iter().find(|c| c.borrow().name() == name)
    }

    pub fn wall(&self) -> &Wall {
        &self.wall
    }

    /// The reactor, for registering extra endpoints such as a keyboard.
    pub fn reactor_mut(&mut self) -> &mut Reactor {
        &mut self.reactor
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }
}
