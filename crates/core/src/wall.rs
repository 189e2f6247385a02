//! Views: named layouts of the cameras on the wall.
//!
//! A view lists where each camera appears. Applying one sets the
//! background and then, for every camera target, exactly one of
//! hide / fullscreen / rectangle. A camera the view does not mention is
//! hidden.

use crate::error::{Result, WallError};
use crate::render::{Placement, Rect, Renderer, TargetId};

/// Placement of one camera within a view.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    pub camera: String,
    pub rect: Rect,
    pub placement: Placement,
    pub fullscreen: bool,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct View {
    pub name: String,
    /// Overrides the wall background while this view is shown.
    pub background: Option<u32>,
    pub cameras: Vec<CameraView>,
}

impl View {
    fn placement_of(&self, camera: &str) -> Option<&CameraView> {
        self.cameras.iter().find(|v| v.camera == camera)
    }
}

/// The view table and which view is on screen.
#[derive(Debug, Clone)]
pub struct Wall {
    views: Vec<View>,
    targets: Vec<(String, TargetId)>,
    background: u32,
    current: Option<usize>,
}

impl Wall {
    /// `targets` pairs each camera name with its renderer target.
    pub fn new(views: Vec<View>, targets: Vec<(String, TargetId)>, background: u32) -> Self {
        Self {
            views,
            targets,
            background,
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Index of the view last applied.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn apply(&mut self, index: usize, renderer: &mut dyn Renderer) -> Result<()> {
        let view = self
            .views
            .get(index)
            .ok_or_else(|| WallError::Config(format!("no view {index} ({} defined)", self.views.len())))?;

        tracing::info!(view = index, name = %view.name, "applying view");
        renderer.set_background(view.background.unwrap_or(self.background));

        for (camera, target) in &self.targets {
            match view.placement_of(camera) {
                Some(v) if !v.visible => renderer.set_visible(*target, false),
                None => renderer.set_visible(*target, false),
                Some(v) if v.fullscreen => renderer.set_fullscreen(*target, v.placement),
                Some(v) => renderer.set_rectangle(*target, v.rect, v.placement),
            }
        }

        self.current = Some(index);
        Ok(())
    }

    /// Apply the view after the current one, wrapping around.
    pub fn next(&mut self, renderer: &mut dyn Renderer) -> Result<()> {
        if self.views.is_empty() {
            return Ok(());
        }
        let index = self.current.map_or(0, |i| (i + 1) % self.views.len());
        self.apply(index, renderer)
    }

    pub fn prev(&mut self, renderer: &mut dyn Renderer) -> Result<()> {
        if self.views.is_empty() {
            return Ok(());
        }
        let len = self.views.len();
        let index = self.current.map_or(len - 1, |i| (i + len - 1) % len);
        self.apply(index, renderer)
    }
}
