//! Wall configuration, loaded from TOML.
//!
//! ```toml
//! background = 0x000000
//! initial_view = 0
//!
//! [reactor]
//! retry_secs = 10
//!
//! [renderer]
//! output_dir = "/var/lib/videowall"
//!
//! [[camera]]
//! name = "gate"
//! url = "rtsp://10.0.0.5/live"
//! [camera.ptz.preset]
//! url = "http://10.0.0.5/cgi-bin/ptz.cgi?goto={preset}"
//!
//! [[view]]
//! name = "quad"
//! [[view.camera]]
//! camera = "gate"
//! x = 0.0
//! y = 0.0
//! width = 0.5
//! height = 0.5
//!
//! [[key]]
//! key = "g"
//! action = "ptz"
//! camera = "gate"
//! op = "preset"
//! preset = 1
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::control::{Action, KeyMap, PtzArgs, PtzTemplate};
use crate::error::{Result, WallError};
use crate::render::stream::{DEFAULT_BUFFERS, DEFAULT_BUFFER_SIZE};
use crate::render::{Placement, Rect};
use crate::wall::{CameraView, View};

#[derive(Debug, Clone, Deserialize)]
pub struct WallConfig {
    /// Wall background as `0xRRGGBB`; views may override it.
    #[serde(default)]
    pub background: u32,

    #[serde(default)]
    pub initial_view: usize,

    #[serde(default)]
    pub reactor: ReactorConfig,

    #[serde(default)]
    pub renderer: RendererConfig,

    #[serde(default, rename = "camera")]
    pub cameras: Vec<CameraConfig>,

    #[serde(default, rename = "view")]
    pub views: Vec<ViewConfig>,

    #[serde(default, rename = "key")]
    pub keys: Vec<KeyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactorConfig {
    /// Delay before a failed camera is reconnected.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    /// Longest single reactor wait.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_retry_secs() -> u64 {
    10
}

fn default_max_wait_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            retry_secs: default_retry_secs(),
            max_wait_ms: default_max_wait_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ReactorConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    /// Buffers in each camera's pool.
    #[serde(default = "default_buffers")]
    pub buffers: usize,

    /// Capacity of one buffer in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Directory for one `<camera>.h264` stream per camera.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_buffers() -> usize {
    DEFAULT_BUFFERS
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            buffers: default_buffers(),
            buffer_size: default_buffer_size(),
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub url: String,

    /// PTZ operations by name.
    #[serde(default)]
    pub ptz: BTreeMap<String, PtzConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PtzConfig {
    pub url: String,

    #[serde(default = "default_ptz_method")]
    pub method: String,

    #[serde(default)]
    pub body: Option<String>,
}

fn default_ptz_method() -> String {
    "GET".to_string()
}

impl PtzConfig {
    pub fn template(&self) -> Result<PtzTemplate> {
        PtzTemplate::new(&self.url, &self.method, self.body.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub background: Option<u32>,

    #[serde(default, rename = "camera")]
    pub cameras: Vec<ViewCameraConfig>,
}

/// One camera's placement in a view. Omitted coordinates take the
/// defaults; given ones are divided by `scale_x`/`scale_y` when set, so
/// a grid can be written in whole cells.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewCameraConfig {
    pub camera: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub scale_x: Option<f64>,
    pub scale_y: Option<f64>,

    #[serde(default = "default_alpha")]
    pub alpha: f64,

    #[serde(default = "default_layer")]
    pub layer: i32,

    #[serde(default)]
    pub fullscreen: bool,

    #[serde(default)]
    pub keep_aspect: bool,

    #[serde(default = "default_visible")]
    pub visible: bool,
}

const DEFAULT_POSITION: f64 = 0.25;
const DEFAULT_EXTENT: f64 = 0.10;

fn default_alpha() -> f64 {
    1.0
}

fn default_layer() -> i32 {
    1
}

fn default_visible() -> bool {
    true
}

fn scaled(value: Option<f64>, scale: Option<f64>, default: f64) -> f64 {
    match (value, scale) {
        (None, _) => default,
        (Some(v), Some(s)) if s != 0.0 => v / s,
        (Some(v), _) => v,
    }
}

impl ViewCameraConfig {
    pub fn to_view(&self) -> CameraView {
        CameraView {
            camera: self.camera.clone(),
            rect: Rect {
                x: scaled(self.x, self.scale_x, DEFAULT_POSITION),
                y: scaled(self.y, self.scale_y, DEFAULT_POSITION),
                width: scaled(self.width, self.scale_x, DEFAULT_EXTENT),
                height: scaled(self.height, self.scale_y, DEFAULT_EXTENT),
            },
            placement: Placement {
                keep_aspect: self.keep_aspect,
                layer: self.layer,
                alpha: self.alpha,
            },
            fullscreen: self.fullscreen,
            visible: self.visible,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    SetView,
    NextView,
    PrevView,
    Quit,
    Ptz,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    pub key: String,
    pub action: KeyAction,
    pub view: Option<usize>,
    pub camera: Option<String>,
    pub op: Option<String>,
    #[serde(default)]
    pub speed: i64,
    #[serde(default)]
    pub preset: i64,
    #[serde(default)]
    pub pan: i64,
    #[serde(default)]
    pub tilt: i64,
    #[serde(default)]
    pub zoom: i64,
}

impl KeyConfig {
    pub fn to_action(&self) -> Result<Action> {
        let missing = |field: &str| {
            WallError::Config(format!("key '{}': {:?} needs '{field}'", self.key, self.action))
        };
        Ok(match self.action {
            KeyAction::SetView => Action::SetView(self.view.ok_or_else(|| missing("view"))?),
            KeyAction::NextView => Action::NextView,
            KeyAction::PrevView => Action::PrevView,
            KeyAction::Quit => Action::Quit,
            KeyAction::Ptz => Action::Ptz {
                camera: self.camera.clone().ok_or_else(|| missing("camera"))?,
                op: self.op.clone().ok_or_else(|| missing("op"))?,
                args: PtzArgs {
                    speed: self.speed,
                    preset: self.preset,
                    pan: self.pan,
                    tilt: self.tilt,
                    zoom: self.zoom,
                },
            },
        })
    }
}

impl WallConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WallError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WallError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(WallError::Config("no cameras configured".into()));
        }
        let mut names = HashSet::new();
        for camera in &self.cameras {
            if !names.insert(camera.name.as_str()) {
                return Err(WallError::Config(format!(
                    "duplicate camera name '{}'",
                    camera.name
                )));
            }
            for ptz in camera.ptz.values() {
                ptz.template()?;
            }
        }
        for key in &self.keys {
            key.to_action()?;
        }
        Ok(())
    }

    /// Views with entries for unknown cameras dropped.
    pub fn views(&self) -> Vec<View> {
        self.views
            .iter()
            .enumerate()
            .map(|(index, view)| View {
                name: if view.name.is_empty() {
                    format!("view{index}")
                } else {
                    view.name.clone()
                },
                background: view.background,
                cameras: view
                    .cameras
                    .iter()
                    .filter(|entry| {
                        let known = self.cameras.iter().any(|c| c.name == entry.camera);
                        if !known {
                            tracing::warn!(view = index, camera = %entry.camera, "view references unknown camera, ignoring");
                        }
                        known
                    })
                    .map(ViewCameraConfig::to_view)
                    .collect(),
            })
            .collect()
    }

    /// Default bindings for the configured views, overridden by `[[key]]`.
    pub fn key_map(&self) -> Result<KeyMap> {
        let mut map = KeyMap::with_defaults(self.views.len());
        for key in &self.keys {
            map.bind(&key.key, key.to_action()?);
        }
        Ok(map)
    }
}
