//! Event-driven ingest core for a multi-camera video wall.
//!
//! Each camera is an RTSP/1.0 session carried over one TCP connection with
//! RTP interleaved on it. A single-threaded [`Reactor`] multiplexes every
//! camera's socket, the operator's input and the per-camera retry timers;
//! the [`H264Depacketizer`] turns received RTP into Annex-B NAL units for a
//! [`Renderer`].
//!
//! [`Plexer`] wires it all together from a [`WallConfig`].

pub mod config;
pub mod control;
pub mod error;
pub mod media;
pub mod plexer;
pub mod protocol;
pub mod reactor;
pub mod render;
pub mod session;
pub mod transfer;
pub mod wall;

pub use config::WallConfig;
pub use control::{Action, KeyMap, PtzArgs, PtzTemplate};
pub use error::{Result, WallError};
pub use media::H264Depacketizer;
pub use plexer::Plexer;
pub use reactor::{EndpointHandle, Reactor};
pub use render::{Renderer, RendererRef, StreamRenderer, TargetId};
pub use session::{CameraRef, CameraSession, SessionState};
pub use transfer::{TcpEngine, TransferEngine};
pub use wall::{View, Wall};
