//! Decode/display seam.
//!
//! The ingest core only ever asks a [`Renderer`] for an empty
//! [`FrameBuffer`], fills it with Annex-B bytes and submits it. Layout calls
//! place each camera's target on the wall. Hardware pipelines implement the
//! trait; [`StreamRenderer`] is the portable reference implementation.

pub mod stream;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;

pub use stream::StreamRenderer;

/// A renderer shared by every camera session on the reactor thread.
pub type RendererRef = Rc<RefCell<dyn Renderer>>;

/// Index of a decode/display target, one per camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub usize);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target{}", self.0)
    }
}

/// Region of the wall in normalised coordinates (0.0..=1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// How a target is composited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub keep_aspect: bool,
    pub layer: i32,
    /// 0.0 transparent to 1.0 opaque.
    pub alpha: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            keep_aspect: false,
            layer: 1,
            alpha: 1.0,
        }
    }
}

/// The buffer was too small for the bytes written into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame buffer full ({capacity} bytes)")]
pub struct BufferFull {
    pub capacity: usize,
}

/// A capacity-bounded byte buffer lent out by a renderer's pool.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `bytes`, or leave the buffer untouched if they do not fit.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> std::result::Result<(), BufferFull> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(BufferFull {
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Decoder and compositor, driven from the reactor thread.
pub trait Renderer {
    /// Create a target for one camera.
    fn add_target(&mut self, name: &str) -> Result<TargetId>;

    /// Borrow an empty buffer, or `None` when the pool is exhausted.
    fn acquire_buffer(&mut self, target: TargetId) -> Option<FrameBuffer>;

    /// Hand a filled buffer to the decoder.
    fn submit_buffer(&mut self, target: TargetId, buffer: FrameBuffer, end_of_stream: bool);

    /// Return a buffer unused.
    fn release_buffer(&mut self, target: TargetId, buffer: FrameBuffer);

    fn set_visible(&mut self, target: TargetId, visible: bool);

    fn set_fullscreen(&mut self, target: TargetId, placement: Placement);

    fn set_rectangle(&mut self, target: TargetId, rect: Rect, placement: Placement);

    /// Wall background as `0xRRGGBB`.
    fn set_background(&mut self, colour: u32);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Renderer double that records everything it is asked to do.

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum LayoutCall {
        Visible(TargetId, bool),
        Fullscreen(TargetId, Placement),
        Rectangle(TargetId, Rect, Placement),
        Background(u32),
    }

    pub struct RecordingRenderer {
        pub targets: Vec<String>,
        pub submitted: Vec<(TargetId, Vec<u8>, bool)>,
        pub released: usize,
        pub layout: Vec<LayoutCall>,
        /// Buffers still available; `None` means unlimited.
        pub available: Option<usize>,
        pub buffer_size: usize,
    }

    impl Default for RecordingRenderer {
        fn default() -> Self {
            Self {
                targets: Vec::new(),
                submitted: Vec::new(),
                released: 0,
                layout: Vec::new(),
                available: None,
                buffer_size: 64 * 1024,
            }
        }
    }

    impl RecordingRenderer {
        /// Every submitted byte for `target`, concatenated.
        pub fn stream(&self, target: TargetId) -> Vec<u8> {
            self.submitted
                .iter()
                .filter(|(t, _, _)| *t == target)
                .flat_map(|(_, bytes, _)| bytes.iter().copied())
                .collect()
        }
    }

    impl Renderer for RecordingRenderer {
        fn add_target(&mut self, name: &str) -> Result<TargetId> {
            self.targets.push(name.to_string());
            Ok(TargetId(self.targets.len() - 1))
        }

        fn acquire_buffer(&mut self, _target: TargetId) -> Option<FrameBuffer> {
            match self.available.as_mut() {
                Some(0) => None,
                Some(n) => {
                    *n -= 1;
                    Some(FrameBuffer::with_capacity(self.buffer_size))
                }
                None => Some(FrameBuffer::with_capacity(self.buffer_size)),
            }
        }

        fn submit_buffer(&mut self, target: TargetId, buffer: FrameBuffer, end_of_stream: bool) {
            self.submitted
                .push((target, buffer.as_slice().to_vec(), end_of_stream));
        }

        fn release_buffer(&mut self, _target: TargetId, _buffer: FrameBuffer) {
            self.released += 1;
        }

        fn set_visible(&mut self, target: TargetId, visible: bool) {
            self.layout.push(LayoutCall::Visible(target, visible));
        }

        fn set_fullscreen(&mut self, target: TargetId, placement: Placement) {
            self.layout.push(LayoutCall::Fullscreen(target, placement));
        }

        fn set_rectangle(&mut self, target: TargetId, rect: Rect, placement: Placement) {
            self.layout.push(LayoutCall::Rectangle(target, rect, placement));
        }

        fn set_background(&mut self, colour: u32) {
            self.layout.push(LayoutCall::Background(colour));
        }
    }
}
