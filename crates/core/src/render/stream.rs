use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::{FrameBuffer, Placement, Rect, Renderer, TargetId};
use crate::error::{Result, WallError};

pub const DEFAULT_BUFFERS: usize = 8;
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Where a target's elementary stream ends up.
pub type Sink = Box<dyn Write + Send>;

struct Job {
    buffer: FrameBuffer,
    end_of_stream: bool,
}

/// Last layout applied to a target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetLayout {
    pub visible: bool,
    pub fullscreen: Option<Placement>,
    pub rectangle: Option<(Rect, Placement)>,
}

struct Target {
    name: String,
    pool: Arc<Mutex<Vec<FrameBuffer>>>,
    jobs: Option<flume::Sender<Job>>,
    writer: Option<JoinHandle<()>>,
    layout: TargetLayout,
}

/// Reference [`Renderer`] that writes each camera's Annex-B stream to a
/// sink instead of decoding it.
///
/// Every target owns a fixed pool of buffers. Submitted buffers travel over
/// a bounded channel to a per-target writer thread, which appends them to
/// the sink and hands them back to the pool. With an `output_dir`, the sink
/// is `<output_dir>/<camera>.h264`, playable with any H.264 tool;
/// otherwise frames are discarded.
pub struct StreamRenderer {
    targets: Vec<Target>,
    buffers: usize,
    buffer_size: usize,
    output_dir: Option<PathBuf>,
    background: u32,
}

impl Default for StreamRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFERS, DEFAULT_BUFFER_SIZE, None)
    }
}

impl StreamRenderer {
    pub fn new(buffers: usize, buffer_size: usize, output_dir: Option<PathBuf>) -> Self {
        Self {
            targets: Vec::new(),
            buffers: buffers.max(1),
            buffer_size,
            output_dir,
            background: 0,
        }
    }

    /// Add a target writing to `sink` (`None` discards).
    pub fn add_sink_target(&mut self, name: &str, sink: Option<Sink>) -> Result<TargetId> {
        let pool: Vec<FrameBuffer> = (0..self.buffers)
            .map(|_| FrameBuffer::with_capacity(self.buffer_size))
            .collect();
        let pool = Arc::new(Mutex::new(pool));
        let (tx, rx) = flume::bounded(self.buffers);

        let writer = {
            let pool = pool.clone();
            let camera = name.to_string();
            thread::Builder::new()
                .name(format!("render-{name}"))
                .spawn(move || write_frames(&camera, rx, pool, sink))?
        };

        self.targets.push(Target {
            name: name.to_string(),
            pool,
            jobs: Some(tx),
            writer: Some(writer),
            layout: TargetLayout::default(),
        });
        let id = TargetId(self.targets.len() - 1);
        tracing::debug!(camera = name, %id, buffers = self.buffers, "render target added");
        Ok(id)
    }

    pub fn layout(&self, target: TargetId) -> Option<&TargetLayout> {
        self.targets.get(target.0).map(|t| &t.layout)
    }

    pub fn background(&self) -> u32 {
        self.background
    }

    /// Buffers currently in a target's pool.
    pub fn available(&self, target: TargetId) -> usize {
        self.targets
            .get(target.0)
            .map_or(0, |t| t.pool.lock().len())
    }

    /// Stop every writer thread after it has drained its queue.
    pub fn shutdown(&mut self) {
        for target in &mut self.targets {
            target.jobs = None;
            if let Some(writer) = target.writer.take()
                && writer.join().is_err()
            {
                tracing::warn!(camera = %target.name, "render writer panicked");
            }
        }
    }
}

impl Drop for StreamRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_frames(
    camera: &str,
    jobs: flume::Receiver<Job>,
    pool: Arc<Mutex<Vec<FrameBuffer>>>,
    mut sink: Option<Sink>,
) {
    let mut written = 0u64;

    for Job {
        mut buffer,
        end_of_stream,
    } in jobs.iter()
    {
        let failed = match sink.as_mut() {
            Some(out) => out.write_all(buffer.as_slice()).err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!(camera, error = %e, "stream sink failed, discarding frames");
            sink = None;
        }
        written += buffer.len() as u64;

        if end_of_stream && let Some(out) = sink.as_mut() {
            let _ = out.flush();
        }

        buffer.clear();
        pool.lock().push(buffer);
    }

    if let Some(out) = sink.as_mut() {
        let _ = out.flush();
    }
    tracing::debug!(camera, written, "render writer finished");
}

/// File name for a camera: anything outside `[A-Za-z0-9-_]` becomes `_`.
fn stream_file_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{stem}.h264")
}

impl Renderer for StreamRenderer {
    fn add_target(&mut self, name: &str) -> Result<TargetId> {
        let sink: Option<Sink> = match &self.output_dir {
            Some(dir) => {
                let file_name = stream_file_name(name);
                if let Some(other) = self
                    .targets
                    .iter()
                    .find(|t| stream_file_name(&t.name) == file_name)
                {
                    return Err(WallError::Config(format!(
                        "cameras {:?} and {name:?} would both write {file_name}",
                        other.name
                    )));
                }
                let file = File::create(dir.join(file_name))?;
                Some(Box::new(BufWriter::new(file)))
            }
            None => None,
        };
        self.add_sink_target(name, sink)
    }

    fn acquire_buffer(&mut self, target: TargetId) -> Option<FrameBuffer> {
        self.targets.get(target.0)?.pool.lock().pop()
    }

    fn submit_buffer(&mut self, target: TargetId, buffer: FrameBuffer, end_of_stream: bool) {
        let Some(t) = self.targets.get_mut(target.0) else {
            return;
        };
        let job = Job {
            buffer,
            end_of_stream,
        };
        let Some(jobs) = t.jobs.as_ref() else {
            t.pool.lock().push(job.buffer);
            return;
        };
        if let Err(e) = jobs.try_send(job) {
            tracing::warn!(camera = %t.name, "render writer unavailable, frame dropped");
            let mut buffer = e.into_inner().buffer;
            buffer.clear();
            t.pool.lock().push(buffer);
        }
    }

    fn release_buffer(&mut self, target: TargetId, mut buffer: FrameBuffer) {
        if let Some(t) = self.targets.get(target.0) {
            buffer.clear();
            t.pool.lock().push(buffer);
        }
    }

    fn set_visible(&mut self, target: TargetId, visible: bool) {
        if let Some(t) = self.targets.get_mut(target.0) {
            tracing::debug!(camera = %t.name, visible, "set visible");
            t.layout.visible = visible;
        }
    }

    fn set_fullscreen(&mut self, target: TargetId, placement: Placement) {
        if let Some(t) = self.targets.get_mut(target.0) {
            tracing::debug!(camera = %t.name, layer = placement.layer, "set fullscreen");
            t.layout.visible = true;
            t.layout.fullscreen = Some(placement);
            t.layout.rectangle = None;
        }
    }

    fn set_rectangle(&mut self, target: TargetId, rect: Rect, placement: Placement) {
        if let Some(t) = self.targets.get_mut(target.0) {
            tracing::debug!(
                camera = %t.name,
                x = rect.x,
                y = rect.y,
                width = rect.width,
                height = rect.height,
                "set rectangle"
            );
            t.layout.visible = true;
            t.layout.fullscreen = None;
            t.layout.rectangle = Some((rect, placement));
        }
    }

    fn set_background(&mut self, colour: u32) {
        tracing::debug!(colour = %format!("{colour:06x}"), "set background");
        self.background = colour;
    }
}
