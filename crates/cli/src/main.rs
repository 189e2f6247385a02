use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use videowall::{Plexer, Reactor, StreamRenderer, WallConfig};

const STDIN_FD: i32 = 0;

#[derive(Parser)]
#[command(
    name = "videowall",
    about = "Multi-camera RTSP/H.264 video wall"
)]
struct Args {
    /// Wall configuration (TOML)
    #[arg(long, short, default_value = "videowall.toml")]
    config: PathBuf,

    /// Log level for the video wall crates (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Write each camera's H.264 stream to <DIR>/<camera>.h264
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not read key commands from stdin
    #[arg(long)]
    no_keyboard: bool,
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("videowall={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("videowall=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Register stdin as an endpoint; every non-blank character typed is
/// queued as a key.
fn attach_keyboard(reactor: &mut Reactor, keys: Rc<RefCell<VecDeque<String>>>) -> videowall::Result<()> {
    let handle = reactor.register("keyboard")?;
    reactor.set_descriptor(handle, Some(STDIN_FD));
    reactor.set_read_callback(handle, move |reactor, me| {
        // At least the size of Stdin's internal buffer, so reads bypass it
        // and poll readiness stays accurate.
        let mut buf = [0u8; 8192];
        match io::stdin().read(&mut buf) {
            Ok(0) => {
                tracing::info!("stdin closed, keyboard disabled");
                reactor.set_descriptor(me, None);
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                keys.borrow_mut().extend(
                    text.chars()
                        .filter(|c| !c.is_whitespace())
                        .map(|c| c.to_string()),
                );
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed, keyboard disabled");
                reactor.set_descriptor(me, None);
            }
        }
    });
    Ok(())
}

fn run(args: Args) -> videowall::Result<()> {
    let mut config = WallConfig::from_file(&args.config)?;
    if args.output_dir.is_some() {
        config.renderer.output_dir = args.output_dir;
    }
    if let Some(dir) = &config.renderer.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    tracing::info!(
        config = %args.config.display(),
        cameras = config.cameras.len(),
        "loaded configuration"
    );

    let renderer = Rc::new(RefCell::new(StreamRenderer::new(
        config.renderer.buffers,
        config.renderer.buffer_size,
        config.renderer.output_dir.clone(),
    )));
    let mut plexer = Plexer::new(&config, renderer.clone())?;

    let keys = Rc::new(RefCell::new(VecDeque::new()));
    if !args.no_keyboard {
        attach_keyboard(plexer.reactor_mut(), keys.clone())?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = ctrlc::set_handler({
        let stop = stop.clone();
        move || {
            tracing::info!("received Ctrl+C, shutting down");
            stop.store(true, Ordering::SeqCst);
        }
    }) {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
    }

    plexer.start()?;
    while !stop.load(Ordering::SeqCst) && !plexer.is_quitting() {
        plexer.run_once();
        let pending: Vec<String> = keys.borrow_mut().drain(..).collect();
        for key in pending {
            plexer.handle_key(&key);
        }
    }

    drop(plexer);
    renderer.borrow_mut().shutdown();
    tracing::info!("video wall stopped");
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "video wall failed");
            ExitCode::FAILURE
        }
    }
}
