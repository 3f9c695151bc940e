//! Glue between the camera, the preview surface and the core session.

use anyhow::{Context, Result};
use image::ImageFormat;
use rollcall_core::persist;
use rollcall_core::session::{FrameSource, Presenter, QuitSignal};
use rollcall_hw::{Camera, CameraError, FrameStream};
use std::io::{BufRead, Cursor, Write};
use std::path::PathBuf;

/// Camera stream as a session frame source.
pub struct CameraFeed<'a>(pub FrameStream<'a>);

impl FrameSource for CameraFeed<'_> {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<Option<image::RgbImage>, CameraError> {
        self.0.next_frame().map(|f| Some(f.into_image()))
    }
}

/// Writes the latest annotated frame to an image file.
///
/// The file is replaced by rename so viewers that poll it never read a
/// half-written image. It is not fsynced; a lost frame is harmless.
pub struct PreviewFile {
    path: PathBuf,
    format: ImageFormat,
    buf: Vec<u8>,
}

impl PreviewFile {
    pub fn new(path: PathBuf) -> Result<Self> {
        let format = ImageFormat::from_path(&path)
            .with_context(|| format!("cannot infer image format from {}", path.display()))?;
        Ok(Self {
            path,
            format,
            buf: Vec::new(),
        })
    }
}

impl Presenter for PreviewFile {
    fn present(&mut self, frame: &image::RgbImage) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.buf.clear();
        frame.write_to(&mut Cursor::new(&mut self.buf), self.format)?;
        persist::write_replace(&self.path, |w| w.write_all(&self.buf))?;
        Ok(())
    }
}

/// Open the camera, listing alternatives when the device is missing.
pub fn open_camera(device: &str, width: u32, height: u32) -> Result<Camera> {
    Camera::open(device, width, height).map_err(|e| {
        if e.is_unavailable() {
            let found = Camera::list_devices();
            if found.is_empty() {
                tracing::warn!("no V4L2 capture devices found");
            }
            for d in &found {
                tracing::info!(path = %d.path, name = %d.name, driver = %d.driver, "available capture device");
            }
        }
        anyhow::Error::new(e).context(format!("camera {device} unavailable"))
    })
}

/// Trigger `quit` when the operator types `q` on stdin.
pub fn watch_stdin(quit: QuitSignal) {
    let spawned = std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                        tracing::info!("quit requested from keyboard");
                        quit.trigger();
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not watch stdin; use Ctrl-C to stop");
    }
}
