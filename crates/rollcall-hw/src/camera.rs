//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

impl CameraError {
    /// True when the device itself cannot be opened, as opposed to a
    /// failure mid-capture.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::DeviceBusy(_))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// Packed 24-bit RGB, copied as is.
    Rgb3,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera and request `width`×`height`.
    ///
    /// The driver may negotiate a different size; the result is stored on
    /// the handle.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {msg}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or RGB3)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. Frames are pulled from the returned handle.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(FrameStream { camera: self, stream })
    }

    /// Capture continuously for `duration` and return the last frame.
    ///
    /// `on_frame` sees every frame as it arrives and may end the capture
    /// early with `ControlFlow::Break`.
    pub fn capture_for<F>(&self, duration: Duration, on_frame: F) -> Result<Frame, CameraError>
    where
        F: FnMut(&Frame) -> ControlFlow<()>,
    {
        let mut stream = self.stream()?;
        timed_capture(duration, || stream.next_frame(), on_frame)
    }

    fn buf_to_frame(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb3 => frame::rgb24_to_rgb(buf, self.width, self.height),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))?;

        Ok(Frame {
            image,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                })
            })
            .collect()
    }
}

/// Pull frames until `duration` has elapsed or `on_frame` breaks. At least
/// one frame is always taken.
fn timed_capture<N, F>(duration: Duration, mut next: N, mut on_frame: F) -> Result<Frame, CameraError>
where
    N: FnMut() -> Result<Frame, CameraError>,
    F: FnMut(&Frame) -> ControlFlow<()>,
{
    let start = Instant::now();
    let mut last = next()?;
    let mut flow = on_frame(&last);
    while flow.is_continue() && start.elapsed() < duration {
        last = next()?;
        flow = on_frame(&last);
    }
    tracing::debug!(
        seq = last.sequence,
        elapsed_ms = start.elapsed().as_millis() as u64,
        stopped_early = flow.is_break(),
        "timed capture done"
    );
    Ok(last)
}

/// Active capture stream. Dropping it stops streaming.
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    /// Block until the next frame is dequeued.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        self.camera.buf_to_frame(buf, sequence)
    }
}
