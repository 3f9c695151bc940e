//! rollcall-hw — Camera capture for the attendance tool.
//!
//! Provides V4L2-based camera access producing RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::Frame;
