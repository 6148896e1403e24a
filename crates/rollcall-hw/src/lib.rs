//! rollcall-hw — webcam capture.
//!
//! Opens a V4L2 device, negotiates a pixel format it can decode and hands
//! out RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
