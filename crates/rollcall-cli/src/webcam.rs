use image::RgbImage;
use rollcall_core::FrameSource;
use rollcall_hw::{Camera, CameraError};

/// Live webcam frames for an attendance run.
pub struct Webcam {
    camera: Camera,
}

impl Webcam {
    /// Open `device` and discard `warmup_frames` while exposure settles.
    pub fn open(device: &str, warmup_frames: usize) -> Result<Self, CameraError> {
        let camera = Camera::open(device)?;
        tracing::info!(
            device,
            width = camera.width,
            height = camera.height,
            format = ?camera.pixel_format(),
            "camera opened"
        );

        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            for _ in 0..warmup_frames {
                if let Err(e) = camera.capture_rgb() {
                    tracing::debug!(error = %e, "warmup capture failed");
                }
            }
        }
        Ok(Self { camera })
    }
}

impl FrameSource for Webcam {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, CameraError> {
        self.camera.capture_rgb().map(Some)
    }
}
