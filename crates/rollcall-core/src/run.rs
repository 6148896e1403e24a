//! The attendance run loop.
//!
//! A run pulls one frame per iteration, embeds every face in it, matches
//! each face, feeds the session tracker and writes known students to the
//! ledger. The loop polls a stop flag before each frame and ends quietly
//! when the frame source runs dry or fails.

use crate::ledger::{AttendanceLedger, LedgerError, RecordOutcome};
use crate::matcher::{Match, Matcher};
use crate::provider::{EmbedError, FaceEmbedder};
use crate::registry::is_image_file;
use crate::session::AttendanceSession;
use chrono::NaiveDateTime;
use image::RgbImage;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Provider(#[from] EmbedError),
}

/// A source of RGB frames: a webcam, a directory of stills, a test vector.
pub trait FrameSource {
    type Error: std::error::Error + 'static;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

/// Wall-clock source for attendance timestamps.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunEnd {
    /// The operator raised the stop flag.
    #[default]
    Stopped,
    /// The frame source had no more frames.
    Exhausted,
    /// The frame source returned an error.
    CaptureFailed,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Frames pulled from the source.
    pub frames: usize,
    /// Frames handed to the embedder (every `frame_stride`-th frame).
    pub processed: usize,
    pub faces: usize,
    pub unknown_faces: usize,
    pub newly_recorded: usize,
    pub already_recorded: usize,
    pub embed_failures: usize,
    pub ended_by: RunEnd,
}

/// Drives one attendance run.
pub struct AttendanceRun<'a, E: ?Sized, C = SystemClock> {
    embedder: &'a mut E,
    ledger: &'a AttendanceLedger,
    clock: C,
    frame_stride: usize,
}

impl<'a, E: FaceEmbedder + ?Sized> AttendanceRun<'a, E, SystemClock> {
    pub fn new(embedder: &'a mut E, ledger: &'a AttendanceLedger) -> Self {
        Self {
            embedder,
            ledger,
            clock: SystemClock,
            frame_stride: 1,
        }
    }
}

impl<'a, E: FaceEmbedder + ?Sized, C: Clock> AttendanceRun<'a, E, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> AttendanceRun<'a, E, C2> {
        AttendanceRun {
            embedder: self.embedder,
            ledger: self.ledger,
            clock,
            frame_stride: self.frame_stride,
        }
    }

    /// Only embed every `stride`-th frame. Zero is treated as one.
    pub fn frame_stride(mut self, stride: usize) -> Self {
        self.frame_stride = stride.max(1);
        self
    }

    /// Run until `stop` is raised or `source` ends.
    ///
    /// The session is restarted first. A frame the embedder cannot handle is
    /// skipped; only ledger I/O failure or an unavailable embedder aborts.
    pub fn run<M, S>(
        &mut self,
        session: &mut AttendanceSession<M>,
        source: &mut S,
        stop: &AtomicBool,
    ) -> Result<RunSummary, RunError>
    where
        M: Matcher,
        S: FrameSource + ?Sized,
    {
        session.start();
        let mut summary = RunSummary::default();

        summary.ended_by = loop {
            if stop.load(Ordering::Relaxed) {
                break RunEnd::Stopped;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break RunEnd::Exhausted,
                Err(e) => {
                    tracing::warn!(error = %e, "frame capture failed, ending run");
                    break RunEnd::CaptureFailed;
                }
            };
            summary.frames += 1;
            if (summary.frames - 1) % self.frame_stride != 0 {
                continue;
            }
            summary.processed += 1;

            let probes = match self.embedder.embed(&frame) {
                Ok(probes) => probes,
                Err(e @ EmbedError::Unavailable(_)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(frame = summary.frames, error = %e, "skipping frame");
                    summary.embed_failures += 1;
                    continue;
                }
            };

            let now = self.clock.now();
            for probe in &probes {
                summary.faces += 1;
                match session.observe(probe) {
                    Match::Known { identity, .. } => {
                        match self.ledger.record(&identity, now.date(), now.time())? {
                            RecordOutcome::Recorded => summary.newly_recorded += 1,
                            RecordOutcome::AlreadyRecorded => summary.already_recorded += 1,
                        }
                    }
                    Match::Unknown { .. } => summary.unknown_faces += 1,
                }
            }
        };

        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            present = session.present().len(),
            recorded = summary.newly_recorded,
            ended_by = ?summary.ended_by,
            "attendance run finished"
        );
        Ok(summary)
    }
}

enum Frames {
    Files(VecDeque<PathBuf>),
    Images(VecDeque<RgbImage>),
}

/// Replays still images as frames, in file-name order.
///
/// Files that fail to decode are skipped with a warning.
pub struct ImageSequence {
    frames: Frames,
}

impl ImageSequence {
    pub fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        tracing::info!(dir = %dir.display(), frames = files.len(), "replaying still frames");
        Ok(Self {
            frames: Frames::Files(files.into()),
        })
    }

    pub fn from_images(images: Vec<RgbImage>) -> Self {
        Self {
            frames: Frames::Images(images.into()),
        }
    }
}

impl FrameSource for ImageSequence {
    type Error = Infallible;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, Infallible> {
        match &mut self.frames {
            Frames::Images(images) => Ok(images.pop_front()),
            Frames::Files(files) => {
                while let Some(path) = files.pop_front() {
                    match image::open(&path) {
                        Ok(img) => return Ok(Some(img.to_rgb8())),
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame")
                        }
                    }
                }
                Ok(None)
            }
        }
    }
}
