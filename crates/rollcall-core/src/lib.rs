//! rollcall-core — face registry, matching and attendance bookkeeping.
//!
//! The embedding model is not part of this crate: it is consumed through
//! the [`FaceEmbedder`] and [`DistanceMetric`] traits so that any provider
//! (ONNX, dlib, a test fake) can drive the registry and the matcher.

pub mod identity;
pub mod ledger;
pub mod matcher;
pub mod provider;
pub mod registry;
pub mod report;
pub mod roster;
pub mod run;
pub mod session;
pub mod types;

pub use identity::{Identity, IdentityError};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, RecordOutcome};
pub use matcher::{Match, Matcher, NearestMatcher};
pub use provider::{DistanceMetric, EmbedError, Euclidean, FaceEmbedder};
pub use registry::{Registry, RegistryBuild, RegistryError, SkipReason, SkippedImage};
pub use report::{ReportError, ReportRow, ReportSummary, SessionReport, Status};
pub use roster::{Roster, RosterError, RosterRow};
pub use run::{
    AttendanceRun, Clock, FixedClock, FrameSource, ImageSequence, RunEnd, RunError, RunSummary,
    SystemClock,
};
pub use session::{AttendanceSession, SessionTracker};
pub use types::Embedding;
