use rollcall_core::report::DEFAULT_HISTORY_DAYS;
use std::path::PathBuf;
use std::str::FromStr;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of `name_regnum.{png,jpg,jpeg}` student photos.
    pub registry_dir: PathBuf,
    /// Attendance ledger CSV.
    pub ledger_path: PathBuf,
    /// Directory that receives one report CSV per attendance run.
    pub report_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Overrides the embedding provider's match tolerance.
    pub match_tolerance: Option<f32>,
    /// How far back `reports` looks, in days.
    pub history_days: i64,
    /// Embed every Nth captured frame.
    pub frame_stride: usize,
    /// Frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let path_or = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);

        Self {
            registry_dir: path_or("ROLLCALL_REGISTRY_DIR", data_dir.join("students")),
            ledger_path: path_or("ROLLCALL_LEDGER_PATH", data_dir.join("attendance.csv")),
            report_dir: path_or("ROLLCALL_REPORT_DIR", data_dir.join("reports")),
            model_dir: path_or("ROLLCALL_MODEL_DIR", data_dir.join("models")),
            camera_device: var("ROLLCALL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            match_tolerance: parsed(var("ROLLCALL_MATCH_TOLERANCE"))
                .filter(|t: &f32| t.is_finite() && *t >= 0.0),
            history_days: parsed(var("ROLLCALL_HISTORY_DAYS"))
                .filter(|d: &i64| *d > 0)
                .unwrap_or(DEFAULT_HISTORY_DAYS),
            frame_stride: parsed(var("ROLLCALL_FRAME_STRIDE"))
                .filter(|n: &usize| *n > 0)
                .unwrap_or(1),
            warmup_frames: parsed(var("ROLLCALL_WARMUP_FRAMES")).unwrap_or(4),
        }
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}
