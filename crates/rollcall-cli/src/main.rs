use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rollcall_core::registry::{register_image, registered_identities, store_image_file};
use rollcall_core::report::list_reports;
use rollcall_core::{
    AttendanceLedger, AttendanceRecord, AttendanceRun, AttendanceSession, Clock, DistanceMetric,
    Euclidean, Identity, ImageSequence, NearestMatcher, Registry, RegistryBuild, Roster,
    RosterError, RunSummary, SessionReport, SkippedImage, SystemClock,
};
use rollcall_hw::Camera;
use rollcall_vision::OnnxEmbedder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod webcam;

use config::Config;
use webcam::Webcam;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student photo
    Register {
        /// Student name
        #[arg(short, long)]
        name: String,
        /// Register number (must not contain '_')
        #[arg(short, long)]
        reg: String,
        /// Photo showing the student's face
        image: PathBuf,
    },
    /// Copy the photos listed in a CSV roster into the registry
    Import {
        /// CSV with columns Name, Register Number, Image Filename
        #[arg(long)]
        roster: PathBuf,
        /// Folder the roster's image file names are relative to
        #[arg(long)]
        images: PathBuf,
    },
    /// Take attendance until Ctrl-C (or until the frames run out)
    Take(TakeArgs),
    /// Show who attended on a date
    History {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List recent session reports
    Reports {
        /// Look back this many days (default: ROLLCALL_HISTORY_DAYS)
        #[arg(long)]
        days: Option<i64>,
    },
    /// List registered students
    List,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct TakeArgs {
    /// Replay still images from a directory instead of the webcam
    #[arg(long)]
    frames: Option<PathBuf>,
    /// Build the registry from a CSV roster instead of the registry directory
    #[arg(long, requires = "images")]
    roster: Option<PathBuf>,
    /// Image folder for --roster
    #[arg(long, requires = "roster")]
    images: Option<PathBuf>,
    /// Do not write a session report
    #[arg(long)]
    no_report: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Register { name, reg, image } => register(&config, &name, &reg, &image)?,
        Commands::Import { roster, images } => import(&config, &roster, &images)?,
        Commands::Take(args) => take(config, args).await?,
        Commands::History { date, json } => history(&config, date, json)?,
        Commands::Reports { days } => reports(&config, days)?,
        Commands::List => list(&config)?,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
        }
    }

    Ok(())
}

fn register(config: &Config, name: &str, reg: &str, image: &Path) -> Result<()> {
    let identity = Identity::new(name, reg)?;
    let photo = image::open(image)
        .with_context(|| format!("cannot read {}", image.display()))?
        .to_rgb8();
    let path = register_image(&config.registry_dir, &identity, &photo)?;
    println!("Registered {} ({}) -> {}", identity.name(), identity.register_number(), path.display());
    Ok(())
}

fn import(config: &Config, roster_path: &Path, images: &Path) -> Result<()> {
    let roster = load_roster(roster_path)?;

    let mut stored = 0;
    let mut missing = 0;
    for row in roster.rows() {
        let source = images.join(&row.image_filename);
        if !source.is_file() {
            println!("  skipped {}: image file not found", source.display());
            missing += 1;
            continue;
        }
        store_image_file(&config.registry_dir, &row.identity, &source)?;
        stored += 1;
    }

    println!(
        "Imported {stored} of {} student(s) into {}{}",
        roster.len(),
        config.registry_dir.display(),
        if missing > 0 { format!(", {missing} missing") } else { String::new() }
    );
    Ok(())
}

/// Load a roster, printing every invalid row before failing.
fn load_roster(path: &Path) -> Result<Roster> {
    match Roster::load(path) {
        Ok(roster) => Ok(roster),
        Err(RosterError::InvalidRows(rows)) => {
            for row in &rows {
                println!("  {}: {row}", path.display());
            }
            bail!("{} has {} invalid row(s)", path.display(), rows.len())
        }
        Err(e) => Err(e).with_context(|| format!("cannot load roster {}", path.display())),
    }
}

async fn take(config: Config, args: TakeArgs) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stop requested");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    println!("Taking attendance, press Ctrl-C to stop");
    tokio::task::spawn_blocking(move || take_attendance(&config, &args, &stop)).await?
}

/// The capture loop itself; blocking, runs off the async runtime.
fn take_attendance(config: &Config, args: &TakeArgs, stop: &AtomicBool) -> Result<()> {
    let mut embedder = OnnxEmbedder::load(&config.model_dir)?;
    if let Some(tolerance) = config.match_tolerance {
        embedder = embedder.with_tolerance(tolerance);
    }

    let build = match (&args.roster, &args.images) {
        (Some(roster), Some(images)) => {
            Registry::from_roster(&load_roster(roster)?, images, &mut embedder)?
        }
        _ => Registry::from_directory(&config.registry_dir, &mut embedder)?,
    };
    let RegistryBuild { registry, skipped } = build;
    print_skipped(&skipped);
    if registry.is_empty() {
        bail!("no students registered; add photos with `rollcall register` or `rollcall import`");
    }
    println!("{} student(s) registered", registry.len());

    let matcher = NearestMatcher::new(Euclidean {
        tolerance: embedder.tolerance(),
    });
    let mut session = AttendanceSession::new(registry, matcher);
    let ledger = AttendanceLedger::open(&config.ledger_path)?;

    let mut run = AttendanceRun::new(&mut embedder, &ledger).frame_stride(config.frame_stride);
    let summary = match &args.frames {
        Some(dir) => {
            let mut frames = ImageSequence::from_dir(dir)
                .with_context(|| format!("cannot read frames from {}", dir.display()))?;
            run.run(&mut session, &mut frames, stop)?
        }
        None => {
            let mut camera = Webcam::open(&config.camera_device, config.warmup_frames)?;
            run.run(&mut session, &mut camera, stop)?
        }
    };
    print_summary(&summary, &session);

    if !args.no_report {
        let report = SessionReport::build(
            session.registry().identities(),
            session.present(),
            SystemClock.now(),
        );
        let path = report.write_to(&config.report_dir)?;
        let s = report.summary();
        println!(
            "Report: {} ({} present, {} absent of {})",
            path.display(),
            s.present,
            s.absent,
            s.total
        );
    }
    Ok(())
}

fn print_skipped(skipped: &[SkippedImage]) {
    for s in skipped {
        println!("  skipped {}: {}", s.source, s.reason);
    }
}

fn print_summary(summary: &RunSummary, session: &AttendanceSession<NearestMatcher<Euclidean>>) {
    println!(
        "Run ended ({:?}): {} frame(s), {} face(s), {} unknown, {} newly recorded, {} already recorded",
        summary.ended_by,
        summary.frames,
        summary.faces,
        summary.unknown_faces,
        summary.newly_recorded,
        summary.already_recorded,
    );
    if summary.embed_failures > 0 {
        println!("{} frame(s) could not be processed", summary.embed_failures);
    }

    let mut present: Vec<_> = session.present().iter().collect();
    present.sort();
    for identity in present {
        println!("  present  {}  {}", identity.register_number(), identity.name());
    }
    for identity in session.absent() {
        println!("  absent   {}  {}", identity.register_number(), identity.name());
    }
}

#[derive(Serialize)]
struct History<'a> {
    date: NaiveDate,
    present: &'a [AttendanceRecord],
    absent: Vec<Identity>,
}

fn history(config: &Config, date: Option<NaiveDate>, json: bool) -> Result<()> {
    let date = date.unwrap_or_else(|| SystemClock.now().date());
    let ledger = if config.ledger_path.exists() {
        AttendanceLedger::open(&config.ledger_path)?
    } else {
        AttendanceLedger::in_memory()
    };
    let registered = if config.registry_dir.is_dir() {
        registered_identities(&config.registry_dir)?
    } else {
        Default::default()
    };

    let present = ledger.query(date);
    let absent = ledger.absent(date, &registered);

    if json {
        let out = History {
            date,
            present: &present,
            absent: absent.into_iter().collect(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Attendance for {date}: {} present, {} absent", present.len(), absent.len());
    for record in &present {
        println!(
            "  present  {}  {}  {}",
            record.time,
            record.identity.register_number(),
            record.identity.name()
        );
    }
    for identity in &absent {
        println!("  absent             {}  {}", identity.register_number(), identity.name());
    }
    Ok(())
}

fn reports(config: &Config, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(config.history_days);
    let window = chrono::Duration::try_days(days).context("--days is out of range")?;
    let reports = list_reports(&config.report_dir, SystemClock.now(), window)?;

    if reports.is_empty() {
        println!("No reports in the last {days} day(s)");
        return Ok(());
    }
    for (stamp, path) in reports {
        match SessionReport::load(&path) {
            Ok(report) => {
                let s = report.summary();
                println!("{stamp}  {}/{} present  {}", s.present, s.total, path.display());
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable report");
                println!("{stamp}  (unreadable)  {}", path.display());
            }
        }
    }
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    if !config.registry_dir.is_dir() {
        println!("No students registered");
        return Ok(());
    }
    let identities = registered_identities(&config.registry_dir)?;
    if identities.is_empty() {
        println!("No students registered");
    }
    for identity in &identities {
        println!("{:<14} {}", identity.register_number(), identity.name());
    }
    Ok(())
}
