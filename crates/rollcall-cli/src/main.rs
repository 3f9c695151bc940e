use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::enroll::{self, EnrollError};
use rollcall_core::session::Presenter;
use rollcall_core::{
    AttendanceLedger, EncodingStore, EuclideanMatcher, OnnxBackend, QuitSignal, Session, SessionOptions,
};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod live;
mod report;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance from a webcam")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a photo from the camera and enroll the face in it
    Enroll {
        /// Identity name
        name: String,
        /// Enroll from an existing image instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Write each captured frame to this image file
        #[arg(long, conflicts_with = "image")]
        preview: Option<PathBuf>,
    },
    /// Remove an enrolled identity
    Remove {
        name: String,
    },
    /// List enrolled identities
    List,
    /// Recognize faces live and record today's attendance on exit
    Run {
        /// Write the latest annotated frame to this image file
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Print the attendance sheet
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { name, image, preview } => enroll_identity(&config, &name, image, preview).await,
        Commands::Remove { name } => remove_identity(&config, &name),
        Commands::List => list_identities(&config),
        Commands::Run { preview } => run_session(config, preview).await,
        Commands::Report => report(&config),
    }
}

async fn enroll_identity(config: &Config, name: &str, image: Option<PathBuf>, preview: Option<PathBuf>) -> Result<()> {
    enroll::validate_name(name)?;
    // Open the store first so a corrupt store aborts before any capture.
    let mut store = EncodingStore::open(&config.store_path)?;
    let mut backend = OnnxBackend::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let photo = match image {
        Some(path) => path,
        None => {
            let config = config.clone();
            let name = name.to_string();
            tokio::task::spawn_blocking(move || capture_photo(&config, &name, preview)).await??
        }
    };

    match enroll::enroll_file(&mut store, &mut backend, name, &photo) {
        Ok(_) => {
            println!("Face encoding for {name} added ({} enrolled).", store.len());
            Ok(())
        }
        Err(EnrollError::NoFaceFound) => {
            println!("No face found in {}. Please try again.", photo.display());
            Err(EnrollError::NoFaceFound.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Record from the camera for the configured duration and save the last
/// frame as `<photos_dir>/<name>.jpg`. Typing `q` ends the capture early.
fn capture_photo(config: &Config, name: &str, preview: Option<PathBuf>) -> Result<PathBuf> {
    let camera = live::open_camera(&config.camera_device, config.capture_width, config.capture_height)?;
    let mut preview = preview.map(live::PreviewFile::new).transpose()?;
    let quit = QuitSignal::new();
    live::watch_stdin(quit.clone());

    println!(
        "Capturing face for {name}. Please look at the camera for {} seconds (q + Enter to stop).",
        config.enroll_capture_secs
    );
    let frame = camera.capture_for(Duration::from_secs(config.enroll_capture_secs), |frame| {
        if let Some(preview) = preview.as_mut() {
            if let Err(e) = preview.present(&frame.image) {
                tracing::warn!(error = %e, "preview write failed");
            }
        }
        if quit.is_triggered() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    drop(camera);

    std::fs::create_dir_all(&config.photos_dir)
        .with_context(|| format!("creating {}", config.photos_dir.display()))?;
    let path = config.photos_dir.join(format!("{name}.jpg"));
    frame
        .image
        .save(&path)
        .with_context(|| format!("saving {}", path.display()))?;
    println!("Face captured and saved as {}", path.display());
    Ok(path)
}

fn remove_identity(config: &Config, name: &str) -> Result<()> {
    let mut store = EncodingStore::open(&config.store_path)?;
    if store.remove(name)? {
        println!("Face encoding for {name} deleted.");
    } else {
        println!("Face encoding for {name} not found.");
    }
    Ok(())
}

fn list_identities(config: &Config) -> Result<()> {
    let store = EncodingStore::open(&config.store_path)?;
    if store.is_empty() {
        println!("No faces enrolled");
        return Ok(());
    }
    for name in store.names() {
        println!("{name}");
    }
    tracing::info!(count = store.len(), dims = ?store.dimension(), "listed identities");
    Ok(())
}

async fn run_session(config: Config, preview: Option<PathBuf>) -> Result<()> {
    let store = EncodingStore::open(&config.store_path)?;
    if store.is_empty() {
        tracing::warn!("no faces enrolled; every face will be Unknown");
    }
    let all_known: BTreeSet<String> = store.names().map(str::to_string).collect();
    let gallery = store.known_faces();

    let quit = QuitSignal::new();
    live::watch_stdin(quit.clone());
    {
        let quit = quit.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                quit.trigger();
            }
        });
    }

    println!("Recognizing faces. Type q and press Enter (or Ctrl-C) to finish.");
    let session_config = config.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<_> {
        let backend = OnnxBackend::load(&session_config.model_dir)
            .with_context(|| format!("loading models from {}", session_config.model_dir.display()))?;
        let camera = live::open_camera(
            &session_config.camera_device,
            session_config.capture_width,
            session_config.capture_height,
        )?;
        tracing::debug!("frame capture blocks without timeout if the device stalls");

        let options = SessionOptions {
            threshold: session_config.match_threshold,
            process_every: session_config.process_every,
            downscale: session_config.downscale,
        };
        let mut session = Session::new(backend, &EuclideanMatcher, &gallery, options);
        let mut feed = live::CameraFeed(camera.stream()?);
        let outcome = match preview {
            Some(path) => session.run(&mut feed, &mut live::PreviewFile::new(path)?, &quit),
            None => session.run(&mut feed, &mut rollcall_core::session::NullPresenter, &quit),
        };
        Ok(outcome)
    })
    .await??;

    let (summary, failure) = match outcome {
        Ok(summary) => (summary, None),
        Err(aborted) => {
            tracing::error!(error = %aborted.error, seen = aborted.summary.recognized.len(), "session stopped early");
            (aborted.summary, Some(aborted.error))
        }
    };

    let today = chrono::Local::now().date_naive();
    let ledger = AttendanceLedger::new(&config.ledger_path);

    if let Some(error) = failure {
        // Nothing seen: keep any earlier record for today rather than zero it.
        if summary.recognized.is_empty() {
            println!("Session failed before anyone was recognized; attendance not recorded.");
        } else {
            ledger.record(&all_known, &summary.recognized, today)?;
            println!(
                "Session failed; attendance for {today} recorded for the {} recognized so far:",
                summary.recognized.len()
            );
            for name in &summary.recognized {
                println!("  present: {name}");
            }
        }
        return Err(anyhow::Error::new(error).context("live session failed"));
    }

    let table = ledger.record(&all_known, &summary.recognized, today)?;
    println!(
        "Attendance for {today}: {} of {} present ({} frames, {} analyzed). Saved to {}",
        summary.recognized.len(),
        table.names().len(),
        summary.frames,
        summary.analyzed,
        ledger.path().display()
    );
    for name in &summary.recognized {
        println!("  present: {name}");
    }
    Ok(())
}

fn report(config: &Config) -> Result<()> {
    let ledger = AttendanceLedger::new(&config.ledger_path);
    let table = ledger.load()?;
    if table.names().is_empty() {
        println!("No attendance recorded yet");
        return Ok(());
    }
    print!("{}", report::render(&table));
    Ok(())
}
