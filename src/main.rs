use facegate::{
    camera::{FrameSource, V4lFrameSource},
    cli::{annotate_faces, check_for_escape, clear_screen, AsciiRenderer},
    core::{
        authenticate, FaceLocator, OnnxFaceLocator, PreviewFrame, ScratchCleaner,
        SessionController, SessionPlan,
    },
    storage::ImageStore,
    Config, DevMode, FaceGateError,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use image::DynamicImage;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(about = "Webcam face authentication system")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity from the webcam
    Register {
        #[arg(short, long)]
        name: String,
    },
    /// Authenticate against a registered identity
    Login {
        #[arg(short, long)]
        name: String,
    },
    /// Test camera
    TestCamera,
    /// Test face detection
    TestDetection,
    /// Delete every probe image in the scratch namespace
    PurgeScratch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = Config::load()?;
    let store = build_store(&config, &dev_mode)?;

    match cli.command {
        Commands::Register { name } => {
            println!("Registering identity: {}", name);
            register(&config, store, &name)?;
        }
        Commands::Login { name } => {
            println!("Authenticating: {}", name);
            login(&config, store, &name)?;
        }
        Commands::TestCamera => {
            println!("Testing camera...");
            test_camera(&config, &dev_mode)?;
        }
        Commands::TestDetection => {
            println!("Testing face detection...");
            test_detection(&config, &dev_mode)?;
        }
        Commands::PurgeScratch => {
            let removed = store.purge_scratch()?;
            println!("Removed {} scratch image(s)", removed);
        }
    }

    Ok(())
}

fn build_store(config: &Config, dev_mode: &DevMode) -> Result<ImageStore> {
    let (images_dir, scratch_dir) = if dev_mode.is_enabled() {
        (dev_mode.images_dir(), dev_mode.scratch_dir())
    } else {
        (
            config.storage.images_dir.clone(),
            config.storage.scratch_dir.clone(),
        )
    };
    Ok(ImageStore::new(images_dir, scratch_dir)?)
}

fn register(config: &Config, store: ImageStore, name: &str) -> Result<()> {
    if store.identity_exists(name) {
        return Err(FaceGateError::IdentityExists(name.to_string()).into());
    }

    let locator: Arc<dyn FaceLocator> = Arc::new(OnnxFaceLocator::new(config)?);
    let source = Box::new(V4lFrameSource::open(&config.camera)?);
    let cleaner = ScratchCleaner::spawn(
        store.clone(),
        Duration::from_secs(config.cleaner.interval_secs),
    )?;

    let (preview_tx, preview_rx) = sync_channel(1);
    let mut controller = SessionController::new();
    controller.start(
        SessionPlan::registration(name, &config.capture),
        source,
        locator,
        store,
        Some(preview_tx),
    )?;

    run_preview_loop(&controller, preview_rx)?;
    let summary = controller.wait()?;
    cleaner.shutdown();

    println!(
        "Registration complete: {} capture(s) stored for {}",
        summary.stored, summary.identity
    );
    Ok(())
}

fn login(config: &Config, store: ImageStore, name: &str) -> Result<()> {
    if !store.identity_exists(name) {
        println!("Cannot authenticate: no registered identity named {}", name);
        return Ok(());
    }

    let locator: Arc<dyn FaceLocator> = Arc::new(OnnxFaceLocator::new(config)?);
    let source = Box::new(V4lFrameSource::open(&config.camera)?);
    let cleaner = ScratchCleaner::spawn(
        store.clone(),
        Duration::from_secs(config.cleaner.interval_secs),
    )?;

    let (preview_tx, preview_rx) = sync_channel(1);
    let mut controller = SessionController::new();
    controller.start(
        SessionPlan::login(name, &config.capture),
        source,
        locator,
        store.clone(),
        Some(preview_tx),
    )?;

    run_preview_loop(&controller, preview_rx)?;
    let summary = controller.wait()?;
    cleaner.shutdown();

    tracing::debug!(
        "Login capture finished: {} probe(s) over {} frames",
        summary.stored,
        summary.frames_seen
    );

    match authenticate(&store, name, config.auth.similarity_threshold) {
        Ok(verdict) => {
            println!(
                "Authentication: {}",
                if verdict.accepted { "SUCCESS" } else { "FAILED" }
            );
            println!(
                "Average similarity: {:.3} over {} comparison(s)",
                verdict.average_similarity, verdict.comparisons
            );
        }
        Err(e) if e.is_cannot_authenticate() => {
            println!("Cannot authenticate: {}", e);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

fn run_preview_loop(
    controller: &SessionController,
    preview_rx: Receiver<PreviewFrame>,
) -> Result<()> {
    let renderer = AsciiRenderer::new(None, None);
    println!("Look at the camera... (Esc cancels)");

    while controller.is_running() {
        if check_for_escape()? {
            println!("Cancelled");
            controller.stop();
            break;
        }

        match preview_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => {
                clear_screen()?;
                let ascii = renderer.render_frame_with_progress(
                    &frame.image,
                    &frame.faces,
                    frame.stored,
                    frame.target,
                );
                println!("{}", ascii);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

fn pull_one_frame(source: &mut dyn FrameSource) -> Result<DynamicImage> {
    for _ in 0..30 {
        if let Some(frame) = source.pull()? {
            return Ok(frame);
        }
    }
    Err(FaceGateError::Camera("No decodable frame after 30 pulls".into()).into())
}

fn test_camera(config: &Config, dev_mode: &DevMode) -> Result<()> {
    let mut camera = V4lFrameSource::open(&config.camera)?;
    let frame = pull_one_frame(&mut camera)?;
    camera.release();

    let save_path = dev_mode.get_capture_path("test_capture");
    frame.save(&save_path)?;
    println!("Saved test image to {:?}", save_path);
    Ok(())
}

fn test_detection(config: &Config, dev_mode: &DevMode) -> Result<()> {
    let locator = OnnxFaceLocator::new(config)?;
    let mut camera = V4lFrameSource::open(&config.camera)?;
    let frame = pull_one_frame(&mut camera)?;
    camera.release();

    let faces = locator.detect(&frame)?;
    println!("Found {} face(s)", faces.len());
    for (i, face) in faces.iter().enumerate() {
        println!(
            "  Face {}: {:.0}x{:.0} at ({:.0}, {:.0}), confidence {:.3}",
            i + 1,
            face.width,
            face.height,
            face.x,
            face.y,
            face.confidence
        );
    }

    let annotated = annotate_faces(&frame, &faces);
    let debug_path = dev_mode.get_debug_path("detection");
    annotated.save(&debug_path)?;
    println!("Saved annotated image to {:?}", debug_path);
    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
