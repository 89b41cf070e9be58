use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;

use facewatch_core::detection::domain::detection_result::DetectionResult;
use facewatch_core::detection::domain::face_detection_service::FaceDetectionService;
use facewatch_core::detection::infrastructure::onnx_face_detection_service::OnnxFaceDetectionService;
use facewatch_core::pipeline::events::PipelineEvent;
use facewatch_core::pipeline::pipeline_controller::PipelineController;
use facewatch_core::pipeline::pipeline_settings::PipelineSettings;
use facewatch_core::shared::file_kind::is_file_supported;
use facewatch_core::source::domain::frame_source_factory::FrameSourceFactory;
use facewatch_core::source::infrastructure::camera_frame_source::available_cameras;
use facewatch_core::source::infrastructure::default_frame_source_factory::DefaultFrameSourceFactory;

/// Watch a camera, video or image for faces.
#[derive(Parser, Debug)]
#[command(name = "facewatch")]
struct Cli {
    /// Input image or video file.
    input: Option<PathBuf>,

    /// Capture from the camera with this index instead of a file.
    #[arg(long)]
    camera: Option<u32>,

    /// List cameras that can be opened and exit.
    #[arg(long)]
    list_cameras: bool,

    /// Detect faces in INPUT once and print the result.
    #[arg(long)]
    once: bool,

    /// Settings file (JSON). Defaults to the per-user config location.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra directory to search for the face model (repeatable).
    #[arg(long)]
    model_dir: Vec<PathBuf>,

    /// Delay between frames in milliseconds.
    #[arg(long)]
    frame_interval_ms: Option<u64>,

    /// Print events as JSON lines on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    if cli.list_cameras {
        return list_cameras(cli.json);
    }

    let settings = build_settings(&cli)?;
    let detector = Arc::new(OnnxFaceDetectionService::new(settings.model_locator()));
    if !detector.is_initialized().await {
        log::warn!(
            "Face model {} not found; every frame will report a detection failure",
            settings.model_file_name
        );
    }

    match (&cli.input, cli.once) {
        (Some(input), true) => run_once(detector.as_ref(), input, cli.json).await,
        _ => run_pipeline(&cli, settings, detector).await,
    }
}

fn build_settings(cli: &Cli) -> Result<PipelineSettings, Box<dyn std::error::Error>> {
    let mut settings = PipelineSettings::load(cli.config.as_deref())?;
    if let Some(ms) = cli.frame_interval_ms {
        settings.frame_interval_ms = ms;
    }
    // Command-line dirs are searched before configured ones.
    let mut model_dirs = cli.model_dir.clone();
    model_dirs.append(&mut settings.model_dirs);
    settings.model_dirs = model_dirs;

    // A file ends; a camera does not.
    if cli.input.is_some() {
        settings.stop_on_exhaustion = true;
    }
    Ok(settings)
}

async fn run_pipeline(
    cli: &Cli,
    settings: PipelineSettings,
    detector: Arc<OnnxFaceDetectionService>,
) -> Result<(), Box<dyn std::error::Error>> {
    let factory = DefaultFrameSourceFactory;
    let source = match (&cli.input, cli.camera) {
        (Some(path), _) => factory.create_file_source(path)?,
        (None, Some(index)) => factory.create_camera_source(index)?,
        (None, None) => return Err("An input file or --camera is required".into()),
    };

    let mut controller = PipelineController::new(detector, &settings);
    subscribe_printers(&controller, cli.json);
    controller.set_strategy(source);
    controller.start()?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        _ = controller.wait() => {}
    }
    controller.shutdown().await;

    if let Some(summary) = controller.stats().summary_string() {
        log::info!("\n\n{summary}");
    }
    Ok(())
}

fn subscribe_printers(controller: &PipelineController, json: bool) {
    controller.subscribe_frames(|frame| {
        log::debug!("Frame {} ({}x{})", frame.index(), frame.width(), frame.height());
    });

    if json {
        controller.subscribe_faces(|event| print_json(&PipelineEvent::FaceDetected(event.clone())));
        controller.subscribe_metadata(|event| print_json(&PipelineEvent::Metadata(event.clone())));
    } else {
        controller.subscribe_faces(|event| {
            log::info!(
                "Face #{} at ({}, {}) {}x{} confidence {:.2}",
                event.id,
                event.bounding_box.x,
                event.bounding_box.y,
                event.bounding_box.width,
                event.bounding_box.height,
                event.confidence
            );
        });
        controller.subscribe_metadata(|event| log::info!("{}: {}", event.key, event.value));
    }
}

fn print_json(event: &PipelineEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => log::warn!("Could not serialize event: {e}"),
    }
}

async fn run_once(
    detector: &dyn FaceDetectionService,
    input: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = detector.detect_faces_in_file(Some(input)).await;

    if json {
        println!("{}", result_to_json(&result));
    }

    match &result {
        DetectionResult::Success { faces, method } => {
            if !json {
                println!("{} face(s) found by {method}", faces.len());
                for face in faces {
                    let b = face.bounding_box();
                    println!(
                        "  ({}, {}) {}x{} confidence {:.2}",
                        b.x,
                        b.y,
                        b.width,
                        b.height,
                        face.confidence()
                    );
                }
            }
            Ok(())
        }
        DetectionResult::Failure { cause, message, .. } => {
            Err(format!("{cause:?}: {message}").into())
        }
    }
}

fn result_to_json(result: &DetectionResult) -> serde_json::Value {
    match result {
        DetectionResult::Success { faces, method } => serde_json::json!({
            "success": true,
            "method": method,
            "faces": faces
                .iter()
                .map(|face| serde_json::json!({
                    "bounding_box": face.bounding_box(),
                    "confidence": face.confidence(),
                    "landmarks": face.landmarks(),
                    "image_path": face.image_path(),
                }))
                .collect::<Vec<_>>(),
        }),
        DetectionResult::Failure {
            cause,
            message,
            method,
        } => serde_json::json!({
            "success": false,
            "method": method,
            "cause": cause,
            "message": message,
        }),
    }
}

fn list_cameras(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let cameras = available_cameras();
    if json {
        println!("{}", serde_json::to_string(&cameras)?);
        return Ok(());
    }
    if cameras.is_empty() {
        println!("No cameras found");
    }
    for camera in cameras {
        println!(
            "{}: {} ({}x{} @ {:.0} fps)",
            camera.index, camera.name, camera.width, camera.height, camera.fps
        );
    }
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let selected = [cli.input.is_some(), cli.camera.is_some(), cli.list_cameras]
        .iter()
        .filter(|&&set| set)
        .count();
    if selected != 1 {
        return Err("Exactly one of INPUT, --camera or --list-cameras is required".into());
    }
    if cli.once && cli.input.is_none() {
        return Err("--once requires an INPUT file".into());
    }
    if let Some(input) = &cli.input {
        if !input.exists() {
            return Err(format!("Input file not found: {}", input.display()).into());
        }
        if !is_file_supported(input) {
            log::warn!(
                "Unrecognized extension on {}; trying it as a still image",
                input.display()
            );
        }
    }
    if cli.frame_interval_ms == Some(0) {
        return Err("Frame interval must be at least 1 ms".into());
    }
    Ok(())
}
