//! meal_detect - run food detection and meal analysis on one local image

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

use meal_vision::{build_detector, summarize, ServiceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyze (JPEG or PNG).
    image: PathBuf,
    /// ONNX model path (overrides MEAL_MODEL_PATH / config file).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Dataset file with class names (yaml, json or toml).
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// Minimum confidence for a detection to be reported.
    #[arg(long)]
    confidence: Option<f32>,
    /// IoU threshold for non-maximum suppression.
    #[arg(long)]
    iou: Option<f32>,
    /// Print compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load()?;
    if let Some(model) = args.model {
        config.model.path = model;
    }
    if let Some(dataset) = args.dataset {
        config.model.dataset_path = dataset;
    }
    if let Some(confidence) = args.confidence {
        if !(confidence > 0.0 && confidence <= 1.0) {
            return Err(anyhow!("--confidence must be in (0, 1]"));
        }
        config.model.confidence_threshold = confidence;
    }
    if let Some(iou) = args.iou {
        if !(iou > 0.0 && iou <= 1.0) {
            return Err(anyhow!("--iou must be in (0, 1]"));
        }
        config.model.iou_threshold = iou;
    }

    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    // Local files are not bound by the upload limit.
    config.api.max_upload_bytes = config.api.max_upload_bytes.max(bytes.len());

    let detector = build_detector(&config);
    if !detector.is_loaded() {
        return Err(anyhow!(
            "no model could be loaded from {}",
            config.model.path.display()
        ));
    }
    let detections = detector.detect(&bytes)?;
    let report = json!({
        "image": args.image.display().to_string(),
        "total_detections": detections.len(),
        "detections": detections,
        "meal_analysis": summarize(&detections),
        "model_info": detector.model_info(),
    });
    let out = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", out);
    Ok(())
}
