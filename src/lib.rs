//! Meal Vision
//!
//! Food detection over HTTP with meal composition summaries.
//!
//! # Architecture
//!
//! Requests flow linearly through two components:
//!
//! 1. **Detector adapter** (`detect::FoodDetector`): decodes the uploaded image,
//!    runs the detection engine with process-wide thresholds and resolves class
//!    names through the label table.
//! 2. **Meal aggregator** (`meal::summarize`): a pure, single-pass summary of
//!    one request's detections.
//!
//! The label table and engine handle are built once at startup and only read
//! afterwards, so request workers share them without locking.
//!
//! # Module Structure
//!
//! - `detect`: engine trait, engines (tract ONNX, stub), adapter, YOLO post-processing
//! - `labels`: label table and its loader chain
//! - `meal`: meal summary
//! - `api`: HTTP server
//! - `config`: JSON file + environment configuration

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod detect;
pub mod labels;
pub mod meal;

pub use config::ServiceConfig;
pub use detect::{DetectError, Detection, DetectorBackend, FoodDetector, Thresholds};
pub use labels::LabelTable;
pub use meal::{summarize, MealSummary};

use labels::{BuiltinLabels, DatasetFile, EngineMetadata};

/// Build the detector described by `cfg`.
///
/// A model that fails to load is logged and leaves the detector without an
/// engine: the service still starts, reports `model_loaded: false` and
/// answers detection requests with a server error.
pub fn build_detector(cfg: &ServiceConfig) -> FoodDetector {
    detector_with_engine(cfg, load_engine(cfg))
}

/// Assemble a detector around an already-loaded engine, running the label
/// loader chain against it.
pub fn detector_with_engine(
    cfg: &ServiceConfig,
    engine: Option<Arc<dyn DetectorBackend>>,
) -> FoodDetector {
    let dataset = DatasetFile::new(&cfg.model.dataset_path);
    let metadata = EngineMetadata::new(engine.as_deref());
    let labels = LabelTable::load(&[&dataset, &metadata, &BuiltinLabels]);
    FoodDetector::new(engine, labels, cfg.model.thresholds())
        .with_model_name(cfg.model.name.clone())
        .with_max_image_bytes(cfg.api.max_upload_bytes)
}

#[cfg(feature = "backend-tract")]
fn load_engine(cfg: &ServiceConfig) -> Option<Arc<dyn DetectorBackend>> {
    log::info!("loading model from {}", cfg.model.path.display());
    match detect::TractBackend::new(&cfg.model.path, cfg.model.input_size) {
        Ok(engine) => {
            if let Err(err) = engine.warm_up() {
                log::warn!("model warm-up failed: {:#}", err);
            }
            log::info!("model loaded from {}", cfg.model.path.display());
            Some(Arc::new(engine))
        }
        Err(err) => {
            log::error!("failed to load model: {:#}", err);
            None
        }
    }
}

#[cfg(not(feature = "backend-tract"))]
fn load_engine(cfg: &ServiceConfig) -> Option<Arc<dyn DetectorBackend>> {
    log::error!(
        "built without an inference backend; cannot load {}",
        cfg.model.path.display()
    );
    None
}
