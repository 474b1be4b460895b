use std::io::Write;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use thiserror::Error;

use crate::detect::backend::{DetectorBackend, EngineInput, InputMode, Thresholds};
use crate::detect::result::{Detection, RawDetection};
use crate::labels::LabelTable;

pub const DEFAULT_MODEL_NAME: &str = "HealthSphere_Food_Detection_v1";
pub const SUPPORTED_FORMATS: [&str; 3] = ["JPG", "PNG", "JPEG"];

/// Why a detection call did not run to completion.
///
/// `Ok(vec![])` from `FoodDetector::detect` means the engine ran and found
/// nothing; every variant here means it did not run successfully.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("image is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("detection engine is not loaded")]
    EngineUnavailable,
    #[error("temporary image file: {0}")]
    TempFile(#[from] std::io::Error),
    #[error("inference failed: {0:#}")]
    Engine(anyhow::Error),
}

impl DetectError {
    /// True when the caller sent something unusable.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DetectError::TooLarge { .. } | DetectError::InvalidImage(_))
    }
}

/// Static model metadata reported by the API.
#[derive(Clone, Debug, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub framework: String,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub supported_formats: Vec<String>,
    pub class_names: Vec<String>,
}

/// Detector adapter: decodes uploads, runs the engine, resolves labels.
///
/// Cheap to clone; the engine handle and label table are shared read-only.
#[derive(Clone)]
pub struct FoodDetector {
    engine: Option<Arc<dyn DetectorBackend>>,
    labels: LabelTable,
    thresholds: Thresholds,
    model_name: String,
    max_image_bytes: usize,
}

impl FoodDetector {
    pub fn new(
        engine: Option<Arc<dyn DetectorBackend>>,
        labels: LabelTable,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            engine,
            labels,
            thresholds,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            max_image_bytes: usize::MAX,
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_max_image_bytes(mut self, limit: usize) -> Self {
        self.max_image_bytes = limit;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_some()
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn framework(&self) -> &'static str {
        self.engine
            .as_ref()
            .map(|engine| engine.framework())
            .unwrap_or("YOLOv8")
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_name: self.model_name.clone(),
            framework: self.framework().to_string(),
            num_classes: self.labels.len(),
            confidence_threshold: self.thresholds.confidence,
            iou_threshold: self.thresholds.iou,
            supported_formats: SUPPORTED_FORMATS.iter().map(|s| s.to_string()).collect(),
            class_names: self.labels.names().to_vec(),
        }
    }

    /// Detect food items in encoded image bytes (JPEG/PNG).
    ///
    /// Detections keep the engine's output order.
    pub fn detect(&self, image_bytes: &[u8]) -> Result<Vec<Detection>, DetectError> {
        if image_bytes.len() > self.max_image_bytes {
            return Err(DetectError::TooLarge {
                size: image_bytes.len(),
                limit: self.max_image_bytes,
            });
        }
        log::debug!("starting detection on {} bytes", image_bytes.len());
        let image = image::load_from_memory(image_bytes)?;
        log::debug!("decoded {}x{} image", image.width(), image.height());

        let engine = self.engine.as_ref().ok_or(DetectError::EngineUnavailable)?;
        let raw = match engine.input_mode() {
            InputMode::InMemory => engine.infer(EngineInput::Image(&image), self.thresholds),
            InputMode::File => infer_via_temp_file(&**engine, &image, self.thresholds)?,
        }
        .map_err(|err| {
            log::error!("{} engine failed: {:#}", engine.name(), err);
            DetectError::Engine(err)
        })?;

        let detections: Vec<Detection> = raw
            .into_iter()
            .map(|d| {
                let name = self.labels.resolve(d.class_id);
                Detection::new(d.class_id, name, d.confidence, d.bbox)
            })
            .collect();
        log::info!(
            "detected {} items: {:?}",
            detections.len(),
            detections.iter().map(|d| d.class_name()).collect::<Vec<_>>()
        );
        Ok(detections)
    }
}

/// Materialize the image as a scoped temporary PNG, run the engine on it and
/// remove the file whether or not the engine succeeded.
///
/// Failing to create the file is an error; failing to remove it is logged only.
fn infer_via_temp_file(
    engine: &dyn DetectorBackend,
    image: &DynamicImage,
    thresholds: Thresholds,
) -> Result<anyhow::Result<Vec<RawDetection>>, DetectError> {
    let mut file = tempfile::Builder::new()
        .prefix("meal-upload-")
        .suffix(".png")
        .tempfile()?;
    let mut encoded = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|err| DetectError::TempFile(std::io::Error::other(err)))?;
    file.write_all(encoded.get_ref())?;
    file.flush()?;

    let result = engine.infer(EngineInput::File(file.path()), thresholds);

    let path = file.path().to_path_buf();
    if let Err(err) = file.close() {
        log::warn!("failed to remove temporary image {}: {}", path.display(), err);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use image::RgbImage;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn detector(backend: StubBackend) -> FoodDetector {
        FoodDetector::new(
            Some(Arc::new(backend)),
            LabelTable::new(vec!["rice".to_string(), "salmon".to_string()]),
            Thresholds::default(),
        )
    }

    #[test]
    fn resolves_labels_and_keeps_engine_order() {
        let detector = detector(StubBackend::new(vec![
            RawDetection::new(1, 0.4, [0.0, 0.0, 2.0, 2.0]),
            RawDetection::new(0, 0.9, [1.0, 1.0, 3.0, 4.0]),
            RawDetection::new(7, 0.6, [0.0, 0.0, 1.0, 1.0]),
        ]));
        let dets = detector.detect(&png(8, 8)).unwrap();
        let names: Vec<&str> = dets.iter().map(|d| d.class_name()).collect();
        assert_eq!(names, vec!["salmon", "rice", "class_7"]);
        assert_eq!(dets[1].area(), 6.0);
    }

    #[test]
    fn empty_result_is_success() {
        let detector = detector(StubBackend::empty());
        assert!(detector.detect(&png(4, 4)).unwrap().is_empty());
    }

    #[test]
    fn corrupt_image_is_client_error() {
        let detector = detector(StubBackend::empty());
        let err = detector.detect(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DetectError::InvalidImage(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn engine_failure_is_distinguishable() {
        let detector = detector(StubBackend::failing("cuda on fire"));
        let err = detector.detect(&png(4, 4)).unwrap_err();
        assert!(matches!(err, DetectError::Engine(_)));
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("cuda on fire"));
    }

    #[test]
    fn missing_engine_is_unavailable() {
        let detector = FoodDetector::new(None, LabelTable::default(), Thresholds::default());
        assert!(!detector.is_loaded());
        assert!(matches!(
            detector.detect(&png(4, 4)).unwrap_err(),
            DetectError::EngineUnavailable
        ));
    }

    #[test]
    fn oversized_upload_is_rejected_before_decode() {
        let detector = detector(StubBackend::empty()).with_max_image_bytes(10);
        let err = detector.detect(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, DetectError::TooLarge { size: 11, limit: 10 }));
    }

    #[test]
    fn model_info_reflects_configuration() {
        let info = detector(StubBackend::empty())
            .with_model_name("test-model")
            .model_info();
        assert_eq!(info.model_name, "test-model");
        assert_eq!(info.num_classes, 2);
        assert_eq!(info.confidence_threshold, 0.25);
        assert_eq!(info.iou_threshold, 0.5);
        assert_eq!(info.supported_formats, vec!["JPG", "PNG", "JPEG"]);
    }
}
