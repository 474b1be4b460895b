use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;

use crate::detect::backend::{DetectorBackend, EngineInput, InputMode, Thresholds};
use crate::detect::result::RawDetection;

/// What the stub engine answers with.
#[derive(Clone, Debug)]
enum Script {
    Fixed(Vec<RawDetection>),
    /// One full-frame detection whose class id is the image width.
    WidthAsClass,
    Fail(String),
}

/// Stub engine for tests and dry runs. Returns scripted detections.
///
/// Scripted detections below the confidence threshold are filtered out, the
/// way a real engine would.
pub struct StubBackend {
    script: Script,
    input_mode: InputMode,
    labels: Option<Vec<String>>,
    last_path: Mutex<Option<PathBuf>>,
}

impl StubBackend {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self::with_script(Script::Fixed(detections))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn width_as_class() -> Self {
        Self::with_script(Script::WidthAsClass)
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(reason.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            input_mode: InputMode::InMemory,
            labels: None,
            last_path: Mutex::new(None),
        }
    }

    pub fn with_input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Path of the last file handed to a file-mode call.
    pub fn last_path(&self) -> Option<PathBuf> {
        self.last_path.lock().ok().and_then(|guard| guard.clone())
    }

    fn open(&self, input: EngineInput<'_>) -> Result<DynamicImage> {
        match input {
            EngineInput::Image(image) => Ok(image.clone()),
            EngineInput::File(path) => {
                if let Ok(mut guard) = self.last_path.lock() {
                    *guard = Some(path.to_path_buf());
                }
                image::open(path).with_context(|| format!("stub failed to open {}", path.display()))
            }
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    fn infer(&self, input: EngineInput<'_>, thresholds: Thresholds) -> Result<Vec<RawDetection>> {
        let image = self.open(input)?;
        let detections = match &self.script {
            Script::Fixed(detections) => detections.clone(),
            Script::WidthAsClass => vec![RawDetection::new(
                image.width() as usize,
                0.9,
                [0.0, 0.0, image.width() as f32, image.height() as f32],
            )],
            Script::Fail(reason) => return Err(anyhow!("{}", reason)),
        };
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= thresholds.confidence)
            .collect())
    }

    fn embedded_labels(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }
}
