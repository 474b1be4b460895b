use std::path::Path;

use anyhow::Result;
use image::DynamicImage;

use crate::detect::result::RawDetection;

/// Thresholds handed to the engine on every call.
///
/// These are process-wide and fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum score for the engine to report a detection.
    pub confidence: f32,
    /// Overlap above which the engine's NMS drops the weaker box.
    pub iou: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.5,
        }
    }
}

/// How an engine wants to receive its input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Decoded image, passed in memory.
    InMemory,
    /// Image materialized to a temporary file for the duration of the call.
    File,
}

/// Engine input for a single call.
pub enum EngineInput<'a> {
    Image(&'a DynamicImage),
    File(&'a Path),
}

/// Detection engine trait.
///
/// Engines are shared read-only across request workers, so `infer` takes `&self`
/// and implementations must be `Send + Sync`.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Framework reported in model metadata.
    fn framework(&self) -> &'static str {
        "YOLOv8"
    }

    fn input_mode(&self) -> InputMode {
        InputMode::InMemory
    }

    /// Run detection. Output order is the engine's native order.
    fn infer(&self, input: EngineInput<'_>, thresholds: Thresholds) -> Result<Vec<RawDetection>>;

    /// Label names embedded in the model artifact, if any.
    fn embedded_labels(&self) -> Option<Vec<String>> {
        None
    }

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
