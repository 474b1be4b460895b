#![cfg(feature = "backend-tract")]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, EngineInput, Thresholds};
use crate::detect::postprocess::{decode_yolo, letterbox_image, non_max_suppression, Letterbox};
use crate::detect::result::RawDetection;
use crate::labels::dense_names;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// The model is loaded once and shared read-only; `run` takes `&self`, so
/// concurrent workers need no lock around inference.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Option<Vec<String>>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `input_size` square input.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let onnx = tract_onnx::onnx();
        let proto = onnx
            .proto_model_for_path(model_path)
            .with_context(|| format!("failed to read ONNX model from {}", model_path.display()))?;
        let labels = proto
            .metadata_props
            .iter()
            .find(|prop| prop.key == "names")
            .map(|prop| parse_names_metadata(&prop.value))
            .filter(|names| !names.is_empty());

        let size = input_size as usize;
        let model = onnx
            .model_for_proto_model(&proto)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels,
        })
    }

    fn build_input(&self, image: &image::DynamicImage) -> Result<(Tensor, Letterbox)> {
        let (canvas, letterbox) = letterbox_image(image, self.input_size)?;
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok((input.into_tensor(), letterbox))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&self, input: EngineInput<'_>, thresholds: Thresholds) -> Result<Vec<RawDetection>> {
        let owned;
        let image = match input {
            EngineInput::Image(image) => image,
            EngineInput::File(path) => {
                owned = image::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                &owned
            }
        };

        let (tensor, letterbox) = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let data: Vec<f32> = view.iter().copied().collect();

        let num_classes = match &self.labels {
            Some(labels) if labels.len() + 4 == shape[1] || labels.len() + 4 == shape[2] => {
                labels.len()
            }
            // Anchors always outnumber features for YOLO heads.
            _ => shape[1].min(shape[2]).saturating_sub(4),
        };
        if num_classes == 0 {
            return Err(anyhow!("output shape {:?} carries no class scores", shape));
        }

        let candidates =
            decode_yolo(&data, &shape, num_classes, thresholds.confidence, &letterbox)?;
        Ok(non_max_suppression(candidates, thresholds.iou))
    }

    fn embedded_labels(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }

    /// One blank frame so the first request does not pay for lazy setup.
    fn warm_up(&self) -> Result<()> {
        let blank = image::DynamicImage::new_rgb8(self.input_size, self.input_size);
        self.infer(EngineInput::Image(&blank), Thresholds::default())
            .map(|_| ())
    }
}

/// Parse the `names` metadata written by YOLO exporters, e.g.
/// `{0: 'rice', 1: 'fried egg'}`, into an index-ordered list.
///
/// Gaps in the id sequence are filled with `class_{id}`. Metadata with an
/// out-of-range id yields an empty list.
pub fn parse_names_metadata(raw: &str) -> Vec<String> {
    let re = match Regex::new(r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let entries: BTreeMap<usize, String> = re
        .captures_iter(raw)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().parse().ok()?;
            let name = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
            Some((id, name))
        })
        .collect();

    match dense_names(entries) {
        Ok(names) => names,
        Err(err) => {
            log::warn!("ignoring model names metadata: {:#}", err);
            Vec::new()
        }
    }
}
