use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{Thresholds, DEFAULT_MODEL_NAME};

const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_DATASET_PATH: &str = "models/dataset.yaml";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    model: Option<ModelConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    dataset_path: Option<PathBuf>,
    name: Option<String>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    host: Option<String>,
    port: Option<u16>,
    max_upload_bytes: Option<usize>,
    workers: Option<usize>,
}

/// Process-wide configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model: ModelSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub dataset_path: PathBuf,
    pub name: String,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl ModelSettings {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence_threshold,
            iou: self.iou_threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub workers: usize,
}

impl ApiSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// Load from the JSON file named by `MEAL_CONFIG` (if set), apply
    /// environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MEAL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let api = file.api.unwrap_or_default();
        Self {
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                dataset_path: model
                    .dataset_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET_PATH)),
                name: model.name.unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence_threshold: model
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: model.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            api: ApiSettings {
                host: api.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: api.port.unwrap_or(DEFAULT_PORT),
                max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
                workers: api.workers.unwrap_or(DEFAULT_WORKERS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("MEAL_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(path) = env_string("MEAL_DATASET_PATH") {
            self.model.dataset_path = PathBuf::from(path);
        }
        if let Some(name) = env_string("MEAL_MODEL_NAME") {
            self.model.name = name;
        }
        if let Some(size) = env_parsed("MEAL_INPUT_SIZE")? {
            self.model.input_size = size;
        }
        if let Some(threshold) = env_parsed("MEAL_CONFIDENCE_THRESHOLD")? {
            self.model.confidence_threshold = threshold;
        }
        if let Some(threshold) = env_parsed("MEAL_IOU_THRESHOLD")? {
            self.model.iou_threshold = threshold;
        }
        if let Some(host) = env_string("MEAL_HOST") {
            self.api.host = host;
        }
        // PORT is what most hosting platforms inject; MEAL_PORT wins when both are set.
        if let Some(port) = env_parsed("PORT")? {
            self.api.port = port;
        }
        if let Some(port) = env_parsed("MEAL_PORT")? {
            self.api.port = port;
        }
        if let Some(limit) = env_parsed("MEAL_MAX_UPLOAD_BYTES")? {
            self.api.max_upload_bytes = limit;
        }
        if let Some(workers) = env_parsed("MEAL_WORKERS")? {
            self.api.workers = workers;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("confidence_threshold", self.model.confidence_threshold),
            ("iou_threshold", self.model.iou_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "input_size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.api.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.api.host.trim().is_empty() {
            return Err(anyhow!("host must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.model.confidence_threshold, 0.25);
        assert_eq!(cfg.model.iou_threshold, 0.5);
        assert_eq!(cfg.model.input_size, 640);
        assert_eq!(cfg.api.addr(), "0.0.0.0:8000");
        assert_eq!(cfg.api.max_upload_bytes, 10 * 1024 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let mut cfg = ServiceConfig::default();
        cfg.model.confidence_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.model.iou_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_odd_input_size_and_zero_workers() {
        let mut cfg = ServiceConfig::default();
        cfg.model.input_size = 500;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.api.workers = 0;
        assert!(cfg.validate().is_err());
    }
}
