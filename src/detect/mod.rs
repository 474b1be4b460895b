mod adapter;
mod backend;
mod backends;
pub mod postprocess;
mod result;

pub use adapter::{DetectError, FoodDetector, ModelInfo, DEFAULT_MODEL_NAME, SUPPORTED_FORMATS};
pub use backend::{DetectorBackend, EngineInput, InputMode, Thresholds};
pub use backends::StubBackend;
pub use result::{Detection, RawDetection};

#[cfg(feature = "backend-tract")]
pub use backends::tract::parse_names_metadata;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
