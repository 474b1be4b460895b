//! HTTP surface for the food detector.
//!
//! A single accept thread hands connections to a fixed pool of workers.
//! Each worker runs detection synchronously, so one slow inference never
//! blocks requests picked up by other workers.

mod http;
pub mod multipart;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::detect::{DetectError, Detection, FoodDetector, ModelInfo, SUPPORTED_FORMATS};
use crate::meal::{summarize, MealSummary};

use http::{read_request, write_response, HttpRequest, ReadError};

/// Routes are served both bare and under this prefix.
pub const API_PREFIX: &str = "/api/v1/ml";

/// Allowance for multipart framing on top of the image size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    pub workers: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            workers: 4,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    detector: FoodDetector,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, detector: FoodDetector) -> Self {
        let detector = detector.with_max_image_bytes(cfg.max_upload_bytes);
        Self { cfg, detector }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, self.cfg, self.detector, shutdown_thread) {
                log::error!("food api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    detector: FoodDetector,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<TcpStream>();
    let rx = Arc::new(Mutex::new(rx));
    let workers: Vec<JoinHandle<()>> = (0..cfg.workers.max(1))
        .map(|id| {
            let rx = rx.clone();
            let detector = detector.clone();
            let cfg = cfg.clone();
            std::thread::Builder::new()
                .name(format!("food-api-worker-{}", id))
                .spawn(move || worker_loop(rx, detector, cfg))
        })
        .collect::<std::io::Result<_>>()?;

    let result = accept_loop(&listener, &tx, &shutdown);

    // Closing the channel lets workers drain queued connections and exit.
    drop(tx);
    for worker in workers {
        if worker.join().is_err() {
            log::error!("food api worker panicked");
        }
    }
    result
}

fn accept_loop(
    listener: &TcpListener,
    tx: &mpsc::Sender<TcpStream>,
    shutdown: &AtomicBool,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                tx.send(stream)
                    .map_err(|_| anyhow!("all food api workers exited"))?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<TcpStream>>>, detector: FoodDetector, cfg: ApiConfig) {
    loop {
        let next = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => return,
        };
        let Ok(stream) = next else {
            return;
        };
        if let Err(err) = handle_connection(stream, &detector, &cfg) {
            log::warn!("food api connection failed: {}", err);
        }
    }
}

/// JSON response produced by a route.
#[derive(Debug)]
struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(err) => Self::error(500, &format!("failed to encode response: {}", err)),
        }
    }

    fn ok<T: Serialize>(value: &T) -> Self {
        Self::json(200, value)
    }

    fn error(status: u16, detail: &str) -> Self {
        Self {
            status,
            body: json!({ "detail": detail }).to_string().into_bytes(),
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    detector: &FoodDetector,
    cfg: &ApiConfig,
) -> Result<()> {
    let max_body = cfg.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);
    let response = match read_request(&mut stream, max_body) {
        Ok(request) => {
            let response = route(&request, detector);
            log::info!("{} {} -> {}", request.method, request.path, response.status);
            response
        }
        Err(ReadError::TooLarge(len)) => Response::error(
            413,
            &format!(
                "upload of {} bytes exceeds the {} byte limit",
                len, cfg.max_upload_bytes
            ),
        ),
        Err(ReadError::LengthRequired) => Response::error(411, "Content-Length required"),
        Err(ReadError::Malformed(err)) => {
            log::warn!("rejecting malformed request: {:#}", err);
            Response::error(400, "malformed request")
        }
    };
    write_response(&mut stream, response.status, "application/json", &response.body)
}

fn route(request: &HttpRequest, detector: &FoodDetector) -> Response {
    let path = request
        .path
        .strip_prefix(API_PREFIX)
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or(&request.path);
    let method = request.method.as_str();

    match (method, path) {
        ("GET", "/") => root(),
        ("GET", "/health") => health(detector),
        ("GET", "/food-classes") => food_classes(detector),
        ("GET", "/model-info") => model_info(detector),
        ("GET", "/debug-model") => debug_model(detector),
        ("POST", "/detect-food") => detect_food(request, detector),
        ("POST", "/analyze-meal") => analyze_meal(request, detector),
        ("POST", "/test-upload") => test_upload(request),
        (
            _,
            "/" | "/health" | "/food-classes" | "/model-info" | "/debug-model" | "/detect-food"
            | "/analyze-meal" | "/test-upload",
        ) => Response::error(405, "Method Not Allowed"),
        _ => Response::error(404, "Not Found"),
    }
}

fn root() -> Response {
    Response::ok(&json!({
        "message": "Meal Vision food detection API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "ml_api": API_PREFIX,
            "health": "/health",
            "detect_food": "/detect-food",
            "analyze_meal": "/analyze-meal",
            "food_classes": "/food-classes",
            "model_info": "/model-info",
        }
    }))
}

fn health(detector: &FoodDetector) -> Response {
    let timestamp_s = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Response::ok(&json!({
        "success": true,
        "status": "healthy",
        "model_loaded": detector.is_loaded(),
        "timestamp_s": timestamp_s,
    }))
}

fn food_classes(detector: &FoodDetector) -> Response {
    Response::ok(&json!({
        "success": true,
        "num_classes": detector.labels().len(),
        "classes": detector.labels().names(),
    }))
}

fn model_info(detector: &FoodDetector) -> Response {
    let thresholds = detector.thresholds();
    Response::ok(&json!({
        "success": true,
        "model_name": detector.model_name(),
        "framework": detector.framework(),
        "num_classes": detector.labels().len(),
        "confidence_threshold": thresholds.confidence,
        "iou_threshold": thresholds.iou,
        "supported_formats": SUPPORTED_FORMATS,
    }))
}

fn debug_model(detector: &FoodDetector) -> Response {
    Response::ok(&json!({
        "success": true,
        "model_loaded": detector.is_loaded(),
        "class_names_count": detector.labels().len(),
        "class_names": detector.labels().names(),
        "confidence_threshold": detector.thresholds().confidence,
        "model_info": detector.model_info(),
    }))
}

struct Upload {
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

fn extract_upload(request: &HttpRequest) -> Result<Upload, Response> {
    let content_type = request.header("content-type").unwrap_or("");
    let boundary = multipart::boundary(content_type)
        .ok_or_else(|| Response::error(400, "expected multipart/form-data upload"))?;
    let parts = multipart::parse(&request.body, &boundary)
        .map_err(|err| Response::error(400, &format!("invalid multipart body: {}", err)))?;
    let part = multipart::file_part(parts, "file")
        .ok_or_else(|| Response::error(400, "missing form field 'file'"))?;
    Ok(Upload {
        filename: part.filename,
        content_type: part.content_type,
        data: part.data,
    })
}

/// Read the upload, require an image content type and run detection.
fn detect_upload(
    request: &HttpRequest,
    detector: &FoodDetector,
    failure_prefix: &str,
) -> Result<(Upload, Vec<Detection>), Response> {
    let upload = extract_upload(request)?;
    let is_image = upload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("image/"));
    if !is_image {
        return Err(Response::error(400, "File must be an image"));
    }
    match detector.detect(&upload.data) {
        Ok(detections) => Ok((upload, detections)),
        Err(err @ DetectError::TooLarge { .. }) => Err(Response::error(413, &err.to_string())),
        Err(err) if err.is_client_error() => Err(Response::error(400, &err.to_string())),
        Err(err) => Err(Response::error(500, &format!("{}: {}", failure_prefix, err))),
    }
}

#[derive(Serialize)]
struct DetectFoodResponse<'a> {
    success: bool,
    image_filename: Option<String>,
    total_detections: usize,
    detections: &'a [Detection],
    model_info: BriefModelInfo<'a>,
}

#[derive(Serialize)]
struct BriefModelInfo<'a> {
    model_name: &'a str,
    confidence_threshold: f32,
    num_classes: usize,
}

fn detect_food(request: &HttpRequest, detector: &FoodDetector) -> Response {
    let (upload, detections) = match detect_upload(request, detector, "Detection failed") {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    Response::ok(&DetectFoodResponse {
        success: true,
        image_filename: upload.filename,
        total_detections: detections.len(),
        detections: &detections,
        model_info: BriefModelInfo {
            model_name: detector.model_name(),
            confidence_threshold: detector.thresholds().confidence,
            num_classes: detector.labels().len(),
        },
    })
}

#[derive(Serialize)]
struct AnalyzeMealResponse<'a> {
    success: bool,
    image_filename: Option<String>,
    detections: &'a [Detection],
    meal_analysis: MealSummary,
    model_info: ModelInfo,
}

fn analyze_meal(request: &HttpRequest, detector: &FoodDetector) -> Response {
    let (upload, detections) = match detect_upload(request, detector, "Meal analysis failed") {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    Response::ok(&AnalyzeMealResponse {
        success: true,
        image_filename: upload.filename,
        meal_analysis: summarize(&detections),
        detections: &detections,
        model_info: detector.model_info(),
    })
}

fn test_upload(request: &HttpRequest) -> Response {
    match extract_upload(request) {
        Ok(upload) => Response::ok(&json!({
            "success": true,
            "filename": upload.filename,
            "content_type": upload.content_type,
            "file_size": upload.data.len(),
            "message": "File upload test successful",
        })),
        Err(response) => response,
    }
}
