//! Serve subcommand - HTTP prediction endpoint.

use crate::config::{ModelArgs, ModelSource};
use axum::Router;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use emovox_core::inference::{InferenceError, InferenceService, PredictionResult, Stage, Upload};
use emovox_core::response::{FailurePayload, PredictionResponse};
use eyre::{Result, WrapErr};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Multipart field carrying the audio file.
pub const AUDIO_FIELD: &str = "audio";

/// CLI arguments for the HTTP server.
#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub model_args: ModelArgs,

    /// Address to listen on
    #[arg(long, default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,

    /// Directory for temporary upload files [default: system temp dir]
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

/// Resolved configuration for the HTTP server.
#[derive(Debug)]
pub struct Config {
    pub model: ModelSource,
    pub addr: SocketAddr,
    pub temp_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        if let Some(dir) = &args.temp_dir {
            eyre::ensure!(dir.is_dir(), "temp dir {:?} does not exist", dir.display());
        }

        Ok(Self {
            model: args.model_args.try_into()?,
            addr: args.addr,
            temp_dir: args.temp_dir,
            max_upload_bytes: args.max_upload_bytes,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    let mut service = config.model.load()?;
    if let Some(dir) = config.temp_dir {
        service = service.with_temp_dir(dir);
    }

    tracing::info!(
        model = ?config.model.path.display(),
        backend = service.model().classifier.backend(),
        labels = %service.labels(),
        config = %service.config().summary(),
        "model loaded"
    );

    let router = build_router(Arc::new(service), config.max_upload_bytes);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(config.addr)
            .await
            .wrap_err_with(|| format!("failed to bind {}", config.addr))?;

        tracing::info!(addr = %config.addr, "listening");
        println!("Serving on http://{}", config.addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .wrap_err("server error")?;

        tracing::info!("server stopped");
        Ok(())
    })
}

/// Routes: `GET /health` and `POST /predict`.
pub fn build_router(service: Arc<InferenceService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(service)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn health(State(service): State<Arc<InferenceService>>) -> Response {
    Json(json!({
        "status": "ok",
        "backend": service.model().classifier.backend(),
        "labels": service.labels().names(),
    }))
    .into_response()
}

async fn predict(
    State(service): State<Arc<InferenceService>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(e) => return respond(Err(e)),
    };

    let outcome = tokio::task::spawn_blocking(move || service.predict_upload(&upload)).await;

    match outcome {
        Ok(outcome) => respond(outcome),
        Err(e) => {
            tracing::error!(error = %e, "prediction task failed");
            let payload = FailurePayload {
                success: false,
                stage: Stage::Prediction,
                error: format!("prediction: {e}"),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response()
        }
    }
}

/// Pull the `audio` field out of the request body.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Upload, InferenceError> {
    let mut multipart = multipart.map_err(|e| InferenceError::Malformed(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InferenceError::Malformed(e.body_text()))?
    {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_owned();
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| InferenceError::Malformed(e.body_text()))?;

        return Ok(Upload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    Err(InferenceError::NoFile)
}

fn respond(outcome: Result<PredictionResult, InferenceError>) -> Response {
    let status = match &outcome {
        Ok(result) => {
            tracing::info!(emotion = result.label(), confidence = result.confidence(), "predicted");
            StatusCode::OK
        }
        Err(e) => {
            let status = status_for(e.stage());
            tracing::warn!(stage = %e.stage(), status = status.as_u16(), error = %e, "request failed");
            status
        }
    };

    (status, Json(PredictionResponse::from(&outcome))).into_response()
}

fn status_for(stage: Stage) -> StatusCode {
    match stage {
        Stage::Request => StatusCode::BAD_REQUEST,
        Stage::Decode | Stage::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
        Stage::Upload | Stage::Prediction => StatusCode::INTERNAL_SERVER_ERROR,
        Stage::Classifier => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use emovox_core::config::ExtractionConfig;
    use emovox_core::dataset::Dataset;
    use emovox_core::features::FeatureVector;
    use emovox_core::labels::LabelSet;
    use emovox_core::persist::ModelArtifact;
    use emovox_core::train::{TrainConfig, train};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::f32::consts::PI;
    use tower::ServiceExt;

    const BOUNDARY: &str = "emovox-test-boundary";

    fn router(dir: &tempfile::TempDir) -> Router {
        let config = ExtractionConfig {
            sample_rate: 16000,
            duration: 1.0,
            offset: 0.0,
            ..ExtractionConfig::default()
        };
        let labels = LabelSet::four_class();

        let mut dataset = Dataset::new(labels.clone());
        for row in 0..16 {
            let label = row % 4;
            let values = (0..config.n_mfcc)
                .map(|i| if i == label { 5.0 } else { (row + i) as f32 * 0.01 })
                .collect();
            dataset.push(FeatureVector::new(values).unwrap(), label);
        }

        let train_config = TrainConfig {
            epochs: 20,
            validation_split: 0.0,
            ..TrainConfig::default()
        };
        let model = train(&dataset, &train_config).unwrap();

        let path = dir.path().join("model.json");
        ModelArtifact::new(config, labels, model.classifier, model.history)
            .save(&path)
            .unwrap();

        let service = InferenceService::load(&path).unwrap().with_temp_dir(dir.path());
        build_router(Arc::new(service), DEFAULT_MAX_UPLOAD_BYTES)
    }

    fn wav_bytes(seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(16000.0 * seconds) as usize {
                let sample = 0.5 * (2.0 * PI * 330.0 * i as f32 / 16000.0).sin();
                writer.write_sample((sample * 32767.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn multipart(field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_lists_labels() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(router(&dir), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "softmax");
        assert_eq!(body["labels"], json!(["neutral", "happy", "sad", "angry"]));
    }

    #[tokio::test]
    async fn valid_wav_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart(AUDIO_FIELD, "clip.wav", "audio/wav", &wav_bytes(1.0));

        let (status, body) = send(router(&dir), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["emotion"].is_string());
        assert!(body["confidence"].as_str().unwrap().parse::<f32>().is_ok());

        let probabilities = body["probabilities"].as_object().unwrap();
        assert_eq!(probabilities.len(), 4);
        let total: f64 = probabilities.values().map(|p| p.as_f64().unwrap()).sum();
        assert!((total - 1.0).abs() < 1e-3);

        // only the model file remains
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn undecodable_upload_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart(AUDIO_FIELD, "clip.mp3", "audio/mpeg", b"definitely not audio");

        let (status, body) = send(router(&dir), request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["stage"], "decode");
        assert!(body["error"].as_str().unwrap().starts_with("decode: "));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_audio_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart("file", "clip.wav", "audio/wav", &wav_bytes(0.5));

        let (status, body) = send(router(&dir), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["stage"], "request");
    }

    #[tokio::test]
    async fn empty_filename_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let request = multipart(AUDIO_FIELD, "", "audio/wav", &wav_bytes(0.5));

        let (status, body) = send(router(&dir), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "request: empty filename");
    }

    #[tokio::test]
    async fn non_multipart_body_gets_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = send(router(&dir), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["stage"], "request");
    }
}
