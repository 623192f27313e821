use crate::config::Config;
use crate::error::SheetError;
use crate::grading::{Collaborators, GeminiClient, SheetEvaluator, StudentReport, Template};
use crate::preprocessing::{self, EnhancementParameters, Pipeline};
use axum::{
    body::Bytes,
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::header::{HeaderName, CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::future::join_all;
use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const SUPPORTED_FORMATS: [&str; 6] = [
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/bmp",
    "image/gif",
    "image/webp",
];

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub collaborators: Option<Collaborators>,
    pub config: Arc<Config>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub supported_formats: Vec<String>,
    pub max_file_size_bytes: usize,
    pub default_parameters: EnhancementParameters,
    pub recognizer_configured: bool,
    pub model: Option<String>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, SheetError> {
        let pipeline = Pipeline::new(config.enhancement.clone())?;
        let collaborators = config
            .gemini
            .clone()
            .map(|gemini| Collaborators::shared(Arc::new(GeminiClient::new(gemini))));

        Ok(Self {
            pipeline: Arc::new(pipeline),
            collaborators,
            config: Arc::new(config),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let max_file_size = state.config.max_file_size;

    Router::new()
        .route("/preprocess", post(handle_preprocess))
        .route("/evaluate", post(handle_evaluate))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(max_file_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config)?;

    if state.collaborators.is_none() {
        tracing::warn!("No GEMINI_API_KEY configured, /evaluate is disabled");
    }

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Deskew and enhance one uploaded page, returning it as PNG
async fn handle_preprocess(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, SheetError> {
    let start = Instant::now();

    let mut file_data: Option<Bytes> = None;
    let mut params: Option<String> = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => file_data = Some(read_file(field, &state).await?),
            "params" => params = Some(read_text(field).await?),
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let data = file_data.ok_or(SheetError::MissingFile)?;
    let pipeline = pipeline_for(&state, params.as_deref())?;

    let (png, tilt) = run_blocking(move || {
        let image = preprocessing::decode(&data)?;
        let enhanced = pipeline.process(&image)?;
        let png = preprocessing::encode_png(&enhanced.image)?;
        Ok((png, enhanced.tilt))
    })
    .await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        "Preprocessed page in {}ms, tilt {:.2}, {} bytes",
        processing_time_ms,
        tilt,
        png.len()
    );

    let headers = [
        (CONTENT_TYPE, "image/png".to_string()),
        (HeaderName::from_static("x-tilt-degrees"), format!("{:.4}", tilt)),
        (
            HeaderName::from_static("x-processing-time-ms"),
            processing_time_ms.to_string(),
        ),
    ];
    Ok((headers, png).into_response())
}

/// Grade uploaded answer sheets against an uploaded question paper and key
async fn handle_evaluate(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<StudentReport>>, SheetError> {
    let start = Instant::now();
    let collaborators = state
        .collaborators
        .clone()
        .ok_or(SheetError::RecognizerUnavailable)?;

    let mut question_paper: Option<Bytes> = None;
    let mut answer_key: Option<Bytes> = None;
    let mut template: Option<String> = None;
    let mut params: Option<String> = None;
    let mut preprocess = true;
    let mut sheets: Vec<(String, Bytes)> = Vec::new();

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "question_paper" => question_paper = Some(read_file(field, &state).await?),
            "answer_key" => answer_key = Some(read_file(field, &state).await?),
            "template" => template = Some(read_text(field).await?),
            "params" => params = Some(read_text(field).await?),
            "preprocess" => preprocess = parse_flag(&read_text(field).await?)?,
            "sheet" => {
                let student_id = field
                    .file_name()
                    .and_then(|f| Path::new(f).file_stem())
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("sheet_{}", sheets.len() + 1));
                sheets.push((student_id, read_file(field, &state).await?));
            }
            _ => {}
        }
    }

    let question_paper = question_paper
        .ok_or_else(|| SheetError::InvalidRequest("Missing question_paper".to_string()))?;
    let answer_key =
        answer_key.ok_or_else(|| SheetError::InvalidRequest("Missing answer_key".to_string()))?;
    if sheets.is_empty() {
        return Err(SheetError::InvalidRequest(
            "At least one sheet is required".to_string(),
        ));
    }

    let template = match template {
        Some(json) => Template::from_json(&json)?,
        None => Template::default_layout(),
    };
    let pipeline = if preprocess {
        Some(pipeline_for(&state, params.as_deref())?)
    } else {
        None
    };

    let evaluator = {
        let pipeline = pipeline.clone();
        run_blocking(move || {
            let question_paper = load_page(&question_paper, pipeline.as_deref())?;
            let answer_key = load_page(&answer_key, pipeline.as_deref())?;
            SheetEvaluator::prepare(&question_paper, &answer_key, template, &collaborators)
        })
        .await?
    };
    let evaluator = Arc::new(evaluator);

    let jobs = sheets.into_iter().map(|(student_id, data)| {
        let evaluator = evaluator.clone();
        let pipeline = pipeline.clone();
        run_blocking(move || {
            let sheet = load_page(&data, pipeline.as_deref()).map_err(|e| match e {
                SheetError::InvalidImage(msg) => {
                    SheetError::InvalidImage(format!("Sheet {}: {}", student_id, msg))
                }
                other => other,
            })?;
            Ok(evaluator.evaluate(&student_id, &sheet))
        })
    });

    let reports = join_all(jobs)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        "Evaluated {} sheets in {}ms",
        reports.len(),
        start.elapsed().as_millis()
    );

    Ok(Json(reports))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_formats: SUPPORTED_FORMATS.iter().map(|s| s.to_string()).collect(),
        max_file_size_bytes: state.config.max_file_size,
        default_parameters: state.pipeline.params().clone(),
        recognizer_configured: state.collaborators.is_some(),
        model: state.config.gemini.as_ref().map(|g| g.model.clone()),
    })
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>, SheetError> {
    multipart
        .next_field()
        .await
        .map_err(|e| SheetError::InvalidRequest(format!("Failed to parse multipart: {}", e)))
}

async fn read_file(field: Field<'_>, state: &AppState) -> Result<Bytes, SheetError> {
    let name = field.name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(|s| s.to_string());

    let data = field.bytes().await.map_err(|e| {
        SheetError::InvalidRequest(format!("Failed to read {} data: {}", name, e))
    })?;

    if data.len() > state.config.max_file_size {
        return Err(SheetError::ImageTooLarge {
            size: data.len(),
            max: state.config.max_file_size,
        });
    }

    if let Some(mime) = content_type {
        if !SUPPORTED_FORMATS.contains(&mime.as_str()) {
            tracing::warn!("Received {} with content type: {}", name, mime);
        }
    }

    Ok(data)
}

async fn read_text(field: Field<'_>) -> Result<String, SheetError> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|e| SheetError::InvalidRequest(format!("Invalid {}: {}", name, e)))
}

fn parse_flag(value: &str) -> Result<bool, SheetError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(SheetError::InvalidRequest(format!(
            "Invalid preprocess flag: {}",
            other
        ))),
    }
}

/// The shared pipeline, or a fresh one when the request sends parameters
fn pipeline_for(state: &AppState, params: Option<&str>) -> Result<Arc<Pipeline>, SheetError> {
    match params.map(str::trim).filter(|p| !p.is_empty()) {
        Some(json) => Ok(Arc::new(Pipeline::new(EnhancementParameters::from_json(json)?)?)),
        None => Ok(state.pipeline.clone()),
    }
}

fn load_page(data: &[u8], pipeline: Option<&Pipeline>) -> Result<RgbImage, SheetError> {
    let image = preprocessing::decode(data)?;
    match pipeline {
        Some(pipeline) => Ok(pipeline.process(&image)?.image),
        None => Ok(image),
    }
}

/// Run CPU-bound or blocking work off the async runtime
async fn run_blocking<T, F>(work: F) -> Result<T, SheetError>
where
    F: FnOnce() -> Result<T, SheetError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SheetError::Internal(format!("Worker task failed: {}", e)))?
}
