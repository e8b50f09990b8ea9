//! HTTP surface of the daemon.
//!
//! `/api/register`, `/api/employees/:id`, `/api/export-attendance`,
//! `/api/sink-report` and `/api/verify-manager` require the manager
//! credential; marking attendance and the health probe do not.

use crate::auth::{AuthError, ManagerAuth};
use crate::service::{AttendanceError, AttendanceService, FaceInput, ServiceStatus};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{DateTime, Utc};
use clockface_core::{report, AttendanceEvent, AttendanceKind, Descriptor, Employee};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub struct AppState {
    pub service: AttendanceService,
    pub auth: ManagerAuth,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let manager = Router::new()
        .route("/api/register", post(register))
        .route("/api/export-attendance", get(export_attendance))
        .route("/api/sink-report", get(sink_report))
        .route("/api/verify-manager", post(verify_manager))
        .route("/api/employees/:employee_id", get(get_employee))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_manager));

    Router::new()
        .merge(manager)
        .route("/api/mark-attendance", post(mark_attendance))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

// --- Errors ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthRequired,
    Forbidden,
    InvalidInput,
    NoFaceDetected,
    NoMatch,
    EmployeeNotFound,
    DuplicateIdentifier,
    NoData,
    PersistenceFailure,
    RecordFailed,
    ExportUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::NoMatch => StatusCode::NOT_FOUND,
            ErrorCode::EmployeeNotFound => StatusCode::NOT_FOUND,
            ErrorCode::DuplicateIdentifier => StatusCode::CONFLICT,
            ErrorCode::NoData => StatusCode::NOT_FOUND,
            ErrorCode::PersistenceFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RecordFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ExportUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    /// Employee the error refers to, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                message: message.into(),
                employee_id: None,
            },
        }
    }

    fn with_employee_id(mut self, id: impl Into<String>) -> Self {
        self.error.employee_id = Some(id.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.error.code.http_status(), Json(self)).into_response()
    }
}

impl From<AttendanceError> for ApiError {
    fn from(err: AttendanceError) -> Self {
        match err {
            AttendanceError::InvalidInput(msg) => ApiError::new(ErrorCode::InvalidInput, msg),
            AttendanceError::InvalidDescriptor(e) => {
                ApiError::new(ErrorCode::InvalidInput, format!("invalid descriptor: {e}"))
            }
            AttendanceError::NoFaceDetected => {
                ApiError::new(ErrorCode::NoFaceDetected, "No face detected")
            }
            AttendanceError::NoMatch => ApiError::new(ErrorCode::NoMatch, "Employee not recognized"),
            AttendanceError::DuplicateIdentifier(id) => ApiError::new(
                ErrorCode::DuplicateIdentifier,
                format!("Employee ID already registered: {id}"),
            )
            .with_employee_id(id),
            AttendanceError::Persistence(_) => {
                ApiError::new(ErrorCode::PersistenceFailure, "Storage unavailable")
            }
            AttendanceError::RecordFailed { employee_id, .. } => ApiError::new(
                ErrorCode::RecordFailed,
                "Face verified but attendance could not be recorded",
            )
            .with_employee_id(employee_id),
            AttendanceError::ExportUnavailable(e) => ApiError::new(
                ErrorCode::ExportUnavailable,
                format!("Report sink unavailable: {e}"),
            ),
            AttendanceError::Internal(_) => ApiError::new(ErrorCode::InternalError, "Server error"),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing => ApiError::new(ErrorCode::AuthRequired, "Unauthorized: No token provided"),
            AuthError::Invalid => ApiError::new(ErrorCode::Forbidden, "Forbidden: Invalid PIN"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(ErrorCode::InvalidInput, rejection.body_text())
    }
}

// --- Request / response bodies ---

/// Face payload: exactly one of a base64 image (optionally a `data:` URL)
/// or a ready-made descriptor.
#[derive(Debug, Deserialize)]
pub struct FacePayload {
    pub image: Option<String>,
    pub descriptor: Option<Vec<f32>>,
}

impl FacePayload {
    fn into_input(self) -> Result<FaceInput, ApiError> {
        match (self.image, self.descriptor) {
            (Some(_), Some(_)) => Err(ApiError::new(
                ErrorCode::InvalidInput,
                "provide either image or descriptor, not both",
            )),
            (None, None) => Err(ApiError::new(
                ErrorCode::InvalidInput,
                "image or descriptor is required",
            )),
            (None, Some(values)) => Ok(FaceInput::Descriptor(Descriptor::new(values))),
            (Some(image), None) => Ok(FaceInput::Image(decode_image(&image)?)),
        }
    }
}

fn decode_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidInput, "malformed data URL"))?,
        None => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::new(ErrorCode::InvalidInput, format!("image is not valid base64: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub employee_id: String,
    #[serde(flatten)]
    pub face: FacePayload,
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    #[serde(rename = "type")]
    pub kind: AttendanceKind,
    #[serde(flatten)]
    pub face: FacePayload,
}

/// Employee as returned to clients (descriptor omitted).
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    pub employee_id: String,
    pub name: String,
    pub enrolled_at: DateTime<Utc>,
}

impl From<&Employee> for EmployeeView {
    fn from(e: &Employee) -> Self {
        Self {
            employee_id: e.employee_id.clone(),
            name: e.name.clone(),
            enrolled_at: e.enrolled_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub seq: i64,
    pub employee_id: String,
    #[serde(rename = "type")]
    pub kind: AttendanceKind,
    pub timestamp: DateTime<Utc>,
}

impl From<&AttendanceEvent> for EventView {
    fn from(e: &AttendanceEvent) -> Self {
        Self {
            seq: e.seq,
            employee_id: e.employee_id.clone(),
            kind: e.kind,
            timestamp: e.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub employee: EmployeeView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkAttendanceResponse {
    pub message: String,
    pub employee: EmployeeView,
    pub event: EventView,
    /// Euclidean distance to the matched enrollment.
    pub distance: f32,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

// --- Handlers ---

async fn require_manager(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Err(err) = state.auth.check(header) {
        tracing::info!(path = %request.uri().path(), error = %err, "manager authorization rejected");
        return Err(err.into());
    }
    Ok(next.run(request).await)
}

async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(req) = body?;
    tracing::info!(employee_id = %req.employee_id, "register requested");
    let face = req.face.into_input()?;
    let employee = state
        .service
        .enroll(&req.name, &req.employee_id, face)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Employee registered successfully".into(),
            employee: EmployeeView::from(&employee),
        }),
    ))
}

async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MarkAttendanceRequest>, JsonRejection>,
) -> Result<Json<MarkAttendanceResponse>, ApiError> {
    let Json(req) = body?;
    let face = req.face.into_input()?;
    let verification = state.service.verify_and_record(face, req.kind).await?;
    Ok(Json(MarkAttendanceResponse {
        message: format!("Success {}", req.kind),
        employee: EmployeeView::from(&verification.employee),
        event: EventView::from(&verification.event),
        distance: verification.distance,
    }))
}

async fn export_attendance(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let rows = state.service.export_report().await?;
    if rows.is_empty() {
        return Err(ApiError::new(ErrorCode::NoData, "No data found"));
    }
    Ok(csv_response(report::render_rows(&rows)))
}

async fn sink_report(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let rows = state.service.fetch_sink_report().await?;
    if rows.is_empty() {
        return Err(ApiError::new(ErrorCode::NoData, "No data found"));
    }
    Ok(csv_response(report::render_raw(&rows)))
}

async fn get_employee(
    State(state): State<Arc<AppState>>,
    Path(employee_id): Path<String>,
) -> Result<Json<EmployeeView>, ApiError> {
    match state.service.find_employee(&employee_id).await? {
        Some(employee) => Ok(Json(EmployeeView::from(&employee))),
        None => Err(ApiError::new(
            ErrorCode::EmployeeNotFound,
            format!("No employee with ID {employee_id}"),
        )
        .with_employee_id(employee_id)),
    }
}

async fn verify_manager() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let status = state.service.status().await?;
    Ok(Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
        status,
    }))
}

fn csv_response(body: String) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/csv"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        header::HeaderValue::from_static("attachment; filename=\"attendance_report.csv\""),
    );
    (headers, body).into_response()
}
