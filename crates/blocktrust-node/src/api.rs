//! HTTP API server for the attestation node.
//!
//! Every error leaves as `{code, message}` with a status derived from the
//! code; internal failures carry no upstream text.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use blocktrust_core::{AttestationView, CoreError, Credential, ErrorBody, ErrorCode, OwnerId};
use blocktrust_credentials::identity::PAYLOAD_DIGEST_HEADER;
use blocktrust_credentials::{
    DecoyOutcome, FailsafeOutcome, FailsafeStatus, InvalidationOutcome, VerificationReport,
    VerificationRequest,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::engine::CredentialHistory;
use crate::error::NodeError;
use crate::state::NodeState;

// --- Request / response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub digest: String,
    #[serde(default)]
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NormalizeResponse {
    pub digest: String,
    pub algorithm: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttestRequest {
    pub owner_id: String,
    pub secret: String,
    pub digest: String,
    #[serde(default)]
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigureFailsafeRequest {
    pub owner_id: String,
    pub primary_secret: String,
    pub duress_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigureFailsafeResponse {
    pub configured: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerFailsafeRequest {
    pub owner_id: String,
    pub presented_secret: String,
    pub digest: String,
    #[serde(default)]
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoyStatus {
    Created,
    Failed,
}

/// Failsafe result as shown to callers: the decoy only in its public form.
#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerFailsafeResponse {
    pub decoy_status: DecoyStatus,
    pub decoy_attestation: Option<AttestationView>,
    pub invalidation_outcome: InvalidationOutcome,
}

impl From<FailsafeOutcome> for TriggerFailsafeResponse {
    fn from(outcome: FailsafeOutcome) -> Self {
        let (decoy_status, decoy_attestation) = match outcome.decoy {
            DecoyOutcome::Created { attestation } => {
                (DecoyStatus::Created, Some(attestation.public_view()))
            }
            DecoyOutcome::Failed { .. } => (DecoyStatus::Failed, None),
        };
        Self {
            decoy_status,
            decoy_attestation,
            invalidation_outcome: outcome.invalidation,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeRequest {
    pub expected_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    /// The active credential when the event granted one.
    pub credential: Option<Credential>,
}

/// Error response carrying the HTTP status for its code.
pub struct ApiError(NodeError);

impl<E: Into<NodeError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidDigest
        | ErrorCode::MalformedAttestation
        | ErrorCode::InvalidSecret => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict | ErrorCode::CredentialInvalidated => StatusCode::CONFLICT,
        ErrorCode::WrongNetwork
        | ErrorCode::UnsupportedContext
        | ErrorCode::SubmissionFailed
        | ErrorCode::SubmissionRejected => StatusCode::BAD_GATEWAY,
        ErrorCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: ErrorBody = self.0.to_body();
        let status = status_for(body.code);
        if status.is_server_error() {
            tracing::error!(code = ?body.code, error = %self.0, "request failed");
        } else {
            tracing::debug!(code = ?body.code, error = %self.0, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

impl From<JsonRejection> for NodeError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(_) => "request body is missing fields or has fields of the wrong type",
            JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON",
            JsonRejection::MissingJsonContentType(_) => "expected a request with content-type application/json",
            _ => "request body could not be read",
        };
        CoreError::MalformedAttestation(message.into()).into()
    }
}

/// `Json` whose rejections leave as structured `{code, message}` bodies.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

fn owner(raw: &str) -> Result<OwnerId, ApiError> {
    Ok(OwnerId::new(raw)?)
}

// --- Handlers ---

async fn handle_health(State(state): State<Arc<NodeState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn handle_normalize(
    State(state): State<Arc<NodeState>>,
    ApiJson(req): ApiJson<NormalizeRequest>,
) -> ApiResult<NormalizeResponse> {
    let digest = state
        .engine
        .normalize(&req.digest, req.algorithm.as_deref())?;
    Ok(Json(NormalizeResponse {
        digest: digest.to_hex(),
        algorithm: digest.algorithm().as_str().to_string(),
    }))
}

async fn handle_attest(
    State(state): State<Arc<NodeState>>,
    ApiJson(req): ApiJson<AttestRequest>,
) -> ApiResult<AttestationView> {
    let owner = owner(&req.owner_id)?;
    let digest = state
        .engine
        .normalize(&req.digest, req.algorithm.as_deref())?;
    let view = state.engine.attest(&owner, &req.secret, digest).await?;
    Ok(Json(view))
}

async fn handle_verify(
    State(state): State<Arc<NodeState>>,
    ApiJson(req): ApiJson<VerificationRequest>,
) -> ApiResult<VerificationReport> {
    Ok(Json(state.engine.verify(&req).await?))
}

async fn handle_get_attestation(
    State(state): State<Arc<NodeState>>,
    Path(tx_ref): Path<String>,
) -> ApiResult<AttestationView> {
    Ok(Json(state.engine.attestation_by_tx(&tx_ref)?))
}

async fn handle_configure_failsafe(
    State(state): State<Arc<NodeState>>,
    ApiJson(req): ApiJson<ConfigureFailsafeRequest>,
) -> ApiResult<ConfigureFailsafeResponse> {
    let owner = owner(&req.owner_id)?;
    state
        .engine
        .configure_failsafe(&owner, &req.primary_secret, &req.duress_secret)?;
    Ok(Json(ConfigureFailsafeResponse { configured: true }))
}

async fn handle_trigger_failsafe(
    State(state): State<Arc<NodeState>>,
    ApiJson(req): ApiJson<TriggerFailsafeRequest>,
) -> ApiResult<TriggerFailsafeResponse> {
    let owner = owner(&req.owner_id)?;
    let digest = state
        .engine
        .normalize(&req.digest, req.algorithm.as_deref())?;
    let outcome = state
        .engine
        .trigger_failsafe(&owner, &req.presented_secret, digest)?;
    Ok(Json(outcome.into()))
}

async fn handle_failsafe_status(
    State(state): State<Arc<NodeState>>,
    Path(owner_id): Path<String>,
) -> ApiResult<FailsafeStatus> {
    let owner = owner(&owner_id)?;
    Ok(Json(state.engine.failsafe_status(&owner)))
}

async fn handle_identity_verified(
    State(state): State<Arc<NodeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<IdentityResponse> {
    let digest = headers
        .get(PAYLOAD_DIGEST_HEADER)
        .and_then(|v| v.to_str().ok());
    let credential = state.engine.identity_verified(&body, digest)?;
    Ok(Json(IdentityResponse { credential }))
}

async fn handle_revoke(
    State(state): State<Arc<NodeState>>,
    Path(owner_id): Path<String>,
    ApiJson(req): ApiJson<RevokeRequest>,
) -> ApiResult<Credential> {
    let owner = owner(&owner_id)?;
    Ok(Json(state.engine.revoke(&owner, req.expected_version)?))
}

async fn handle_credentials(
    State(state): State<Arc<NodeState>>,
    Path(owner_id): Path<String>,
) -> ApiResult<CredentialHistory> {
    let owner = owner(&owner_id)?;
    Ok(Json(state.engine.credential_history(&owner)?))
}

// --- Server ---

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/digests/normalize", post(handle_normalize))
        .route("/api/v1/attestations", post(handle_attest))
        .route("/api/v1/attestations/verify", post(handle_verify))
        .route("/api/v1/attestations/{tx_ref}", get(handle_get_attestation))
        .route("/api/v1/failsafe/configure", post(handle_configure_failsafe))
        .route("/api/v1/failsafe/trigger", post(handle_trigger_failsafe))
        .route("/api/v1/failsafe/{owner}", get(handle_failsafe_status))
        .route("/api/v1/identity/verified", post(handle_identity_verified))
        .route("/api/v1/credentials/{owner}/revoke", post(handle_revoke))
        .route("/api/v1/credentials/{owner}", get(handle_credentials))
        .with_state(state)
}

pub async fn start_api_server(
    listen_addr: SocketAddr,
    state: Arc<NodeState>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(%listen_addr, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
