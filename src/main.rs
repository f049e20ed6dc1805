//! HTTP runner for queued patient registrations.
//!
//! Accepts queue entries over REST and drives them through the registration handler. Handler
//! work is blocking file I/O, so each request runs it on tokio's blocking pool.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use regq_core::{
    CoreConfig, Lookups, QueueEntry, ReferenceData, RegistrationHandler, ValidationReport,
    constants::{DEFAULT_PATIENT_DATA_DIR, REGISTRATION_DISCRIMINATOR},
    payload_keys_from_env_value, preferred_identifier_type_from_env_value,
};

/// Application state shared across REST handlers.
#[derive(Clone)]
struct AppState {
    handler: Arc<RegistrationHandler>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
struct HealthRes {
    ok: bool,
    message: String,
}

/// A queue entry as submitted over HTTP.
#[derive(Debug, Deserialize, ToSchema)]
struct RegistrationReq {
    /// Queue entry id; generated when omitted.
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default = "default_discriminator")]
    discriminator: String,
    /// Registration payload, as a JSON object or as JSON text.
    #[schema(value_type = Object)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
struct RegistrationRes {
    temporary_id: String,
    assigned_id: String,
    reused: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
struct ValidationRes {
    valid: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
struct ErrorsRes {
    errors: Vec<String>,
}

fn default_discriminator() -> String {
    REGISTRATION_DISCRIMINATOR.to_string()
}

impl RegistrationReq {
    fn into_entry(self) -> QueueEntry {
        let payload = match self.payload {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        QueueEntry {
            uuid: self
                .uuid
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            discriminator: self.discriminator,
            payload,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health, process_registration, validate_registration),
    components(schemas(HealthRes, RegistrationReq, RegistrationRes, ValidationRes, ErrorsRes))
)]
struct ApiDoc;

/// Main entry point for the registration runner
///
/// # Environment Variables
/// - `REGQ_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `REGQ_PATIENT_DATA_DIR`: Directory for stored patients and ledger entries
///   (default: "patient_data")
/// - `REGQ_REFERENCE_DATA`: Path to the reference-data YAML (required)
/// - `REGQ_PAYLOAD_KEYS`: `short` or `qualified` (default: "short")
/// - `REGQ_PREFERRED_IDENTIFIER_TYPE`: Identifier type of the medical record number
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - any configuration value is invalid or the reference data cannot be loaded,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("regq=info".parse()?)
                .add_directive("regq_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("REGQ_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let patient_data_dir = std::env::var("REGQ_PATIENT_DATA_DIR")
        .unwrap_or_else(|_| DEFAULT_PATIENT_DATA_DIR.into());
    let reference_data = std::env::var("REGQ_REFERENCE_DATA")
        .map_err(|_| anyhow::anyhow!("REGQ_REFERENCE_DATA must point to a reference-data file"))?;

    let cfg = Arc::new(CoreConfig::new(
        PathBuf::from(patient_data_dir),
        payload_keys_from_env_value(std::env::var("REGQ_PAYLOAD_KEYS").ok())?,
        preferred_identifier_type_from_env_value(
            std::env::var("REGQ_PREFERRED_IDENTIFIER_TYPE").ok(),
        ),
    )?);
    let lookups = Lookups::from_reference_data(Arc::new(ReferenceData::load(
        PathBuf::from(reference_data).as_path(),
    )?));

    let state = AppState {
        handler: Arc::new(RegistrationHandler::with_file_stores(cfg, lookups)),
    };

    tracing::info!("++ Starting regq REST on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/registrations", post(process_registration))
        .route("/registrations/validate", post(validate_registration))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn rejected(report: ValidationReport) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorsRes {
            errors: report.messages(),
        }),
    )
        .into_response()
}

fn internal_error(err: tokio::task::JoinError) -> Response {
    tracing::error!("registration task failed: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "regq is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/registrations",
    request_body = RegistrationReq,
    responses(
        (status = 200, description = "Registration committed or reused", body = RegistrationRes),
        (status = 422, description = "Registration rejected", body = ErrorsRes),
        (status = 500, description = "Internal server error")
    )
)]
/// Validate a registration and commit it
///
/// Resubmitting an entry with the same temporary id returns the id assigned the first time.
///
/// # Errors
/// Returns `422 Unprocessable Entity` with every validation error if the registration is
/// rejected.
#[axum::debug_handler]
async fn process_registration(
    State(state): State<AppState>,
    Json(req): Json<RegistrationReq>,
) -> Response {
    let entry = req.into_entry();
    let handler = state.handler.clone();
    match tokio::task::spawn_blocking(move || handler.process(&entry)).await {
        Ok(Ok(outcome)) => Json(RegistrationRes {
            temporary_id: outcome.temporary_id().to_string(),
            assigned_id: outcome.assigned_id().to_string(),
            reused: outcome.is_reused(),
        })
        .into_response(),
        Ok(Err(report)) => rejected(report),
        Err(e) => internal_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/registrations/validate",
    request_body = RegistrationReq,
    responses(
        (status = 200, description = "Registration is valid", body = ValidationRes),
        (status = 422, description = "Registration rejected", body = ErrorsRes),
        (status = 500, description = "Internal server error")
    )
)]
/// Validate a registration without storing anything
#[axum::debug_handler]
async fn validate_registration(
    State(state): State<AppState>,
    Json(req): Json<RegistrationReq>,
) -> Response {
    let entry = req.into_entry();
    let handler = state.handler.clone();
    match tokio::task::spawn_blocking(move || handler.validate(&entry)).await {
        Ok(Ok(_)) => Json(ValidationRes { valid: true }).into_response(),
        Ok(Err(report)) => rejected(report),
        Err(e) => internal_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use regq_core::PayloadKeys;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const REFERENCE: &str = "identifier_types:\n  - name: AMRS Universal ID\nlocations:\n  - id: 1\n    name: Unknown Location\n";

    fn test_app(dir: &TempDir) -> Router {
        let cfg = Arc::new(
            CoreConfig::new(
                dir.path().to_path_buf(),
                PayloadKeys::Short,
                "AMRS Universal ID",
            )
            .expect("valid config"),
        );
        let lookups =
            Lookups::from_reference_data(Arc::new(ReferenceData::parse(REFERENCE).unwrap()));
        app(AppState {
            handler: Arc::new(RegistrationHandler::with_file_stores(cfg, lookups)),
        })
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn jane_doe() -> Value {
        json!({
            "patient": {
                "given_name": "Jane",
                "family_name": "Doe",
                "sex": "F",
                "birth_date": "1990-01-01",
                "uuid": "tmp-123"
            }
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = TempDir::new().unwrap();
        let response = test_app(&dir)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn registration_is_committed() {
        let dir = TempDir::new().unwrap();
        let (status, body) = post_json(
            test_app(&dir),
            "/registrations",
            json!({ "uuid": "entry-1", "payload": jane_doe() }),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["temporary_id"], "tmp-123");
        assert_eq!(body["reused"], false);
        assert_eq!(body["assigned_id"].as_str().map(str::len), Some(32));
    }

    #[tokio::test]
    async fn payload_may_be_sent_as_json_text() {
        let dir = TempDir::new().unwrap();
        let (status, body) = post_json(
            test_app(&dir),
            "/registrations/validate",
            json!({ "payload": jane_doe().to_string() }),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["valid"], true);
    }

    #[tokio::test]
    async fn rejected_registration_lists_errors() {
        let dir = TempDir::new().unwrap();
        let (status, body) = post_json(
            test_app(&dir),
            "/registrations",
            json!({ "payload": { "patient": { "birth_date": "yesterday", "uuid": "tmp-1" } } }),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let errors = body["errors"].as_array().expect("errors");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].as_str().unwrap().contains("malformed date"));
    }
}
