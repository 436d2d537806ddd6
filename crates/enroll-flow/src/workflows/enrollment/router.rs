use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::documents::{FileUpload, SlotKey, StorageGateway};
use super::domain::{ApplicationRecord, ProgramId, UserId};
use super::gates::{
    FormStatusProvider, PaymentDetails, PaymentError, PaymentMethod, PaymentProvider,
};
use super::persistence::{PersistenceError, StepStore};
use super::service::{EnrollmentService, EnrollmentServiceError, StepNavigation};

/// Router builder exposing the enrollment wizard over HTTP.
pub fn enrollment_router<S, G, P, F>(service: Arc<EnrollmentService<S, G, P, F>>) -> Router
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    Router::new()
        .route(
            "/api/v1/enrollment/:user_id",
            get(overview_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/steps/:step",
            get(open_step_handler::<S, G, P, F>).put(save_draft_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/steps/:step/advance",
            post(advance_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/documents",
            get(documents_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/documents/:slot/:file_name",
            post(upload_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/payment/intent",
            post(payment_intent_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/payment/confirm",
            post(payment_confirm_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/forms/refresh",
            post(forms_refresh_handler::<S, G, P, F>),
        )
        .route(
            "/api/v1/enrollment/:user_id/program",
            put(switch_program_handler::<S, G, P, F>),
        )
        .route("/api/v1/programs", get(programs_handler::<S, G, P, F>))
        .with_state(service)
}

fn error_response(error: EnrollmentServiceError) -> Response {
    let (status, message) = match &error {
        EnrollmentServiceError::Persistence(PersistenceError::MissingRecord) => {
            (StatusCode::NOT_FOUND, error.to_string())
        }
        EnrollmentServiceError::Persistence(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            // Local form state survives a failed save; the client retries
            // without re-entering anything.
            format!("{error}; your entries were kept, please retry"),
        ),
        EnrollmentServiceError::Document(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        EnrollmentServiceError::Payment(PaymentError::Declined(reason)) => (
            StatusCode::PAYMENT_REQUIRED,
            format!("payment declined: {reason}; you can retry with different details"),
        ),
        EnrollmentServiceError::Payment(PaymentError::Provider(_)) => (
            StatusCode::BAD_GATEWAY,
            "payment service is misconfigured or unavailable; your card was not at fault"
                .to_string(),
        ),
        EnrollmentServiceError::UnknownStep(_) | EnrollmentServiceError::UnknownProgram(_) => {
            (StatusCode::NOT_FOUND, error.to_string())
        }
    };

    (status, axum::Json(json!({ "error": message }))).into_response()
}

pub(crate) async fn overview_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path(user_id): Path<String>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.overview(&UserId(user_id)).await {
        Ok(overview) => (StatusCode::OK, axum::Json(overview)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn open_step_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path((user_id, step)): Path<(String, String)>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.open_step(&UserId(user_id), &step).await {
        Ok(StepNavigation::Granted { step, record }) => (
            StatusCode::OK,
            axum::Json(json!({
                "step": step.slug(),
                "record": record,
            })),
        )
            .into_response(),
        Ok(StepNavigation::Redirect { to }) => (
            StatusCode::SEE_OTHER,
            [(header::LOCATION, format!("/candidature/{}", to.slug()))],
            axum::Json(json!({ "redirect_to": to.slug() })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn save_draft_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path((user_id, step)): Path<(String, String)>,
    axum::Json(form): axum::Json<ApplicationRecord>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.save_draft(&UserId(user_id), &step, &form).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(json!({ "saved": outcome }))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn advance_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path((user_id, step)): Path<(String, String)>,
    axum::Json(form): axum::Json<ApplicationRecord>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.save_and_advance(&UserId(user_id), &step, &form).await {
        Ok(outcome) => (
            StatusCode::OK,
            axum::Json(json!({
                "saved": outcome.saved,
                "next": outcome.next.slug(),
                "record": outcome.record.status_view(),
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn documents_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path(user_id): Path<String>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.documents(&UserId(user_id)).await {
        Ok(inventory) => (StatusCode::OK, axum::Json(inventory)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn upload_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path((user_id, slot, file_name)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    let Some(slot) = SlotKey::from_slug(&slot) else {
        let payload = json!({ "error": format!("unknown document slot '{slot}'") });
        return (StatusCode::NOT_FOUND, axum::Json(payload)).into_response();
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);

    let file = FileUpload::new(file_name, content_type, body.to_vec());
    match service.upload_document(&UserId(user_id), slot, file).await {
        Ok(receipt) => (StatusCode::CREATED, axum::Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentIntentRequest {
    pub(crate) method: PaymentMethod,
}

pub(crate) async fn payment_intent_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path(user_id): Path<String>,
    axum::Json(request): axum::Json<PaymentIntentRequest>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.start_payment(&UserId(user_id), request.method).await {
        Ok(intent) => (StatusCode::OK, axum::Json(intent)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentConfirmRequest {
    pub(crate) client_secret: String,
    #[serde(default)]
    pub(crate) details: PaymentDetails,
}

pub(crate) async fn payment_confirm_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path(user_id): Path<String>,
    axum::Json(request): axum::Json<PaymentConfirmRequest>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service
        .confirm_payment(&UserId(user_id), &request.client_secret, &request.details)
        .await
    {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn forms_refresh_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path(user_id): Path<String>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service.refresh_form_status(&UserId(user_id)).await {
        Ok(status) => (StatusCode::OK, axum::Json(status)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SwitchProgramRequest {
    pub(crate) program: String,
}

pub(crate) async fn switch_program_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
    Path(user_id): Path<String>,
    axum::Json(request): axum::Json<SwitchProgramRequest>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    match service
        .switch_program(&UserId(user_id), &ProgramId(request.program))
        .await
    {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn programs_handler<S, G, P, F>(
    State(service): State<Arc<EnrollmentService<S, G, P, F>>>,
) -> Response
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    (StatusCode::OK, axum::Json(service.programs())).into_response()
}
