use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::booking::BookingOutcome;
use super::domain::{AdmissionId, AdmissionStatus, BookingId, SlotId, TokenId};
use super::error::{ErrorKind, SchedulingError};
use super::intake::EnquiryConversion;
use super::notify::NotificationDispatcher;
use super::planner::{BulkSlotRequest, SlotRequest, SlotUpdate};
use super::service::AdmissionsService;
use super::store::{AdmissionsStore, StoreError};

type SharedService<S, N> = Arc<AdmissionsService<S, N>>;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlotListQuery {
    #[serde(default)]
    pub(crate) date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BookRequest {
    pub(crate) admission_id: AdmissionId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParentRescheduleRequest {
    pub(crate) slot_id: SlotId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    pub(crate) status: AdmissionStatus,
}

/// Router exposing slot administration, booking, and admission endpoints.
pub fn admissions_router<S, N>(service: Arc<AdmissionsService<S, N>>) -> Router
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    Router::new()
        .route(
            "/api/v1/admissions/slots",
            post(create_slot_handler::<S, N>).get(list_slots_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/slots/bulk",
            post(bulk_slots_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/slots/:slot_id",
            get(slot_handler::<S, N>)
                .put(update_slot_handler::<S, N>)
                .delete(delete_slot_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/slots/:slot_id/book",
            post(book_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/slots/:slot_id/bookings/:booking_id",
            delete(cancel_booking_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/slots/:slot_id/cancel",
            post(cancel_slot_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/bookings/:booking_id/no-show",
            post(no_show_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/reschedule-options/:token_id",
            get(reschedule_options_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/reschedule-parent/:token_id",
            post(reschedule_parent_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/enquiries/convert",
            post(convert_enquiry_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/reminders/sweep",
            post(reminder_sweep_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/grades/:grade/occupancy",
            get(occupancy_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/applications/:admission_id",
            get(admission_handler::<S, N>),
        )
        .route(
            "/api/v1/admissions/applications/:admission_id/status",
            post(decide_handler::<S, N>),
        )
        .with_state(service)
}

/// Map an engine failure onto a status code and JSON body. Conflict and state failures
/// carry the slot as it currently stands.
pub(crate) fn error_response(err: SchedulingError) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        // Slot creation reports schedule clashes as a bad request.
        ErrorKind::Conflict if matches!(err, SchedulingError::SlotOverlap { .. }) => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Conflict | ErrorKind::Exhaustion => StatusCode::CONFLICT,
        ErrorKind::State => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Infrastructure => match &err {
            SchedulingError::Contention { .. }
            | SchedulingError::Store(StoreError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };

    let mut payload = json!({
        "error": err.to_string(),
        "code": err.code(),
    });
    if let Some(slot) = err.slot() {
        payload["slot"] = json!(slot);
    }
    if err.kind() == ErrorKind::Exhaustion {
        payload["manual_resolution"] = json!(true);
    }
    if status.is_server_error() {
        error!(code = err.code(), error = %err, "admissions request failed");
    }

    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(
    status: StatusCode,
    result: Result<T, SchedulingError>,
) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn create_slot_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Json(request): Json<SlotRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::CREATED, service.create_slot(request))
}

pub(crate) async fn list_slots_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Query(query): Query<SlotListQuery>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.slots(query.date))
}

pub(crate) async fn bulk_slots_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Json(request): Json<BulkSlotRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::CREATED, service.generate_slots(request))
}

pub(crate) async fn slot_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(slot_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.slot(&SlotId(slot_id)))
}

pub(crate) async fn update_slot_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(slot_id): Path<String>,
    Json(update): Json<SlotUpdate>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.update_slot(&SlotId(slot_id), update))
}

pub(crate) async fn delete_slot_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(slot_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.delete_slot(&SlotId(slot_id)))
}

pub(crate) async fn book_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(slot_id): Path<String>,
    Json(request): Json<BookRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    match service.book(&request.admission_id, &SlotId(slot_id)) {
        Ok(receipt) => {
            let status = match receipt.outcome {
                BookingOutcome::Created => StatusCode::CREATED,
                BookingOutcome::Unchanged | BookingOutcome::Rescheduled => StatusCode::OK,
            };
            (status, Json(receipt)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_booking_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path((slot_id, booking_id)): Path<(String, String)>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    let slot_id = SlotId(slot_id);
    let booking_id = BookingId(booking_id);
    match service.booking(&booking_id) {
        Ok(booking) if booking.slot_id == slot_id => {
            respond(StatusCode::OK, service.cancel_booking(&booking_id))
        }
        Ok(_) => error_response(SchedulingError::BookingNotFound(booking_id)),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_slot_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(slot_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.cancel_slot(&SlotId(slot_id)))
}

pub(crate) async fn no_show_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(booking_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.record_no_show(&BookingId(booking_id)))
}

pub(crate) async fn reschedule_options_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(token_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.reschedule_options(&TokenId(token_id)))
}

pub(crate) async fn reschedule_parent_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(token_id): Path<String>,
    Json(request): Json<ParentRescheduleRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service.reschedule_for_parent(&TokenId(token_id), &request.slot_id),
    )
}

pub(crate) async fn convert_enquiry_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Json(request): Json<EnquiryConversion>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    match service.convert_enquiry(request) {
        Ok(outcome) => {
            let payload = json!({
                "admission": outcome.admission.view(),
                "seat": outcome.seat,
                "booking": outcome.booking,
                "booking_error": outcome.booking_error,
            });
            (StatusCode::CREATED, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn admission_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(admission_id): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service
            .admission(&AdmissionId(admission_id))
            .map(|admission| admission.view()),
    )
}

pub(crate) async fn decide_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(admission_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(
        StatusCode::OK,
        service
            .decide(&AdmissionId(admission_id), request.status)
            .map(|admission| admission.view()),
    )
}

pub(crate) async fn occupancy_handler<S, N>(
    State(service): State<SharedService<S, N>>,
    Path(grade): Path<String>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.grade_occupancy(&grade))
}

pub(crate) async fn reminder_sweep_handler<S, N>(
    State(service): State<SharedService<S, N>>,
) -> Response
where
    S: AdmissionsStore + 'static,
    N: NotificationDispatcher + 'static,
{
    respond(StatusCode::OK, service.send_reminders())
}
