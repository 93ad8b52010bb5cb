use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::admissions::router::{self, StatusRequest};
use crate::workflows::admissions::{AdmissionStatus, InMemoryAdmissionsStore};

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn create_slot_route_returns_created_and_rejects_overlaps() {
    let h = harness();
    let body = json!({
        "date": day(1),
        "start_time": "09:00:00",
        "end_time": "09:30:00",
        "capacity": 2
    });

    let response = h
        .router()
        .oneshot(json_request("POST", "/api/v1/admissions/slots", body))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["capacity"], json!(2));
    assert_eq!(payload["status"], json!("available"));

    let overlapping = json!({
        "date": day(1),
        "start_time": "09:15:00",
        "end_time": "09:45:00"
    });
    let response = h
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/admissions/slots",
            overlapping,
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], json!("slot_overlap"));
}

#[tokio::test]
async fn book_route_distinguishes_new_and_repeated_bookings() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 2);
    let admission = h.admit("mehta@example.com", "Aarav", "Class 5");
    let uri = format!("/api/v1/admissions/slots/{}/book", slot.id);
    let body = json!({ "admission_id": admission.id });

    let response = h
        .router()
        .oneshot(json_request("POST", &uri, body.clone()))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["outcome"], json!("created"));
    assert_eq!(payload["slot"]["booked_count"], json!(1));

    let response = h
        .router()
        .oneshot(json_request("POST", &uri, body))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["outcome"], json!("unchanged"));
    h.assert_counts_consistent();
}

#[tokio::test]
async fn unknown_slot_is_not_found() {
    let h = harness();

    let response = h
        .router()
        .oneshot(empty_request("GET", "/api/v1/admissions/slots/slot-missing"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], json!("slot_not_found"));
}

#[tokio::test]
async fn full_slot_conflict_carries_the_current_slot() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 1);
    h.admit_and_book("rao@example.com", "Kabir", &slot);
    let late = h.admit("mehta@example.com", "Aarav", "Class 5");

    let response = h
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/admissions/slots/{}/book", slot.id),
            json!({ "admission_id": late.id }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], json!("slot_unavailable"));
    assert_eq!(payload["slot"]["status"], json!("full"));
    assert_eq!(payload["slot"]["remaining"], json!(0));
}

#[tokio::test]
async fn no_show_outside_the_slot_window_is_unprocessable() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 1);
    let admission = h.admit_and_book("mehta@example.com", "Aarav", &slot);
    let booking = h.booking_of(&admission.id).expect("booking stored");

    let response = h
        .router()
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/admissions/bookings/{}/no-show", booking.id),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], json!("not_during_slot"));
}

#[tokio::test]
async fn cancelling_without_a_destination_asks_for_manual_resolution() {
    let h = harness();
    let slot = h.slot(day(1), (9, 0), (9, 30), 1);
    h.admit_and_book("mehta@example.com", "Aarav", &slot);

    let response = h
        .router()
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/admissions/slots/{}/cancel", slot.id),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], json!("no_future_slot_available"));
    assert_eq!(payload["manual_resolution"], json!(true));
    assert_eq!(h.stored_slot(&slot).booked_count, 1);
}

#[tokio::test]
async fn cancel_booking_route_requires_the_matching_slot() {
    let h = harness();
    let booked = h.slot(day(1), (9, 0), (9, 30), 1);
    let other = h.slot(day(1), (10, 0), (10, 30), 1);
    let admission = h.admit_and_book("mehta@example.com", "Aarav", &booked);
    let booking = h.booking_of(&admission.id).expect("booking stored");

    let response = h
        .router()
        .oneshot(empty_request(
            "DELETE",
            &format!("/api/v1/admissions/slots/{}/bookings/{}", other.id, booking.id),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .router()
        .oneshot(empty_request(
            "DELETE",
            &format!(
                "/api/v1/admissions/slots/{}/bookings/{}",
                booked.id, booking.id
            ),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["slot"]["booked_count"], json!(0));
    assert!(h.booking_of(&admission.id).is_none());
}

#[tokio::test]
async fn convert_route_returns_the_sanitized_admission() {
    let h = harness();
    let mut request = enquiry("Mehta@Example.com", "Aarav", "Class 5");
    request
        .additional_fields
        .insert("guardian_phone".to_string(), json!("+91 98450 00000"));

    let response = h
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/admissions/enquiries/convert",
            serde_json::to_value(&request).unwrap(),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["admission"]["status"], json!("submitted"));
    assert_eq!(payload["admission"]["grade"], json!("Class 5"));
    assert!(payload["admission"].get("parent_email").is_none());
    assert!(payload["admission"].get("additional_fields").is_none());
    assert!(payload["booking"].is_null());
}

#[tokio::test]
async fn decide_handler_applies_the_transition() {
    let h = harness();
    let admission = h.admit("mehta@example.com", "Aarav", "Class 5");

    let response = router::decide_handler::<InMemoryAdmissionsStore, RecordingDispatcher>(
        State(Arc::clone(&h.service)),
        Path(admission.id.0.clone()),
        axum::Json(StatusRequest {
            status: AdmissionStatus::Approved,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["status"], json!("approved"));

    let response = router::decide_handler::<InMemoryAdmissionsStore, RecordingDispatcher>(
        State(Arc::clone(&h.service)),
        Path(admission.id.0.clone()),
        axum::Json(StatusRequest {
            status: AdmissionStatus::Draft,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["code"], json!("invalid_transition"));
}

#[tokio::test]
async fn occupancy_route_reports_grade_usage() {
    let h = harness();
    h.admit("a@example.com", "Asha", "Nursery");

    let response = h
        .router()
        .oneshot(empty_request(
            "GET",
            "/api/v1/admissions/grades/Nursery/occupancy",
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["occupied"], json!(1));
    assert_eq!(payload["total_seats"], json!(2));
}
