//! Operator API: direct registration, booking lookup, and slot availability.

use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, NaiveTime, Utc};
use intake_core::{is_email, title_case, Gender, PhoneRules, ReservationError, ReservationRequest};
use serde::Deserialize;

/// Body of `POST /api/v1/bookings`.
#[derive(Debug, Deserialize)]
pub(crate) struct BookingBody {
    first_name: String,
    last_name: String,
    gender: String,
    address: String,
    #[serde(default)]
    email: Option<String>,
    phone: String,
    department: String,
    /// `YYYY-MM-DD`
    date: String,
    /// `HH:MM`
    time: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "status": "error", "error": message.into() })),
    )
        .into_response()
}

impl BookingBody {
    fn into_request(self, rules: &PhoneRules, today: NaiveDate) -> Result<ReservationRequest, String> {
        let first_name = title_case(&self.first_name);
        let last_name = title_case(&self.last_name);
        if first_name.is_empty() || last_name.is_empty() {
            return Err("first_name and last_name are required".to_string());
        }
        let gender = Gender::parse(&self.gender).ok_or("gender must be male, female or other")?;
        let address = self.address.trim().to_string();
        if address.is_empty() {
            return Err("address is required".to_string());
        }
        let email = match self.email.as_deref().map(str::trim) {
            None | Some("") => String::new(),
            Some(e) if is_email(e) => e.to_lowercase(),
            Some(_) => return Err("email is not valid".to_string()),
        };
        let phone = rules.normalize_phone(&self.phone).ok_or("phone is not valid")?;
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|_| "date must be YYYY-MM-DD".to_string())?;
        if date < today {
            return Err("date is in the past".to_string());
        }
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|_| "time must be HH:MM".to_string())?;
        Ok(ReservationRequest {
            first_name,
            last_name,
            gender,
            address,
            email,
            phone,
            department: self.department,
            date,
            time,
        })
    }
}

/// POST /api/v1/bookings – reserves a slot outside the chat flow.
pub(crate) async fn create(State(state): State<AppState>, Json(body): Json<BookingBody>) -> Response {
    let rules = PhoneRules {
        country_code: state.config.country_code.clone(),
        local_digits: state.config.local_phone_digits,
    };
    let now = Utc::now();
    let request = match body.into_request(&rules, now.date_naive()) {
        Ok(r) => r,
        Err(message) => return bad_request(message),
    };
    match state.engine.reservations().reserve(&request, now) {
        Ok(record) => (StatusCode::CREATED, Json(serde_json::json!(record))).into_response(),
        Err(ReservationError::SlotFull) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "status": "error", "error": "slot is full" })),
        )
            .into_response(),
        Err(ReservationError::InvalidRequest(message)) => bad_request(message),
        Err(ReservationError::Backend(cause)) => {
            tracing::error!(target: "intake::gateway", %cause, "direct registration failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "error", "error": "storage unavailable" })),
            )
                .into_response()
        }
    }
}

/// GET /api/v1/bookings/:id – `1042` and `P1042` resolve to the same record.
pub(crate) async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.find_booking(&id) {
        Ok(Some(record)) => Json(serde_json::json!(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "error": "booking not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(target: "intake::gateway", booking = %id, error = %e, "booking lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /api/v1/slots/:department/:date – reserved count and capacity per time point.
pub(crate) async fn availability(
    State(state): State<AppState>,
    Path((department, date)): Path<(String, String)>,
) -> Response {
    let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
        return bad_request("date must be YYYY-MM-DD");
    };
    match state.engine.reservations().availability(&department, date) {
        Ok(slots) => {
            let rows: Vec<serde_json::Value> = slots
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "time": s.key.time.format("%H:%M").to_string(),
                        "reserved": s.reserved_count,
                        "capacity": s.capacity,
                        "available": !s.is_full(),
                    })
                })
                .collect();
            Json(serde_json::json!({
                "department": slots.first().map(|s| s.key.department.clone()).unwrap_or(department),
                "date": date.format("%Y-%m-%d").to_string(),
                "slots": rows,
            }))
            .into_response()
        }
        Err(ReservationError::InvalidRequest(message)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "error": message })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(target: "intake::gateway", error = %e, "availability read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
