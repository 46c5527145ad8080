//! JSON API. The acting user is named by the `x-user-id` header; requests
//! without it run anonymously and may only register guest accounts.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, MatchedPath, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use futures::{stream, Stream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::{EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::policy::Actor;
use crate::service::HotelService;

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    service: Arc<HotelService>,
}

pub fn router(service: Arc<HotelService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/health", get(health))
        .route("/users", get(list_users).post(register_user))
        .route("/users/:id", get(get_user))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/:id", get(get_room).patch(update_room).delete(delete_room))
        .route("/rooms/:id/maintenance", post(start_maintenance).delete(end_maintenance))
        .route("/rooms/:id/availability", get(room_availability))
        .route("/rooms/:id/free-windows", get(room_free_windows))
        .route("/rooms/:id/bookings", get(room_bookings))
        .route("/rooms/:id/reviews", get(room_reviews))
        .route("/rooms/:id/events", get(room_events))
        .route("/availability", get(search_availability))
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/confirm", post(confirm_booking))
        .route("/bookings/:id/check-in", post(check_in))
        .route("/bookings/:id/check-out", post(check_out))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/payments", get(list_payments).post(record_payment))
        .route("/bookings/:id/refunds", get(list_refunds).post(request_refund))
        .route("/bookings/:id/reviews", post(post_review))
        .route("/payments/:id/complete", post(complete_payment))
        .route("/payments/:id/fail", post(fail_payment))
        .route("/refunds/:id/complete", post(complete_refund))
        .route("/dashboard", get(dashboard))
        .route_layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    metrics::counter!(observability::HTTP_REQUESTS_TOTAL, "route" => route, "status" => status).increment(1);
    response
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    /// Malformed path, query or body.
    BadRequest(String),
    /// `x-user-id` is malformed or names no registered user.
    Unauthenticated(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Forbidden(denied) if denied.role.is_none() => StatusCode::UNAUTHORIZED,
        _ => match err.kind() {
            ErrorKind::InvalidInterval | ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unavailable
            | ErrorKind::ConcurrencyConflict
            | ErrorKind::InvalidTransition
            | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Engine(e) => {
                let status = status_for(&e);
                let code = if status == StatusCode::UNAUTHORIZED {
                    "UNAUTHENTICATED"
                } else {
                    e.kind().code()
                };
                (status, code, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorKind::Invalid.code(), msg),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", msg),
        };
        if status.is_server_error() {
            tracing::error!(code, "{message}");
        }
        (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn created<T: Serialize>(value: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(value))
}

// ── Extractors ───────────────────────────────────────────────────

/// The user named by `x-user-id`, if any.
pub struct CurrentActor(pub Option<Actor>);

impl CurrentActor {
    fn get(&self) -> Option<&Actor> {
        self.0.as_ref()
    }

    fn id(&self) -> Option<Ulid> {
        self.0.map(|a| a.id)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_HEADER) else {
            return Ok(CurrentActor(None));
        };
        let id = value
            .to_str()
            .ok()
            .and_then(|s| Ulid::from_string(s.trim()).ok())
            .ok_or_else(|| ApiError::Unauthenticated(format!("malformed {USER_HEADER} header")))?;
        let actor = state
            .service
            .actor(id)
            .ok_or_else(|| ApiError::Unauthenticated(format!("unknown user {id}")))?;
        Ok(CurrentActor(Some(actor)))
    }
}

/// A ULID path segment.
pub struct Id(pub Ulid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Id {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Ulid>::from_request_parts(parts, state)
            .await
            .map_err(|e: PathRejection| ApiError::BadRequest(e.body_text()))?;
        Ok(Id(id))
    }
}

/// Query string with the uniform error body.
pub struct Params<T>(pub T);

#[async_trait]
impl<T: DeserializeOwned + Send, S: Send + Sync> FromRequestParts<S> for Params<T> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e: QueryRejection| ApiError::BadRequest(e.body_text()))?;
        Ok(Params(value))
    }
}

/// JSON body with the uniform error body.
pub struct Body<T>(pub T);

#[async_trait]
impl<T: DeserializeOwned + Send, S: Send + Sync> FromRequest<S> for Body<T> {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| ApiError::BadRequest(e.body_text()))?;
        Ok(Body(value))
    }
}

// ── Request bodies and queries ───────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterUserBody {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Deserialize)]
pub struct CreateRoomBody {
    pub number: String,
    pub room_type: RoomType,
    pub capacity: u32,
    pub price: Cents,
}

#[derive(Deserialize)]
pub struct UpdateRoomBody {
    pub room_type: Option<RoomType>,
    pub capacity: Option<u32>,
    pub price: Option<Cents>,
}

#[derive(Deserialize)]
pub struct CreateBookingBody {
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    /// Defaults to the acting user.
    pub guest_id: Option<Ulid>,
}

#[derive(Deserialize)]
pub struct RecordPaymentBody {
    pub amount: Cents,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

#[derive(Deserialize)]
pub struct RequestRefundBody {
    pub amount: Cents,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct PostReviewBody {
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct StayQuery {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub min_capacity: Option<u32>,
    pub room_type: Option<RoomType>,
}

#[derive(Deserialize)]
pub struct WindowQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Deserialize)]
pub struct BookingsQuery {
    pub guest_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

#[derive(Serialize)]
pub struct RoomAvailability {
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub available: bool,
}

// ── Handlers ─────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn register_user(
    State(state): State<AppState>,
    actor: CurrentActor,
    Body(body): Body<RegisterUserBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .service
        .register_user(
            actor.get(),
            Ulid::new(),
            body.name,
            body.email,
            body.role.unwrap_or(Role::Guest),
        )
        .await?;
    Ok(created(user))
}

async fn list_users(State(state): State<AppState>, actor: CurrentActor) -> ApiResult<Vec<User>> {
    Ok(Json(state.service.list_users(actor.get())?))
}

async fn get_user(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<User> {
    Ok(Json(state.service.get_user(actor.get(), id)?))
}

async fn get_settings(State(state): State<AppState>, actor: CurrentActor) -> ApiResult<SystemSettings> {
    Ok(Json(state.service.settings(actor.get())?))
}

async fn put_settings(
    State(state): State<AppState>,
    actor: CurrentActor,
    Body(body): Body<SystemSettings>,
) -> ApiResult<SystemSettings> {
    Ok(Json(state.service.update_settings(actor.get(), body).await?))
}

async fn list_rooms(State(state): State<AppState>, actor: CurrentActor) -> ApiResult<Vec<Room>> {
    Ok(Json(state.service.list_rooms(actor.get()).await?))
}

async fn create_room(
    State(state): State<AppState>,
    actor: CurrentActor,
    Body(body): Body<CreateRoomBody>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state
        .service
        .create_room(
            actor.get(),
            Ulid::new(),
            body.number,
            body.room_type,
            body.capacity,
            body.price,
        )
        .await?;
    Ok(created(room))
}

async fn get_room(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Room> {
    Ok(Json(state.service.get_room(actor.get(), id).await?))
}

async fn update_room(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(id): Id,
    Body(body): Body<UpdateRoomBody>,
) -> ApiResult<Room> {
    let room = state
        .service
        .update_room(actor.get(), id, body.room_type, body.capacity, body.price)
        .await?;
    Ok(Json(room))
}

async fn delete_room(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(id): Id,
) -> Result<StatusCode, ApiError> {
    state.service.delete_room(actor.get(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_maintenance(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Room> {
    Ok(Json(state.service.set_maintenance(actor.get(), id).await?))
}

async fn end_maintenance(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Room> {
    Ok(Json(state.service.release_maintenance(actor.get(), id).await?))
}

async fn room_availability(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(id): Id,
    Params(q): Params<StayQuery>,
) -> ApiResult<RoomAvailability> {
    let available = state
        .service
        .is_room_available(actor.get(), id, q.check_in, q.check_out)
        .await?;
    Ok(Json(RoomAvailability {
        room_id: id,
        check_in: q.check_in,
        check_out: q.check_out,
        available,
    }))
}

async fn room_free_windows(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(id): Id,
    Params(q): Params<WindowQuery>,
) -> ApiResult<Vec<Stay>> {
    Ok(Json(state.service.free_windows(actor.get(), id, q.from, q.to).await?))
}

async fn room_bookings(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Vec<Booking>> {
    Ok(Json(state.service.bookings_for_room(actor.get(), id).await?))
}

async fn room_reviews(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Vec<Review>> {
    Ok(Json(state.service.reviews_for_room(actor.get(), id).await?))
}

async fn room_events(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(id): Id,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let rx = state.service.subscribe_room(actor.get(), id).await?;
    let events = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((SseEvent::default().json_data(&event), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %id, skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn search_availability(
    State(state): State<AppState>,
    actor: CurrentActor,
    Params(q): Params<StayQuery>,
) -> ApiResult<Vec<Room>> {
    let rooms = state
        .service
        .search_available_rooms(actor.get(), q.check_in, q.check_out, q.min_capacity, q.room_type)
        .await?;
    Ok(Json(rooms))
}

async fn create_booking(
    State(state): State<AppState>,
    actor: CurrentActor,
    Body(body): Body<CreateBookingBody>,
) -> Result<impl IntoResponse, ApiError> {
    let guest_id = body
        .guest_id
        .or(actor.id())
        .ok_or_else(|| ApiError::Unauthenticated(format!("{USER_HEADER} header required")))?;
    let booking = state
        .service
        .create_booking(
            actor.get(),
            Ulid::new(),
            body.room_id,
            guest_id,
            body.check_in,
            body.check_out,
        )
        .await?;
    Ok(created(booking))
}

/// Staff see every booking (optionally one guest's); guests see their own.
async fn list_bookings(
    State(state): State<AppState>,
    actor: CurrentActor,
    Params(q): Params<BookingsQuery>,
) -> ApiResult<Vec<Booking>> {
    let bookings = state
        .service
        .visible_bookings(actor.get(), |b| {
            q.guest_id.is_none_or(|g| b.guest_id == g) && q.status.is_none_or(|s| b.status == s)
        })
        .await?;
    Ok(Json(bookings))
}

async fn get_booking(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Booking> {
    Ok(Json(state.service.get_booking(actor.get(), id).await?))
}

async fn confirm_booking(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Booking> {
    Ok(Json(state.service.confirm_booking(actor.get(), id).await?))
}

async fn check_in(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Booking> {
    Ok(Json(state.service.check_in(actor.get(), id).await?))
}

async fn check_out(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Booking> {
    Ok(Json(state.service.check_out(actor.get(), id).await?))
}

async fn cancel_booking(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Booking> {
    Ok(Json(state.service.cancel_booking(actor.get(), id).await?))
}

async fn record_payment(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(booking_id): Id,
    Body(body): Body<RecordPaymentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .service
        .record_payment(
            actor.get(),
            Ulid::new(),
            booking_id,
            body.amount,
            body.method.unwrap_or(PaymentMethod::Card),
        )
        .await?;
    Ok(created(payment))
}

async fn list_payments(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(booking_id): Id,
) -> ApiResult<Vec<Payment>> {
    Ok(Json(state.service.payments_for_booking(actor.get(), booking_id).await?))
}

async fn complete_payment(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Payment> {
    let payment = state
        .service
        .set_payment_status(actor.get(), id, PaymentStatus::Completed)
        .await?;
    Ok(Json(payment))
}

async fn fail_payment(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Payment> {
    let payment = state
        .service
        .set_payment_status(actor.get(), id, PaymentStatus::Failed)
        .await?;
    Ok(Json(payment))
}

async fn request_refund(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(booking_id): Id,
    Body(body): Body<RequestRefundBody>,
) -> Result<impl IntoResponse, ApiError> {
    let refund = state
        .service
        .request_refund(actor.get(), Ulid::new(), booking_id, body.amount, body.reason)
        .await?;
    Ok(created(refund))
}

async fn list_refunds(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(booking_id): Id,
) -> ApiResult<Vec<Refund>> {
    Ok(Json(state.service.refunds_for_booking(actor.get(), booking_id).await?))
}

async fn complete_refund(State(state): State<AppState>, actor: CurrentActor, Id(id): Id) -> ApiResult<Refund> {
    let refund = state
        .service
        .set_refund_status(actor.get(), id, RefundStatus::Completed)
        .await?;
    Ok(Json(refund))
}

async fn post_review(
    State(state): State<AppState>,
    actor: CurrentActor,
    Id(booking_id): Id,
    Body(body): Body<PostReviewBody>,
) -> Result<impl IntoResponse, ApiError> {
    let review = state
        .service
        .post_review(actor.get(), Ulid::new(), booking_id, body.rating, body.comment)
        .await?;
    Ok(created(review))
}

async fn dashboard(State(state): State<AppState>, actor: CurrentActor) -> ApiResult<Dashboard> {
    Ok(Json(state.service.dashboard(actor.get()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Entity, Unavailable};
    use crate::policy::{Action, Denied};

    #[test]
    fn error_kinds_map_to_http_statuses() {
        let id = Ulid::new();
        let day = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let cases = [
            (EngineError::NotFound(Entity::Room, id), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidInterval {
                    check_in: day,
                    check_out: day,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Unavailable(Unavailable::Conflict {
                    room_id: id,
                    booking_id: id,
                }),
                StatusCode::CONFLICT,
            ),
            (EngineError::ConcurrencyConflict(id), StatusCode::CONFLICT),
            (EngineError::AlreadyExists(Entity::User, "a@b.c".into()), StatusCode::CONFLICT),
            (EngineError::Invalid("bad".into()), StatusCode::BAD_REQUEST),
            (EngineError::LimitExceeded("too many"), StatusCode::BAD_REQUEST),
            (EngineError::WalError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                EngineError::Forbidden(Denied {
                    role: Some(Role::Guest),
                    action: Action::CheckIn,
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                EngineError::Forbidden(Denied {
                    role: None,
                    action: Action::ReadRooms,
                }),
                StatusCode::UNAUTHORIZED,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }
}
