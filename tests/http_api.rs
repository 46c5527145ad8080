use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Days, NaiveDate, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use ulid::Ulid;

use innkeeper::engine::Engine;
use innkeeper::http::{router, USER_HEADER};
use innkeeper::model::Role;
use innkeeper::notify::NotifyHub;
use innkeeper::service::HotelService;

// ── Test infrastructure ──────────────────────────────────────

struct Api {
    app: Router,
    admin: Ulid,
}

async fn start_api() -> Api {
    let dir = std::env::temp_dir().join(format!("innkeeper_http_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("hotel.wal"), Arc::new(NotifyHub::new())).unwrap());
    let admin = Ulid::new();
    engine
        .register_user(admin, "Admin".into(), "admin@example.com".into(), Role::Admin)
        .await
        .unwrap();
    Api {
        app: router(Arc::new(HotelService::new(engine))),
        admin,
    }
}

fn day(offset: u64) -> String {
    let today: NaiveDate = Utc::now().date_naive();
    (today + Days::new(offset)).to_string()
}

impl Api {
    async fn call(&self, method: Method, uri: &str, user: Option<Ulid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(USER_HEADER, user.to_string());
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post(&self, uri: &str, user: Option<Ulid>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, user, Some(body)).await
    }

    async fn get(&self, uri: &str, user: Option<Ulid>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, user, None).await
    }

    async fn room(&self, number: &str) -> String {
        let (status, room) = self
            .post(
                "/rooms",
                Some(self.admin),
                json!({"number": number, "room_type": "DOUBLE", "capacity": 2, "price": 10000}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{room}");
        room["id"].as_str().unwrap().to_string()
    }

    async fn guest(&self, email: &str) -> Ulid {
        let (status, user) = self
            .post("/users", None, json!({"name": "Guest", "email": email}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{user}");
        assert_eq!(user["role"], "GUEST");
        user["id"].as_str().unwrap().parse().unwrap()
    }
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_created_then_overlap_rejected() {
    let api = start_api().await;
    let room = api.room("101").await;
    let guest = api.guest("ada@example.com").await;

    let (status, booking) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": room, "check_in": day(10), "check_out": day(15)}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    assert_eq!(booking["status"], "PENDING");
    assert_eq!(booking["total_price"], 50000);
    assert_eq!(booking["guest_id"], guest.to_string());

    let (status, body) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": room, "check_in": day(12), "check_out": day(14)}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "UNAVAILABLE");

    // Turnover day is fine.
    let (status, _) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": room, "check_in": day(15), "check_out": day(16)}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn invalid_interval_is_bad_request() {
    let api = start_api().await;
    let room = api.room("102").await;
    let guest = api.guest("bob@example.com").await;

    let (status, body) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": room, "check_in": day(5), "check_out": day(5)}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_INTERVAL");

    let (_, bookings) = api.get("/bookings", Some(api.admin)).await;
    assert_eq!(bookings.as_array().unwrap().len(), 0);
    let (_, room) = api.get(&format!("/rooms/{room}"), Some(api.admin)).await;
    assert_eq!(room["status"], "AVAILABLE");
}

#[tokio::test]
async fn unknown_room_is_not_found() {
    let api = start_api().await;
    let guest = api.guest("cy@example.com").await;
    let (status, body) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": Ulid::new().to_string(), "check_in": day(1), "check_out": day(2)}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn actor_header_is_checked() {
    let api = start_api().await;
    let (status, body) = api.get("/rooms", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHENTICATED");

    let (status, _) = api.get("/rooms", Some(Ulid::new())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let guest = api.guest("dee@example.com").await;
    let (status, body) = api
        .post(
            "/rooms",
            Some(guest),
            json!({"number": "9", "room_type": "SINGLE", "capacity": 1, "price": 1}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "FORBIDDEN");

    // Anonymous callers cannot create staff accounts.
    let (status, _) = api
        .post("/users", None, json!({"name": "Eve", "email": "eve@example.com", "role": "ADMIN"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_input_uses_error_body() {
    let api = start_api().await;
    let (status, body) = api.get("/rooms/not-a-ulid", Some(api.admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID");

    let (status, body) = api
        .post("/rooms", Some(api.admin), json!({"number": "1", "room_type": "CASTLE", "capacity": 1, "price": 1}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID");
}

#[tokio::test]
async fn full_stay_lifecycle() {
    let api = start_api().await;
    let room = api.room("201").await;
    let guest = api.guest("fay@example.com").await;

    let (_, booking) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": room, "check_in": day(0), "check_out": day(2)}),
        )
        .await;
    let id = booking["id"].as_str().unwrap().to_string();
    let (_, room_now) = api.get(&format!("/rooms/{room}"), Some(guest)).await;
    assert_eq!(room_now["status"], "RESERVED");

    // Paying in full confirms the booking.
    let (status, payment) = api
        .post(&format!("/bookings/{id}/payments"), Some(guest), json!({"amount": 20000}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let payment_id = payment["id"].as_str().unwrap();
    let (status, _) = api
        .call(Method::POST, &format!("/payments/{payment_id}/complete"), Some(api.admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, booking) = api.get(&format!("/bookings/{id}"), Some(guest)).await;
    assert_eq!(booking["status"], "CONFIRMED");

    let (status, booking) = api
        .call(Method::POST, &format!("/bookings/{id}/check-in"), Some(api.admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "CHECKED_IN");
    let (_, room_now) = api.get(&format!("/rooms/{room}"), Some(guest)).await;
    assert_eq!(room_now["status"], "OCCUPIED");

    // A checked-in stay cannot be cancelled.
    let (status, body) = api
        .call(Method::POST, &format!("/bookings/{id}/cancel"), Some(guest), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "INVALID_TRANSITION");

    let (_, booking) = api
        .call(Method::POST, &format!("/bookings/{id}/check-out"), Some(api.admin), None)
        .await;
    assert_eq!(booking["status"], "COMPLETED");
    let (_, room_now) = api.get(&format!("/rooms/{room}"), Some(guest)).await;
    assert_eq!(room_now["status"], "AVAILABLE");

    let (status, review) = api
        .post(&format!("/bookings/{id}/reviews"), Some(guest), json!({"rating": 5, "comment": "lovely"}))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{review}");
    let (_, reviews) = api.get(&format!("/rooms/{room}/reviews"), Some(guest)).await;
    assert_eq!(reviews.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_booking_cannot_be_confirmed() {
    let api = start_api().await;
    let room = api.room("301").await;
    let guest = api.guest("gil@example.com").await;
    let (_, booking) = api
        .post(
            "/bookings",
            Some(guest),
            json!({"room_id": room, "check_in": day(3), "check_out": day(4)}),
        )
        .await;
    let id = booking["id"].as_str().unwrap();

    let (status, _) = api
        .call(Method::POST, &format!("/bookings/{id}/cancel"), Some(guest), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = api
        .call(Method::POST, &format!("/bookings/{id}/confirm"), Some(api.admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "INVALID_TRANSITION");
}

#[tokio::test]
async fn availability_search_and_windows() {
    let api = start_api().await;
    let busy = api.room("401").await;
    let free = api.room("402").await;
    let guest = api.guest("hal@example.com").await;
    api.post(
        "/bookings",
        Some(guest),
        json!({"room_id": busy, "check_in": day(5), "check_out": day(8)}),
    )
    .await;

    let uri = format!("/availability?check_in={}&check_out={}", day(6), day(7));
    let (status, rooms) = api.get(&uri, Some(guest)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = rooms.as_array().unwrap().iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![free.as_str()]);

    let uri = format!("/rooms/{busy}/availability?check_in={}&check_out={}", day(8), day(9));
    let (_, answer) = api.get(&uri, Some(guest)).await;
    assert_eq!(answer["available"], true);

    let uri = format!("/rooms/{busy}/free-windows?from={}&to={}", day(0), day(10));
    let (_, windows) = api.get(&uri, Some(guest)).await;
    assert_eq!(
        windows,
        json!([
            {"check_in": day(0), "check_out": day(5)},
            {"check_in": day(8), "check_out": day(10)},
        ])
    );
}

#[tokio::test]
async fn dashboard_is_scoped_by_role() {
    let api = start_api().await;
    let room = api.room("501").await;
    let guest = api.guest("ivy@example.com").await;
    api.post(
        "/bookings",
        Some(guest),
        json!({"room_id": room, "check_in": day(0), "check_out": day(1)}),
    )
    .await;

    let (_, mine) = api.get("/dashboard", Some(guest)).await;
    assert_eq!(mine["my_bookings"].as_array().unwrap().len(), 1);
    assert!(mine.get("revenue").is_none());

    let (_, ops) = api.get("/dashboard", Some(api.admin)).await;
    assert_eq!(ops["rooms_by_status"]["RESERVED"], 1);
    assert_eq!(ops["arrivals_today"].as_array().unwrap().len(), 1);
    assert_eq!(ops["revenue"], 0);
}

#[tokio::test]
async fn settings_roundtrip_for_admin_only() {
    let api = start_api().await;
    let (status, mut settings) = api.get("/settings", Some(api.admin)).await;
    assert_eq!(status, StatusCode::OK);
    settings["hotel_name"] = json!("Grand Budapest");
    let (status, updated) = api
        .call(Method::PUT, "/settings", Some(api.admin), Some(settings.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["hotel_name"], "Grand Budapest");

    let guest = api.guest("jo@example.com").await;
    let (status, _) = api.call(Method::PUT, "/settings", Some(guest), Some(settings)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
