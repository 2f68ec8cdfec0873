mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{client, ScriptedTransport};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use staffdesk::attendance::{
    AttendanceTracker, CheckKind, Coordinates, FixedLocation, LocationError, LocationProvider,
    NoLocation, TrackerSettings,
};
use staffdesk::list::LOAD_FAILED;

const CURRENT: &str = "api/attendance/current/";
const HISTORY: &str = "api/attendance/";
const ACTIVE: &str = "api/attendance/active/";
const CHECKIN: &str = "api/attendance/checkin/";
const CHECKOUT: &str = "api/attendance/checkout/";

fn checked_in_since(minutes: i64) -> Value {
    let since = Utc::now() - chrono::Duration::minutes(minutes);
    json!({ "is_checked_in": true, "checkin_time": since, "hours_worked": 1.0, "attendance_id": 9 })
}

fn not_checked_in() -> Value {
    json!({ "is_checked_in": false, "checkin_time": null, "hours_worked": 0, "attendance_id": null })
}

async fn script_views(transport: &ScriptedTransport) {
    transport
        .reply(
            Method::GET,
            HISTORY,
            200,
            json!({ "results": [{ "id": 8, "total_hours": "8.00" }], "count": 1 }),
        )
        .await;
    transport
        .reply(
            Method::GET,
            ACTIVE,
            200,
            json!([{ "user_id": 1, "full_name": "Ann Lee", "hours_worked": 2.5 }]),
        )
        .await;
}

#[tokio::test(start_paused = true)]
async fn load_settles_each_part_on_its_own() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(60))
        .await;
    transport
        .reply(Method::GET, HISTORY, 200, json!([{ "id": 8, "total_hours": 7.5 }]))
        .await;
    transport
        .reply(Method::GET, ACTIVE, 403, json!({ "error": "Forbidden" }))
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());

    let overview = tracker.load().await;

    assert!(overview.status.as_ref().unwrap().is_checked_in);
    assert_eq!(overview.history.len(), 1);
    assert!(overview.active.is_empty());
    assert_eq!(overview.failures.len(), 1);
    assert_eq!(overview.failures[0].part, "active");
    assert_eq!(overview.failures[0].message, LOAD_FAILED);
    assert!(tracker.is_polling());

    let history_call = transport
        .calls()
        .await
        .into_iter()
        .find(|c| c.path == HISTORY)
        .unwrap();
    assert_eq!(history_call.query, vec![("limit".to_string(), "20".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn poll_runs_every_interval_while_checked_in() {
    let transport = ScriptedTransport::default();
    script_views(&transport).await;
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(30))
        .await;
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(30))
        .await;
    transport
        .reply(Method::GET, CURRENT, 200, not_checked_in())
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());
    tracker.load().await;
    assert_eq!(transport.count(Method::GET, CURRENT).await, 1);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(transport.count(Method::GET, CURRENT).await, 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.count(Method::GET, CURRENT).await, 2);

    // The next poll sees the checkout and stops polling.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.count(Method::GET, CURRENT).await, 3);
    assert!(!tracker.is_polling());
    assert!(!tracker.status().await.unwrap().is_checked_in);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.count(Method::GET, CURRENT).await, 3);
}

#[tokio::test(start_paused = true)]
async fn no_poll_while_checked_out() {
    let transport = ScriptedTransport::default();
    script_views(&transport).await;
    transport
        .reply(Method::GET, CURRENT, 200, not_checked_in())
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());
    tracker.load().await;

    assert!(!tracker.is_polling());
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(transport.count(Method::GET, CURRENT).await, 1);
}

#[tokio::test(start_paused = true)]
async fn check_in_survives_lagging_status_read() {
    let transport = ScriptedTransport::default();
    script_views(&transport).await;
    transport
        .reply(Method::GET, CURRENT, 200, not_checked_in())
        .await;
    transport
        .reply(
            Method::POST,
            CHECKIN,
            201,
            json!({ "id": 9, "checkin_time": Utc::now(), "checkout_time": null }),
        )
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());
    tracker.load().await;

    let outcome = tracker
        .submit(CheckKind::In, &NoLocation, None)
        .await
        .unwrap();

    // The refresh right after the check-in still said "not checked in".
    assert_eq!(transport.count(Method::GET, CURRENT).await, 2);
    let status = tracker.status().await.unwrap();
    assert!(status.is_checked_in);
    assert_eq!(status.attendance_id, Some(9));
    assert!(tracker.is_polling());
    assert!(!outcome.location_verified);
    assert!(outcome.notice.is_some());

    let post = transport
        .calls()
        .await
        .into_iter()
        .find(|c| c.path == CHECKIN)
        .unwrap();
    let body = post.body.unwrap();
    assert_eq!(body["latitude"], Value::Null);
    assert_eq!(body["location_verified"], json!(false));
}

#[tokio::test(start_paused = true)]
async fn check_in_sends_coordinates_when_available() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(0))
        .await;
    transport
        .reply(Method::POST, CHECKIN, 201, json!({ "id": 10, "checkin_time": Utc::now() }))
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());
    let here = FixedLocation(Coordinates {
        latitude: 41.311081,
        longitude: 69.240562,
    });

    let outcome = tracker
        .submit(CheckKind::In, &here, Some("https://example.org/p.jpg".into()))
        .await
        .unwrap();

    assert!(outcome.location_verified);
    assert!(outcome.notice.is_none());
    let body = transport.calls().await[0].body.clone().unwrap();
    assert_eq!(body["latitude"], json!(41.311081));
    assert_eq!(body["longitude"], json!(69.240562));
    assert_eq!(body["photo_url"], json!("https://example.org/p.jpg"));
    assert_eq!(body["location_verified"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn check_out_stops_polling_and_shows_server_hours() {
    let transport = ScriptedTransport::default();
    script_views(&transport).await;
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(480))
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());
    tracker.load().await;
    assert!(tracker.is_polling());

    transport
        .replace(
            Method::GET,
            CURRENT,
            200,
            json!({ "is_checked_in": false, "checkin_time": Utc::now(), "hours_worked": 8.0, "attendance_id": 9 }),
        )
        .await;
    transport
        .reply(
            Method::POST,
            CHECKOUT,
            200,
            json!({ "id": 9, "checkin_time": Utc::now(), "checkout_time": Utc::now(), "total_hours": "8.00" }),
        )
        .await;

    let outcome = tracker
        .submit(CheckKind::Out, &NoLocation, None)
        .await
        .unwrap();

    assert_eq!(outcome.record.total_hours, Some(8.0));
    assert!(!tracker.is_polling());
    let status = tracker.status().await.unwrap();
    assert!(!status.is_checked_in);
    assert_eq!(status.checkin_time, None);
    assert_eq!(status.display_hours(Utc::now()), "8.00 h");
    assert_eq!(*tracker.subscribe_clock().borrow(), None);
}

#[tokio::test(start_paused = true)]
async fn server_refusal_surfaces_its_message() {
    let transport = ScriptedTransport::default();
    transport
        .reply(
            Method::POST,
            CHECKIN,
            400,
            json!({ "error": { "code": "ALREADY_CHECKED_IN", "message": "Already checked in today" } }),
        )
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());

    let err = tracker
        .submit(CheckKind::In, &NoLocation, None)
        .await
        .unwrap_err();

    assert_eq!(err.user_message("fallback"), "Already checked in today");
    assert_eq!(tracker.status().await, None);
    assert!(!tracker.is_polling());
}

struct NeverAnswers;

#[async_trait]
impl LocationProvider for NeverAnswers {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn slow_location_does_not_block_check_in() {
    let transport = ScriptedTransport::default();
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(0))
        .await;
    transport
        .reply(Method::POST, CHECKIN, 201, json!({ "id": 11, "checkin_time": Utc::now() }))
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());

    let outcome = tracker
        .submit(CheckKind::In, &NeverAnswers, None)
        .await
        .unwrap();

    assert!(!outcome.location_verified);
    assert!(outcome.notice.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn clock_ticks_while_checked_in() {
    let transport = ScriptedTransport::default();
    script_views(&transport).await;
    transport
        .reply(Method::GET, CURRENT, 200, checked_in_since(90))
        .await;
    let mut tracker = AttendanceTracker::new(client(&transport), TrackerSettings::default());
    let mut clock = tracker.subscribe_clock();
    tracker.load().await;
    tracker.start_clock();

    clock.borrow_and_update();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(clock.has_changed().unwrap());
    let elapsed = clock.borrow_and_update().unwrap();
    assert!(elapsed >= chrono::Duration::minutes(89));

    tracker.shutdown();
    assert!(!tracker.is_polling());
}
