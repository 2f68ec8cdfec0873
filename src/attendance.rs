//! Attendance: current status, check-in/check-out and the live clock.
//!
//! Three writers touch the current status: the initial load, a background
//! poll that runs only while checked in, and the local update right after a
//! check-in or check-out. [`StatusReconciler`] orders them with a version
//! number so a read issued before a local write can never overwrite it.
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::envelope::decode_list;
use crate::error::{ApiError, PartFailure};
use crate::list::LOAD_FAILED;
use crate::model::{ActiveEmployee, AttendanceRecord, CurrentStatus, Resource};

const CURRENT_PATH: &str = "api/attendance/current/";
const ACTIVE_PATH: &str = "api/attendance/active/";
const HISTORY_LIMIT: u32 = 20;

/// Entries shown in the recent-hours summary.
pub const SUMMARY_DAYS: usize = 7;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttendanceStatus {
    pub is_checked_in: bool,
    /// Always `None` when not checked in.
    pub checkin_time: Option<DateTime<Utc>>,
    pub hours_worked: f64,
    pub attendance_id: Option<i64>,
}

impl From<CurrentStatus> for AttendanceStatus {
    fn from(current: CurrentStatus) -> Self {
        Self {
            is_checked_in: current.is_checked_in,
            checkin_time: current.checkin_time.filter(|_| current.is_checked_in),
            hours_worked: current.hours_worked,
            attendance_id: current.attendance_id,
        }
    }
}

impl AttendanceStatus {
    /// Status implied by the record a check-in or check-out returned.
    pub fn after(kind: CheckKind, record: &AttendanceRecord) -> Self {
        match kind {
            CheckKind::In => Self {
                is_checked_in: true,
                checkin_time: record.checkin_time.or_else(|| Some(Utc::now())),
                hours_worked: 0.0,
                attendance_id: Some(record.id),
            },
            CheckKind::Out => Self {
                is_checked_in: false,
                checkin_time: None,
                hours_worked: record.total_hours.unwrap_or_default(),
                attendance_id: Some(record.id),
            },
        }
    }

    /// Time since check-in, or `None` when not checked in.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if !self.is_checked_in {
            return None;
        }
        let since = self.checkin_time?;
        Some((now - since).max(chrono::Duration::zero()))
    }

    /// Live counter while checked in; the server's total afterwards.
    pub fn display_hours(&self, now: DateTime<Utc>) -> String {
        match self.elapsed(now) {
            Some(elapsed) => format_elapsed(elapsed),
            None => format!("{:.2} h", self.hours_worked),
        }
    }
}

/// `H:MM:SS`, clamped at zero.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// Version a server read was issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTicket {
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    Adopted,
    /// A "not checked in" read landed inside the bias window after a local
    /// check-in; the local state stands.
    KeptLocal,
    /// The read was issued before the latest local write.
    DiscardedStale,
}

#[derive(Debug, Clone)]
pub struct StatusReconciler {
    status: Option<AttendanceStatus>,
    version: u64,
    last_local_write: Option<Instant>,
    bias_window: Duration,
}

impl StatusReconciler {
    pub fn new(bias_window: Duration) -> Self {
        Self {
            status: None,
            version: 0,
            last_local_write: None,
            bias_window,
        }
    }

    pub fn status(&self) -> Option<&AttendanceStatus> {
        self.status.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn begin_read(&self) -> ReadTicket {
        ReadTicket {
            version: self.version,
        }
    }

    pub fn apply_local(&mut self, status: AttendanceStatus, now: Instant) {
        self.version += 1;
        self.last_local_write = Some(now);
        self.status = Some(status);
    }

    pub fn apply_server(
        &mut self,
        ticket: ReadTicket,
        incoming: AttendanceStatus,
        now: Instant,
    ) -> ReconcileDecision {
        if ticket.version < self.version {
            return ReconcileDecision::DiscardedStale;
        }
        let locally_checked_in = self.status.as_ref().is_some_and(|s| s.is_checked_in);
        let within_bias = self
            .last_local_write
            .is_some_and(|at| now.saturating_duration_since(at) < self.bias_window);
        if locally_checked_in && !incoming.is_checked_in && within_bias {
            return ReconcileDecision::KeptLocal;
        }
        self.status = Some(incoming);
        ReconcileDecision::Adopted
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location request timed out")]
    Timeout,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn locate(&self) -> Result<Coordinates, LocationError>;
}

/// No positioning source; every check is marked without coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable("no location source configured".into()))
    }
}

/// Coordinates supplied up front, e.g. from the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn locate(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

pub async fn acquire_location(
    provider: &dyn LocationProvider,
    limit: Duration,
) -> Result<Coordinates, LocationError> {
    match time::timeout(limit, provider.locate()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    In,
    Out,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::In => "checkin",
            CheckKind::Out => "checkout",
        }
    }

    fn path(&self) -> String {
        AttendanceRecord::ENDPOINT.collection_action(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckPayload {
    pub photo_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub face_verified: bool,
    pub location_verified: bool,
}

impl CheckPayload {
    pub fn new(photo_url: Option<String>, coords: Option<Coordinates>) -> Self {
        // The server stores at most 8 decimal places.
        let round = |v: f64| (v * 1e6).round() / 1e6;
        Self {
            photo_url,
            latitude: coords.map(|c| round(c.latitude)),
            longitude: coords.map(|c| round(c.longitude)),
            face_verified: false,
            location_verified: coords.is_some(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub record: AttendanceRecord,
    pub location_verified: bool,
    /// Informational, e.g. why no coordinates were sent.
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRead {
    pub decision: ReconcileDecision,
    pub is_checked_in: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceOverview {
    pub status: Option<AttendanceStatus>,
    pub history: Vec<AttendanceRecord>,
    pub active: Vec<ActiveEmployee>,
    pub failures: Vec<PartFailure>,
}

/// Hours per entry for the most recent history records, newest first.
pub fn recent_hours(history: &[AttendanceRecord]) -> Vec<(Option<NaiveDate>, f64)> {
    history
        .iter()
        .take(SUMMARY_DAYS)
        .map(|rec| {
            (
                rec.checkin_time
                    .map(|t| t.with_timezone(&Local).date_naive()),
                rec.total_hours.unwrap_or_default(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub bias_window: Duration,
    pub geolocation_timeout: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            bias_window: Duration::from_millis(1500),
            geolocation_timeout: Duration::from_secs(5),
        }
    }
}

impl TrackerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            tick_interval: cfg.tick_interval(),
            bias_window: cfg.bias_window(),
            geolocation_timeout: cfg.geolocation_timeout(),
        }
    }
}

/// Owns the attendance view state and its two background tasks: the status
/// poller and the clock ticker. Both are aborted on shutdown and on drop.
pub struct AttendanceTracker {
    client: ApiClient,
    settings: TrackerSettings,
    reconciler: Arc<Mutex<StatusReconciler>>,
    clock: Arc<watch::Sender<Option<chrono::Duration>>>,
    poller: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl AttendanceTracker {
    pub fn new(client: ApiClient, settings: TrackerSettings) -> Self {
        let (clock, _) = watch::channel(None);
        Self {
            client,
            reconciler: Arc::new(Mutex::new(StatusReconciler::new(settings.bias_window))),
            settings,
            clock: Arc::new(clock),
            poller: None,
            ticker: None,
        }
    }

    pub async fn status(&self) -> Option<AttendanceStatus> {
        self.reconciler.lock().await.status().cloned()
    }

    /// Elapsed time since check-in, refreshed every tick while the clock runs.
    pub fn subscribe_clock(&self) -> watch::Receiver<Option<chrono::Duration>> {
        self.clock.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start_clock(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let reconciler = Arc::clone(&self.reconciler);
        let clock = Arc::clone(&self.clock);
        let period = self.settings.tick_interval;
        self.ticker = Some(tokio::spawn(tick_clock(reconciler, clock, period)));
    }

    /// Current status, recent history and who is at work, each settled on
    /// its own.
    #[instrument(skip_all)]
    pub async fn load(&mut self) -> AttendanceOverview {
        let history_path = AttendanceRecord::ENDPOINT.collection();
        let history_query = [("limit".to_string(), HISTORY_LIMIT.to_string())];
        let (current, history, active) = futures::join!(
            read_current(&self.client, &self.reconciler),
            self.client.get(&history_path, &history_query),
            self.client.get(ACTIVE_PATH, &[]),
        );

        let mut overview = AttendanceOverview::default();
        match current {
            Ok(read) => self.sync_poller(read.is_checked_in),
            Err(err) => overview
                .failures
                .push(PartFailure::new("status", &err, LOAD_FAILED)),
        }
        match history {
            Ok(body) => overview.history = decode_list(&body),
            Err(err) => overview
                .failures
                .push(PartFailure::new("history", &err, LOAD_FAILED)),
        }
        match active {
            Ok(body) => overview.active = decode_list(&body),
            Err(err) => overview
                .failures
                .push(PartFailure::new("active", &err, LOAD_FAILED)),
        }
        for failure in &overview.failures {
            warn!(part = failure.part, message = %failure.message, "attendance part failed to load");
        }
        overview.status = self.status().await;
        self.publish_clock().await;
        overview
    }

    pub async fn refresh_status(&mut self) -> Result<StatusRead, ApiError> {
        let read = read_current(&self.client, &self.reconciler).await?;
        self.sync_poller(read.is_checked_in);
        self.publish_clock().await;
        Ok(read)
    }

    /// Check in or out. Coordinates are best effort: when they cannot be had
    /// within the timeout the check goes ahead without them.
    #[instrument(skip_all, fields(kind = kind.as_str()))]
    pub async fn submit(
        &mut self,
        kind: CheckKind,
        location: &dyn LocationProvider,
        photo_url: Option<String>,
    ) -> Result<CheckOutcome, ApiError> {
        let (coords, notice) =
            match acquire_location(location, self.settings.geolocation_timeout).await {
                Ok(coords) => (Some(coords), None),
                Err(err) => {
                    info!(%err, "continuing without coordinates");
                    (
                        None,
                        Some(format!("Location not available ({err}); recorded without coordinates")),
                    )
                }
            };
        let payload = CheckPayload::new(photo_url, coords);
        let body = serde_json::to_value(&payload)
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;
        let body = self.client.post(&kind.path(), Some(body)).await?;
        let record: AttendanceRecord = decode_record(body)?;

        let local = AttendanceStatus::after(kind, &record);
        let checked_in = local.is_checked_in;
        self.reconciler
            .lock()
            .await
            .apply_local(local, Instant::now());
        self.sync_poller(checked_in);
        self.publish_clock().await;
        info!(id = record.id, checked_in, "attendance recorded");

        if let Err(err) = self.refresh_status().await {
            warn!(%err, "status refresh after check failed");
        }
        Ok(CheckOutcome {
            record,
            location_verified: payload.location_verified,
            notice,
        })
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.abort();
        }
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    fn sync_poller(&mut self, checked_in: bool) {
        if !checked_in {
            if let Some(handle) = self.poller.take() {
                debug!("stopping attendance poll");
                handle.abort();
            }
            return;
        }
        if self.is_polling() {
            return;
        }
        debug!(every = ?self.settings.poll_interval, "starting attendance poll");
        self.poller = Some(tokio::spawn(poll_current(
            self.client.clone(),
            Arc::clone(&self.reconciler),
            self.settings.poll_interval,
        )));
    }

    async fn publish_clock(&self) {
        let elapsed = self
            .reconciler
            .lock()
            .await
            .status()
            .and_then(|s| s.elapsed(Utc::now()));
        self.clock.send_replace(elapsed);
    }
}

impl Drop for AttendanceTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn decode_record(body: Value) -> Result<AttendanceRecord, ApiError> {
    serde_json::from_value(body).map_err(|err| ApiError::Decode(err.to_string()))
}

async fn read_current(
    client: &ApiClient,
    reconciler: &Mutex<StatusReconciler>,
) -> Result<StatusRead, ApiError> {
    let ticket = reconciler.lock().await.begin_read();
    let body = client.get(CURRENT_PATH, &[]).await?;
    let current: CurrentStatus =
        serde_json::from_value(body).map_err(|err| ApiError::Decode(err.to_string()))?;

    let mut reconciler = reconciler.lock().await;
    let decision = reconciler.apply_server(ticket, current.into(), Instant::now());
    if decision != ReconcileDecision::Adopted {
        debug!(?decision, "server status not applied");
    }
    Ok(StatusRead {
        decision,
        is_checked_in: reconciler.status().is_some_and(|s| s.is_checked_in),
    })
}

async fn poll_current(client: ApiClient, reconciler: Arc<Mutex<StatusReconciler>>, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match read_current(&client, &reconciler).await {
            Ok(read) if !read.is_checked_in => {
                info!("no longer checked in; attendance poll stopped");
                break;
            }
            Ok(_) => {}
            Err(err @ (ApiError::Unauthorized | ApiError::MissingToken)) => {
                warn!(%err, "attendance poll stopped");
                break;
            }
            Err(err) => warn!(%err, "attendance poll failed"),
        }
    }
}

async fn tick_clock(
    reconciler: Arc<Mutex<StatusReconciler>>,
    clock: Arc<watch::Sender<Option<chrono::Duration>>>,
    period: Duration,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let elapsed = reconciler
            .lock()
            .await
            .status()
            .and_then(|s| s.elapsed(Utc::now()));
        clock.send_replace(elapsed);
    }
}
