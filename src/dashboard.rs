//! Overview numbers for the landing screen.
use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use tracing::{instrument, warn};

use crate::api::ApiClient;
use crate::envelope::normalize;
use crate::error::{ApiError, PartFailure};
use crate::list::LOAD_FAILED;
use crate::model::{AttendanceRecord, Department, LeaveRequest, RequestStatus, Resource, User};

const ACTIVE_PATH: &str = "api/attendance/active/";
const HISTORY_LIMIT: u32 = 30;
const CHECKIN_DAYS: usize = 7;
const TOP_DEPARTMENTS: usize = 5;
pub const NO_DEPARTMENT: &str = "No department";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSummary {
    pub total_users: Option<u64>,
    pub active_now: Option<u64>,
    pub departments: Option<u64>,
    pub pending_requests: Option<u64>,
    /// Check-ins per day, oldest first.
    pub checkins_per_day: Vec<(NaiveDate, u32)>,
    /// Users per department in first-seen order.
    pub headcount: Vec<(String, u32)>,
    pub failures: Vec<PartFailure>,
}

/// Fire every request at once and fill in whatever came back.
#[instrument(skip_all)]
pub async fn load_dashboard(client: &ApiClient) -> DashboardSummary {
    let users_path = User::ENDPOINT.collection();
    let departments_path = Department::ENDPOINT.collection();
    let requests_path = LeaveRequest::ENDPOINT.collection();
    let history_path = AttendanceRecord::ENDPOINT.collection();
    let history_query = [("limit".to_string(), HISTORY_LIMIT.to_string())];

    let (users, active, departments, requests, history, department_names) = futures::join!(
        client.get(&users_path, &[]),
        client.get(ACTIVE_PATH, &[]),
        client.get(&departments_path, &[]),
        client.get(&requests_path, &[]),
        client.get(&history_path, &history_query),
        client.get(&departments_path, &[]),
    );

    let mut summary = DashboardSummary::default();
    let mut fail = |part: &'static str, err: &ApiError| {
        warn!(part, %err, "dashboard part failed to load");
        summary.failures.push(PartFailure::new(part, err, LOAD_FAILED));
    };

    let users = match users {
        Ok(body) => {
            let normalized = normalize(&body);
            let total = normalized.total_count;
            Some((total, normalized.decode::<User>().0))
        }
        Err(err) => {
            fail("users", &err);
            None
        }
    };
    let active_now = match active {
        Ok(body) => Some(normalize(&body).total_count),
        Err(err) => {
            fail("active", &err);
            None
        }
    };
    let departments = match departments {
        Ok(body) => Some(normalize(&body).total_count),
        Err(err) => {
            fail("departments", &err);
            None
        }
    };
    let pending_requests = match requests {
        Ok(body) => {
            let (requests, _) = normalize(&body).decode::<LeaveRequest>();
            Some(
                requests
                    .iter()
                    .filter(|r| r.status == RequestStatus::Pending)
                    .count() as u64,
            )
        }
        Err(err) => {
            fail("requests", &err);
            None
        }
    };
    let checkins_per_day = match history {
        Ok(body) => checkins_per_day(&normalize(&body).decode::<AttendanceRecord>().0),
        Err(err) => {
            fail("history", &err);
            Vec::new()
        }
    };
    let department_names = match department_names {
        Ok(body) => Some(normalize(&body).decode::<Department>().0),
        Err(err) => {
            fail("department names", &err);
            None
        }
    };

    summary.total_users = users.as_ref().map(|(total, _)| *total);
    summary.active_now = active_now;
    summary.departments = departments;
    summary.pending_requests = pending_requests;
    summary.checkins_per_day = checkins_per_day;
    if let (Some((_, users)), Some(names)) = (&users, &department_names) {
        summary.headcount = headcount(users, names);
    }
    summary
}

/// Check-ins grouped by local date; the most recent days, ascending.
pub fn checkins_per_day(history: &[AttendanceRecord]) -> Vec<(NaiveDate, u32)> {
    let mut days: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    for time in history.iter().filter_map(|rec| rec.checkin_time) {
        *days.entry(time.with_timezone(&Local).date_naive()).or_default() += 1;
    }
    let skip = days.len().saturating_sub(CHECKIN_DAYS);
    days.into_iter().skip(skip).collect()
}

/// Users per department. Users without a department are left out; ids with
/// no matching department count under [`NO_DEPARTMENT`].
pub fn headcount(users: &[User], departments: &[Department]) -> Vec<(String, u32)> {
    let mut counts: Vec<(String, u32)> = Vec::new();
    for dept in users.iter().filter_map(|u| u.department.as_ref()) {
        let name = dept
            .name()
            .map(str::to_string)
            .or_else(|| {
                departments
                    .iter()
                    .find(|d| d.id == dept.id())
                    .map(|d| d.name.clone())
            })
            .unwrap_or_else(|| NO_DEPARTMENT.to_string());
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    counts.truncate(TOP_DEPARTMENTS);
    counts
}
