use chrono::{DateTime, Local, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// REST collection location and a short name used in logs and config keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub path: &'static str,
    pub name: &'static str,
}

impl Endpoint {
    pub fn collection(&self) -> String {
        self.path.to_string()
    }

    pub fn item(&self, id: i64) -> String {
        format!("{}{}/", self.path, id)
    }

    pub fn item_action(&self, id: i64, action: &str) -> String {
        format!("{}{}/{}/", self.path, id, action)
    }

    pub fn collection_action(&self, action: &str) -> String {
        format!("{}{}/", self.path, action)
    }
}

/// A record type listed through a REST collection.
pub trait Resource: serde::de::DeserializeOwned + Clone + Send + Sync + 'static {
    const ENDPOINT: Endpoint;

    fn id(&self) -> i64;

    /// One-line description for terminal listings.
    fn summary(&self) -> String;
}

/// Accepts DRF decimals, which arrive either as numbers or as strings.
mod lenient {
    use super::*;

    pub fn parse(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(parse(&Value::deserialize(d)?).unwrap_or(0.0))
    }

    pub fn opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(parse(&Value::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    Admin,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::Unknown => "unknown",
        }
    }
}

/// Users embed their department either as a bare id or as an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DepartmentRef {
    Id(i64),
    Object {
        id: i64,
        #[serde(default)]
        name: Option<String>,
    },
}

impl DepartmentRef {
    pub fn id(&self) -> i64 {
        match self {
            DepartmentRef::Id(id) | DepartmentRef::Object { id, .. } => *id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            DepartmentRef::Id(_) => None,
            DepartmentRef::Object { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub department: Option<DepartmentRef>,
    #[serde(default)]
    pub department_name: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
}

fn default_role() -> Role {
    Role::Employee
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl Resource for User {
    const ENDPOINT: Endpoint = Endpoint {
        path: "api/users/",
        name: "users",
    };

    fn id(&self) -> i64 {
        self.id
    }

    fn summary(&self) -> String {
        let department = self
            .department_name
            .as_deref()
            .or_else(|| self.department.as_ref().and_then(|d| d.name()))
            .unwrap_or("-");
        format!(
            "#{} {} <{}> {} / {}{}",
            self.id,
            self.full_name(),
            self.email.as_deref().unwrap_or("-"),
            self.role.as_str(),
            department,
            if self.is_active { "" } else { " (inactive)" }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub manager: Option<i64>,
    #[serde(default)]
    pub manager_name: Option<String>,
    #[serde(default)]
    pub employee_count: Option<u32>,
}

impl Resource for Department {
    const ENDPOINT: Endpoint = Endpoint {
        path: "api/departments/",
        name: "departments",
    };

    fn id(&self) -> i64 {
        self.id
    }

    fn summary(&self) -> String {
        format!(
            "#{} {} (manager: {}, employees: {})",
            self.id,
            self.name,
            self.manager_name.as_deref().unwrap_or("-"),
            self.employee_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".into())
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    #[serde(other)]
    Other,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Vacation,
    SickLeave,
    DayOff,
    Advance,
    #[serde(other)]
    Other,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Vacation => "vacation",
            RequestKind::SickLeave => "sick_leave",
            RequestKind::DayOff => "day_off",
            RequestKind::Advance => "advance",
            RequestKind::Other => "other",
        }
    }
}

/// Time-off or salary advance request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaveRequest {
    pub id: i64,
    #[serde(default)]
    pub user_name: Option<String>,
    pub request_type: RequestKind,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    pub status: RequestStatus,
    #[serde(default)]
    pub reviewed_by_name: Option<String>,
    #[serde(default)]
    pub review_comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Resource for LeaveRequest {
    const ENDPOINT: Endpoint = Endpoint {
        path: "api/requests/",
        name: "requests",
    };

    fn id(&self) -> i64 {
        self.id
    }

    fn summary(&self) -> String {
        let dates = match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => format!("{start}..{end}"),
            (Some(start), None) => start.to_string(),
            _ => "-".into(),
        };
        format!(
            "#{} {} {} {} [{}]",
            self.id,
            self.request_type.as_str(),
            self.user_name.as_deref().unwrap_or("-"),
            dates,
            self.status.as_str()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalaryRecord {
    pub id: i64,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub base_hours: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub base_amount: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub overtime_hours: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub overtime_amount: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub penalties_amount: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub advances_amount: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub total_amount: f64,
    #[serde(default)]
    pub status: Option<String>,
}

impl Resource for SalaryRecord {
    const ENDPOINT: Endpoint = Endpoint {
        path: "api/salary/",
        name: "salary",
    };

    fn id(&self) -> i64 {
        self.id
    }

    fn summary(&self) -> String {
        format!(
            "#{} {} {} hours={:.2} base={:.2} penalties={:.2} total={:.2}",
            self.id,
            self.user_name.as_deref().unwrap_or("-"),
            self.period.as_deref().unwrap_or("-"),
            self.base_hours + self.overtime_hours,
            self.base_amount,
            self.penalties_amount,
            self.total_amount
        )
    }
}

static PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-(0[1-9]|1[0-2])$").expect("valid period regex"));

/// Payroll month in `YYYY-MM` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalaryPeriod(String);

impl SalaryPeriod {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        PERIOD_RE.is_match(raw).then(|| Self(raw.to_string()))
    }

    pub fn current() -> Self {
        Self(Local::now().format("%Y-%m").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SalaryPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub checkin_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checkout_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_late: bool,
    #[serde(default)]
    pub late_minutes: i64,
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub total_hours: Option<f64>,
    #[serde(default)]
    pub face_verified: bool,
    #[serde(default)]
    pub location_verified: bool,
}

impl Resource for AttendanceRecord {
    const ENDPOINT: Endpoint = Endpoint {
        path: "api/attendance/",
        name: "attendance",
    };

    fn id(&self) -> i64 {
        self.id
    }

    fn summary(&self) -> String {
        let fmt_time = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".into())
        };
        let late = if self.is_late {
            format!(" late {} min", self.late_minutes)
        } else {
            String::new()
        };
        format!(
            "#{} in {} out {} hours {}{}",
            self.id,
            fmt_time(self.checkin_time),
            fmt_time(self.checkout_time),
            self.total_hours
                .map(|h| format!("{h:.2}"))
                .unwrap_or_else(|| "-".into()),
            late
        )
    }
}

/// Row of the "who is at work now" list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveEmployee {
    pub user_id: i64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub checkin_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub hours_worked: f64,
}

/// Body of `GET /api/attendance/current/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentStatus {
    pub is_checked_in: bool,
    #[serde(default)]
    pub checkin_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub hours_worked: f64,
    #[serde(default)]
    pub attendance_id: Option<i64>,
}
