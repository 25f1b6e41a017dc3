use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Professor,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Professor => "professor",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "professor" => Ok(Role::Professor),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three grading cuts of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    First,
    Second,
    Third,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::First, Period::Second, Period::Third];

    pub fn number(self) -> i16 {
        match self {
            Period::First => 1,
            Period::Second => 2,
            Period::Third => 3,
        }
    }

    pub fn index(self) -> usize {
        self.number() as usize - 1
    }
}

impl TryFrom<i16> for Period {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Period::First),
            2 => Ok(Period::Second),
            3 => Ok(Period::Third),
            other => Err(format!("period must be 1, 2 or 3 (got {other})")),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone)]
pub struct GradeEntry {
    pub id: Uuid,
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub period: Period,
    pub activity: String,
    pub score: f64,
    /// Percent of the period this activity is worth.
    pub weight: f64,
    pub recorded_at: DateTime<Utc>,
    pub professor_id: Uuid,
    pub justification: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub full_name: String,
}

/// The authenticated caller of a command.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

#[derive(Debug, Clone)]
pub struct Subject {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub credits: i32,
    pub professor_name: String,
}

#[derive(Debug, Clone)]
pub struct EnrolledStudent {
    pub id: Uuid,
    pub full_name: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealStatus {
    Pending,
    Approved,
    Rejected,
}

impl AppealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppealStatus::Pending => "pending",
            AppealStatus::Approved => "approved",
            AppealStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for AppealStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AppealStatus::Pending),
            "approved" => Ok(AppealStatus::Approved),
            "rejected" => Ok(AppealStatus::Rejected),
            other => Err(format!("unknown appeal status '{other}'")),
        }
    }
}

impl fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Appeal {
    pub id: Uuid,
    pub grade_id: Uuid,
    pub student_id: Uuid,
    pub description: String,
    pub status: AppealStatus,
    pub created_at: DateTime<Utc>,
    pub response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// Appeal joined with the grade it contests, as a professor sees it.
#[derive(Debug, Clone)]
pub struct AppealReview {
    pub appeal: Appeal,
    pub student_name: String,
    pub activity: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct GradeChange {
    pub previous_score: f64,
    pub new_score: f64,
    pub changed_at: DateTime<Utc>,
    pub professor_name: String,
    pub justification: String,
}

#[derive(Debug, Clone)]
pub struct AppealStatusCount {
    pub status: AppealStatus,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub current_average: f64,
    pub target_score: f64,
    pub completed_weight_pct: f64,
    pub missing_weight_pct: f64,
    pub required_score: f64,
    pub reachable: bool,
}
