use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::AppealPolicy;
use crate::models::{AppealStatus, GradeEntry, Role, Session, User};
use crate::rules;

/// Reasons a write is refused before it reaches storage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleViolation {
    #[error("only professors can {action}")]
    ProfessorOnly { action: &'static str },
    #[error("only students can {action}")]
    StudentOnly { action: &'static str },
    #[error("subject is not taught by this professor")]
    NotSubjectOwner,
    #[error("student is not enrolled in this subject")]
    NotEnrolled,
    #[error("no permission to modify this grade")]
    NotGradeOwner,
    #[error("this grade does not belong to you")]
    NotGradeHolder,
    #[error("this grade is not visible to you")]
    GradeNotVisible,
    #[error("score must be between 0.0 and 5.0 (got {0})")]
    ScoreOutOfRange(f64),
    #[error("percentage must be between 0 and 100 (got {0})")]
    PercentageOutOfRange(f64),
    #[error("activity name cannot be empty")]
    EmptyActivity,
    #[error("justification must have at least {min} characters")]
    JustificationTooShort { min: usize },
    #[error("appeal must have at least {min} characters")]
    AppealTooShort { min: usize },
    #[error("the appeal window for this grade has closed (maximum {days} days)")]
    AppealWindowClosed { days: i64 },
    #[error("appeal was already {0}")]
    AppealAlreadyResolved(AppealStatus),
}

#[derive(Debug, Clone)]
pub struct NewGrade<'a> {
    pub activity: &'a str,
    pub score: f64,
    pub weight: f64,
    pub justification: &'a str,
    pub teaches_subject: bool,
    pub student_enrolled: bool,
}

pub fn check_new_grade(session: &Session, grade: &NewGrade<'_>) -> Result<(), RuleViolation> {
    if session.role() != Role::Professor {
        return Err(RuleViolation::ProfessorOnly {
            action: "record grades",
        });
    }
    if !grade.teaches_subject {
        return Err(RuleViolation::NotSubjectOwner);
    }
    if !grade.student_enrolled {
        return Err(RuleViolation::NotEnrolled);
    }
    if grade.activity.trim().is_empty() {
        return Err(RuleViolation::EmptyActivity);
    }
    if !rules::valid_grade(grade.score) {
        return Err(RuleViolation::ScoreOutOfRange(grade.score));
    }
    if !rules::valid_percentage(grade.weight) {
        return Err(RuleViolation::PercentageOutOfRange(grade.weight));
    }
    check_justification(grade.justification)
}

/// Imported rows are held to the same checks as a grade the row's professor records by hand.
pub fn check_imported_grade(professor: &User, grade: &NewGrade<'_>) -> Result<(), RuleViolation> {
    let session = Session {
        user: professor.clone(),
    };
    check_new_grade(&session, grade)
}

/// Only the professor who recorded a grade and the student holding it may look it up.
pub fn check_grade_visible(session: &Session, grade: &GradeEntry) -> Result<(), RuleViolation> {
    if grade.professor_id == session.user_id() || grade.student_id == session.user_id() {
        Ok(())
    } else {
        Err(RuleViolation::GradeNotVisible)
    }
}

pub fn check_grade_change(
    session: &Session,
    grade: &GradeEntry,
    new_score: f64,
    justification: &str,
) -> Result<(), RuleViolation> {
    let is_owner = grade.professor_id == session.user_id();
    if !rules::can_modify_grade(session.role(), is_owner) {
        return Err(RuleViolation::NotGradeOwner);
    }
    if !rules::valid_grade(new_score) {
        return Err(RuleViolation::ScoreOutOfRange(new_score));
    }
    check_justification(justification)
}

pub fn check_appeal_filing(
    session: &Session,
    grade: &GradeEntry,
    description: &str,
    now: DateTime<Utc>,
    policy: &AppealPolicy,
) -> Result<(), RuleViolation> {
    if session.role() != Role::Student {
        return Err(RuleViolation::StudentOnly {
            action: "file appeals",
        });
    }
    if grade.student_id != session.user_id() {
        return Err(RuleViolation::NotGradeHolder);
    }
    if !rules::within_appeal_window(grade.recorded_at, now, policy.filing_window_days) {
        return Err(RuleViolation::AppealWindowClosed {
            days: policy.filing_window_days,
        });
    }

    // Both thresholds apply; the filing one is the stricter of the two.
    if !rules::valid_appeal(description) || rules::trimmed_len(description) < policy.filing_min_chars {
        return Err(RuleViolation::AppealTooShort {
            min: policy.filing_min_chars.max(rules::APPEAL_MIN_CHARS),
        });
    }
    Ok(())
}

pub fn check_appeal_response(
    session: &Session,
    grade_professor_id: Uuid,
    status: AppealStatus,
    response: &str,
) -> Result<(), RuleViolation> {
    if session.role() != Role::Professor {
        return Err(RuleViolation::ProfessorOnly {
            action: "respond to appeals",
        });
    }
    if grade_professor_id != session.user_id() {
        return Err(RuleViolation::NotGradeOwner);
    }
    if status != AppealStatus::Pending {
        return Err(RuleViolation::AppealAlreadyResolved(status));
    }
    check_justification(response)
}

/// Simulation targets live on the same 0.0 to 5.0 scale as grades.
pub fn check_target(target: f64) -> Result<(), RuleViolation> {
    if rules::valid_grade(target) {
        Ok(())
    } else {
        Err(RuleViolation::ScoreOutOfRange(target))
    }
}

fn check_justification(text: &str) -> Result<(), RuleViolation> {
    if rules::valid_justification(text) {
        Ok(())
    } else {
        Err(RuleViolation::JustificationTooShort {
            min: rules::JUSTIFICATION_MIN_CHARS,
        })
    }
}
