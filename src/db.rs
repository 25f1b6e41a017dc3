use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Appeal, AppealReview, AppealStatus, AppealStatusCount, EnrolledStudent, GradeChange,
    GradeEntry, Period, Role, Subject, User,
};
use crate::workflow::{self, NewGrade};

const ENTRY_COLUMNS: &str = "g.id, g.student_id, g.subject_id, g.period, g.activity, g.score, \
     g.weight, g.recorded_at, g.professor_id, g.justification";

const APPEAL_COLUMNS: &str = "a.id, a.grade_id, a.student_id, a.description, a.status, \
     a.created_at, a.response, a.responded_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Credentials are stored as a SHA-256 digest salted with the username.
pub fn password_digest(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let users = vec![
        (
            Uuid::parse_str("6a1f0d3e-4b57-4c1e-9a0e-0f6d2b7c1a01")?,
            "profesor1",
            Role::Professor,
            "Dr. Juan Pérez",
        ),
        (
            Uuid::parse_str("6a1f0d3e-4b57-4c1e-9a0e-0f6d2b7c1a02")?,
            "profesor2",
            Role::Professor,
            "Dra. María García",
        ),
        (
            Uuid::parse_str("9c3b2e71-8d14-4f0a-b6a5-5e2c7d9f3b01")?,
            "estudiante1",
            Role::Student,
            "Carlos Rodríguez",
        ),
        (
            Uuid::parse_str("9c3b2e71-8d14-4f0a-b6a5-5e2c7d9f3b02")?,
            "estudiante2",
            Role::Student,
            "Ana Martínez",
        ),
    ];

    for (id, username, role, full_name) in &users {
        sqlx::query(
            r#"
            INSERT INTO gradebook.users (id, username, password_digest, role, full_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO UPDATE
            SET full_name = EXCLUDED.full_name, role = EXCLUDED.role
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(password_digest(username, "pass123"))
        .bind(role.as_str())
        .bind(full_name)
        .execute(pool)
        .await?;
    }

    let subjects = vec![
        ("MAT101", "Cálculo Diferencial", 4, "profesor1"),
        ("FIS101", "Física Mecánica", 4, "profesor2"),
        ("PROG101", "Programación I", 3, "profesor1"),
    ];

    for (code, name, credits, professor) in subjects {
        sqlx::query(
            r#"
            INSERT INTO gradebook.subjects (id, code, name, credits, professor_id)
            SELECT $1, $2, $3, $4, u.id FROM gradebook.users u WHERE u.username = $5
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name, credits = EXCLUDED.credits,
                professor_id = EXCLUDED.professor_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(credits)
        .bind(professor)
        .execute(pool)
        .await?;
    }

    let enrollments = vec![
        ("estudiante1", "MAT101"),
        ("estudiante1", "FIS101"),
        ("estudiante2", "MAT101"),
        ("estudiante2", "PROG101"),
    ];

    for (student, code) in enrollments {
        sqlx::query(
            r#"
            INSERT INTO gradebook.enrollments (id, student_id, subject_id, term)
            SELECT $1, u.id, s.id, $4
            FROM gradebook.users u, gradebook.subjects s
            WHERE u.username = $2 AND s.code = $3
            ON CONFLICT (student_id, subject_id, term) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student)
        .bind(code)
        .bind("2025-1")
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn authenticate(
    pool: &PgPool,
    username: &str,
    password: &str,
) -> anyhow::Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, username, role, full_name FROM gradebook.users \
         WHERE username = $1 AND password_digest = $2",
    )
    .bind(username)
    .bind(password_digest(username, password))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_user(pool: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, username, role, full_name FROM gradebook.users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_subject(pool: &PgPool, code: &str) -> anyhow::Result<Option<Subject>> {
    let row = sqlx::query(
        "SELECT s.id, s.code, s.name, s.credits, COALESCE(u.full_name, '') AS professor_name \
         FROM gradebook.subjects s LEFT JOIN gradebook.users u ON u.id = s.professor_id \
         WHERE s.code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(subject_from_row))
}

pub async fn subject_professor(pool: &PgPool, subject_id: Uuid) -> anyhow::Result<Option<Uuid>> {
    let professor: Option<Option<Uuid>> =
        sqlx::query_scalar("SELECT professor_id FROM gradebook.subjects WHERE id = $1")
            .bind(subject_id)
            .fetch_optional(pool)
            .await?;
    Ok(professor.flatten())
}

pub async fn subjects_for_professor(
    pool: &PgPool,
    professor_id: Uuid,
) -> anyhow::Result<Vec<Subject>> {
    let rows = sqlx::query(
        "SELECT s.id, s.code, s.name, s.credits, u.full_name AS professor_name \
         FROM gradebook.subjects s JOIN gradebook.users u ON u.id = s.professor_id \
         WHERE s.professor_id = $1 ORDER BY s.code",
    )
    .bind(professor_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(subject_from_row).collect())
}

pub async fn subjects_for_student(pool: &PgPool, student_id: Uuid) -> anyhow::Result<Vec<Subject>> {
    let rows = sqlx::query(
        "SELECT s.id, s.code, s.name, s.credits, COALESCE(u.full_name, '') AS professor_name \
         FROM gradebook.subjects s \
         JOIN gradebook.enrollments e ON e.subject_id = s.id \
         LEFT JOIN gradebook.users u ON u.id = s.professor_id \
         WHERE e.student_id = $1 ORDER BY s.code",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(subject_from_row).collect())
}

pub async fn students_in_subject(
    pool: &PgPool,
    subject_id: Uuid,
) -> anyhow::Result<Vec<EnrolledStudent>> {
    let rows = sqlx::query(
        "SELECT u.id, u.full_name, u.username \
         FROM gradebook.users u JOIN gradebook.enrollments e ON e.student_id = u.id \
         WHERE e.subject_id = $1 AND u.role = 'student' ORDER BY u.full_name",
    )
    .bind(subject_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| EnrolledStudent {
            id: row.get("id"),
            full_name: row.get("full_name"),
            username: row.get("username"),
        })
        .collect())
}

pub async fn is_enrolled(pool: &PgPool, student_id: Uuid, subject_id: Uuid) -> anyhow::Result<bool> {
    let enrolled: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM gradebook.enrollments \
         WHERE student_id = $1 AND subject_id = $2)",
    )
    .bind(student_id)
    .bind(subject_id)
    .fetch_one(pool)
    .await?;
    Ok(enrolled)
}

pub async fn record_grade(pool: &PgPool, entry: &GradeEntry) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO gradebook.grades
        (id, student_id, subject_id, period, activity, score, weight, recorded_at,
         professor_id, justification)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.id)
    .bind(entry.student_id)
    .bind(entry.subject_id)
    .bind(entry.period.number())
    .bind(&entry.activity)
    .bind(entry.score)
    .bind(entry.weight)
    .bind(entry.recorded_at)
    .bind(entry.professor_id)
    .bind(&entry.justification)
    .execute(pool)
    .await?;
    Ok(())
}

/// Updates the score and appends a history row in one transaction.
pub async fn modify_grade(
    pool: &PgPool,
    grade_id: Uuid,
    new_score: f64,
    justification: &str,
    professor_id: Uuid,
) -> anyhow::Result<f64> {
    let mut tx = pool.begin().await?;

    let previous: f64 =
        sqlx::query_scalar("SELECT score FROM gradebook.grades WHERE id = $1 FOR UPDATE")
            .bind(grade_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow!("grade {grade_id} not found"))?;

    sqlx::query("UPDATE gradebook.grades SET score = $1, justification = $2 WHERE id = $3")
        .bind(new_score)
        .bind(justification)
        .bind(grade_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO gradebook.grade_changes
        (id, grade_id, previous_score, new_score, changed_at, professor_id, justification)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(grade_id)
    .bind(previous)
    .bind(new_score)
    .bind(Utc::now())
    .bind(professor_id)
    .bind(justification)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(previous)
}

pub async fn fetch_entries(
    pool: &PgPool,
    student_id: Uuid,
    subject_id: Uuid,
) -> anyhow::Result<Vec<GradeEntry>> {
    let query = format!(
        "SELECT {ENTRY_COLUMNS} FROM gradebook.grades g \
         WHERE g.student_id = $1 AND g.subject_id = $2 \
         ORDER BY g.period, g.recorded_at"
    );
    let rows = sqlx::query(&query)
        .bind(student_id)
        .bind(subject_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn fetch_grade(pool: &PgPool, grade_id: Uuid) -> anyhow::Result<Option<GradeEntry>> {
    let query = format!("SELECT {ENTRY_COLUMNS} FROM gradebook.grades g WHERE g.id = $1");
    let row = sqlx::query(&query)
        .bind(grade_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(entry_from_row).transpose()
}

pub async fn grade_history(pool: &PgPool, grade_id: Uuid) -> anyhow::Result<Vec<GradeChange>> {
    let rows = sqlx::query(
        "SELECT h.previous_score, h.new_score, h.changed_at, u.full_name, h.justification \
         FROM gradebook.grade_changes h JOIN gradebook.users u ON u.id = h.professor_id \
         WHERE h.grade_id = $1 ORDER BY h.changed_at DESC",
    )
    .bind(grade_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| GradeChange {
            previous_score: row.get("previous_score"),
            new_score: row.get("new_score"),
            changed_at: row.get("changed_at"),
            professor_name: row.get("full_name"),
            justification: row.get("justification"),
        })
        .collect())
}

pub async fn create_appeal(pool: &PgPool, appeal: &Appeal) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO gradebook.appeals
        (id, grade_id, student_id, description, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(appeal.id)
    .bind(appeal.grade_id)
    .bind(appeal.student_id)
    .bind(&appeal.description)
    .bind(appeal.status.as_str())
    .bind(appeal.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_appeal(pool: &PgPool, appeal_id: Uuid) -> anyhow::Result<Option<Appeal>> {
    let query = format!("SELECT {APPEAL_COLUMNS} FROM gradebook.appeals a WHERE a.id = $1");
    let row = sqlx::query(&query)
        .bind(appeal_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(appeal_from_row).transpose()
}

pub async fn respond_appeal(
    pool: &PgPool,
    appeal_id: Uuid,
    response: &str,
    status: AppealStatus,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE gradebook.appeals SET response = $1, status = $2, responded_at = $3 \
         WHERE id = $4",
    )
    .bind(response)
    .bind(status.as_str())
    .bind(Utc::now())
    .bind(appeal_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn appeals_for_student(pool: &PgPool, student_id: Uuid) -> anyhow::Result<Vec<Appeal>> {
    let query = format!(
        "SELECT {APPEAL_COLUMNS} FROM gradebook.appeals a \
         WHERE a.student_id = $1 ORDER BY a.created_at DESC"
    );
    let rows = sqlx::query(&query)
        .bind(student_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(appeal_from_row).collect()
}

pub async fn appeals_for_professor(
    pool: &PgPool,
    professor_id: Uuid,
) -> anyhow::Result<Vec<AppealReview>> {
    let query = format!(
        "SELECT {APPEAL_COLUMNS}, u.full_name, g.activity, g.score \
         FROM gradebook.appeals a \
         JOIN gradebook.grades g ON g.id = a.grade_id \
         JOIN gradebook.users u ON u.id = a.student_id \
         WHERE g.professor_id = $1 ORDER BY a.created_at DESC"
    );
    let rows = sqlx::query(&query)
        .bind(professor_id)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(AppealReview {
                appeal: appeal_from_row(row)?,
                student_name: row.get("full_name"),
                activity: row.get("activity"),
                score: row.get("score"),
            })
        })
        .collect()
}

pub async fn appeal_counts_by_status(
    pool: &PgPool,
    professor_id: Uuid,
) -> anyhow::Result<Vec<AppealStatusCount>> {
    let rows = sqlx::query(
        "SELECT a.status, COUNT(*) AS total \
         FROM gradebook.appeals a JOIN gradebook.grades g ON g.id = a.grade_id \
         WHERE g.professor_id = $1 GROUP BY a.status ORDER BY a.status",
    )
    .bind(professor_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let status: String = row.get("status");
            Ok(AppealStatusCount {
                status: status.parse().map_err(|err: String| anyhow!(err))?,
                count: row.get("total"),
            })
        })
        .collect()
}

pub async fn modifications_since(
    pool: &PgPool,
    professor_id: Uuid,
    since_days: i64,
) -> anyhow::Result<i64> {
    let since = Utc::now() - Duration::days(since_days);
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM gradebook.grade_changes \
         WHERE professor_id = $1 AND changed_at >= $2",
    )
    .bind(professor_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// One line of a grade import file, keyed by usernames and subject code.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImportRow {
    pub student: String,
    pub subject: String,
    pub period: i16,
    pub activity: String,
    pub score: f64,
    pub weight: f64,
    pub recorded_at: DateTime<Utc>,
    pub professor: String,
    pub justification: String,
    pub source_key: Option<String>,
}

/// Reads every well-formed row with its file line; rows that fail to parse are
/// logged and counted instead of aborting the file.
pub fn read_import_rows<R: std::io::Read>(input: R) -> (Vec<(usize, ImportRow)>, usize) {
    let mut reader = csv::Reader::from_reader(input);
    let mut rows = Vec::new();
    let mut malformed = 0;

    for (index, result) in reader.deserialize::<ImportRow>().enumerate() {
        let line = index + 2;
        match result {
            Ok(row) => rows.push((line, row)),
            Err(err) => {
                tracing::warn!(line, error = %err, "skipping malformed grade row");
                malformed += 1;
            }
        }
    }

    (rows, malformed)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let (rows, malformed) = read_import_rows(file);
    let mut summary = ImportSummary {
        inserted: 0,
        skipped: malformed,
    };

    for (line, row) in rows {
        let period = match Period::try_from(row.period) {
            Ok(period) => period,
            Err(reason) => {
                tracing::warn!(line, %reason, "skipping grade row");
                summary.skipped += 1;
                continue;
            }
        };

        let student = find_user(pool, &row.student).await?;
        let professor = find_user(pool, &row.professor).await?;
        let subject = find_subject(pool, &row.subject).await?;
        let (student, professor, subject) = match (student, professor, subject) {
            (Some(student), Some(professor), Some(subject)) if student.role == Role::Student => {
                (student, professor, subject)
            }
            _ => {
                tracing::warn!(
                    line,
                    student = %row.student,
                    professor = %row.professor,
                    subject = %row.subject,
                    "skipping grade row with unknown student, professor or subject"
                );
                summary.skipped += 1;
                continue;
            }
        };

        let teaches_subject = subject_professor(pool, subject.id).await? == Some(professor.id);
        let student_enrolled = is_enrolled(pool, student.id, subject.id).await?;
        let grade = NewGrade {
            activity: row.activity.as_str(),
            score: row.score,
            weight: row.weight,
            justification: row.justification.as_str(),
            teaches_subject,
            student_enrolled,
        };
        if let Err(violation) = workflow::check_imported_grade(&professor, &grade) {
            tracing::warn!(line, %violation, "skipping grade row that fails validation");
            summary.skipped += 1;
            continue;
        }

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO gradebook.grades
            (id, student_id, subject_id, period, activity, score, weight, recorded_at,
             professor_id, justification, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student.id)
        .bind(subject.id)
        .bind(period.number())
        .bind(row.activity.trim())
        .bind(row.score)
        .bind(row.weight)
        .bind(row.recorded_at)
        .bind(professor.id)
        .bind(row.justification.trim())
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            summary.inserted += 1;
        } else {
            summary.skipped += 1;
        }
    }

    Ok(summary)
}

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        role: role.parse().map_err(|err: String| anyhow!(err))?,
        full_name: row.get("full_name"),
    })
}

fn subject_from_row(row: &PgRow) -> Subject {
    Subject {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        credits: row.get("credits"),
        professor_name: row.get("professor_name"),
    }
}

fn entry_from_row(row: &PgRow) -> anyhow::Result<GradeEntry> {
    let period: i16 = row.get("period");
    Ok(GradeEntry {
        id: row.get("id"),
        student_id: row.get("student_id"),
        subject_id: row.get("subject_id"),
        period: Period::try_from(period).map_err(|err| anyhow!(err))?,
        activity: row.get("activity"),
        score: row.get("score"),
        weight: row.get("weight"),
        recorded_at: row.get("recorded_at"),
        professor_id: row.get("professor_id"),
        justification: row.get("justification"),
    })
}

fn appeal_from_row(row: &PgRow) -> anyhow::Result<Appeal> {
    let status: String = row.get("status");
    Ok(Appeal {
        id: row.get("id"),
        grade_id: row.get("grade_id"),
        student_id: row.get("student_id"),
        description: row.get("description"),
        status: status.parse().map_err(|err: String| anyhow!(err))?,
        created_at: row.get("created_at"),
        response: row.get("response"),
        responded_at: row.get("responded_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_salted_with_username() {
        let first = password_digest("estudiante1", "pass123");
        let second = password_digest("estudiante2", "pass123");
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(first, password_digest("estudiante1", "pass123"));
    }

    const HEADER: &str =
        "student,subject,period,activity,score,weight,recorded_at,professor,justification,source_key\n";

    #[test]
    fn malformed_import_rows_are_skipped_not_fatal() {
        let data = format!(
            "{HEADER}\
             estudiante1,MAT101,1,Quiz,4.0,30,2025-03-01T10:00:00Z,profesor1,Quiz graded with rubric A,q-1\n\
             estudiante1,MAT101,1,Lab,\"4,0\",30,2025-03-01T10:00:00Z,profesor1,Lab graded with rubric A,q-2\n\
             estudiante1,MAT101,2,Essay,3.5,50,yesterday,profesor1,Essay graded with rubric B,q-3\n\
             estudiante2,MAT101,2,Essay,3.5,50,2025-03-02T10:00:00Z,profesor1,Essay graded with rubric B,\n"
        );

        let (rows, malformed) = read_import_rows(data.as_bytes());
        assert_eq!(malformed, 2);
        let lines: Vec<usize> = rows.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![2, 5]);
        assert_eq!(rows[0].1.source_key.as_deref(), Some("q-1"));
        assert_eq!(rows[1].1.source_key, None);
        assert_eq!(rows[1].1.student, "estudiante2");
    }
}
