use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

mod averaging;
mod config;
mod db;
mod models;
mod report;
mod rules;
mod telemetry;
mod workflow;

use averaging::{EntrySnapshot, GradeService};
use config::AppConfig;
use models::{Appeal, AppealStatus, GradeEntry, Period, Role, Session, Subject};
use report::{SubjectRecord, TaughtSubject};

#[derive(Parser)]
#[command(name = "gradebook")]
#[command(about = "Course grade book with weighted averages, score simulation and appeals", long_about = None)]
struct Cli {
    #[arg(long, global = true, env = "GRADEBOOK_USERNAME")]
    username: Option<String>,
    #[arg(long, global = true, env = "GRADEBOOK_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo users, subjects and enrollments
    Seed,
    /// Import graded activities from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that run as an authenticated user.
#[derive(Subcommand)]
enum SessionCommand {
    /// Show your grades grouped by period
    Grades,
    /// Show period and final averages for every enrolled subject
    Averages,
    /// Show the final average for one subject
    Final {
        #[arg(long)]
        subject: String,
    },
    /// Work out the score needed on remaining work to reach a target
    Simulate {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        target: f64,
        #[arg(long)]
        json: bool,
    },
    /// Record a new graded activity
    RecordGrade {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        student: String,
        #[arg(long, value_parser = clap::value_parser!(i16).range(1..=3))]
        period: i16,
        #[arg(long)]
        activity: String,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        justification: String,
    },
    /// Change the score of a grade you recorded
    ModifyGrade {
        #[arg(long)]
        grade: Uuid,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        justification: String,
    },
    /// Show the modification history of a grade
    History {
        #[arg(long)]
        grade: Uuid,
    },
    /// File an appeal against one of your grades
    Appeal {
        #[arg(long)]
        grade: Uuid,
        #[arg(long)]
        description: String,
    },
    /// List appeals you filed, or appeals against grades you recorded
    Appeals,
    /// Approve or reject an appeal
    #[command(group(
        ArgGroup::new("decision")
            .args(["approve", "reject"])
            .required(true)
            .multiple(false)
    ))]
    RespondAppeal {
        #[arg(long)]
        appeal: Uuid,
        #[arg(long)]
        approve: bool,
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        response: String,
    },
    /// Check whether a grade is still inside an appeal window
    AppealWindow {
        #[arg(long)]
        grade: Uuid,
        #[arg(long)]
        days: Option<i64>,
    },
    /// Write a markdown report (transcript for students, overview for professors)
    Report {
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..))]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.log_filter)?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")?;

    match &cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, csv).await?;
            tracing::info!(
                inserted = summary.inserted,
                skipped = summary.skipped,
                "grade import finished"
            );
            println!(
                "Inserted {} grades from {} ({} skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped
            );
        }
        Commands::Session(command) => {
            let session = open_session(&pool, &cli).await?;
            tracing::info!(user = %session.user.username, role = %session.role(), "session opened");
            run(&pool, &config, &session, command).await?;
        }
    }

    Ok(())
}

async fn open_session(pool: &PgPool, cli: &Cli) -> anyhow::Result<Session> {
    let (Some(username), Some(password)) = (cli.username.as_deref(), cli.password.as_deref())
    else {
        bail!("--username and --password (or GRADEBOOK_USERNAME/GRADEBOOK_PASSWORD) are required");
    };

    match db::authenticate(pool, username, password).await? {
        Some(user) => Ok(Session { user }),
        None => {
            tracing::warn!(username, "authentication failed");
            bail!("invalid credentials");
        }
    }
}

async fn run(
    pool: &PgPool,
    config: &AppConfig,
    session: &Session,
    command: &SessionCommand,
) -> anyhow::Result<()> {
    match command {
        SessionCommand::Grades => {
            require_role(session, Role::Student)?;
            let records = student_records(pool, session.user_id()).await?;
            print!(
                "{}",
                report::build_transcript(
                    session.user_id(),
                    &session.user.full_name,
                    &records,
                    &config.grading
                )
            );
        }
        SessionCommand::Averages => {
            require_role(session, Role::Student)?;
            let records = student_records(pool, session.user_id()).await?;
            if records.is_empty() {
                println!("Not enrolled in any subject.");
                return Ok(());
            }
            print!(
                "{}",
                report::build_period_table(session.user_id(), &records, &config.grading)
            );
        }
        SessionCommand::Final { subject } => {
            require_role(session, Role::Student)?;
            let subject = enrolled_subject(pool, session, subject).await?;
            let snapshot =
                EntrySnapshot::new(db::fetch_entries(pool, session.user_id(), subject.id).await?);
            let service = GradeService::new(&snapshot, config.grading);
            let final_average = service.final_average(session.user_id(), subject.id);
            println!(
                "{}: final average {:.2} ({})",
                subject.name,
                final_average,
                report::standing(final_average, &config.grading)
            );
        }
        SessionCommand::Simulate {
            subject,
            target,
            json,
        } => {
            require_role(session, Role::Student)?;
            workflow::check_target(*target)?;
            let subject = enrolled_subject(pool, session, subject).await?;
            let snapshot =
                EntrySnapshot::new(db::fetch_entries(pool, session.user_id(), subject.id).await?);
            let service = GradeService::new(&snapshot, config.grading);
            let result = service.simulate_required_score(session.user_id(), subject.id, *target);

            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", report::render_simulation(&subject.name, &result));
            }
        }
        SessionCommand::RecordGrade {
            subject,
            student,
            period,
            activity,
            score,
            weight,
            justification,
        } => {
            let subject = db::find_subject(pool, subject)
                .await?
                .with_context(|| format!("unknown subject '{subject}'"))?;
            let student = db::find_user(pool, student)
                .await?
                .filter(|user| user.role == Role::Student)
                .with_context(|| format!("unknown student '{student}'"))?;
            let period = Period::try_from(*period).map_err(anyhow::Error::msg)?;

            let teaches_subject =
                db::subject_professor(pool, subject.id).await? == Some(session.user_id());
            let student_enrolled = db::is_enrolled(pool, student.id, subject.id).await?;

            workflow::check_new_grade(
                session,
                &workflow::NewGrade {
                    activity: activity.as_str(),
                    score: *score,
                    weight: *weight,
                    justification: justification.as_str(),
                    teaches_subject,
                    student_enrolled,
                },
            )?;

            let entry = GradeEntry {
                id: Uuid::new_v4(),
                student_id: student.id,
                subject_id: subject.id,
                period,
                activity: activity.trim().to_string(),
                score: *score,
                weight: *weight,
                recorded_at: Utc::now(),
                professor_id: session.user_id(),
                justification: justification.trim().to_string(),
            };
            db::record_grade(pool, &entry).await?;
            tracing::info!(grade = %entry.id, subject = %subject.code, "grade recorded");

            let recorded: Vec<f64> = db::fetch_entries(pool, student.id, subject.id)
                .await?
                .iter()
                .filter(|existing| existing.period == period)
                .map(|existing| existing.weight)
                .collect();
            let total: f64 = recorded.iter().sum();
            if total > 100.0 && !rules::percentages_sum_to_100(&recorded) {
                tracing::warn!(
                    subject = %subject.code,
                    %period,
                    total,
                    "recorded weights for this period exceed 100%"
                );
            }

            println!("Grade recorded (ID: {}).", entry.id);
        }
        SessionCommand::ModifyGrade {
            grade,
            score,
            justification,
        } => {
            let entry = db::fetch_grade(pool, *grade)
                .await?
                .with_context(|| format!("grade {grade} not found"))?;
            workflow::check_grade_change(session, &entry, *score, justification)?;

            let previous =
                db::modify_grade(pool, *grade, *score, justification.trim(), session.user_id())
                    .await?;
            tracing::info!(%grade, previous, new = *score, "grade modified");
            println!("Grade changed from {previous} to {score}.");
        }
        SessionCommand::History { grade } => {
            let entry = db::fetch_grade(pool, *grade)
                .await?
                .with_context(|| format!("grade {grade} not found"))?;
            workflow::check_grade_visible(session, &entry)?;

            let history = db::grade_history(pool, *grade).await?;
            if history.is_empty() {
                println!("No modifications recorded for this grade.");
                return Ok(());
            }
            for change in history {
                println!(
                    "{} by {}: {} -> {} ({})",
                    change.changed_at.format("%Y-%m-%d %H:%M"),
                    change.professor_name,
                    change.previous_score,
                    change.new_score,
                    change.justification
                );
            }
        }
        SessionCommand::Appeal { grade, description } => {
            let entry = db::fetch_grade(pool, *grade)
                .await?
                .with_context(|| format!("grade {grade} not found"))?;
            let now = Utc::now();
            workflow::check_appeal_filing(session, &entry, description, now, &config.appeals)?;

            let appeal = Appeal {
                id: Uuid::new_v4(),
                grade_id: entry.id,
                student_id: session.user_id(),
                description: description.trim().to_string(),
                status: AppealStatus::Pending,
                created_at: now,
                response: None,
                responded_at: None,
            };
            db::create_appeal(pool, &appeal).await?;
            tracing::info!(appeal = %appeal.id, %grade, "appeal filed");
            println!("Appeal filed (ID: {}).", appeal.id);
        }
        SessionCommand::Appeals => match session.role() {
            Role::Student => {
                let appeals = db::appeals_for_student(pool, session.user_id()).await?;
                if appeals.is_empty() {
                    println!("You have not filed any appeals.");
                }
                for appeal in appeals {
                    println!(
                        "{} | {} | filed {}",
                        appeal.id,
                        appeal.status.as_str().to_uppercase(),
                        appeal.created_at.format("%Y-%m-%d %H:%M")
                    );
                    println!("  {}", appeal.description);
                    if let (Some(response), Some(responded_at)) =
                        (&appeal.response, appeal.responded_at)
                    {
                        println!(
                            "  Response ({}): {}",
                            responded_at.format("%Y-%m-%d %H:%M"),
                            response
                        );
                    }
                }
            }
            Role::Professor => {
                let reviews = db::appeals_for_professor(pool, session.user_id()).await?;
                if reviews.is_empty() {
                    println!("No appeals.");
                }
                for review in reviews {
                    println!(
                        "{} | {} | {} ({}: {})",
                        review.appeal.id,
                        review.appeal.status,
                        review.student_name,
                        review.activity,
                        review.score
                    );
                    println!(
                        "  filed {}: {}",
                        review.appeal.created_at.format("%Y-%m-%d %H:%M"),
                        review.appeal.description
                    );
                }
            }
        },
        SessionCommand::RespondAppeal {
            appeal,
            approve,
            reject: _,
            response,
        } => {
            let existing = db::fetch_appeal(pool, *appeal)
                .await?
                .with_context(|| format!("appeal {appeal} not found"))?;
            let grade = db::fetch_grade(pool, existing.grade_id)
                .await?
                .with_context(|| format!("grade {} not found", existing.grade_id))?;
            workflow::check_appeal_response(session, grade.professor_id, existing.status, response)?;

            let status = if *approve {
                AppealStatus::Approved
            } else {
                AppealStatus::Rejected
            };
            db::respond_appeal(pool, *appeal, response.trim(), status).await?;
            tracing::info!(%appeal, %status, "appeal answered");
            println!("Appeal {status}.");
            if status == AppealStatus::Approved {
                println!("Use modify-grade --grade {} to apply the new score.", grade.id);
            }
        }
        SessionCommand::AppealWindow { grade, days } => {
            let entry = db::fetch_grade(pool, *grade)
                .await?
                .with_context(|| format!("grade {grade} not found"))?;
            workflow::check_grade_visible(session, &entry)?;
            let days = days.unwrap_or(config.appeals.default_window_days);
            if rules::within_appeal_window(entry.recorded_at, Utc::now(), days) {
                println!("Grade {grade} is within the {days}-day appeal window.");
            } else {
                println!("The {days}-day appeal window for grade {grade} has closed.");
            }
        }
        SessionCommand::Report { since_days, out } => {
            let report = match session.role() {
                Role::Student => {
                    let records = student_records(pool, session.user_id()).await?;
                    report::build_transcript(
                        session.user_id(),
                        &session.user.full_name,
                        &records,
                        &config.grading,
                    )
                }
                Role::Professor => {
                    let counts = db::appeal_counts_by_status(pool, session.user_id()).await?;
                    let modifications =
                        db::modifications_since(pool, session.user_id(), *since_days).await?;
                    let taught = taught_subjects(pool, session.user_id()).await?;
                    report::build_professor_report(
                        &session.user.full_name,
                        &counts,
                        *since_days,
                        modifications,
                        &taught,
                        &config.grading,
                    )
                }
            };
            std::fs::write(out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn require_role(session: &Session, role: Role) -> anyhow::Result<()> {
    if session.role() != role {
        bail!("this command is only available to {role}s");
    }
    Ok(())
}

async fn enrolled_subject(pool: &PgPool, session: &Session, code: &str) -> anyhow::Result<Subject> {
    db::subjects_for_student(pool, session.user_id())
        .await?
        .into_iter()
        .find(|subject| subject.code.eq_ignore_ascii_case(code))
        .with_context(|| format!("not enrolled in subject '{code}'"))
}

async fn student_records(pool: &PgPool, student_id: Uuid) -> anyhow::Result<Vec<SubjectRecord>> {
    let mut records = Vec::new();
    for subject in db::subjects_for_student(pool, student_id).await? {
        let entries = db::fetch_entries(pool, student_id, subject.id).await?;
        records.push(SubjectRecord { subject, entries });
    }
    Ok(records)
}

async fn taught_subjects(pool: &PgPool, professor_id: Uuid) -> anyhow::Result<Vec<TaughtSubject>> {
    let mut taught = Vec::new();
    for subject in db::subjects_for_professor(pool, professor_id).await? {
        let mut students = Vec::new();
        for student in db::students_in_subject(pool, subject.id).await? {
            let entries = db::fetch_entries(pool, student.id, subject.id).await?;
            students.push((student, entries));
        }
        taught.push(TaughtSubject { subject, students });
    }
    Ok(taught)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn setup_and_session_commands_parse_apart() {
        let cli = Cli::try_parse_from(["gradebook", "seed"]).unwrap();
        assert!(matches!(cli.command, Commands::Seed));

        let cli = Cli::try_parse_from(["gradebook", "grades"]).unwrap();
        assert!(matches!(cli.command, Commands::Session(SessionCommand::Grades)));

        let grade = Uuid::new_v4().to_string();
        let cli =
            Cli::try_parse_from(["gradebook", "appeal-window", "--grade", grade.as_str()]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Session(SessionCommand::AppealWindow { days: None, .. })
        ));
    }

    #[test]
    fn report_window_must_cover_at_least_one_day() {
        let cli = Cli::try_parse_from(["gradebook", "report"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Session(SessionCommand::Report { since_days: 30, .. })
        ));
        let cli = Cli::try_parse_from(["gradebook", "report", "--since-days", "1"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Session(SessionCommand::Report { since_days: 1, .. })
        ));

        assert!(Cli::try_parse_from(["gradebook", "report", "--since-days", "0"]).is_err());
        assert!(Cli::try_parse_from(["gradebook", "report", "--since-days", "-3"]).is_err());
    }
}
