use std::fmt::Write;

use uuid::Uuid;

use crate::averaging::{EntrySnapshot, GradeService};
use crate::config::GradingPolicy;
use crate::models::{
    AppealStatusCount, EnrolledStudent, GradeEntry, Period, SimulationResult, Subject,
};

/// One enrolled subject with the student's recorded entries.
#[derive(Debug, Clone)]
pub struct SubjectRecord {
    pub subject: Subject,
    pub entries: Vec<GradeEntry>,
}

/// A subject a professor teaches, with each enrolled student's entries.
#[derive(Debug, Clone)]
pub struct TaughtSubject {
    pub subject: Subject,
    pub students: Vec<(EnrolledStudent, Vec<GradeEntry>)>,
}

pub fn format_period_average(average: f64) -> String {
    if average > 0.0 {
        format!("{average:.2}")
    } else {
        "---".to_string()
    }
}

pub fn standing(final_average: f64, policy: &GradingPolicy) -> &'static str {
    if final_average >= policy.passing_grade {
        "passing"
    } else {
        "failing"
    }
}

pub fn build_transcript(
    student_id: Uuid,
    student_name: &str,
    records: &[SubjectRecord],
    policy: &GradingPolicy,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Grade Transcript");
    let _ = writeln!(output, "Prepared for {student_name}");

    if records.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Not enrolled in any subject.");
        return output;
    }

    for record in records {
        let snapshot = EntrySnapshot::new(record.entries.clone());
        let service = GradeService::new(&snapshot, *policy);
        let subject_id = record.subject.id;

        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "## {} - {}, {} credits (Prof. {})",
            record.subject.code,
            record.subject.name,
            record.subject.credits,
            record.subject.professor_name
        );

        if record.entries.is_empty() {
            let _ = writeln!(output, "No grades recorded yet.");
            continue;
        }

        for period in Period::ALL {
            let in_period: Vec<&GradeEntry> = record
                .entries
                .iter()
                .filter(|entry| entry.period == period)
                .collect();
            if in_period.is_empty() {
                continue;
            }

            let _ = writeln!(output);
            let _ = writeln!(output, "### Period {period}");
            for entry in in_period {
                let _ = writeln!(
                    output,
                    "- {} `{}`: {:.1} ({}%) on {} - {}",
                    entry.activity,
                    entry.id,
                    entry.score,
                    entry.weight,
                    entry.recorded_at.format("%Y-%m-%d"),
                    entry.justification
                );
            }

            let average = service.period_average(student_id, subject_id, period);
            let _ = writeln!(output, "Period {period} average: {average:.2}");
            if !service.period_weights_complete(student_id, subject_id, period) {
                let _ = writeln!(output, "Recorded weights for this period do not total 100%.");
            }
        }

        let final_average = service.final_average(student_id, subject_id);
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "**Final average: {final_average:.2} ({})**",
            standing(final_average, policy)
        );
    }

    output
}

pub fn build_period_table(student_id: Uuid, records: &[SubjectRecord], policy: &GradingPolicy) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<30} {:<10} {:<10} {:<10} {:<10}",
        "Subject", "Period 1", "Period 2", "Period 3", "Final"
    );
    let _ = writeln!(output, "{}", "-".repeat(74));

    for record in records {
        let snapshot = EntrySnapshot::new(record.entries.clone());
        let service = GradeService::new(&snapshot, *policy);
        let averages = service.period_averages(student_id, record.subject.id);
        let final_average = service.final_average(student_id, record.subject.id);
        let _ = writeln!(
            output,
            "{:<30} {:<10} {:<10} {:<10} {:<10.2} {}",
            record.subject.name,
            format_period_average(averages[0]),
            format_period_average(averages[1]),
            format_period_average(averages[2]),
            final_average,
            standing(final_average, policy)
        );
    }

    output
}

pub fn build_professor_report(
    professor_name: &str,
    appeal_counts: &[AppealStatusCount],
    since_days: i64,
    recent_modifications: i64,
    subjects: &[TaughtSubject],
    policy: &GradingPolicy,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Gradebook Report");
    let _ = writeln!(output, "Generated for {professor_name}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Appeals by Status");

    if appeal_counts.is_empty() {
        let _ = writeln!(output, "No appeals filed against your grades.");
    } else {
        for count in appeal_counts {
            let _ = writeln!(output, "- {}: {}", count.status, count.count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Modifications");
    let _ = writeln!(
        output,
        "{recent_modifications} grade modifications in the last {since_days} days."
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Averages by Subject");

    if subjects.is_empty() {
        let _ = writeln!(output, "No subjects assigned.");
        return output;
    }

    for taught in subjects {
        let _ = writeln!(output);
        let _ = writeln!(output, "### {} - {}", taught.subject.code, taught.subject.name);

        if taught.students.is_empty() {
            let _ = writeln!(output, "No students enrolled.");
            continue;
        }

        let mut passing = 0usize;
        for (student, entries) in &taught.students {
            let snapshot = EntrySnapshot::new(entries.clone());
            let service = GradeService::new(&snapshot, *policy);
            let averages = service.period_averages(student.id, taught.subject.id);
            let final_average = service.final_average(student.id, taught.subject.id);
            if final_average >= policy.passing_grade {
                passing += 1;
            }

            let _ = writeln!(
                output,
                "- {} ({}): {} / {} / {} final {:.2}",
                student.full_name,
                student.username,
                format_period_average(averages[0]),
                format_period_average(averages[1]),
                format_period_average(averages[2]),
                final_average
            );
        }

        let _ = writeln!(
            output,
            "{passing} of {} students currently passing.",
            taught.students.len()
        );
    }

    output
}

pub fn render_simulation(subject_name: &str, result: &SimulationResult) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Simulation for {subject_name}");
    let _ = writeln!(output, "Current average: {:.2}", result.current_average);
    let _ = writeln!(output, "Target score: {:.2}", result.target_score);
    let _ = writeln!(output, "Completed weight: {:.1}%", result.completed_weight_pct);
    let _ = writeln!(output, "Missing weight: {:.1}%", result.missing_weight_pct);
    let _ = writeln!(
        output,
        "Required average on remaining work: {:.2}",
        result.required_score
    );
    if result.reachable {
        let _ = writeln!(output, "Reachable with the remaining activities.");
    } else {
        let _ = writeln!(output, "Not reachable with the remaining activities.");
    }
    output
}
