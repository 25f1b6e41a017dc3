use uuid::Uuid;

use crate::config::GradingPolicy;
use crate::models::{GradeEntry, Period, SimulationResult};
use crate::rules;

/// Read-only source of recorded grades.
pub trait GradeRepository {
    fn entries_for(&self, student_id: Uuid, subject_id: Uuid) -> Vec<GradeEntry>;
}

/// Entries loaded up front for a single computation.
#[derive(Debug, Clone, Default)]
pub struct EntrySnapshot {
    entries: Vec<GradeEntry>,
}

impl EntrySnapshot {
    pub fn new(entries: Vec<GradeEntry>) -> Self {
        Self { entries }
    }
}

impl GradeRepository for EntrySnapshot {
    fn entries_for(&self, student_id: Uuid, subject_id: Uuid) -> Vec<GradeEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.student_id == student_id && entry.subject_id == subject_id)
            .cloned()
            .collect()
    }
}

pub struct GradeService<'a, R> {
    repository: &'a R,
    policy: GradingPolicy,
}

impl<'a, R: GradeRepository> GradeService<'a, R> {
    pub fn new(repository: &'a R, policy: GradingPolicy) -> Self {
        Self { repository, policy }
    }

    /// Weighted sum of one period's entries. A period with no entries is 0.0.
    pub fn period_average(&self, student_id: Uuid, subject_id: Uuid, period: Period) -> f64 {
        let entries = self.repository.entries_for(student_id, subject_id);
        weighted_period_sum(&entries, period)
    }

    pub fn period_averages(&self, student_id: Uuid, subject_id: Uuid) -> [f64; 3] {
        let entries = self.repository.entries_for(student_id, subject_id);
        Period::ALL.map(|period| weighted_period_sum(&entries, period))
    }

    /// Empty periods are weighted in as zeros rather than skipped.
    pub fn final_average(&self, student_id: Uuid, subject_id: Uuid) -> f64 {
        let averages = self.period_averages(student_id, subject_id);
        let combined: f64 = Period::ALL
            .iter()
            .map(|period| averages[period.index()] * self.policy.period_weight(*period))
            .sum();
        rules::round2(combined)
    }

    /// Whether the weights recorded for `period` add up to a full 100%.
    pub fn period_weights_complete(&self, student_id: Uuid, subject_id: Uuid, period: Period) -> bool {
        let weights: Vec<f64> = self
            .repository
            .entries_for(student_id, subject_id)
            .iter()
            .filter(|entry| entry.period == period)
            .map(|entry| entry.weight)
            .collect();
        rules::percentages_sum_to_100(&weights)
    }

    /// The target is not re-validated here; callers check it with `valid_grade`.
    pub fn simulate_required_score(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        target_score: f64,
    ) -> SimulationResult {
        let entries = self.repository.entries_for(student_id, subject_id);
        let current_average = self.final_average(student_id, subject_id);

        let recorded_weight: f64 = entries.iter().map(|entry| entry.weight).sum();
        let completed_weight_pct = recorded_weight / self.policy.completed_weight_divisor;
        let missing_weight_pct = 100.0 - completed_weight_pct;

        let required_score = rules::infer_required_score(
            current_average,
            target_score,
            completed_weight_pct,
            missing_weight_pct,
        );

        let judged = if self.policy.reachability_checks_clamped_value {
            required_score
        } else {
            rules::required_score_unclamped(
                current_average,
                target_score,
                completed_weight_pct,
                missing_weight_pct,
            )
        };

        tracing::debug!(
            %student_id,
            %subject_id,
            target_score,
            completed_weight_pct,
            required_score,
            "simulated required score"
        );

        SimulationResult {
            current_average,
            target_score,
            completed_weight_pct,
            missing_weight_pct,
            required_score,
            reachable: rules::valid_grade(judged),
        }
    }
}

fn weighted_period_sum(entries: &[GradeEntry], period: Period) -> f64 {
    let mut in_period = entries.iter().filter(|entry| entry.period == period).peekable();
    if in_period.peek().is_none() {
        return 0.0;
    }

    let sum: f64 = in_period.map(|entry| entry.score * (entry.weight / 100.0)).sum();
    rules::round2(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::cell::Cell;

    fn entry(student_id: Uuid, subject_id: Uuid, period: Period, score: f64, weight: f64) -> GradeEntry {
        GradeEntry {
            id: Uuid::new_v4(),
            student_id,
            subject_id,
            period,
            activity: "Quiz".to_string(),
            score,
            weight,
            recorded_at: Utc::now() - Duration::days(1),
            professor_id: Uuid::new_v4(),
            justification: "Graded against the published rubric".to_string(),
        }
    }

    struct CountingRepository {
        snapshot: EntrySnapshot,
        calls: Cell<usize>,
    }

    impl GradeRepository for CountingRepository {
        fn entries_for(&self, student_id: Uuid, subject_id: Uuid) -> Vec<GradeEntry> {
            self.calls.set(self.calls.get() + 1);
            self.snapshot.entries_for(student_id, subject_id)
        }
    }

    #[test]
    fn empty_period_averages_to_zero() {
        let snapshot = EntrySnapshot::default();
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        let average = service.period_average(Uuid::new_v4(), Uuid::new_v4(), Period::Second);
        assert_eq!(average, 0.0);
    }

    #[test]
    fn period_average_is_weighted_sum() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 4.0, 60.0),
            entry(student, subject, Period::First, 3.0, 40.0),
            entry(student, subject, Period::Second, 1.0, 100.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        assert_eq!(service.period_average(student, subject, Period::First), 3.6);
        assert_eq!(service.period_average(student, subject, Period::Second), 1.0);
    }

    #[test]
    fn period_average_ties_round_to_even() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 2.5, 25.0),
            entry(student, subject, Period::Second, 0.3, 15.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        assert_eq!(service.period_average(student, subject, Period::First), 0.62);
        assert_eq!(service.period_average(student, subject, Period::Second), 0.04);
    }

    #[test]
    fn entries_of_other_students_and_subjects_are_ignored() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 5.0, 100.0),
            entry(Uuid::new_v4(), subject, Period::First, 1.0, 100.0),
            entry(student, Uuid::new_v4(), Period::First, 1.0, 100.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        assert_eq!(service.period_average(student, subject, Period::First), 5.0);
    }

    #[test]
    fn missing_periods_drag_final_average_down() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 4.0, 60.0),
            entry(student, subject, Period::First, 3.0, 40.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        assert_eq!(service.final_average(student, subject), 1.08);
    }

    #[test]
    fn final_average_uses_period_weights() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 3.0, 100.0),
            entry(student, subject, Period::Second, 4.0, 100.0),
            entry(student, subject, Period::Third, 5.0, 100.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        // 0.9 + 1.2 + 2.0
        assert_eq!(service.final_average(student, subject), 4.1);
    }

    #[test]
    fn final_average_is_repeatable() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 3.3, 50.0),
            entry(student, subject, Period::Third, 4.7, 25.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        let first = service.final_average(student, subject);
        let second = service.final_average(student, subject);
        assert_eq!(first, second);
    }

    #[test]
    fn service_reads_fresh_entries_on_every_call() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let repository = CountingRepository {
            snapshot: EntrySnapshot::new(vec![entry(student, subject, Period::First, 4.0, 100.0)]),
            calls: Cell::new(0),
        };
        let service = GradeService::new(&repository, GradingPolicy::default());
        service.final_average(student, subject);
        service.final_average(student, subject);
        assert_eq!(repository.calls.get(), 2);
    }

    #[test]
    fn flags_periods_with_incomplete_weights() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 4.0, 60.0),
            entry(student, subject, Period::First, 3.0, 40.0),
            entry(student, subject, Period::Second, 3.0, 70.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        assert!(service.period_weights_complete(student, subject, Period::First));
        assert!(!service.period_weights_complete(student, subject, Period::Second));
        assert!(!service.period_weights_complete(student, subject, Period::Third));
    }

    #[test]
    fn simulation_divides_recorded_weight_by_three() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![
            entry(student, subject, Period::First, 4.0, 60.0),
            entry(student, subject, Period::First, 3.0, 40.0),
            entry(student, subject, Period::Second, 3.0, 50.0),
        ]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        let result = service.simulate_required_score(student, subject, 3.0);

        assert_eq!(result.current_average, 1.53);
        assert!((result.completed_weight_pct - 50.0).abs() < 1e-9);
        assert!((result.missing_weight_pct - 50.0).abs() < 1e-9);
        // (3.0 - 1.53 * 0.5) * 100 / 50
        assert!((result.required_score - 4.47).abs() < 1e-9);
        assert!(result.reachable);
    }

    #[test]
    fn clamped_reachability_hides_unreachable_targets() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![entry(student, subject, Period::First, 1.0, 100.0)]);
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        let result = service.simulate_required_score(student, subject, 5.0);

        assert_eq!(result.required_score, 5.0);
        // Judged after clamping, so an impossible target still reads as reachable.
        assert!(result.reachable);
    }

    #[test]
    fn pre_clamp_policy_reports_unreachable_targets() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(vec![entry(student, subject, Period::First, 1.0, 100.0)]);
        let policy = GradingPolicy {
            reachability_checks_clamped_value: false,
            ..GradingPolicy::default()
        };
        let service = GradeService::new(&snapshot, policy);
        let result = service.simulate_required_score(student, subject, 5.0);

        assert_eq!(result.required_score, 5.0);
        assert!(!result.reachable);
    }

    #[test]
    fn fully_recorded_subject_needs_nothing_more() {
        let (student, subject) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = EntrySnapshot::new(
            Period::ALL
                .iter()
                .map(|period| entry(student, subject, *period, 2.0, 100.0))
                .collect(),
        );
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        let result = service.simulate_required_score(student, subject, 5.0);

        assert_eq!(result.missing_weight_pct, 0.0);
        assert_eq!(result.required_score, 0.0);
        assert!(result.reachable);
    }

    #[test]
    fn no_entries_means_everything_is_missing() {
        let snapshot = EntrySnapshot::default();
        let service = GradeService::new(&snapshot, GradingPolicy::default());
        let result = service.simulate_required_score(Uuid::new_v4(), Uuid::new_v4(), 3.5);

        assert_eq!(result.current_average, 0.0);
        assert_eq!(result.completed_weight_pct, 0.0);
        assert_eq!(result.missing_weight_pct, 100.0);
        assert!((result.required_score - 3.5).abs() < 1e-9);
    }
}
