use chrono::{DateTime, Utc};

use crate::models::Role;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 5.0;
pub const JUSTIFICATION_MIN_CHARS: usize = 20;
pub const APPEAL_MIN_CHARS: usize = 20;

const WEIGHT_TOLERANCE: f64 = 0.01;

pub fn valid_grade(score: f64) -> bool {
    (MIN_SCORE..=MAX_SCORE).contains(&score)
}

pub fn valid_percentage(pct: f64) -> bool {
    (0.0..=100.0).contains(&pct)
}

pub fn valid_justification(text: &str) -> bool {
    trimmed_len(text) >= JUSTIFICATION_MIN_CHARS
}

/// Appeal filing applies `AppealPolicy::filing_min_chars` on top of this.
pub fn valid_appeal(text: &str) -> bool {
    trimmed_len(text) >= APPEAL_MIN_CHARS
}

pub fn trimmed_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// Whole elapsed days are compared, so 3 days 23 hours counts as 3 days.
pub fn within_appeal_window(graded_at: DateTime<Utc>, now: DateTime<Utc>, limit_days: i64) -> bool {
    (now - graded_at).num_days() <= limit_days
}

pub fn can_modify_grade(role: Role, is_owner: bool) -> bool {
    role == Role::Professor && is_owner
}

pub fn percentages_sum_to_100(weights: &[f64]) -> bool {
    (weights.iter().sum::<f64>() - 100.0).abs() < WEIGHT_TOLERANCE
}

/// Average needed on the missing weight to finish at `target_avg`, before clamping.
pub fn required_score_unclamped(
    current_avg: f64,
    target_avg: f64,
    remaining_weight_pct: f64,
    missing_weight_pct: f64,
) -> f64 {
    if missing_weight_pct == 0.0 {
        return 0.0;
    }

    let points_so_far = current_avg * (remaining_weight_pct / 100.0);
    let points_needed = target_avg - points_so_far;
    (points_needed * 100.0) / missing_weight_pct
}

pub fn infer_required_score(
    current_avg: f64,
    target_avg: f64,
    remaining_weight_pct: f64,
    missing_weight_pct: f64,
) -> f64 {
    required_score_unclamped(current_avg, target_avg, remaining_weight_pct, missing_weight_pct)
        .clamp(MIN_SCORE, MAX_SCORE)
}

/// Rounds to two decimals on the exact binary value; exact ties go to the even digit.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    // `scaled` may have rounded onto a .5 boundary the real product never hit.
    let error = value.mul_add(100.0, -scaled);
    let floor = scaled.floor();
    let rounded = if scaled - floor != 0.5 {
        scaled.round()
    } else if error > 0.0 {
        floor + 1.0
    } else if error < 0.0 {
        floor
    } else if floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    };
    rounded / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn graded_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn grade_bounds_are_inclusive() {
        for (score, expected) in [
            (-0.01, false),
            (0.0, true),
            (2.5, true),
            (5.0, true),
            (5.01, false),
            (f64::NAN, false),
        ] {
            assert_eq!(valid_grade(score), expected, "score {score}");
        }
    }

    #[test]
    fn percentage_bounds_are_inclusive() {
        assert!(valid_percentage(0.0));
        assert!(valid_percentage(100.0));
        assert!(!valid_percentage(100.5));
        assert!(!valid_percentage(-1.0));
    }

    #[test]
    fn text_length_ignores_surrounding_whitespace() {
        let nineteen = "a".repeat(19);
        assert!(!valid_justification(&format!("   {nineteen}   ")));
        assert!(valid_justification(&"a".repeat(20)));
        assert!(valid_appeal("  the rubric was misapplied  "));
        assert!(!valid_appeal("too short"));
        assert_eq!(trimmed_len("  ñandú "), 5);
    }

    #[test]
    fn appeal_window_truncates_to_whole_days() {
        let start = graded_at();
        assert!(within_appeal_window(start, start + Duration::days(3), 3));
        assert!(within_appeal_window(
            start,
            start + Duration::days(3) + Duration::seconds(1),
            3
        ));
        assert!(within_appeal_window(
            start,
            start + Duration::days(3) + Duration::hours(23),
            3
        ));
        assert!(!within_appeal_window(start, start + Duration::days(4), 3));
        assert!(within_appeal_window(start, start + Duration::days(5), 5));
    }

    #[test]
    fn only_owning_professor_may_modify() {
        assert!(can_modify_grade(Role::Professor, true));
        assert!(!can_modify_grade(Role::Professor, false));
        assert!(!can_modify_grade(Role::Student, true));
    }

    #[test]
    fn weights_must_total_one_hundred() {
        assert!(percentages_sum_to_100(&[60.0, 40.0]));
        assert!(percentages_sum_to_100(&[33.333, 33.333, 33.334]));
        assert!(!percentages_sum_to_100(&[60.0, 39.98]));
        assert!(!percentages_sum_to_100(&[]));
    }

    #[test]
    fn required_score_is_clamped_to_scale() {
        let required = infer_required_score(3.0, 4.0, 60.0, 40.0);
        assert_eq!(required, 5.0);
        let raw = required_score_unclamped(3.0, 4.0, 60.0, 40.0);
        assert!((raw - 5.5).abs() < 1e-9);

        assert_eq!(infer_required_score(4.5, 1.0, 90.0, 10.0), 0.0);
        assert!(required_score_unclamped(4.5, 1.0, 90.0, 10.0) < 0.0);
    }

    #[test]
    fn required_score_inside_scale_passes_through() {
        let required = infer_required_score(3.0, 3.0, 50.0, 50.0);
        assert!((required - 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_missing_weight_needs_nothing() {
        assert_eq!(infer_required_score(0.0, 5.0, 100.0, 0.0), 0.0);
        assert_eq!(infer_required_score(4.9, 0.5, 0.0, 0.0), 0.0);
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(3.6000000000000005), 3.6);
        assert_eq!(round2(1.084), 1.08);
        assert_eq!(round2(2.675_1), 2.68);
    }

    #[test]
    fn exact_ties_round_to_even_digit() {
        assert_eq!(round2(0.625), 0.62);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(1.125), 1.12);
        assert_eq!(round2(-0.625), -0.62);
    }

    #[test]
    fn near_ties_follow_the_stored_value() {
        // Both literals are stored just below the tie.
        assert_eq!(round2(0.045), 0.04);
        assert_eq!(round2(0.015), 0.01);
        assert_eq!(round2(0.3 * (15.0 / 100.0)), 0.04);
    }
}
