//! crates/lms_core/src/completion.rs
//!
//! The completion aggregator: pure derivation of course-level completion
//! from a set of lecture progress entries. The tracker calls this
//! explicitly after every mutation, so the recomputation contract is
//! visible at the call site and testable in isolation. Nothing in here
//! touches persistence.

use crate::domain::LectureProgress;

/// Derived completion fields for a `CourseProgress` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rollup {
    pub completion_percentage: u8,
    pub is_completed: bool,
}

impl Rollup {
    /// The rollup of a record with nothing completed.
    pub fn zero() -> Self {
        Self {
            completion_percentage: 0,
            is_completed: false,
        }
    }
}

/// Number of entries marked completed. Entries whose lecture was removed
/// from the course after the fact still count; `total_lectures` always
/// reflects the current course, so percentages can be recomputed downward
/// when lectures are added later.
pub fn completed_count(entries: &[LectureProgress]) -> usize {
    entries.iter().filter(|lp| lp.is_completed).count()
}

/// Derives the completion rollup for an entry set against the course's
/// current lecture count (fetched by the caller at call time, never
/// cached on the progress record).
pub fn rollup(entries: &[LectureProgress], total_lectures: usize) -> Rollup {
    let percentage = percentage(completed_count(entries), total_lectures);
    Rollup {
        completion_percentage: percentage,
        is_completed: percentage == 100 && total_lectures > 0,
    }
}

/// round(100 * completed / total) with round-half-up semantics, clamped
/// to 0..=100. Zero when the course has no lectures.
fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let raw = (200 * completed as u64 + total as u64) / (2 * total as u64);
    raw.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(completed: bool) -> LectureProgress {
        LectureProgress::new(Uuid::new_v4(), completed, 0.0, Utc::now())
    }

    fn entries(completed: usize, pending: usize) -> Vec<LectureProgress> {
        let mut set: Vec<LectureProgress> = (0..completed).map(|_| entry(true)).collect();
        set.extend((0..pending).map(|_| entry(false)));
        set
    }

    #[test]
    fn quarter_steps_over_four_lectures() {
        for (done, expected) in [(0, 0), (1, 25), (2, 50), (3, 75), (4, 100)] {
            let set = entries(done, 4 - done);
            assert_eq!(rollup(&set, 4).completion_percentage, expected);
        }
    }

    #[test]
    fn rounds_half_up() {
        // 1/8 = 12.5% rounds to 13, 1/3 = 33.33% rounds to 33.
        assert_eq!(rollup(&entries(1, 7), 8).completion_percentage, 13);
        assert_eq!(rollup(&entries(1, 2), 3).completion_percentage, 33);
        assert_eq!(rollup(&entries(2, 1), 3).completion_percentage, 67);
    }

    #[test]
    fn zero_lecture_course_never_completes() {
        // Division-by-zero guard: even stray completed entries derive 0%.
        let derived = rollup(&entries(3, 0), 0);
        assert_eq!(derived.completion_percentage, 0);
        assert!(!derived.is_completed);
    }

    #[test]
    fn completed_iff_exactly_one_hundred() {
        let full = rollup(&entries(4, 0), 4);
        assert_eq!(full.completion_percentage, 100);
        assert!(full.is_completed);

        let partial = rollup(&entries(3, 1), 4);
        assert!(!partial.is_completed);
    }

    #[test]
    fn stale_entries_can_push_percentage_past_naive_ratio_but_clamp_holds() {
        // 5 completed entries against a course trimmed down to 4 lectures.
        let derived = rollup(&entries(5, 0), 4);
        assert_eq!(derived.completion_percentage, 100);
        assert!(derived.is_completed);
    }

    #[test]
    fn adding_lectures_recomputes_downward() {
        let set = entries(2, 0);
        assert_eq!(rollup(&set, 2).completion_percentage, 100);
        // Two more lectures appended to the course after full completion.
        assert_eq!(rollup(&set, 4).completion_percentage, 50);
    }
}
