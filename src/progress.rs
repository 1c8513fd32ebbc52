// Course completion ledger: idempotent module completion, recomputed
// percentage.

use chrono::Utc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::CourseProgress;

/// Integer percentage, round-half-up, matching the display math the rest of
/// the platform uses.
pub fn percentage(completed: usize, total: usize) -> i32 {
    debug_assert!(total > 0);
    ((completed * 100 + total / 2) / total) as i32
}

pub fn new_progress(user_id: &str, course_id: Uuid) -> CourseProgress {
    CourseProgress {
        user_id: user_id.to_string(),
        course_id,
        completed_modules: Vec::new(),
        progress: 0,
        enrolled_at: Utc::now(),
        last_accessed_module: None,
        last_accessed_at: None,
    }
}

/// Marks a module complete in place. Returns true if the completed set
/// changed. Re-completing a module refreshes the last-accessed fields but
/// never double counts or moves the percentage.
pub fn apply_completion(
    record: &mut CourseProgress,
    module_id: &str,
    total_modules: i64,
) -> Result<bool, ApiError> {
    if total_modules < 1 {
        return Err(ApiError::Validation(
            "total_modules must be at least 1".into(),
        ));
    }
    let already = record.completed_modules.iter().any(|m| m == module_id);
    if !already {
        record.completed_modules.push(module_id.to_string());
    }
    if record.completed_modules.len() as i64 > total_modules {
        return Err(ApiError::Validation(
            "completed modules exceed total_modules".into(),
        ));
    }
    record.progress = percentage(record.completed_modules.len(), total_modules as usize);
    record.last_accessed_module = Some(module_id.to_string());
    record.last_accessed_at = Some(Utc::now());
    Ok(!already)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(percentage(0, 4), 0);
        assert_eq!(percentage(1, 4), 25);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(5, 8), 63);
        assert_eq!(percentage(4, 4), 100);
    }

    #[test]
    fn four_module_scenario() {
        let mut rec = new_progress("user-1", Uuid::new_v4());
        assert!(apply_completion(&mut rec, "m1", 4).unwrap());
        assert_eq!(rec.progress, 25);

        // Completing the same module again changes nothing.
        assert!(!apply_completion(&mut rec, "m1", 4).unwrap());
        assert_eq!(rec.progress, 25);
        assert_eq!(rec.completed_modules.len(), 1);

        for m in ["m2", "m3", "m4"] {
            apply_completion(&mut rec, m, 4).unwrap();
        }
        assert_eq!(rec.progress, 100);
        assert_eq!(rec.last_accessed_module.as_deref(), Some("m4"));
    }

    #[test]
    fn progress_is_monotonic() {
        let mut rec = new_progress("user-1", Uuid::new_v4());
        let mut last = 0;
        for m in ["a", "b", "a", "c", "b", "d", "e"] {
            apply_completion(&mut rec, m, 5).unwrap();
            assert!(rec.progress >= last);
            last = rec.progress;
        }
        assert_eq!(rec.progress, 100);
    }

    #[test]
    fn rejects_bad_totals() {
        let mut rec = new_progress("user-1", Uuid::new_v4());
        assert!(apply_completion(&mut rec, "m1", 0).is_err());
        apply_completion(&mut rec, "m1", 2).unwrap();
        apply_completion(&mut rec, "m2", 2).unwrap();
        assert!(apply_completion(&mut rec, "m3", 2).is_err());
    }

    #[test]
    fn fresh_record_is_empty() {
        let rec = new_progress("user-1", Uuid::new_v4());
        assert_eq!(rec.progress, 0);
        assert!(rec.completed_modules.is_empty());
        assert!(rec.last_accessed_module.is_none());
    }
}
