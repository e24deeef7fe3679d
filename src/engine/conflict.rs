use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as Ms
}

pub(crate) fn validate_time_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.start < 0 || range.end > DAY_MINUTES {
        return Err(EngineError::Validation("time outside 00:00-24:00"));
    }
    if range.start >= range.end {
        return Err(EngineError::Validation("start must be before end"));
    }
    Ok(())
}

/// Does `existing` compete for the same contrôleur as a candidate booking
/// for `staff`? An unassigned row blocks every contrôleur — it will be
/// assigned to one of them at confirmation.
fn staff_competes(existing: &Appointment, staff: Option<Ulid>) -> bool {
    match (existing.staff_id, staff) {
        (None, _) | (_, None) => true,
        (Some(a), Some(b)) => a == b,
    }
}

/// The write-path overlap check, run under the center write guard.
///
/// Scans the day's appointments for one whose status still occupies its
/// slot and whose `[start, end)` strictly overlaps the candidate, scoped to
/// the candidate's contrôleur when one is named. `exclude` drops the row's
/// own id on reschedule/re-validation.
pub(crate) fn find_conflict(
    center: &CenterState,
    date: NaiveDate,
    staff: Option<Ulid>,
    range: &TimeRange,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    center
        .day_appointments(date)
        .filter(|a| exclude != Some(a.id))
        .filter(|a| a.status.blocks_slot())
        .filter(|a| staff_competes(a, staff))
        .find(|a| a.range.overlaps(range))
        .map(|a| a.id)
}
