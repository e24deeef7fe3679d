use crate::model::{Minutes, StaffEntry, TimeRange, WorkWindow};

/// Candidate grid step. Slots always start on a quarter-hour boundary
/// relative to the window open, whatever the service duration.
pub const SLOT_STEP_MIN: Minutes = 15;

/// Candidate slots of one working window: step a cursor from `open` in
/// fixed increments, emit `[cursor, cursor + duration)` while it fits
/// before `close`, and drop anything overlapping the rest break.
/// Boundary-touching the break is allowed (strict overlap test).
pub fn window_slots(window: &WorkWindow, duration: Minutes) -> Vec<TimeRange> {
    let mut slots = Vec::new();
    if duration <= 0 {
        return slots;
    }
    let mut cursor = window.open;
    while cursor + duration <= window.close {
        let candidate = TimeRange::new(cursor, cursor + duration);
        let in_break = window
            .break_range
            .as_ref()
            .is_some_and(|b| candidate.overlaps(b));
        if !in_break {
            slots.push(candidate);
        }
        cursor += SLOT_STEP_MIN;
    }
    slots
}

/// All candidate slots of one contrôleur. Split shifts are independent
/// windows; their candidates are concatenated.
pub fn staff_slots(entry: &StaffEntry, duration: Minutes) -> Vec<TimeRange> {
    entry
        .windows
        .iter()
        .flat_map(|w| window_slots(w, duration))
        .collect()
}
