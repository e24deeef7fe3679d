use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_SLOT_RESULTS;
use crate::model::*;

use super::duration::service_duration;
use super::eligibility::{eligible_staff, required_qualifications};
use super::slots::staff_slots;

// ── Availability Algorithm ────────────────────────────────────────

/// Compute the bookable slots of one center/date for a request, from the
/// center's current state. Pure over its inputs.
///
/// No published schedule, or a closed day, yields the duration with an
/// empty slot list — callers surface that as "nothing free", not an error.
/// Candidates come from every eligible contrôleur's working windows, minus
/// those overlapping an applicable block or a slot-occupying appointment,
/// sorted by (start, staff id) and truncated to the result cap.
pub fn availability_for_day(
    center: &CenterState,
    date: NaiveDate,
    control: ControlType,
    vehicle: VehicleType,
    fuel: FuelType,
) -> AvailabilityResult {
    let duration = service_duration(control, vehicle, fuel);

    let schedule = match center.schedules.get(&date) {
        Some(s) if !s.closed => s,
        _ => {
            return AvailabilityResult {
                duration_min: duration,
                slots: Vec::new(),
                count: 0,
            };
        }
    };

    let required = required_qualifications(vehicle, fuel);
    let blocks: Vec<&BlockedInterval> = center.blocks_on(date).collect();

    let mut slots: Vec<SlotInfo> = Vec::new();
    for staff in eligible_staff(&schedule.entries, &required) {
        let staff_blocks: Vec<&TimeRange> = blocks
            .iter()
            .filter(|b| b.applies_to_staff(staff.id))
            .map(|b| &b.range)
            .collect();

        for candidate in staff_slots(staff, duration) {
            if staff_blocks.iter().any(|b| candidate.overlaps(b)) {
                continue;
            }
            if booked_over(center, date, staff.id, &candidate) {
                continue;
            }
            slots.push(SlotInfo {
                staff_id: staff.id,
                start: candidate.start,
                end: candidate.end,
            });
        }
    }

    slots.sort_by(|a, b| a.start.cmp(&b.start).then(a.staff_id.cmp(&b.staff_id)));
    slots.truncate(MAX_SLOT_RESULTS);

    let count = slots.len();
    AvailabilityResult {
        duration_min: duration,
        slots,
        count,
    }
}

/// Is the candidate range taken for this contrôleur? Unassigned rows count
/// against every contrôleur, mirroring the write-path check.
fn booked_over(center: &CenterState, date: NaiveDate, staff_id: Ulid, range: &TimeRange) -> bool {
    center
        .day_appointments(date)
        .filter(|a| a.status.blocks_slot())
        .filter(|a| a.staff_id.is_none_or(|s| s == staff_id))
        .any(|a| a.range.overlaps(range))
}
