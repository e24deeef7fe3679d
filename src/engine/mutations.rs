use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflict, now_ms, validate_time_range};
use super::duration::service_duration;
use super::lifecycle::check_transition;
use super::{Engine, EngineError};

fn validate_actor(actor: &Option<String>) -> Result<(), EngineError> {
    if actor.as_ref().is_some_and(|a| a.len() > MAX_ACTOR_LEN) {
        return Err(EngineError::Validation("actor too long"));
    }
    Ok(())
}

fn validate_reason(reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation("reason must not be empty"));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::Validation("reason too long"));
    }
    Ok(())
}

impl Engine {
    // ── Read-only feeds from collaborators ───────────────────────

    /// Store a day schedule published by the planning function. Replaces
    /// any previous schedule for that center/date.
    pub async fn publish_schedule(&self, schedule: StaffSchedule) -> Result<(), EngineError> {
        if schedule.entries.len() > MAX_STAFF_PER_DAY {
            return Err(EngineError::LimitExceeded("too many staff entries"));
        }
        for entry in &schedule.entries {
            if entry.windows.len() > MAX_WINDOWS_PER_STAFF {
                return Err(EngineError::LimitExceeded("too many windows for one staff"));
            }
            for w in &entry.windows {
                validate_time_range(&TimeRange {
                    start: w.open,
                    end: w.close,
                })?;
                if let Some(b) = &w.break_range {
                    validate_time_range(b)?;
                    if b.start < w.open || b.end > w.close {
                        return Err(EngineError::Validation("break outside working window"));
                    }
                }
            }
        }

        let center_id = schedule.center_id;
        let cs = self.get_or_create_center(center_id)?;
        let mut guard = cs.write().await;
        let event = Event::SchedulePublished { schedule };
        self.persist_and_apply(center_id, &mut guard, &event).await
    }

    pub async fn add_block(&self, block: BlockedInterval) -> Result<(), EngineError> {
        validate_time_range(&block.range)?;
        validate_reason(&block.reason)?;

        let center_id = block.center_id;
        let cs = self.get_or_create_center(center_id)?;
        let mut guard = cs.write().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_CENTER {
            return Err(EngineError::LimitExceeded("too many blocks on center"));
        }
        if guard.blocks.iter().any(|b| b.id == block.id) {
            return Err(EngineError::AlreadyExists(block.id));
        }

        let event = Event::BlockAdded { block };
        self.persist_and_apply(center_id, &mut guard, &event).await
    }

    pub async fn remove_block(&self, id: Ulid) -> Result<(), EngineError> {
        let center_id = self
            .block_index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))?;
        let cs = self
            .get_center(&center_id)
            .ok_or(EngineError::NotFound(center_id))?;
        let mut guard = cs.write().await;

        let event = Event::BlockRemoved { id, center_id };
        self.persist_and_apply(center_id, &mut guard, &event).await
    }

    // ── BookingConflictGuard: creation ───────────────────────────

    /// Book a slot. The submitted request carries no end time or duration;
    /// both are recomputed here, and the overlap re-check runs under the
    /// center write guard so concurrent writers serialize.
    pub async fn create_appointment(
        &self,
        req: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        validate_actor(&req.actor)?;
        let duration = service_duration(req.control, req.vehicle, req.fuel);
        let range = TimeRange {
            start: req.start,
            end: req.start.saturating_add(duration),
        };
        validate_time_range(&range)?;
        if self.appt_index.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let cs = self.get_or_create_center(req.center_id)?;
        let mut guard = cs.write().await;
        if guard.day_appointments(req.date).count() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments that day"));
        }

        if let Some(conflict_with) =
            find_conflict(&guard, req.date, req.staff_id, &range, None)
        {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable { conflict_with });
        }

        let appt = Appointment {
            id: req.id,
            center_id: req.center_id,
            date: req.date,
            range,
            duration_min: duration,
            status: AppointmentStatus::Created,
            staff_id: req.staff_id,
            control: req.control,
            vehicle: req.vehicle,
            fuel: req.fuel,
            result: None,
            recheck_due: None,
        };
        let entry = HistoryEntry {
            appointment_id: appt.id,
            prev_status: None,
            new_status: AppointmentStatus::Created,
            changes: Vec::new(),
            actor: req.actor,
            reason: None,
            at: now_ms(),
        };

        let event = Event::AppointmentCreated {
            appt: appt.clone(),
            entry,
        };
        self.persist_and_apply(req.center_id, &mut guard, &event)
            .await?;
        Ok(appt)
    }

    // ── BookingConflictGuard: reschedule ─────────────────────────

    /// Move an appointment to a new date/start (optionally a new center or
    /// contrôleur). The row keeps its resting status; the history entry
    /// carries the RESCHEDULED marker and the field diffs. On conflict the
    /// original timing is left untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_start: Minutes,
        new_center: Option<Ulid>,
        new_staff: Option<Ulid>,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_actor(&actor)?;
        if let Some(r) = &reason {
            validate_reason(r)?;
        }

        let old_center_id = self
            .center_for_appointment(&id)
            .ok_or(EngineError::NotFound(id))?;
        let target_center_id = new_center.unwrap_or(old_center_id);

        // Lock in sorted id order so two cross-center reschedules can't
        // deadlock each other.
        let old_cs = self
            .get_center(&old_center_id)
            .ok_or(EngineError::NotFound(old_center_id))?;
        let (mut old_guard, mut target_guard) = if target_center_id == old_center_id {
            (old_cs.write_owned().await, None)
        } else {
            let target_cs = self.get_or_create_center(target_center_id)?;
            if target_center_id < old_center_id {
                let t = target_cs.write_owned().await;
                (old_cs.write_owned().await, Some(t))
            } else {
                let o = old_cs.write_owned().await;
                (o, Some(target_cs.write_owned().await))
            }
        };

        let old = old_guard
            .appointments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        check_transition(old.status, AppointmentStatus::Rescheduled)?;

        // Duration is immutable; the static table makes the recomputation
        // land on the stored value.
        let duration = service_duration(old.control, old.vehicle, old.fuel);
        let range = TimeRange {
            start: new_start,
            end: new_start.saturating_add(duration),
        };
        validate_time_range(&range)?;

        let staff_id = new_staff.or(old.staff_id);
        let conflict_state = target_guard.as_deref().unwrap_or(&*old_guard);
        if let Some(conflict_with) =
            find_conflict(conflict_state, new_date, staff_id, &range, Some(id))
        {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable { conflict_with });
        }

        let mut appt = old.clone();
        appt.center_id = target_center_id;
        appt.date = new_date;
        appt.range = range;
        appt.staff_id = staff_id;

        let mut changes = Vec::new();
        if old.date != new_date {
            changes.push(FieldChange::new("date", old.date, new_date));
        }
        if old.range.start != range.start {
            changes.push(FieldChange::new("start", old.range.start, range.start));
            changes.push(FieldChange::new("end", old.range.end, range.end));
        }
        if old.center_id != target_center_id {
            changes.push(FieldChange::new("center_id", old.center_id, target_center_id));
        }
        if old.staff_id != staff_id {
            changes.push(FieldChange::new(
                "staff_id",
                fmt_opt(old.staff_id),
                fmt_opt(staff_id),
            ));
        }

        let entry = HistoryEntry {
            appointment_id: id,
            prev_status: Some(old.status),
            new_status: AppointmentStatus::Rescheduled,
            changes,
            actor,
            reason,
            at: now_ms(),
        };
        let event = Event::AppointmentRescheduled {
            old_center_id,
            appt: appt.clone(),
            entry,
        };

        match target_guard.as_deref_mut() {
            None => {
                self.persist_and_apply(old_center_id, &mut old_guard, &event)
                    .await?;
            }
            Some(target) => {
                self.wal_append(&event).await?;
                old_guard.remove_appointment(id);
                target.insert_appointment(appt.clone());
                self.index_event(&event);
                self.invalidate_cache(&event);
                self.notify.send(old_center_id, &event);
                self.notify.send(target_center_id, &event);
            }
        }
        Ok(appt)
    }

    // ── AppointmentLifecycle transitions ─────────────────────────

    /// Confirm a booking, optionally assigning the contrôleur. An
    /// assignment re-runs the conflict check against that contrôleur's day.
    pub async fn confirm(
        &self,
        id: Ulid,
        staff: Option<Ulid>,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_actor(&actor)?;
        let (center_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let old = guard
            .appointments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        check_transition(old.status, AppointmentStatus::Confirmed)?;

        let staff_id = staff.or(old.staff_id);
        if staff_id != old.staff_id
            && let Some(conflict_with) =
                find_conflict(&guard, old.date, staff_id, &old.range, Some(id))
        {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable { conflict_with });
        }

        let mut appt = old.clone();
        appt.status = AppointmentStatus::Confirmed;
        appt.staff_id = staff_id;

        let mut changes = Vec::new();
        if old.staff_id != staff_id {
            changes.push(FieldChange::new(
                "staff_id",
                fmt_opt(old.staff_id),
                fmt_opt(staff_id),
            ));
        }
        self.apply_status_change(center_id, &mut guard, old.status, appt, changes, actor, None)
            .await
    }

    /// Mark the J-1 reminder as sent. Invoked by the reminder dispatcher.
    pub async fn remind(&self, id: Ulid, actor: Option<String>) -> Result<Appointment, EngineError> {
        self.simple_transition(id, AppointmentStatus::Reminded, actor, None)
            .await
    }

    pub async fn start(&self, id: Ulid, actor: Option<String>) -> Result<Appointment, EngineError> {
        self.simple_transition(id, AppointmentStatus::InProgress, actor, None)
            .await
    }

    /// Record the inspection result. Submitted/refused results open a
    /// contre-visite window and must carry its due date.
    pub async fn complete(
        &self,
        id: Ulid,
        result: ResultCode,
        recheck_due: Option<NaiveDate>,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_actor(&actor)?;
        if result.requires_recheck() && recheck_due.is_none() {
            return Err(EngineError::Validation(
                "result requires a recheck due date",
            ));
        }

        let (center_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let old = guard
            .appointments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        check_transition(old.status, AppointmentStatus::Completed)?;

        let mut appt = old.clone();
        appt.status = AppointmentStatus::Completed;
        appt.result = Some(result);
        appt.recheck_due = if result.requires_recheck() {
            recheck_due
        } else {
            None
        };

        let mut changes = vec![FieldChange::new("result", "", result.as_str())];
        if let Some(due) = appt.recheck_due {
            changes.push(FieldChange::new("recheck_due", "", due));
        }
        self.apply_status_change(center_id, &mut guard, old.status, appt, changes, actor, None)
            .await
    }

    pub async fn cancel(
        &self,
        id: Ulid,
        reason: String,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_reason(&reason)?;
        self.simple_transition(id, AppointmentStatus::Cancelled, actor, Some(reason))
            .await
    }

    pub async fn mark_no_show(
        &self,
        id: Ulid,
        actor: Option<String>,
    ) -> Result<Appointment, EngineError> {
        self.simple_transition(id, AppointmentStatus::NoShow, actor, None)
            .await
    }

    /// Shared path for transitions that change nothing but the status.
    async fn simple_transition(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        actor: Option<String>,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_actor(&actor)?;
        let (center_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let old = guard
            .appointments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        check_transition(old.status, to)?;

        let mut appt = old.clone();
        appt.status = to;
        self.apply_status_change(center_id, &mut guard, old.status, appt, Vec::new(), actor, reason)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_status_change(
        &self,
        center_id: Ulid,
        guard: &mut CenterState,
        prev_status: AppointmentStatus,
        appt: Appointment,
        changes: Vec<FieldChange>,
        actor: Option<String>,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        let entry = HistoryEntry {
            appointment_id: appt.id,
            prev_status: Some(prev_status),
            new_status: appt.status,
            changes,
            actor,
            reason,
            at: now_ms(),
        };
        let event = Event::StatusChanged {
            appt: appt.clone(),
            entry,
        };
        self.persist_and_apply(center_id, guard, &event).await?;
        Ok(appt)
    }
}

fn fmt_opt(id: Option<Ulid>) -> String {
    id.map(|u| u.to_string()).unwrap_or_default()
}
