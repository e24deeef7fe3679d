use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — wall-clock instants (history stamps, cache deadlines).
pub type Ms = i64;

/// Minutes since midnight — the only time-of-day type.
pub type Minutes = i32;

pub const DAY_MINUTES: Minutes = 24 * 60;

/// Half-open interval `[start, end)` in minutes of one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minutes,
    pub end: Minutes,
}

impl TimeRange {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minutes {
        self.end - self.start
    }

    /// Strict overlap: touching boundaries are NOT overlapping, so
    /// back-to-back bookings with zero gap are allowed.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Fixed vocabularies ───────────────────────────────────────────

/// Inspection kind requested by the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    /// Periodic technical inspection.
    Ctp,
    /// Follow-up re-inspection (contre-visite).
    Cv,
    /// Voluntary inspection.
    Cvol,
}

impl ControlType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ctp" => Some(Self::Ctp),
            "cv" => Some(Self::Cv),
            "cvol" => Some(Self::Cvol),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ctp => "ctp",
            Self::Cv => "cv",
            Self::Cvol => "cvol",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    /// Private car.
    Vp,
    /// Light vehicle.
    Vl,
    /// Light utility vehicle.
    Vu,
    /// Motorcycle.
    L,
    /// Heavy goods vehicle.
    Pl,
    /// Coach / bus.
    Tc,
}

impl VehicleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vp" => Some(Self::Vp),
            "vl" => Some(Self::Vl),
            "vu" => Some(Self::Vu),
            "l" => Some(Self::L),
            "pl" => Some(Self::Pl),
            "tc" => Some(Self::Tc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vp => "vp",
            Self::Vl => "vl",
            Self::Vu => "vu",
            Self::L => "l",
            Self::Pl => "pl",
            Self::Tc => "tc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Essence,
    Diesel,
    Gpl,
    Gnv,
    Electrique,
    Hybride,
}

impl FuelType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "essence" => Some(Self::Essence),
            "diesel" => Some(Self::Diesel),
            "gpl" => Some(Self::Gpl),
            "gnv" => Some(Self::Gnv),
            "electrique" => Some(Self::Electrique),
            "hybride" => Some(Self::Hybride),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essence => "essence",
            Self::Diesel => "diesel",
            Self::Gpl => "gpl",
            Self::Gnv => "gnv",
            Self::Electrique => "electrique",
            Self::Hybride => "hybride",
        }
    }

    /// GPL and GNV vehicles need a gas-qualified contrôleur.
    pub fn is_gas(&self) -> bool {
        matches!(self, Self::Gpl | Self::Gnv)
    }
}

/// Qualification credential (agrément) held by a contrôleur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualification {
    Vl,
    L,
    Pl,
    Gaz,
}

impl Qualification {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vl" => Some(Self::Vl),
            "l" => Some(Self::L),
            "pl" => Some(Self::Pl),
            "gaz" => Some(Self::Gaz),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Created,
    Confirmed,
    Reminded,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    /// History marker only — never a resting row status. A successful
    /// reschedule logs `prev → Rescheduled` and the row keeps its prior
    /// resting status under the same identity.
    Rescheduled,
}

impl AppointmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "confirmed" => Some(Self::Confirmed),
            "reminded" => Some(Self::Reminded),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            "rescheduled" => Some(Self::Rescheduled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::Reminded => "REMINDED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::NoShow => "NO_SHOW",
            Self::Rescheduled => "RESCHEDULED",
        }
    }

    /// The single active-record predicate: does a row in this status still
    /// occupy its time slot? Every conflict query goes through here.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded when an inspection completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Accepted,
    SubmittedForRecheck,
    Refused,
}

impl ResultCode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "accepted" => Some(Self::Accepted),
            "submitted_for_recheck" => Some(Self::SubmittedForRecheck),
            "refused" => Some(Self::Refused),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::SubmittedForRecheck => "submitted_for_recheck",
            Self::Refused => "refused",
        }
    }

    /// Refused and submitted results open a contre-visite window.
    pub fn requires_recheck(&self) -> bool {
        matches!(self, Self::SubmittedForRecheck | Self::Refused)
    }
}

// ── Schedules and blocks (read-only feeds) ───────────────────────

/// One working window of a contrôleur: `[open, close)` with an optional
/// rest break inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkWindow {
    pub open: Minutes,
    pub close: Minutes,
    pub break_range: Option<TimeRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffEntry {
    pub id: Ulid,
    pub windows: Vec<WorkWindow>,
    pub qualifications: Vec<Qualification>,
}

/// Day schedule of one center, published by the external planning function.
/// Re-publishing replaces the previous schedule for that center/date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSchedule {
    pub center_id: Ulid,
    pub date: NaiveDate,
    pub closed: bool,
    pub entries: Vec<StaffEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// Repeats every day on and after the anchor date.
    Daily,
    /// Repeats on the anchor's weekday on and after the anchor date.
    Weekly,
}

impl Recurrence {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// Manual closure of a time range, for one contrôleur or the whole facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedInterval {
    pub id: Ulid,
    pub center_id: Ulid,
    /// Anchor date; with a recurrence the block also applies to later dates.
    pub date: NaiveDate,
    /// None = facility-wide, applies to every contrôleur that day.
    pub staff_id: Option<Ulid>,
    pub range: TimeRange,
    pub reason: String,
    pub recurrence: Option<Recurrence>,
}

impl BlockedInterval {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match self.recurrence {
            None => self.date == date,
            Some(Recurrence::Daily) => date >= self.date,
            Some(Recurrence::Weekly) => {
                date >= self.date && date.weekday() == self.date.weekday()
            }
        }
    }

    pub fn applies_to_staff(&self, staff_id: Ulid) -> bool {
        self.staff_id.is_none_or(|s| s == staff_id)
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub center_id: Ulid,
    pub date: NaiveDate,
    pub range: TimeRange,
    /// Immutable once set; always equals `range.duration_min()`.
    pub duration_min: Minutes,
    pub status: AppointmentStatus,
    /// Unassigned until confirmation names a contrôleur.
    pub staff_id: Option<Ulid>,
    pub control: ControlType,
    pub vehicle: VehicleType,
    pub fuel: FuelType,
    pub result: Option<ResultCode>,
    pub recheck_due: Option<NaiveDate>,
}

/// What a caller submits to book a slot. End time and duration are absent:
/// the guard recomputes both server-side.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub center_id: Ulid,
    pub date: NaiveDate,
    pub start: Minutes,
    pub staff_id: Option<Ulid>,
    pub control: ControlType,
    pub vehicle: VehicleType,
    pub fuel: FuelType,
    pub actor: Option<String>,
}

// ── History trail ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: String,
    pub after: String,
}

impl FieldChange {
    pub fn new(field: &str, before: impl ToString, after: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            before: before.to_string(),
            after: after.to_string(),
        }
    }
}

/// Append-only log entry, one per transition. Never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub appointment_id: Ulid,
    /// None for the creation entry.
    pub prev_status: Option<AppointmentStatus>,
    pub new_status: AppointmentStatus,
    pub changes: Vec<FieldChange>,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub at: Ms,
}

// ── Per-center state ─────────────────────────────────────────────

/// All scheduling state of one center. Guarded by a `RwLock` at the engine
/// level; the write guard is the booking transaction.
#[derive(Debug, Clone)]
pub struct CenterState {
    pub id: Ulid,
    pub schedules: HashMap<NaiveDate, StaffSchedule>,
    pub blocks: Vec<BlockedInterval>,
    pub appointments: HashMap<Ulid, Appointment>,
    /// Date → appointment ids, the day index every conflict query walks.
    pub by_day: HashMap<NaiveDate, Vec<Ulid>>,
}

impl CenterState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            schedules: HashMap::new(),
            blocks: Vec::new(),
            appointments: HashMap::new(),
            by_day: HashMap::new(),
        }
    }

    pub fn insert_appointment(&mut self, appt: Appointment) {
        self.by_day.entry(appt.date).or_default().push(appt.id);
        self.appointments.insert(appt.id, appt);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let appt = self.appointments.remove(&id)?;
        if let Some(ids) = self.by_day.get_mut(&appt.date) {
            ids.retain(|a| *a != id);
        }
        Some(appt)
    }

    /// Appointments of one day, any status.
    pub fn day_appointments(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        self.by_day
            .get(&date)
            .into_iter()
            .flatten()
            .filter_map(|id| self.appointments.get(id))
    }

    /// Blocks applicable on `date`, recurrence expanded.
    pub fn blocks_on(&self, date: NaiveDate) -> impl Iterator<Item = &BlockedInterval> {
        self.blocks.iter().filter(move |b| b.applies_on(date))
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<BlockedInterval> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, one variant per mutation. Replaying the WAL in
/// order reconstructs the full engine state including history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SchedulePublished {
        schedule: StaffSchedule,
    },
    BlockAdded {
        block: BlockedInterval,
    },
    BlockRemoved {
        id: Ulid,
        center_id: Ulid,
    },
    AppointmentCreated {
        appt: Appointment,
        entry: HistoryEntry,
    },
    /// `appt` is the fully updated row; `old_center_id` lets replay move it
    /// out of its previous center.
    AppointmentRescheduled {
        old_center_id: Ulid,
        appt: Appointment,
        entry: HistoryEntry,
    },
    StatusChanged {
        appt: Appointment,
        entry: HistoryEntry,
    },
}

impl Event {
    /// The center whose state this event mutates.
    pub fn center_id(&self) -> Ulid {
        match self {
            Event::SchedulePublished { schedule } => schedule.center_id,
            Event::BlockAdded { block } => block.center_id,
            Event::BlockRemoved { center_id, .. } => *center_id,
            Event::AppointmentCreated { appt, .. }
            | Event::AppointmentRescheduled { appt, .. }
            | Event::StatusChanged { appt, .. } => appt.center_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub staff_id: Ulid,
    pub start: Minutes,
    pub end: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub duration_min: Minutes,
    pub slots: Vec<SlotInfo>,
    pub count: usize,
}
